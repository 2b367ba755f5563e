use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use crate::{AppState, controllers::kyc_controller, services::kyc_service::MAX_FILE_BYTES};

pub fn add_routes(router: Router<AppState>) -> Router<AppState> {
    router
        // file limit plus room for the multipart framing
        .route(
            "/api/kyc/documents",
            get(kyc_controller::get_documents)
                .post(kyc_controller::post_document)
                .layer(DefaultBodyLimit::max(MAX_FILE_BYTES + 1024 * 1024)),
        )
        .route("/api/admin/kyc/pending", get(kyc_controller::admin_get_pending))
        .route("/api/admin/kyc/documents/:id/file", get(kyc_controller::admin_get_file))
        .route("/api/admin/kyc/:user_id/review", post(kyc_controller::admin_post_review))
}
