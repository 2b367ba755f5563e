use axum::{
    extract::{Extension, State},
    response::IntoResponse,
    Json,
};

use crate::{
    error::{ApiError, ApiResult},
    models::CurrentUser,
    services::referral_service,
    AppState,
};

use super::load_user;

// GET /api/referrals
pub async fn get_referrals(State(state): State<AppState>, Extension(u): Extension<CurrentUser>) -> ApiResult<impl IntoResponse> {
    let user = load_user(&state, u.id).await?;
    let stats = referral_service::stats(&state, &user)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(stats))
}
