use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use mongodb::bson::doc;

use crate::{error::ApiError, AppState};

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn health_db(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.run_command(doc! { "ping": 1 }, None).await {
        Ok(_) => (StatusCode::OK, "mongo: ok".to_string()).into_response(),
        Err(e) => {
            tracing::warn!("health db ping failed: {}", e);
            ApiError::unavailable("Database unavailable").into_response()
        }
    }
}

pub async fn not_found() -> impl IntoResponse {
    ApiError::not_found("Not found")
}
