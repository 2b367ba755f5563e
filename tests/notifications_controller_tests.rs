use axum::{
    http::{header, Request, StatusCode},
    routing::post,
    Extension, Router,
};
use mongodb::{bson::oid::ObjectId, Client};
use coinmarket::{controllers::{notifications_controller, withdrawals_controller, alerts_controller}, config, models::CurrentUser, AppState};
use tower::ServiceExt;

async fn test_state() -> AppState {
    let settings = config::load();

    let client = Client::with_uri_str(&settings.mongodb_uri)
        .await
        .expect("mongodb client");
    let db = client.database(&settings.mongodb_db);

    AppState::new(db, settings).expect("app state")
}

fn me() -> CurrentUser {
    CurrentUser {
        id: ObjectId::new(),
        email: "me@example.com".to_string(),
        username: "me".to_string(),
        role: "user".to_string(),
    }
}

fn json_post(uri: &str, body: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn device_token_is_required() {
    let app = Router::new()
        .route("/api/notifications/devices", post(notifications_controller::post_device))
        .layer(Extension(me()))
        .with_state(test_state().await);

    let res = app
        .oneshot(json_post("/api/notifications/devices", r#"{"token":"   "}"#))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn malformed_ids_are_not_found() {
    let app = Router::new()
        .route("/api/notifications/:id/read", post(notifications_controller::post_read))
        .route("/api/withdrawals/:id", axum::routing::delete(withdrawals_controller::delete_withdrawal))
        .route("/api/alerts/:id", axum::routing::delete(alerts_controller::delete_alert))
        .layer(Extension(me()))
        .with_state(test_state().await);

    let res = app
        .clone()
        .oneshot(json_post("/api/notifications/not-an-id/read", ""))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    for uri in ["/api/withdrawals/xyz", "/api/alerts/123"] {
        let req = Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(axum::body::Body::empty())
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}
