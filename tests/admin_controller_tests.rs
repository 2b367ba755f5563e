use axum::{
    http::{header, Request, StatusCode},
    Extension,
};
use http_body_util::BodyExt;
use mongodb::{bson::oid::ObjectId, Client};
use coinmarket::{config, models::CurrentUser, routes, AppState};
use tower::ServiceExt;

async fn test_state() -> AppState {
    let settings = config::load();

    let client = Client::with_uri_str(&settings.mongodb_uri)
        .await
        .expect("mongodb client");
    let db = client.database(&settings.mongodb_db);

    AppState::new(db, settings).expect("app state")
}

async fn response_json(res: axum::response::Response) -> serde_json::Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
}

fn user_with_role(role: &str) -> CurrentUser {
    CurrentUser {
        id: ObjectId::new(),
        email: format!("{role}@example.com"),
        username: role.to_string(),
        role: role.to_string(),
    }
}

#[tokio::test]
async fn admin_routes_require_a_session() {
    let app = routes::app(test_state().await);

    let req = Request::builder()
        .uri("/api/admin/dashboard")
        .body(axum::body::Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn non_admin_is_forbidden() {
    let app = routes::app(test_state().await).layer(Extension(user_with_role("user")));

    let req = Request::builder()
        .uri("/api/admin/ws/stats")
        .body(axum::body::Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(response_json(res).await["detail"], "Admin only");
}

#[tokio::test]
async fn admin_sees_connection_stats() {
    let app = routes::app(test_state().await).layer(Extension(user_with_role("admin")));

    let req = Request::builder()
        .uri("/api/admin/ws/stats")
        .body(axum::body::Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body = response_json(res).await;
    assert_eq!(body["connections"]["active"], 0);
    assert!(body["price_stream"].is_object());
}

#[tokio::test]
async fn broadcast_requires_title_and_body() {
    let app = routes::app(test_state().await).layer(Extension(user_with_role("admin")));

    let req = Request::builder()
        .method("POST")
        .uri("/api/admin/broadcast")
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(r#"{"title":"  ","body":""}"#))
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = response_json(res).await;
    assert!(body["errors"]["title"].is_string());
    assert!(body["errors"]["body"].is_string());
}
