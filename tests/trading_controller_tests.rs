use axum::{
    http::{header, Request, StatusCode},
    routing::post,
    Extension, Router,
};
use http_body_util::BodyExt;
use mongodb::{bson::oid::ObjectId, Client};
use coinmarket::{controllers::trading_controller, config, models::CurrentUser, routes, AppState};
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

fn order_request(body: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri("/api/orders")
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

fn trader() -> CurrentUser {
    CurrentUser {
        id: ObjectId::new(),
        email: "test@example.com".to_string(),
        username: "test".to_string(),
        role: "user".to_string(),
    }
}

#[tokio::test]
async fn post_order_unauthenticated_returns_401() {
    let app = routes::app(test_state().await);

    let res = app
        .oneshot(order_request(r#"{"symbol":"BTC","side":"buy","qty":1}"#))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response_json(res).await["detail"], "Not authenticated");
}

#[tokio::test]
async fn post_order_with_auth_cookie_but_no_csrf_header_is_forbidden() {
    let state = test_state().await;
    let cookie = format!(
        "{}=not-a-jwt; {}=abc",
        state.settings.jwt_cookie_name, state.settings.csrf_cookie_name
    );
    let app = routes::app(state);

    let mut req = order_request(r#"{"symbol":"BTC","side":"buy","qty":1}"#);
    req.headers_mut().insert(header::COOKIE, cookie.parse().unwrap());

    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(response_json(res).await["detail"], "CSRF token missing or invalid");
}

#[tokio::test]
async fn post_order_invalid_fields_returns_422() {
    let app = Router::new()
        .route("/api/orders", post(trading_controller::post_order))
        .layer(Extension(trader()))
        .with_state(test_state().await);

    let res = app
        .oneshot(order_request(r#"{"symbol":"NOPE","side":"hold","kind":"stop","qty":-2}"#))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = response_json(res).await;
    for field in ["symbol", "side", "kind", "qty"] {
        assert!(body["errors"][field].is_string(), "missing error for {field}");
    }
}

#[tokio::test]
async fn limit_order_requires_limit_price() {
    let app = Router::new()
        .route("/api/orders", post(trading_controller::post_order))
        .layer(Extension(trader()))
        .with_state(test_state().await);

    let res = app
        .oneshot(order_request(r#"{"symbol":"ETH","side":"sell","kind":"limit","qty":1}"#))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(response_json(res).await["errors"]["limit_price"].is_string());
}
