use axum::{
    http::{header, Request, StatusCode},
    routing::post,
    Router,
};
use http_body_util::BodyExt;
use mongodb::Client;
use coinmarket::{controllers::auth_controller, config, AppState};
use tower::ServiceExt;

async fn test_state() -> AppState {
    let mut settings = config::load();
    settings.sendgrid_api_key = String::new();
    settings.telegram_bot_token = String::new();

    // lazy client: nothing below reaches the database
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

fn json_post(uri: &str, body: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn post_login_missing_fields_returns_field_errors() {
    let app = Router::new()
        .route("/api/auth/login", post(auth_controller::post_login))
        .with_state(test_state().await);

    let res = app.oneshot(json_post("/api/auth/login", "{}")).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = response_json(res).await;
    assert_eq!(body["errors"]["email"], "Email is required.");
    assert_eq!(body["errors"]["password"], "Password is required.");
}

#[tokio::test]
async fn post_login_invalid_email_returns_error() {
    let app = Router::new()
        .route("/api/auth/login", post(auth_controller::post_login))
        .with_state(test_state().await);

    let res = app
        .oneshot(json_post("/api/auth/login", r#"{"email":"not-an-email","password":"secret123"}"#))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = response_json(res).await;
    assert_eq!(body["errors"]["email"], "Invalid email.");
    assert!(body["errors"].get("password").is_none());
}

#[tokio::test]
async fn post_register_validates_every_field() {
    let app = Router::new()
        .route("/api/auth/register", post(auth_controller::post_register))
        .with_state(test_state().await);

    let res = app
        .oneshot(json_post(
            "/api/auth/register",
            r#"{"username":"a!","email":"bad","password":"short"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = response_json(res).await;
    assert_eq!(body["detail"], "Validation failed");
    assert!(body["errors"]["username"].is_string());
    assert_eq!(body["errors"]["email"], "Invalid email.");
    assert_eq!(body["errors"]["password"], "Password must be at least 8 characters.");
}

#[tokio::test]
async fn post_logout_clears_both_cookies() {
    let state = test_state().await;
    let auth_name = state.settings.jwt_cookie_name.clone();
    let csrf_name = state.settings.csrf_cookie_name.clone();
    let app = Router::new()
        .route("/api/auth/logout", post(auth_controller::post_logout))
        .with_state(state);

    let res = app.oneshot(json_post("/api/auth/logout", "")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let cookies: Vec<String> = res
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert!(cookies.iter().any(|c| c.starts_with(&format!("{auth_name}="))));
    assert!(cookies.iter().any(|c| c.starts_with(&format!("{csrf_name}="))));
}

#[tokio::test]
async fn password_reset_request_never_reveals_accounts() {
    let app = Router::new()
        .route("/api/auth/password-reset/request", post(auth_controller::post_reset_request))
        .with_state(test_state().await);

    // malformed email: same answer, no lookup
    let res = app
        .oneshot(json_post("/api/auth/password-reset/request", r#"{"email":"nobody"}"#))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(response_json(res).await["ok"], true);
}

#[tokio::test]
async fn password_reset_confirm_without_token_is_rejected() {
    let app = Router::new()
        .route("/api/auth/password-reset/confirm", post(auth_controller::post_reset_confirm))
        .with_state(test_state().await);

    let res = app
        .oneshot(json_post(
            "/api/auth/password-reset/confirm",
            r#"{"token":"  ","new_password":"newpass123"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(res).await["detail"], "Invalid or expired token.");
}
