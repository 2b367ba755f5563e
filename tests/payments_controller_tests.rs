use axum::{
    http::{header, Request, StatusCode},
    routing::post,
    Router,
};
use http_body_util::BodyExt;
use mongodb::Client;
use coinmarket::{
    config::{self, Settings},
    controllers::payments_controller,
    services::payment_service::{sign_ipn, SIGNATURE_HEADER},
    AppState,
};
use tower::ServiceExt;

const BODY: &str = r#"{"payment_id":123,"payment_status":"finished","price_amount":50}"#;

async fn test_state(configure: impl FnOnce(&mut Settings)) -> AppState {
    let mut settings = config::load();
    configure(&mut settings);

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

fn ipn_request(signature: Option<&str>) -> Request<axum::body::Body> {
    let mut b = Request::builder()
        .method("POST")
        .uri("/api/payments/ipn")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(sig) = signature {
        b = b.header(SIGNATURE_HEADER, sig);
    }
    b.body(axum::body::Body::from(BODY)).unwrap()
}

#[tokio::test]
async fn ipn_without_secret_is_unavailable() {
    let state = test_state(|s| s.nowpayments_ipn_secret = String::new()).await;
    let app = Router::new()
        .route("/api/payments/ipn", post(payments_controller::post_ipn))
        .with_state(state);

    let res = app.oneshot(ipn_request(Some("deadbeef"))).await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn ipn_with_missing_or_wrong_signature_is_rejected() {
    let state = test_state(|s| s.nowpayments_ipn_secret = "ipn-secret".to_string()).await;
    let app = Router::new()
        .route("/api/payments/ipn", post(payments_controller::post_ipn))
        .with_state(state);

    let res = app.clone().oneshot(ipn_request(None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response_json(res).await["detail"], "Invalid signature");

    // signed with a different secret
    let forged = sign_ipn("other-secret", BODY.as_bytes()).unwrap();
    let res = app.oneshot(ipn_request(Some(&forged))).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn currencies_report_provider_state() {
    let state = test_state(|s| s.nowpayments_api_key = String::new()).await;
    let app = Router::new()
        .route("/api/payments/currencies", axum::routing::get(payments_controller::get_currencies))
        .with_state(state);

    let req = Request::builder()
        .uri("/api/payments/currencies")
        .body(axum::body::Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body = response_json(res).await;
    assert_eq!(body["enabled"], false);
    assert_eq!(body["min_deposit_usd"], 10.0);
    assert!(body["currencies"].as_array().map(|a| !a.is_empty()).unwrap_or(false));
}
