use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use mongodb::Client;
use coinmarket::{config, routes, AppState};
use tower::ServiceExt;

async fn test_state() -> AppState {
    let settings = config::load();

    let client = Client::with_uri_str(&settings.mongodb_uri)
        .await
        .expect("mongodb client");
    let db = client.database(&settings.mongodb_db);

    AppState::new(db, settings).expect("app state")
}

async fn get(uri: &str) -> axum::response::Response {
    let app = routes::app(test_state().await);
    let req = Request::builder().uri(uri).body(axum::body::Body::empty()).unwrap();
    app.oneshot(req).await.unwrap()
}

async fn response_body_string(res: axum::response::Response) -> String {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&bytes).to_string()
}

#[tokio::test]
async fn health_is_public() {
    let res = get("/health").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(response_body_string(res).await, "ok");
}

#[tokio::test]
async fn assets_lists_supported_coins_without_auth() {
    let res = get("/api/market/assets").await;
    assert_eq!(res.status(), StatusCode::OK);

    let body: serde_json::Value = serde_json::from_str(&response_body_string(res).await).unwrap();
    let assets = body["assets"].as_array().unwrap();
    assert_eq!(assets.len(), 10);
    assert!(assets.iter().any(|a| a["symbol"] == "BTC"));
}

#[tokio::test]
async fn unsupported_symbols_are_rejected() {
    let res = get("/api/market/prices?symbols=BTC,FOO").await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(response_body_string(res).await.contains("FOO"));

    let res = get("/api/market/history/FOO").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_routes_get_json_404() {
    let res = get("/no/such/page").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert!(response_body_string(res).await.contains("\"detail\":\"Not found\""));
}

#[tokio::test]
async fn stream_status_starts_empty() {
    let res = get("/api/market/stream").await;
    assert_eq!(res.status(), StatusCode::OK);

    let body: serde_json::Value = serde_json::from_str(&response_body_string(res).await).unwrap();
    assert_eq!(body["status"]["connected"], false);
    assert_eq!(body["prices"].as_array().map(Vec::len), Some(0));
}
