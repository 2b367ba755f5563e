use std::net::SocketAddr;

use futures_util::StreamExt;
use mongodb::Client;
use coinmarket::{config, routes, AppState};
use tokio_tungstenite::{connect_async, tungstenite::{Error as WsError, Message}};

async fn test_state() -> AppState {
    let mut settings = config::load();
    settings.ws_max_connections = 2;
    settings.ws_max_per_ip = 1;

    let client = Client::with_uri_str(&settings.mongodb_uri)
        .await
        .expect("mongodb client");
    let db = client.database(&settings.mongodb_db);

    AppState::new(db, settings).expect("app state")
}

// upgrades need a real socket
async fn serve(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = routes::app(state);

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });
    addr
}

async fn rejected_status(addr: SocketAddr) -> (u16, String) {
    match connect_async(format!("ws://{addr}/ws/prices")).await {
        Err(WsError::Http(res)) => {
            let body = res
                .body()
                .as_ref()
                .map(|b| String::from_utf8_lossy(b).to_string())
                .unwrap_or_default();
            (res.status().as_u16(), body)
        }
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("upgrade should have been rejected"),
    }
}

#[tokio::test]
async fn ws_prices_sends_snapshot_on_connect() {
    let state = test_state().await;
    let addr = serve(state.clone()).await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/prices")).await.unwrap();

    match ws.next().await {
        Some(Ok(Message::Text(txt))) => assert_eq!(txt, r#"{"type":"snapshot","data":[]}"#),
        other => panic!("expected snapshot frame, got {other:?}"),
    }
    assert_eq!(state.connections.active(), 1);
}

#[tokio::test]
async fn ws_prices_rejects_second_socket_from_same_ip_with_429() {
    let state = test_state().await;
    let _held = state.connections.try_acquire("127.0.0.1").unwrap();
    let addr = serve(state.clone()).await;

    let (status, body) = rejected_status(addr).await;
    assert_eq!(status, 429);
    assert!(body.contains("Too many connections from this address"));
    assert_eq!(state.connections.stats().total_rejected, 1);
}

#[tokio::test]
async fn ws_prices_rejects_when_server_is_full_with_503() {
    let state = test_state().await;
    let _a = state.connections.try_acquire("10.0.0.1").unwrap();
    let _b = state.connections.try_acquire("10.0.0.2").unwrap();
    let addr = serve(state.clone()).await;

    let (status, body) = rejected_status(addr).await;
    assert_eq!(status, 503);
    assert!(body.contains("Too many connections"));
    assert_eq!(state.connections.active(), 2);
}
