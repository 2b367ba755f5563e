use std::{
    convert::Infallible,
    net::SocketAddr,
    time::Duration as StdDuration,
};

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Extension, State,
    },
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use governor::RateLimiter;
use tokio::{
    sync::broadcast::error::RecvError,
    time::{interval, Duration as TokioDuration},
};

use crate::{
    error::ApiError,
    middleware::rate_limit::quota,
    models::CurrentUser,
    services::ws_manager::{ClientMessage, ConnectionGuard, Rejection, ServerMessage, Subscription},
    AppState,
};

use super::request_ip;

// consecutive over-limit frames before the socket is dropped
const MAX_STRIKES: u32 = 10;

// GET /ws/prices
pub async fn ws_prices(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let ip = request_ip(&headers, peer).unwrap_or_else(|| "unknown".to_string());

    // reserve the slot before upgrading so rejected clients get a plain HTTP error
    let guard = match state.connections.try_acquire(&ip) {
        Ok(g) => g,
        Err(Rejection::ServerFull) => {
            tracing::warn!("ws rejected {}: server full", ip);
            return ApiError::unavailable("Too many connections").into_response();
        }
        Err(Rejection::TooManyForIp) => {
            tracing::warn!("ws rejected {}: per-ip limit", ip);
            return ApiError::new(StatusCode::TOO_MANY_REQUESTS, "Too many connections from this address")
                .into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_price_socket(socket, state, guard, ip))
}

/// Reply for one client text frame. Updates the subscription in place.
fn reply_to(sub: &mut Subscription, text: &str) -> ServerMessage {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Subscribe { symbols }) => ServerMessage::Subscribed {
            symbols: sub.add(&symbols),
        },
        Ok(ClientMessage::Unsubscribe { symbols }) => ServerMessage::Subscribed {
            symbols: sub.remove(&symbols),
        },
        Ok(ClientMessage::Ping) => ServerMessage::Pong,
        Err(_) => ServerMessage::error("Unknown message"),
    }
}

async fn handle_price_socket(mut socket: WebSocket, state: AppState, _guard: ConnectionGuard, ip: String) {
    tracing::info!("ws prices connected: ip={} active={}", ip, state.connections.active());

    let mut rx = state.prices.subscribe();
    let mut sub = Subscription::default();
    let meter = RateLimiter::direct(quota(state.settings.ws_msg_rate, state.settings.ws_msg_burst));
    let mut strikes = 0u32;

    let hello = ServerMessage::Snapshot {
        data: state.prices.snapshot(),
    };
    if socket.send(Message::Text(hello.to_text())).await.is_err() {
        return;
    }

    let mut ping = interval(TokioDuration::from_secs(25));
    // the first tick fires immediately
    ping.tick().await;

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if socket.send(Message::Ping(b"ping".to_vec())).await.is_err() {
                    break;
                }
            }

            batch = rx.recv() => {
                match batch {
                    Ok(ticks) => {
                        let data = sub.filter(&ticks);
                        if data.is_empty() {
                            continue;
                        }
                        let frame = ServerMessage::PriceUpdate { data };
                        if socket.send(Message::Text(frame.to_text())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("ws {} lagged, skipped {} batches", ip, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            client_msg = socket.recv() => {
                match client_msg {
                    Some(Ok(Message::Text(text))) => {
                        if meter.check().is_err() {
                            strikes += 1;
                            if strikes >= MAX_STRIKES {
                                tracing::warn!("ws {} closed: message rate exceeded", ip);
                                let _ = socket
                                    .send(Message::Close(Some(CloseFrame {
                                        code: close_code::POLICY,
                                        reason: "rate limit exceeded".into(),
                                    })))
                                    .await;
                                break;
                            }
                            let frame = ServerMessage::error("Rate limit exceeded");
                            if socket.send(Message::Text(frame.to_text())).await.is_err() {
                                break;
                            }
                            continue;
                        }

                        strikes = 0;
                        let reply = reply_to(&mut sub, &text);
                        if socket.send(Message::Text(reply.to_text())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = socket.close().await;
    tracing::info!("ws prices disconnected: ip={}", ip);
}

// GET /api/events  (SSE)
pub async fn sse_events(
    State(state): State<AppState>,
    Extension(u): Extension<CurrentUser>,
) -> Sse<impl futures_util::stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events_tx.subscribe();

    let stream = futures_util::stream::unfold((rx, u.id), |(mut rx, user_id)| async move {
        loop {
            let evt = match rx.recv().await {
                Ok(e) if e.is_for(&user_id) => Event::default().event(e.name).data("1"),
                Ok(_) => continue,
                Err(RecvError::Lagged(_)) => Event::default().event("ping").data("lagged"),
                Err(RecvError::Closed) => return None,
            };
            return Some((Ok(evt), (rx, user_id)));
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(StdDuration::from_secs(20))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_update_subscription() {
        let mut sub = Subscription::default();

        let reply = reply_to(&mut sub, r#"{"action":"subscribe","symbols":["btc","eth","nope"]}"#);
        assert_eq!(reply.to_text(), r#"{"type":"subscribed","symbols":["BTC","ETH"]}"#);

        let reply = reply_to(&mut sub, r#"{"action":"unsubscribe","symbols":["eth"]}"#);
        assert_eq!(reply.to_text(), r#"{"type":"subscribed","symbols":["BTC"]}"#);
        assert!(sub.wants("BTC"));
        assert!(!sub.wants("ETH"));

        assert_eq!(reply_to(&mut sub, r#"{"action":"ping"}"#).to_text(), r#"{"type":"pong"}"#);
        assert_eq!(
            reply_to(&mut sub, "garbage").to_text(),
            r#"{"type":"error","message":"Unknown message"}"#
        );
    }
}
