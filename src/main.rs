use std::net::SocketAddr;

use anyhow::Context;
use mongodb::Client;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use coinmarket::{
    config,
    routes,
    services::{alert_monitor, db_init, order_matcher, telegram_service},
    AppState,
};

fn spawn_cache_purge(state: &AppState) {
    let cache = state.cache.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            cache.purge_expired();
        }
    });
}

async fn shutdown_signal(tx: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("ctrl-c handler failed: {}", e);
    }
    tracing::info!("shutting down");
    let _ = tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();

    let settings = config::load();

    // Mongo connection
    let client = Client::with_uri_str(&settings.mongodb_uri)
        .await
        .context("invalid MONGODB_URI")?;
    let db = client.database(&settings.mongodb_db);

    if let Err(e) = db_init::ensure_indexes(&db).await {
        tracing::error!("index setup failed: {}", e);
    }

    let state = AppState::new(db, settings.clone())
        .map_err(anyhow::Error::msg)
        .context("building app state")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let stream_task = state.prices.spawn(state.market.clone(), shutdown_rx.clone());
    alert_monitor::spawn_price_alert_monitor(state.clone());
    order_matcher::spawn_order_matcher(state.clone());
    state.limiter.spawn_sweeper();
    telegram_service::spawn_poller(state.clone(), shutdown_rx);
    spawn_cache_purge(&state);

    let app = routes::app(state);

    let ip: std::net::IpAddr = settings.host.parse().context("invalid HOST")?;
    let addr = SocketAddr::from((ip, settings.port));
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("server error")?;

    if let Err(e) = stream_task.await {
        tracing::warn!("price stream task ended abnormally: {}", e);
    }

    Ok(())
}
