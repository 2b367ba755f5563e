use std::{collections::HashMap, time::Duration};

use futures_util::StreamExt;
use mongodb::bson::doc;
use serde_json::json;
use tokio::time;

use crate::{
    events::{self, ALERTS_UPDATED},
    models::{PriceAlert, User},
    AppState,
};

use super::{alerts_service, notification_service, trading_service};

pub fn spawn_price_alert_monitor(state: AppState) {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;

            if let Err(e) = run_tick(&state).await {
                tracing::warn!("alert monitor tick error: {}", e);
            }
        }
    });
}

async fn run_tick(state: &AppState) -> Result<(), String> {
    let alerts = state.db.collection::<PriceAlert>("price_alerts");

    let mut cursor = alerts
        .find(doc! { "triggered": false }, None)
        .await
        .map_err(|e| e.to_string())?;

    let mut by_symbol: HashMap<String, Vec<PriceAlert>> = HashMap::new();
    while let Some(item) = cursor.next().await {
        let a = item.map_err(|e| e.to_string())?;
        by_symbol.entry(a.symbol.clone()).or_default().push(a);
    }

    if by_symbol.is_empty() {
        return Ok(());
    }

    let symbols: Vec<String> = by_symbol.keys().cloned().collect();
    let prices = trading_service::live_prices(state, &symbols).await;

    for (sym, group) in by_symbol {
        let Some(&price) = prices.get(&sym) else {
            continue;
        };

        for a in group {
            if !a.is_hit(price) {
                continue;
            }

            match alerts_service::trigger_alert(state, a.id).await {
                Ok(true) => on_triggered(state, &a, price).await,
                Ok(false) => {}
                Err(e) => tracing::warn!("trigger alert {} failed: {}", a.id, e),
            }
        }
    }

    Ok(())
}

async fn on_triggered(state: &AppState, a: &PriceAlert, price: f64) {
    tracing::info!("alert {} fired: {} {} {} (now {})", a.id, a.symbol, a.condition, a.target_price, price);

    let title = format!("{} price alert", a.symbol);
    let body = format!(
        "{} is now ${:.2}, {} your target of ${:.2}.",
        a.symbol, price, a.condition, a.target_price
    );
    notification_service::notify_logged(state, a.user_id, &title, &body, "price_alert").await;
    events::emit(&state.events_tx, a.user_id, ALERTS_UPDATED);

    let users = state.db.collection::<User>("users");
    if let Ok(Some(u)) = users.find_one(doc! { "_id": a.user_id }, None).await {
        state.email.spawn_template(
            u.email,
            "price_alert",
            json!({
                "username": u.username,
                "symbol": a.symbol,
                "condition": a.condition,
                "target_price": format!("{:.2}", a.target_price),
                "price": format!("{:.2}", price),
            }),
        );
    }
}
