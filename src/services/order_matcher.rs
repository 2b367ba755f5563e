use std::{collections::HashMap, time::Duration};

use futures_util::StreamExt;
use mongodb::bson::doc;
use tokio::time;

use crate::{
    models::{order::{KIND_LIMIT, STATUS_OPEN}, Order},
    AppState,
};

use super::trading_service;

pub fn spawn_order_matcher(state: AppState) {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;

            match run_tick(&state).await {
                Ok(0) => {}
                Ok(n) => tracing::info!("order matcher filled {} orders", n),
                Err(e) => tracing::warn!("order matcher tick error: {}", e),
            }
        }
    });
}

async fn run_tick(state: &AppState) -> Result<usize, String> {
    let orders = state.db.collection::<Order>("orders");

    let mut cursor = orders
        .find(doc! { "status": STATUS_OPEN, "kind": KIND_LIMIT }, None)
        .await
        .map_err(|e| e.to_string())?;

    let mut by_symbol: HashMap<String, Vec<Order>> = HashMap::new();
    while let Some(item) = cursor.next().await {
        let o = item.map_err(|e| e.to_string())?;
        by_symbol.entry(o.symbol.clone()).or_default().push(o);
    }

    if by_symbol.is_empty() {
        return Ok(0);
    }

    let symbols: Vec<String> = by_symbol.keys().cloned().collect();
    let prices = trading_service::live_prices(state, &symbols).await;

    let mut filled = 0;
    for (sym, group) in by_symbol {
        let Some(&price) = prices.get(&sym) else {
            continue;
        };

        for o in group {
            let Some(limit) = o.limit_price else {
                continue;
            };
            if !trading_service::should_fill(&o.side, limit, price) {
                continue;
            }

            match trading_service::fill_limit_order(state, &o).await {
                Ok(true) => filled += 1,
                Ok(false) => {}
                Err(e) => tracing::error!("settling order {} failed: {}", o.id, e),
            }
        }
    }

    Ok(filled)
}
