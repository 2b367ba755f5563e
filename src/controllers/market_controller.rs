use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::{ApiError, ApiResult},
    services::{assets, validators},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct PricesQuery {
    pub symbols: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OverviewQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub days: Option<u32>,
}

/// Comma-separated symbols, upper-cased and de-duplicated. Unknown symbols are kept
/// so the caller can report them.
fn split_symbols(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

// GET /api/market/prices?symbols=BTC,ETH
pub async fn get_prices(State(state): State<AppState>, Query(q): Query<PricesQuery>) -> ApiResult<impl IntoResponse> {
    let requested = q.symbols.as_deref().map(split_symbols).unwrap_or_default();

    let quotes = if requested.is_empty() {
        state.market.get_all_prices().await
    } else {
        let unknown: Vec<&String> = requested
            .iter()
            .filter(|s| validators::normalize_symbol(s).is_none())
            .collect();
        if !unknown.is_empty() {
            return Err(ApiError::field(
                "symbols",
                format!(
                    "Unsupported symbols: {}",
                    unknown.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
                ),
            ));
        }
        state.market.get_prices(&requested).await
    };

    Ok(Json(json!({ "prices": quotes })))
}

// GET /api/market/overview?limit=10
pub async fn get_overview(State(state): State<AppState>, Query(q): Query<OverviewQuery>) -> impl IntoResponse {
    let limit = q.limit.unwrap_or(10).clamp(1, assets::ASSETS.len());
    let markets = state.market.get_markets(limit).await;
    Json(json!({ "markets": markets }))
}

// GET /api/market/history/:symbol?days=7
pub async fn get_history(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> ApiResult<impl IntoResponse> {
    let symbol = validators::normalize_symbol(&symbol).ok_or_else(|| ApiError::not_found("Unknown symbol"))?;
    let days = q.days.unwrap_or(7).clamp(1, 365);

    let points = state
        .market
        .get_history(&symbol, days)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({ "symbol": symbol, "days": days, "points": points })))
}

// GET /api/market/assets
pub async fn get_assets() -> impl IntoResponse {
    let list: Vec<_> = assets::ASSETS
        .iter()
        .map(|a| json!({ "symbol": a.symbol, "name": a.name }))
        .collect();
    Json(json!({ "assets": list }))
}

// GET /api/market/stream
pub async fn get_stream_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": state.prices.status(),
        "prices": state.prices.snapshot(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_are_normalized_and_deduplicated() {
        assert_eq!(split_symbols(" eth,BTC,,btc "), vec!["BTC".to_string(), "ETH".to_string()]);
        assert!(split_symbols(" , ").is_empty());
    }
}
