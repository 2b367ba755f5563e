use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use futures_util::StreamExt;
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::options::FindOptions;
use serde::Serialize;

use crate::{
    models::{
        order::{SIDE_BUY, STATUS_FILLED},
        wallet::USD,
        Order, Wallet,
    },
    AppState,
};

use super::{account_service, trading_service};

#[derive(Debug, Clone, Serialize)]
pub struct HoldingView {
    pub symbol: String,
    pub qty: f64,
    pub avg_cost: f64,
    // None when no live price is available
    pub price: Option<f64>,
    pub value: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioView {
    pub cash: f64,
    pub cash_locked: f64,
    pub holdings: Vec<HoldingView>,
    pub holdings_value: f64,
    pub total_equity: f64,
    pub total_pnl: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DayActivity {
    pub date: String,
    pub orders: u32,
    pub buy_volume: f64,
    pub sell_volume: f64,
}

pub fn holding_view(w: &Wallet, price: Option<f64>) -> HoldingView {
    let qty = w.total();
    let cost = w.avg_cost * qty;
    let value = price.map(|p| p * qty).unwrap_or(cost);
    let pnl = value - cost;
    let pnl_pct = if cost > 0.0 { pnl / cost * 100.0 } else { 0.0 };

    HoldingView {
        symbol: w.currency.clone(),
        qty,
        avg_cost: w.avg_cost,
        price,
        value,
        pnl,
        pnl_pct,
    }
}

/// Cash plus every crypto wallet valued at the live price. Holdings without
/// a live price are carried at cost.
pub fn build_portfolio(wallets: &[Wallet], prices: &std::collections::HashMap<String, f64>) -> PortfolioView {
    let mut cash = 0.0;
    let mut cash_locked = 0.0;
    let mut holdings = Vec::new();

    for w in wallets {
        if w.currency == USD {
            cash = w.available;
            cash_locked = w.locked;
            continue;
        }
        if w.total() <= 0.0 {
            continue;
        }
        holdings.push(holding_view(w, prices.get(&w.currency).copied()));
    }

    holdings.sort_by(|a, b| b.value.total_cmp(&a.value));

    let holdings_value: f64 = holdings.iter().map(|h| h.value).sum();
    let total_pnl: f64 = holdings.iter().map(|h| h.pnl).sum();

    PortfolioView {
        cash,
        cash_locked,
        holdings_value,
        total_equity: cash + cash_locked + holdings_value,
        total_pnl,
        holdings,
    }
}

pub async fn get_portfolio(state: &AppState, user_id: ObjectId) -> Result<PortfolioView, String> {
    let wallets = account_service::list_wallets(state, user_id).await?;

    let symbols: Vec<String> = wallets
        .iter()
        .filter(|w| w.currency != USD && w.total() > 0.0)
        .map(|w| w.currency.clone())
        .collect();
    let prices = if symbols.is_empty() {
        Default::default()
    } else {
        trading_service::live_prices(state, &symbols).await
    };

    Ok(build_portfolio(&wallets, &prices))
}

pub fn aggregate_daily(orders: &[Order]) -> Vec<DayActivity> {
    let mut days: BTreeMap<String, DayActivity> = BTreeMap::new();

    for o in orders {
        let ts = o.filled_at.unwrap_or(o.created_at);
        let date = DateTime::from_timestamp(ts, 0)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| ts.to_string());

        let day = days.entry(date.clone()).or_insert_with(|| DayActivity {
            date,
            ..Default::default()
        });
        day.orders += 1;
        if o.side == SIDE_BUY {
            day.buy_volume += o.total;
        } else {
            day.sell_volume += o.total;
        }
    }

    days.into_values().collect()
}

pub async fn get_history(state: &AppState, user_id: ObjectId, days: i64) -> Result<Vec<DayActivity>, String> {
    let since = (Utc::now() - Duration::days(days.clamp(1, 365))).timestamp();
    let opts = FindOptions::builder().sort(doc! { "filled_at": 1 }).build();

    let mut cursor = state
        .db
        .collection::<Order>("orders")
        .find(
            doc! { "user_id": user_id, "status": STATUS_FILLED, "filled_at": { "$gte": since } },
            opts,
        )
        .await
        .map_err(|e| e.to_string())?;

    let mut out: Vec<Order> = vec![];
    while let Some(res) = cursor.next().await {
        out.push(res.map_err(|e| e.to_string())?);
    }

    Ok(aggregate_daily(&out))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn wallet(currency: &str, available: f64, locked: f64, avg_cost: f64) -> Wallet {
        Wallet {
            id: ObjectId::new(),
            user_id: ObjectId::new(),
            currency: currency.into(),
            available,
            locked,
            avg_cost,
            updated_at: 0,
        }
    }

    #[test]
    fn values_holdings_at_live_price() {
        let wallets = vec![
            wallet(USD, 1000.0, 50.0, 0.0),
            wallet("BTC", 0.5, 0.5, 20000.0),
            wallet("ETH", 2.0, 0.0, 1000.0),
            wallet("SOL", 0.0, 0.0, 10.0),
        ];
        let prices = HashMap::from([("BTC".to_string(), 30000.0)]);

        let p = build_portfolio(&wallets, &prices);
        assert_eq!(p.cash, 1000.0);
        assert_eq!(p.holdings.len(), 2);

        let btc = &p.holdings[0];
        assert_eq!(btc.symbol, "BTC");
        assert_eq!(btc.value, 30000.0);
        assert_eq!(btc.pnl, 10000.0);
        assert_eq!(btc.pnl_pct, 50.0);

        // no price: carried at cost
        let eth = &p.holdings[1];
        assert_eq!(eth.price, None);
        assert_eq!(eth.pnl, 0.0);

        assert_eq!(p.total_equity, 1050.0 + 32000.0);
    }

    #[test]
    fn groups_orders_per_day() {
        let order = |side: &str, total: f64, ts: i64| Order {
            id: ObjectId::new(),
            user_id: ObjectId::new(),
            symbol: "BTC".into(),
            side: side.into(),
            kind: "market".into(),
            qty: 1.0,
            limit_price: None,
            fill_price: Some(total),
            fee: 0.0,
            total,
            locked_amount: 0.0,
            status: STATUS_FILLED.into(),
            created_at: ts,
            filled_at: Some(ts),
        };
        // 2024-01-01 and 2024-01-02 UTC
        let days = aggregate_daily(&[
            order("buy", 100.0, 1_704_067_200),
            order("sell", 40.0, 1_704_070_000),
            order("buy", 10.0, 1_704_153_600),
        ]);

        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, "2024-01-01");
        assert_eq!(days[0].orders, 2);
        assert_eq!(days[0].buy_volume, 100.0);
        assert_eq!(days[0].sell_volume, 40.0);
        assert_eq!(days[1].date, "2024-01-02");
    }
}
