use std::collections::HashMap;

use chrono::Utc;
use futures_util::StreamExt;
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::options::FindOptions;
use serde::Deserialize;

use crate::{
    error::{ApiError, FieldErrors},
    events::{self, ORDERS_UPDATED, WALLET_UPDATED},
    models::{
        order::{KIND_LIMIT, KIND_MARKET, SIDE_BUY, SIDE_SELL, STATUS_CANCELLED, STATUS_FILLED, STATUS_OPEN},
        wallet::USD,
        Order,
    },
    AppState,
};

use super::{
    account_service::{self, Leg},
    market_data::SOURCE_MOCK,
    notification_service, validators,
};

// float dust left over from fee math
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Deserialize)]
pub struct OrderInput {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub side: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub qty: f64,
    #[serde(default)]
    pub limit_price: Option<f64>,
}

fn default_kind() -> String {
    KIND_MARKET.to_string()
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidOrder {
    pub symbol: String,
    pub side: &'static str,
    pub kind: &'static str,
    pub qty: f64,
    pub limit_price: Option<f64>,
}

pub fn validate_order(input: &OrderInput) -> Result<ValidOrder, FieldErrors> {
    let mut errs = FieldErrors::new();

    let symbol = validators::normalize_symbol(&input.symbol);
    if symbol.is_none() {
        errs.insert("symbol".into(), "Unsupported symbol.".into());
    }

    let side = match input.side.trim().to_lowercase().as_str() {
        "buy" => Some(SIDE_BUY),
        "sell" => Some(SIDE_SELL),
        _ => None,
    };
    if side.is_none() {
        errs.insert("side".into(), "Side must be buy or sell.".into());
    }

    let kind = match input.kind.trim().to_lowercase().as_str() {
        "market" => Some(KIND_MARKET),
        "limit" => Some(KIND_LIMIT),
        _ => None,
    };
    if kind.is_none() {
        errs.insert("kind".into(), "Kind must be market or limit.".into());
    }

    if !validators::is_valid_amount(input.qty) {
        errs.insert("qty".into(), "Enter a valid quantity.".into());
    }

    let limit_price = match kind {
        Some(KIND_LIMIT) => match input.limit_price {
            Some(p) if validators::is_valid_amount(p) => Some(p),
            _ => {
                errs.insert("limit_price".into(), "Enter a valid limit price.".into());
                None
            }
        },
        _ => None,
    };

    match (symbol, side, kind) {
        (Some(symbol), Some(side), Some(kind)) if errs.is_empty() => Ok(ValidOrder {
            symbol,
            side,
            kind,
            qty: input.qty,
            limit_price,
        }),
        _ => Err(errs),
    }
}

/// USD held for a limit buy: notional plus the fee it will pay.
pub fn limit_buy_lock(qty: f64, limit: f64, fee_rate: f64) -> f64 {
    qty * limit * (1.0 + fee_rate)
}

pub fn should_fill(side: &str, limit: f64, price: f64) -> bool {
    match side {
        SIDE_BUY => price <= limit,
        SIDE_SELL => price >= limit,
        _ => false,
    }
}

/// Live price for trading. Mock quotes are never traded against.
pub async fn current_price(state: &AppState, symbol: &str) -> Result<f64, ApiError> {
    if let Some(p) = state.prices.price(symbol) {
        return Ok(p);
    }

    let quotes = state.market.get_prices(&[symbol.to_string()]).await;
    quotes
        .into_iter()
        .find(|q| q.symbol == symbol && q.source != SOURCE_MOCK && q.price > 0.0)
        .map(|q| q.price)
        .ok_or_else(|| ApiError::unavailable("Price unavailable"))
}

/// Batch form of `current_price` for the background workers: one REST call
/// covers every symbol the stream has no fresh tick for.
pub async fn live_prices(state: &AppState, symbols: &[String]) -> HashMap<String, f64> {
    let mut out = HashMap::new();
    let mut missing = Vec::new();
    for s in symbols {
        match state.prices.price(s) {
            Some(p) => {
                out.insert(s.clone(), p);
            }
            None => missing.push(s.clone()),
        }
    }

    if !missing.is_empty() {
        for q in state.market.get_prices(&missing).await {
            if q.source != SOURCE_MOCK && q.price.is_finite() && q.price > 0.0 {
                out.insert(q.symbol, q.price);
            }
        }
    }
    out
}

/// Wallet moves for a market order filled at `price`.
pub fn market_legs(side: &str, symbol: &str, qty: f64, price: f64, fee: f64) -> Vec<Leg> {
    let notional = qty * price;
    if side == SIDE_BUY {
        vec![
            Leg::Debit { currency: USD.into(), amount: notional + fee },
            Leg::BuyAsset { symbol: symbol.into(), qty, price },
        ]
    } else {
        vec![
            Leg::Debit { currency: symbol.into(), amount: qty },
            Leg::Credit { currency: USD.into(), amount: notional - fee },
        ]
    }
}

/// Wallet moves for a limit order filled at its limit. A buy consumes what it
/// needs from the lock and releases the rest.
pub fn limit_fill_legs(order: &Order, limit: f64, fee: f64) -> Vec<Leg> {
    let notional = order.qty * limit;
    if order.side == SIDE_BUY {
        let cost = (notional + fee).min(order.locked_amount);
        let mut legs = vec![Leg::ConsumeLocked { currency: USD.into(), amount: cost }];
        let refund = order.locked_amount - cost;
        if refund > EPSILON {
            legs.push(Leg::Unlock { currency: USD.into(), amount: refund });
        }
        legs.push(Leg::BuyAsset { symbol: order.symbol.clone(), qty: order.qty, price: limit });
        legs
    } else {
        vec![
            Leg::ConsumeLocked { currency: order.symbol.clone(), amount: order.qty },
            Leg::Credit { currency: USD.into(), amount: notional - fee },
        ]
    }
}

fn money_error(e: String) -> ApiError {
    if e == account_service::INSUFFICIENT {
        ApiError::bad_request(e)
    } else {
        ApiError::internal(e)
    }
}

fn orders(state: &AppState) -> mongodb::Collection<Order> {
    state.db.collection::<Order>("orders")
}

pub async fn place_order(state: &AppState, user_id: ObjectId, input: &OrderInput) -> Result<Order, ApiError> {
    let valid = validate_order(input).map_err(ApiError::validation)?;

    let order = match valid.kind {
        KIND_LIMIT => place_limit(state, user_id, &valid).await?,
        _ => place_market(state, user_id, &valid).await?,
    };

    events::emit_all(&state.events_tx, &[ORDERS_UPDATED, WALLET_UPDATED], user_id);
    Ok(order)
}

async fn place_market(state: &AppState, user_id: ObjectId, o: &ValidOrder) -> Result<Order, ApiError> {
    let price = current_price(state, &o.symbol).await?;
    let notional = o.qty * price;
    let fee = notional * state.settings.trading_fee_rate;
    let now = Utc::now().timestamp();

    let order = Order {
        id: ObjectId::new(),
        user_id,
        symbol: o.symbol.clone(),
        side: o.side.to_string(),
        kind: KIND_MARKET.to_string(),
        qty: o.qty,
        limit_price: None,
        fill_price: Some(price),
        fee,
        total: notional,
        locked_amount: 0.0,
        status: STATUS_FILLED.to_string(),
        created_at: now,
        filled_at: Some(now),
    };
    let reference = Some(order.id.to_hex());

    account_service::apply_legs(state, user_id, &market_legs(o.side, &o.symbol, o.qty, price, fee))
        .await
        .map_err(money_error)?;

    if o.side == SIDE_BUY {
        account_service::record_transaction_logged(state, user_id, "trade", USD, -notional, reference.clone()).await;
        account_service::record_transaction_logged(state, user_id, "trade", &o.symbol, o.qty, reference.clone()).await;
    } else {
        account_service::record_transaction_logged(state, user_id, "trade", &o.symbol, -o.qty, reference.clone()).await;
        account_service::record_transaction_logged(state, user_id, "trade", USD, notional, reference.clone()).await;
    }
    if fee > 0.0 {
        account_service::record_transaction_logged(state, user_id, "fee", USD, -fee, reference).await;
    }

    // balances already moved; the order row is history
    if let Err(e) = orders(state).insert_one(&order, None).await {
        tracing::error!("order row insert failed after settlement order={} user={}: {}", order.id, user_id, e);
    }

    tracing::info!(
        "market {} {} {} @ {} user={}",
        order.side,
        order.qty,
        order.symbol,
        price,
        user_id
    );
    Ok(order)
}

async fn place_limit(state: &AppState, user_id: ObjectId, o: &ValidOrder) -> Result<Order, ApiError> {
    let Some(limit) = o.limit_price else {
        return Err(ApiError::field("limit_price", "Enter a valid limit price."));
    };

    let locked_amount = if o.side == SIDE_BUY {
        let amount = limit_buy_lock(o.qty, limit, state.settings.trading_fee_rate);
        account_service::lock(state, user_id, USD, amount)
            .await
            .map_err(money_error)?;
        amount
    } else {
        account_service::lock(state, user_id, &o.symbol, o.qty)
            .await
            .map_err(money_error)?;
        o.qty
    };

    let order = Order {
        id: ObjectId::new(),
        user_id,
        symbol: o.symbol.clone(),
        side: o.side.to_string(),
        kind: KIND_LIMIT.to_string(),
        qty: o.qty,
        limit_price: Some(limit),
        fill_price: None,
        fee: 0.0,
        total: o.qty * limit,
        locked_amount,
        status: STATUS_OPEN.to_string(),
        created_at: Utc::now().timestamp(),
        filled_at: None,
    };

    if let Err(e) = orders(state).insert_one(&order, None).await {
        // give the funds back, nothing references them
        let currency = if o.side == SIDE_BUY { USD } else { o.symbol.as_str() };
        if let Err(u) = account_service::unlock(state, user_id, currency, locked_amount).await {
            tracing::error!("unlock after failed order insert user={}: {}", user_id, u);
        }
        return Err(e.into());
    }

    Ok(order)
}

pub async fn list_orders(state: &AppState, user_id: ObjectId, status: Option<&str>, limit: i64) -> Result<Vec<Order>, String> {
    let mut filter = doc! { "user_id": user_id };
    if let Some(s) = status {
        filter.insert("status", s);
    }

    let opts = FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .limit(limit.clamp(1, 500))
        .build();

    let mut cursor = orders(state).find(filter, opts).await.map_err(|e| e.to_string())?;

    let mut out = Vec::new();
    while let Some(item) = cursor.next().await {
        out.push(item.map_err(|e| e.to_string())?);
    }
    Ok(out)
}

pub async fn get_order(state: &AppState, user_id: ObjectId, order_id: ObjectId) -> Result<Order, ApiError> {
    orders(state)
        .find_one(doc! { "_id": order_id, "user_id": user_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Order not found"))
}

pub async fn cancel_order(state: &AppState, user_id: ObjectId, order_id: ObjectId) -> Result<Order, ApiError> {
    let order = get_order(state, user_id, order_id).await?;
    if order.status != STATUS_OPEN {
        return Err(ApiError::bad_request("Order is not open"));
    }

    // the matcher may be filling it right now
    let res = orders(state)
        .update_one(
            doc! { "_id": order.id, "status": STATUS_OPEN },
            doc! { "$set": { "status": STATUS_CANCELLED } },
            None,
        )
        .await?;
    if res.matched_count == 0 {
        return Err(ApiError::bad_request("Order is not open"));
    }

    let currency = if order.side == SIDE_BUY { USD } else { order.symbol.as_str() };
    account_service::unlock(state, user_id, currency, order.locked_amount)
        .await
        .map_err(ApiError::internal)?;

    events::emit_all(&state.events_tx, &[ORDERS_UPDATED, WALLET_UPDATED], user_id);

    Ok(Order {
        status: STATUS_CANCELLED.to_string(),
        ..order
    })
}

/// Puts a claimed order back to `open` after its settlement was rolled back.
async fn reopen(state: &AppState, order: &Order) {
    let res = orders(state)
        .update_one(
            doc! { "_id": order.id, "status": STATUS_FILLED },
            doc! {
                "$set": { "status": STATUS_OPEN, "fee": 0.0 },
                "$unset": { "fill_price": "", "filled_at": "" },
            },
            None,
        )
        .await;
    if let Err(e) = res {
        tracing::error!("reopening order {} user={} failed: {}", order.id, order.user_id, e);
    }
}

/// Fills an open limit order at its limit price. Returns false when another
/// worker (or a cancel) got to it first.
pub async fn fill_limit_order(state: &AppState, order: &Order) -> Result<bool, String> {
    let Some(limit) = order.limit_price else {
        return Ok(false);
    };

    let notional = order.qty * limit;
    let fee = notional * state.settings.trading_fee_rate;
    let now = Utc::now().timestamp();

    let claimed = orders(state)
        .update_one(
            doc! { "_id": order.id, "status": STATUS_OPEN },
            doc! {
                "$set": {
                    "status": STATUS_FILLED,
                    "fill_price": limit,
                    "fee": fee,
                    "total": notional,
                    "filled_at": now,
                }
            },
            None,
        )
        .await
        .map_err(|e| e.to_string())?;
    if claimed.matched_count == 0 {
        return Ok(false);
    }

    let user_id = order.user_id;
    let reference = Some(order.id.to_hex());

    if let Err(e) = account_service::apply_legs(state, user_id, &limit_fill_legs(order, limit, fee)).await {
        tracing::error!("settling order {} user={} failed, reopening: {}", order.id, user_id, e);
        reopen(state, order).await;
        return Err(e);
    }

    if order.side == SIDE_BUY {
        account_service::record_transaction_logged(state, user_id, "trade", USD, -notional, reference.clone()).await;
        account_service::record_transaction_logged(state, user_id, "trade", &order.symbol, order.qty, reference.clone()).await;
    } else {
        account_service::record_transaction_logged(state, user_id, "trade", &order.symbol, -order.qty, reference.clone()).await;
        account_service::record_transaction_logged(state, user_id, "trade", USD, notional, reference.clone()).await;
    }
    if fee > 0.0 {
        account_service::record_transaction_logged(state, user_id, "fee", USD, -fee, reference).await;
    }

    notification_service::notify_logged(
        state,
        user_id,
        "Order filled",
        &format!("Your limit {} of {} {} filled at ${:.2}.", order.side, order.qty, order.symbol, limit),
        "order",
    )
    .await;
    events::emit_all(&state.events_tx, &[ORDERS_UPDATED, WALLET_UPDATED], user_id);

    tracing::info!("limit {} {} {} filled @ {}", order.side, order.qty, order.symbol, limit);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(symbol: &str, side: &str, kind: &str, qty: f64, limit: Option<f64>) -> OrderInput {
        OrderInput {
            symbol: symbol.into(),
            side: side.into(),
            kind: kind.into(),
            qty,
            limit_price: limit,
        }
    }

    #[test]
    fn accepts_market_and_limit_orders() {
        let v = validate_order(&input("btc", "BUY", "market", 0.5, None)).unwrap();
        assert_eq!(v.symbol, "BTC");
        assert_eq!(v.side, SIDE_BUY);
        assert_eq!(v.limit_price, None);

        let v = validate_order(&input("ETH", "sell", "limit", 2.0, Some(3000.0))).unwrap();
        assert_eq!(v.kind, KIND_LIMIT);
        assert_eq!(v.limit_price, Some(3000.0));
    }

    #[test]
    fn rejects_bad_fields() {
        let errs = validate_order(&input("NOPE", "hold", "stop", -1.0, None)).unwrap_err();
        for f in ["symbol", "side", "kind", "qty"] {
            assert!(errs.contains_key(f), "missing {f}");
        }

        let errs = validate_order(&input("BTC", "buy", "limit", 1.0, None)).unwrap_err();
        assert!(errs.contains_key("limit_price"));

        let errs = validate_order(&input("BTC", "buy", "market", f64::NAN, None)).unwrap_err();
        assert!(errs.contains_key("qty"));
    }

    #[test]
    fn limit_fill_conditions() {
        assert!(should_fill(SIDE_BUY, 100.0, 99.0));
        assert!(should_fill(SIDE_BUY, 100.0, 100.0));
        assert!(!should_fill(SIDE_BUY, 100.0, 101.0));
        assert!(should_fill(SIDE_SELL, 100.0, 101.0));
        assert!(!should_fill(SIDE_SELL, 100.0, 99.0));
    }

    #[test]
    fn buy_lock_covers_fee() {
        let lock = limit_buy_lock(2.0, 100.0, 0.001);
        assert!((lock - 200.2).abs() < 1e-9);
    }

    fn limit_order(side: &str, qty: f64, limit: f64, locked: f64) -> Order {
        Order {
            id: ObjectId::new(),
            user_id: ObjectId::new(),
            symbol: "BTC".into(),
            side: side.into(),
            kind: KIND_LIMIT.into(),
            qty,
            limit_price: Some(limit),
            fill_price: None,
            fee: 0.0,
            total: qty * limit,
            locked_amount: locked,
            status: STATUS_OPEN.into(),
            created_at: 0,
            filled_at: None,
        }
    }

    #[test]
    fn market_buy_debits_cash_before_crediting_coins() {
        let legs = market_legs(SIDE_BUY, "BTC", 2.0, 100.0, 0.2);
        assert_eq!(
            legs,
            vec![
                Leg::Debit { currency: USD.into(), amount: 200.0 + 0.2 },
                Leg::BuyAsset { symbol: "BTC".into(), qty: 2.0, price: 100.0 },
            ]
        );

        // coin credit failing refunds the cash
        assert_eq!(
            account_service::rollback_plan(&legs[..1]),
            vec![Leg::Credit { currency: USD.into(), amount: 200.0 + 0.2 }]
        );
    }

    #[test]
    fn market_sell_refunds_coins_when_cash_credit_fails() {
        let legs = market_legs(SIDE_SELL, "ETH", 1.5, 10.0, 0.015);
        assert_eq!(legs[0], Leg::Debit { currency: "ETH".into(), amount: 1.5 });
        assert_eq!(legs[1], Leg::Credit { currency: USD.into(), amount: 15.0 - 0.015 });
        assert_eq!(
            account_service::rollback_plan(&legs[..1]),
            vec![Leg::Credit { currency: "ETH".into(), amount: 1.5 }]
        );
    }

    #[test]
    fn limit_buy_fill_releases_unused_lock() {
        let order = limit_order(SIDE_BUY, 2.0, 100.0, limit_buy_lock(2.0, 100.0, 0.001) + 5.0);
        let legs = limit_fill_legs(&order, 100.0, 0.2);

        assert_eq!(legs.len(), 3);
        assert_eq!(legs[0], Leg::ConsumeLocked { currency: USD.into(), amount: 200.0 + 0.2 });
        match &legs[1] {
            Leg::Unlock { currency, amount } => {
                assert_eq!(currency, USD);
                assert!((amount - 5.0).abs() < 1e-9);
            }
            other => panic!("expected unlock, got {other:?}"),
        }
        assert_eq!(legs[2], Leg::BuyAsset { symbol: "BTC".into(), qty: 2.0, price: 100.0 });

        // a failed coin credit puts the whole lock back
        let undo = account_service::rollback_plan(&legs[..2]);
        assert!(matches!(undo[0], Leg::Lock { .. }));
        assert_eq!(undo[1], Leg::RestoreLocked { currency: USD.into(), amount: 200.0 + 0.2 });
    }

    #[test]
    fn exact_lock_has_no_refund_leg() {
        let order = limit_order(SIDE_BUY, 2.0, 100.0, 200.0 + 0.2);
        let legs = limit_fill_legs(&order, 100.0, 0.2);
        assert_eq!(legs.len(), 2);
    }

    #[test]
    fn limit_sell_fill_consumes_locked_coins() {
        let order = limit_order(SIDE_SELL, 1.0, 50.0, 1.0);
        assert_eq!(
            limit_fill_legs(&order, 50.0, 0.05),
            vec![
                Leg::ConsumeLocked { currency: "BTC".into(), amount: 1.0 },
                Leg::Credit { currency: USD.into(), amount: 50.0 - 0.05 },
            ]
        );
    }
}
