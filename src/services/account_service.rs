use chrono::Utc;
use futures_util::StreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, Document},
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
};

use crate::{
    models::{wallet::USD, Transaction, Wallet},
    AppState,
};

pub const INSUFFICIENT: &str = "Insufficient balance";

fn wallets(state: &AppState) -> mongodb::Collection<Wallet> {
    state.db.collection::<Wallet>("wallets")
}

/// Gets the user's wallet for `currency`, creating an empty one if missing.
pub async fn get_or_create_wallet(state: &AppState, user_id: ObjectId, currency: &str) -> Result<Wallet, String> {
    let now = Utc::now().timestamp();
    let opts = FindOneAndUpdateOptions::builder()
        .upsert(true)
        .return_document(ReturnDocument::After)
        .build();

    wallets(state)
        .find_one_and_update(
            doc! { "user_id": user_id, "currency": currency },
            doc! {
                "$setOnInsert": {
                    "_id": ObjectId::new(),
                    "available": 0.0,
                    "locked": 0.0,
                    "avg_cost": 0.0,
                    "updated_at": now,
                }
            },
            opts,
        )
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "wallet upsert returned nothing".to_string())
}

pub async fn list_wallets(state: &AppState, user_id: ObjectId) -> Result<Vec<Wallet>, String> {
    // make sure the USD wallet always shows up
    get_or_create_wallet(state, user_id, USD).await?;

    let opts = FindOptions::builder().sort(doc! { "currency": 1 }).build();
    let mut cursor = wallets(state)
        .find(doc! { "user_id": user_id }, opts)
        .await
        .map_err(|e| e.to_string())?;

    let mut out = Vec::new();
    while let Some(item) = cursor.next().await {
        out.push(item.map_err(|e| e.to_string())?);
    }
    Ok(out)
}

pub async fn balance(state: &AppState, user_id: ObjectId, currency: &str) -> Result<f64, String> {
    let w = wallets(state)
        .find_one(doc! { "user_id": user_id, "currency": currency }, None)
        .await
        .map_err(|e| e.to_string())?;
    Ok(w.map(|w| w.available).unwrap_or(0.0))
}

pub async fn credit(state: &AppState, user_id: ObjectId, currency: &str, amount: f64) -> Result<(), String> {
    if !(amount.is_finite() && amount >= 0.0) {
        return Err(format!("invalid credit amount {amount}"));
    }
    get_or_create_wallet(state, user_id, currency).await?;
    wallets(state)
        .update_one(
            doc! { "user_id": user_id, "currency": currency },
            doc! {
                "$inc": { "available": amount },
                "$set": { "updated_at": Utc::now().timestamp() },
            },
            None,
        )
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}

/// Conditional move on one wallet document: `from` must hold at least
/// `amount`. Returns `Err(INSUFFICIENT)` when it does not.
async fn guarded_inc(
    state: &AppState,
    user_id: ObjectId,
    currency: &str,
    guard_field: &str,
    amount: f64,
    inc: Document,
) -> Result<(), String> {
    if !(amount.is_finite() && amount > 0.0) {
        return Err(format!("invalid amount {amount}"));
    }

    let res = wallets(state)
        .update_one(
            doc! {
                "user_id": user_id,
                "currency": currency,
                guard_field: { "$gte": amount },
            },
            doc! {
                "$inc": inc,
                "$set": { "updated_at": Utc::now().timestamp() },
            },
            None,
        )
        .await
        .map_err(|e| e.to_string())?;

    if res.matched_count == 0 {
        return Err(INSUFFICIENT.to_string());
    }
    Ok(())
}

pub async fn debit(state: &AppState, user_id: ObjectId, currency: &str, amount: f64) -> Result<(), String> {
    guarded_inc(state, user_id, currency, "available", amount, doc! { "available": -amount }).await
}

/// available -> locked
pub async fn lock(state: &AppState, user_id: ObjectId, currency: &str, amount: f64) -> Result<(), String> {
    guarded_inc(
        state,
        user_id,
        currency,
        "available",
        amount,
        doc! { "available": -amount, "locked": amount },
    )
    .await
}

/// locked -> available
pub async fn unlock(state: &AppState, user_id: ObjectId, currency: &str, amount: f64) -> Result<(), String> {
    guarded_inc(
        state,
        user_id,
        currency,
        "locked",
        amount,
        doc! { "available": amount, "locked": -amount },
    )
    .await
}

/// locked funds leave the account
pub async fn consume_locked(state: &AppState, user_id: ObjectId, currency: &str, amount: f64) -> Result<(), String> {
    guarded_inc(state, user_id, currency, "locked", amount, doc! { "locked": -amount }).await
}

/// Pipeline that folds `qty` bought at `price` into `available` and the
/// weighted average cost. Evaluated on the stored document, so concurrent
/// fills cannot overwrite each other's basis.
fn buy_into_avg(qty: f64, price: f64, now: i64) -> Vec<Document> {
    let held = doc! { "$add": ["$available", "$locked"] };
    let after = doc! { "$add": ["$available", "$locked", qty] };
    vec![doc! {
        "$set": {
            "avg_cost": {
                "$cond": [
                    { "$gt": [after.clone(), 0.0] },
                    { "$divide": [
                        { "$add": [{ "$multiply": ["$avg_cost", held] }, price * qty] },
                        after
                    ] },
                    price
                ]
            },
            "available": { "$add": ["$available", qty] },
            "updated_at": now,
        }
    }]
}

/// Inverse of `buy_into_avg`: removes `qty` bought at `price` again.
fn sell_out_of_avg(qty: f64, price: f64, now: i64) -> Vec<Document> {
    let held = doc! { "$add": ["$available", "$locked"] };
    let after = doc! { "$subtract": [held.clone(), qty] };
    vec![doc! {
        "$set": {
            "avg_cost": {
                "$cond": [
                    { "$gt": [after.clone(), 0.0] },
                    { "$divide": [
                        { "$subtract": [{ "$multiply": ["$avg_cost", held] }, price * qty] },
                        after
                    ] },
                    0.0
                ]
            },
            "available": { "$subtract": ["$available", qty] },
            "updated_at": now,
        }
    }]
}

/// Credits `qty` of a crypto asset bought at `price`, folding it into the
/// weighted average cost.
pub async fn credit_asset(state: &AppState, user_id: ObjectId, symbol: &str, qty: f64, price: f64) -> Result<(), String> {
    if !(qty.is_finite() && qty > 0.0 && price.is_finite() && price >= 0.0) {
        return Err(format!("invalid asset credit {qty} @ {price}"));
    }
    get_or_create_wallet(state, user_id, symbol).await?;

    wallets(state)
        .update_one(
            doc! { "user_id": user_id, "currency": symbol },
            buy_into_avg(qty, price, Utc::now().timestamp()),
            None,
        )
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}

async fn revert_asset(state: &AppState, user_id: ObjectId, symbol: &str, qty: f64, price: f64) -> Result<(), String> {
    let res = wallets(state)
        .update_one(
            doc! { "user_id": user_id, "currency": symbol, "available": { "$gte": qty } },
            sell_out_of_avg(qty, price, Utc::now().timestamp()),
            None,
        )
        .await
        .map_err(|e| e.to_string())?;
    if res.matched_count == 0 {
        return Err(INSUFFICIENT.to_string());
    }
    Ok(())
}

/// locked funds come back, undoing `consume_locked`
async fn restore_locked(state: &AppState, user_id: ObjectId, currency: &str, amount: f64) -> Result<(), String> {
    wallets(state)
        .update_one(
            doc! { "user_id": user_id, "currency": currency },
            doc! {
                "$inc": { "locked": amount },
                "$set": { "updated_at": Utc::now().timestamp() },
            },
            None,
        )
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}

/// One balance change in a multi-step settlement.
#[derive(Debug, Clone, PartialEq)]
pub enum Leg {
    Debit { currency: String, amount: f64 },
    Credit { currency: String, amount: f64 },
    Lock { currency: String, amount: f64 },
    Unlock { currency: String, amount: f64 },
    ConsumeLocked { currency: String, amount: f64 },
    RestoreLocked { currency: String, amount: f64 },
    BuyAsset { symbol: String, qty: f64, price: f64 },
    RevertAsset { symbol: String, qty: f64, price: f64 },
}

impl Leg {
    pub fn undo(&self) -> Leg {
        match self.clone() {
            Leg::Debit { currency, amount } => Leg::Credit { currency, amount },
            Leg::Credit { currency, amount } => Leg::Debit { currency, amount },
            Leg::Lock { currency, amount } => Leg::Unlock { currency, amount },
            Leg::Unlock { currency, amount } => Leg::Lock { currency, amount },
            Leg::ConsumeLocked { currency, amount } => Leg::RestoreLocked { currency, amount },
            Leg::RestoreLocked { currency, amount } => Leg::ConsumeLocked { currency, amount },
            Leg::BuyAsset { symbol, qty, price } => Leg::RevertAsset { symbol, qty, price },
            Leg::RevertAsset { symbol, qty, price } => Leg::BuyAsset { symbol, qty, price },
        }
    }

    async fn apply(&self, state: &AppState, user_id: ObjectId) -> Result<(), String> {
        match self {
            Leg::Debit { currency, amount } => debit(state, user_id, currency, *amount).await,
            Leg::Credit { currency, amount } => credit(state, user_id, currency, *amount).await,
            Leg::Lock { currency, amount } => lock(state, user_id, currency, *amount).await,
            Leg::Unlock { currency, amount } => unlock(state, user_id, currency, *amount).await,
            Leg::ConsumeLocked { currency, amount } => consume_locked(state, user_id, currency, *amount).await,
            Leg::RestoreLocked { currency, amount } => restore_locked(state, user_id, currency, *amount).await,
            Leg::BuyAsset { symbol, qty, price } => credit_asset(state, user_id, symbol, *qty, *price).await,
            Leg::RevertAsset { symbol, qty, price } => revert_asset(state, user_id, symbol, *qty, *price).await,
        }
    }
}

/// Undo steps for the legs that already went through, newest first.
pub fn rollback_plan(applied: &[Leg]) -> Vec<Leg> {
    applied.iter().rev().map(Leg::undo).collect()
}

/// Applies legs in order. When one fails, the ones before it are undone and
/// the original error is returned. Undo failures are logged for manual
/// reconciliation.
pub async fn apply_legs(state: &AppState, user_id: ObjectId, legs: &[Leg]) -> Result<(), String> {
    for (i, leg) in legs.iter().enumerate() {
        let Err(e) = leg.apply(state, user_id).await else {
            continue;
        };

        for undo in rollback_plan(&legs[..i]) {
            if let Err(u) = undo.apply(state, user_id).await {
                tracing::error!("rollback failed user={} leg={:?}: {}", user_id, undo, u);
            }
        }
        return Err(e);
    }
    Ok(())
}

pub async fn record_transaction(
    state: &AppState,
    user_id: ObjectId,
    kind: &str,
    currency: &str,
    amount: f64,
    reference: Option<String>,
) -> Result<(), String> {
    let tx = Transaction {
        id: ObjectId::new(),
        user_id,
        kind: kind.to_string(),
        currency: currency.to_string(),
        amount,
        reference,
        created_at: Utc::now().timestamp(),
    };

    state
        .db
        .collection::<Transaction>("transactions")
        .insert_one(tx, None)
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}

/// Ledger rows are an audit trail; a failed insert is logged but does not
/// undo the balance change it describes.
pub async fn record_transaction_logged(
    state: &AppState,
    user_id: ObjectId,
    kind: &str,
    currency: &str,
    amount: f64,
    reference: Option<String>,
) {
    if let Err(e) = record_transaction(state, user_id, kind, currency, amount, reference).await {
        tracing::error!("ledger insert failed user={} kind={}: {}", user_id, kind, e);
    }
}

pub async fn list_transactions(
    state: &AppState,
    user_id: ObjectId,
    kind: Option<&str>,
    skip: u64,
    limit: i64,
) -> Result<Vec<Transaction>, String> {
    let mut filter = doc! { "user_id": user_id };
    if let Some(k) = kind {
        filter.insert("kind", k);
    }

    let opts = FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .skip(skip)
        .limit(limit.clamp(1, 200))
        .build();

    let mut cursor = state
        .db
        .collection::<Transaction>("transactions")
        .find(filter, opts)
        .await
        .map_err(|e| e.to_string())?;

    let mut out = Vec::new();
    while let Some(item) = cursor.next().await {
        out.push(item.map_err(|e| e.to_string())?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd(amount: f64) -> (String, f64) {
        (USD.to_string(), amount)
    }

    #[test]
    fn every_leg_has_an_exact_inverse() {
        let (currency, amount) = usd(10.0);
        let legs = vec![
            Leg::Debit { currency: currency.clone(), amount },
            Leg::Credit { currency: currency.clone(), amount },
            Leg::Lock { currency: currency.clone(), amount },
            Leg::Unlock { currency: currency.clone(), amount },
            Leg::ConsumeLocked { currency: currency.clone(), amount },
            Leg::RestoreLocked { currency, amount },
            Leg::BuyAsset { symbol: "BTC".into(), qty: 0.5, price: 100.0 },
            Leg::RevertAsset { symbol: "BTC".into(), qty: 0.5, price: 100.0 },
        ];

        for leg in &legs {
            assert_ne!(&leg.undo(), leg);
            assert_eq!(&leg.undo().undo(), leg);
        }
    }

    #[test]
    fn rollback_undoes_applied_legs_newest_first() {
        let legs = vec![
            Leg::Debit { currency: USD.into(), amount: 100.1 },
            Leg::BuyAsset { symbol: "ETH".into(), qty: 1.0, price: 100.0 },
        ];

        // second leg failed: only the debit is refunded
        assert_eq!(
            rollback_plan(&legs[..1]),
            vec![Leg::Credit { currency: USD.into(), amount: 100.1 }]
        );
        assert_eq!(
            rollback_plan(&legs),
            vec![
                Leg::RevertAsset { symbol: "ETH".into(), qty: 1.0, price: 100.0 },
                Leg::Credit { currency: USD.into(), amount: 100.1 },
            ]
        );
        assert!(rollback_plan(&[]).is_empty());
    }

    #[test]
    fn avg_cost_is_computed_on_the_stored_document() {
        let stages = buy_into_avg(2.0, 50.0, 1);
        assert_eq!(stages.len(), 1);

        let set = stages[0].get_document("$set").unwrap();
        assert_eq!(
            set.get_document("available").unwrap(),
            &doc! { "$add": ["$available", 2.0] }
        );

        let cond = set.get_document("avg_cost").unwrap().get_array("$cond").unwrap();
        let blended = cond[1].as_document().unwrap().get_array("$divide").unwrap();
        assert_eq!(
            blended[1].as_document().unwrap(),
            &doc! { "$add": ["$available", "$locked", 2.0] }
        );
        assert_eq!(cond[2].as_f64(), Some(50.0));
    }

    #[test]
    fn reverting_a_buy_mirrors_it() {
        let set = sell_out_of_avg(2.0, 50.0, 1)[0].get_document("$set").unwrap().clone();
        assert_eq!(
            set.get_document("available").unwrap(),
            &doc! { "$subtract": ["$available", 2.0] }
        );
        let cond = set.get_document("avg_cost").unwrap().get_array("$cond").unwrap();
        assert_eq!(cond[2].as_f64(), Some(0.0));
    }
}
