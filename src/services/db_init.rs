use std::time::Duration;

use mongodb::{
    bson::{doc, Document},
    options::IndexOptions,
    Database, IndexModel,
};

fn unique() -> IndexOptions {
    IndexOptions::builder().unique(true).build()
}

/// TTL index: Mongo deletes the document once `expires_at` has passed.
fn expire_at_field() -> IndexOptions {
    IndexOptions::builder().expire_after(Duration::from_secs(0)).build()
}

/// (collection, keys, options)
pub fn index_plan() -> Vec<(&'static str, Document, Option<IndexOptions>)> {
    vec![
        // users: unique email, username and referral code
        ("users", doc! { "email": 1 }, Some(unique())),
        ("users", doc! { "username": 1 }, Some(unique())),
        ("users", doc! { "referral_code": 1 }, Some(unique())),
        // wallets: one per (user_id, currency)
        ("wallets", doc! { "user_id": 1, "currency": 1 }, Some(unique())),
        // orders: per-user history, and the matcher scan
        ("orders", doc! { "user_id": 1, "created_at": -1 }, None),
        ("orders", doc! { "status": 1, "symbol": 1 }, None),
        ("transactions", doc! { "user_id": 1, "created_at": -1 }, None),
        ("deposits", doc! { "payment_id": 1 }, Some(unique())),
        ("withdrawals", doc! { "status": 1, "created_at": -1 }, None),
        // alerts: helpful for monitor scan (triggered + symbol)
        ("price_alerts", doc! { "triggered": 1, "symbol": 1 }, None),
        ("notifications", doc! { "user_id": 1, "created_at": -1 }, None),
        ("notifications", doc! { "expires_at": 1 }, Some(expire_at_field())),
        ("audit_logs", doc! { "created_at": -1 }, None),
        ("referrals", doc! { "referred_id": 1 }, Some(unique())),
        ("referrals", doc! { "referrer_id": 1 }, None),
        ("password_resets", doc! { "token_hash": 1 }, Some(unique())),
        ("password_resets", doc! { "expires_at": 1 }, Some(expire_at_field())),
        ("kyc_documents", doc! { "user_id": 1, "created_at": -1 }, None),
    ]
}

pub async fn ensure_indexes(db: &Database) -> Result<(), String> {
    for (collection, keys, options) in index_plan() {
        let col = db.collection::<Document>(collection);
        let model = IndexModel::builder().keys(keys.clone()).options(options).build();

        col.create_index(model, None)
            .await
            .map_err(|e| format!("index {collection} {keys}: {e}"))?;
    }

    tracing::info!("mongo indexes ensured");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_indexes_expire_immediately() {
        let ttl: Vec<_> = index_plan()
            .into_iter()
            .filter(|(_, _, o)| o.as_ref().and_then(|o| o.expire_after).is_some())
            .map(|(c, _, _)| c)
            .collect();
        assert_eq!(ttl, vec!["notifications", "password_resets"]);
    }

    #[test]
    fn balances_are_unique_per_currency() {
        assert!(index_plan().iter().any(|(c, k, o)| *c == "wallets"
            && *k == doc! { "user_id": 1, "currency": 1 }
            && o.as_ref().and_then(|o| o.unique) == Some(true)));
    }
}
