use chrono::{Duration, Utc};
use futures_util::StreamExt;
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::options::FindOptions;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, FieldErrors},
    events::{self, WALLET_UPDATED},
    models::{
        order::STATUS_FILLED,
        user::{ROLE_ADMIN, ROLE_USER, STATUS_ACTIVE, STATUS_SUSPENDED},
        wallet::USD,
        Order, User, Wallet,
    },
    services::{price_stream::StreamStatus, ws_manager::ConnectionStats},
    AppState,
};

use super::{account_service, assets, payment_service, withdrawal_service};

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub users_total: u64,
    pub users_active: u64,
    pub users_suspended: u64,
    pub new_users_24h: u64,
    pub orders_24h: u64,
    pub volume_24h: f64,
    pub pending_withdrawals: u64,
    pub deposits_finished: u64,
    pub deposits_finished_usd: f64,
    pub price_stream: StreamStatus,
    pub websockets: ConnectionStats,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserPatch {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Adjustment {
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub reason: String,
}

fn users(state: &AppState) -> mongodb::Collection<User> {
    state.db.collection::<User>("users")
}

pub async fn dashboard(state: &AppState) -> Result<Dashboard, String> {
    let since = (Utc::now() - Duration::hours(24)).timestamp();
    let u = users(state);

    let users_total = u.count_documents(doc! {}, None).await.map_err(|e| e.to_string())?;
    let users_active = u
        .count_documents(doc! { "status": STATUS_ACTIVE }, None)
        .await
        .map_err(|e| e.to_string())?;
    let users_suspended = u
        .count_documents(doc! { "status": STATUS_SUSPENDED }, None)
        .await
        .map_err(|e| e.to_string())?;
    let new_users_24h = u
        .count_documents(doc! { "created_at": { "$gte": since } }, None)
        .await
        .map_err(|e| e.to_string())?;

    let mut cursor = state
        .db
        .collection::<Order>("orders")
        .find(doc! { "status": STATUS_FILLED, "filled_at": { "$gte": since } }, None)
        .await
        .map_err(|e| e.to_string())?;
    let mut orders_24h = 0;
    let mut volume_24h = 0.0;
    while let Some(item) = cursor.next().await {
        let o = item.map_err(|e| e.to_string())?;
        orders_24h += 1;
        volume_24h += o.total;
    }

    let pending_withdrawals = withdrawal_service::count_pending(state).await?;
    let deposits = payment_service::finished_totals(state).await?;

    Ok(Dashboard {
        users_total,
        users_active,
        users_suspended,
        new_users_24h,
        orders_24h,
        volume_24h,
        pending_withdrawals,
        deposits_finished: deposits.finished_count,
        deposits_finished_usd: deposits.finished_usd,
        price_stream: state.prices.status(),
        websockets: state.connections.stats(),
    })
}

pub fn search_filter(search: Option<&str>) -> Document {
    match search.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => {
            let pattern = regex::escape(s);
            doc! { "$or": [
                { "email": { "$regex": &pattern, "$options": "i" } },
                { "username": { "$regex": &pattern, "$options": "i" } },
            ] }
        }
        None => doc! {},
    }
}

pub async fn list_users(state: &AppState, search: Option<&str>, skip: u64, limit: i64) -> Result<(Vec<User>, u64), String> {
    let filter = search_filter(search);
    let total = users(state)
        .count_documents(filter.clone(), None)
        .await
        .map_err(|e| e.to_string())?;

    let opts = FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .skip(skip)
        .limit(limit.clamp(1, 200))
        .build();

    let mut cursor = users(state).find(filter, opts).await.map_err(|e| e.to_string())?;
    let mut out = Vec::new();
    while let Some(item) = cursor.next().await {
        out.push(item.map_err(|e| e.to_string())?);
    }
    Ok((out, total))
}

pub async fn get_user(state: &AppState, user_id: ObjectId) -> Result<(User, Vec<Wallet>), ApiError> {
    let user = users(state)
        .find_one(doc! { "_id": user_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    let wallets = account_service::list_wallets(state, user_id)
        .await
        .map_err(ApiError::internal)?;
    Ok((user, wallets))
}

pub fn validate_patch(admin_id: ObjectId, target_id: ObjectId, patch: &UserPatch) -> Result<Document, FieldErrors> {
    let mut errs = FieldErrors::new();
    let mut set = Document::new();

    if let Some(status) = &patch.status {
        if status != STATUS_ACTIVE && status != STATUS_SUSPENDED {
            errs.insert("status".into(), "Status must be active or suspended.".into());
        } else if admin_id == target_id && status == STATUS_SUSPENDED {
            errs.insert("status".into(), "You cannot suspend yourself.".into());
        } else {
            set.insert("status", status.as_str());
        }
    }

    if let Some(role) = &patch.role {
        if role != ROLE_USER && role != ROLE_ADMIN {
            errs.insert("role".into(), "Role must be user or admin.".into());
        } else if admin_id == target_id && role != ROLE_ADMIN {
            errs.insert("role".into(), "You cannot remove your own admin role.".into());
        } else {
            set.insert("role", role.as_str());
        }
    }

    if errs.is_empty() && set.is_empty() {
        errs.insert("_form".into(), "Nothing to update.".into());
    }

    if errs.is_empty() { Ok(set) } else { Err(errs) }
}

pub async fn patch_user(state: &AppState, admin_id: ObjectId, user_id: ObjectId, patch: &UserPatch) -> Result<User, ApiError> {
    let set = validate_patch(admin_id, user_id, patch).map_err(ApiError::validation)?;

    let res = users(state)
        .update_one(doc! { "_id": user_id }, doc! { "$set": set }, None)
        .await?;
    if res.matched_count == 0 {
        return Err(ApiError::not_found("User not found"));
    }

    let (user, _) = get_user(state, user_id).await?;
    Ok(user)
}

pub async fn adjust_balance(state: &AppState, user_id: ObjectId, adj: &Adjustment) -> Result<Wallet, ApiError> {
    let currency = adj.currency.trim().to_uppercase();
    let mut errs = FieldErrors::new();
    if currency != USD && assets::by_symbol(&currency).is_none() {
        errs.insert("currency".into(), "Unsupported currency.".into());
    }
    if !adj.amount.is_finite() || adj.amount == 0.0 {
        errs.insert("amount".into(), "Amount must be a non-zero number.".into());
    }
    if adj.reason.trim().is_empty() {
        errs.insert("reason".into(), "Reason is required.".into());
    }
    if !errs.is_empty() {
        return Err(ApiError::validation(errs));
    }

    users(state)
        .find_one(doc! { "_id": user_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if adj.amount > 0.0 {
        account_service::credit(state, user_id, &currency, adj.amount)
            .await
            .map_err(ApiError::internal)?;
    } else {
        account_service::debit(state, user_id, &currency, -adj.amount)
            .await
            .map_err(|e| {
                if e == account_service::INSUFFICIENT {
                    ApiError::bad_request(e)
                } else {
                    ApiError::internal(e)
                }
            })?;
    }

    account_service::record_transaction_logged(
        state,
        user_id,
        "adjustment",
        &currency,
        adj.amount,
        Some(adj.reason.trim().to_string()),
    )
    .await;
    events::emit(&state.events_tx, user_id, WALLET_UPDATED);

    account_service::get_or_create_wallet(state, user_id, &currency)
        .await
        .map_err(ApiError::internal)
}

pub async fn list_orders(state: &AppState, status: Option<&str>, limit: i64) -> Result<Vec<Order>, String> {
    let mut filter = doc! {};
    if let Some(s) = status {
        filter.insert("status", s);
    }
    let opts = FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .limit(limit.clamp(1, 500))
        .build();

    let mut cursor = state
        .db
        .collection::<Order>("orders")
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

    #[test]
    fn admins_cannot_lock_themselves_out() {
        let me = ObjectId::new();
        let other = ObjectId::new();

        let patch = UserPatch {
            status: Some("suspended".into()),
            role: None,
        };
        assert!(validate_patch(me, me, &patch).unwrap_err().contains_key("status"));
        assert_eq!(
            validate_patch(me, other, &patch).unwrap(),
            doc! { "status": "suspended" }
        );

        let demote = UserPatch {
            status: None,
            role: Some("user".into()),
        };
        assert!(validate_patch(me, me, &demote).unwrap_err().contains_key("role"));

        let empty = UserPatch { status: None, role: None };
        assert!(validate_patch(me, other, &empty).unwrap_err().contains_key("_form"));
    }

    #[test]
    fn search_is_escaped() {
        let f = search_filter(Some("a.b+"));
        let or = f.get_array("$or").unwrap();
        assert_eq!(or.len(), 2);
        assert_eq!(search_filter(Some("   ")), doc! {});
        assert_eq!(search_filter(None), doc! {});
        let first = or[0].as_document().unwrap().get_document("email").unwrap();
        assert_eq!(first.get_str("$regex").unwrap(), r"a\.b\+");
    }
}
