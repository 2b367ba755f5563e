use chrono::Utc;
use futures_util::StreamExt;
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::options::FindOptions;
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::{ApiError, FieldErrors},
    events::{self, WALLET_UPDATED},
    models::{
        withdrawal::{STATUS_APPROVED, STATUS_PENDING, STATUS_REJECTED},
        User, Withdrawal,
    },
    AppState,
};

use super::{account_service, notification_service, telegram_service::escape_html, trading_service, validators};

#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawalInput {
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub address: String,
}

pub fn validate_withdrawal(input: &WithdrawalInput) -> Result<(String, f64, String), FieldErrors> {
    let mut errs = FieldErrors::new();

    let currency = validators::normalize_symbol(&input.currency);
    if currency.is_none() {
        errs.insert("currency".into(), "Unsupported currency.".into());
    }

    if !validators::is_valid_amount(input.amount) {
        errs.insert("amount".into(), "Enter a valid amount.".into());
    }

    let address = input.address.trim().to_string();
    if let Some(c) = &currency {
        if !validators::is_valid_address(c, &address) {
            errs.insert("address".into(), format!("Invalid {c} address."));
        }
    }

    match currency {
        Some(c) if errs.is_empty() => Ok((c, input.amount, address)),
        _ => Err(errs),
    }
}

fn withdrawals(state: &AppState) -> mongodb::Collection<Withdrawal> {
    state.db.collection::<Withdrawal>("withdrawals")
}

fn money_error(e: String) -> ApiError {
    if e == account_service::INSUFFICIENT {
        ApiError::bad_request(e)
    } else {
        ApiError::internal(e)
    }
}

pub async fn request_withdrawal(state: &AppState, user: &User, input: &WithdrawalInput) -> Result<Withdrawal, ApiError> {
    let (currency, amount, address) = validate_withdrawal(input).map_err(ApiError::validation)?;

    let price = trading_service::current_price(state, &currency).await?;
    let usd_value = amount * price;
    if usd_value < state.settings.min_withdrawal_usd {
        return Err(ApiError::field(
            "amount",
            format!("Minimum withdrawal is ${:.2}.", state.settings.min_withdrawal_usd),
        ));
    }

    account_service::lock(state, user.id, &currency, amount)
        .await
        .map_err(money_error)?;

    let w = Withdrawal {
        id: ObjectId::new(),
        user_id: user.id,
        currency,
        amount,
        address,
        status: STATUS_PENDING.to_string(),
        admin_note: None,
        reviewed_by: None,
        created_at: Utc::now().timestamp(),
        reviewed_at: None,
    };

    if let Err(e) = withdrawals(state).insert_one(&w, None).await {
        if let Err(u) = account_service::unlock(state, user.id, &w.currency, amount).await {
            tracing::error!("unlock after failed withdrawal insert user={}: {}", user.id, u);
        }
        return Err(e.into());
    }

    events::emit(&state.events_tx, user.id, WALLET_UPDATED);
    state.telegram.spawn_admin(format!(
        "🏧 Withdrawal request <b>{} {}</b> (~${:.2}) from {}\nid: <code>{}</code>",
        w.amount,
        w.currency,
        usd_value,
        escape_html(&user.username),
        w.id.to_hex()
    ));

    Ok(w)
}

pub async fn list(state: &AppState, user_id: Option<ObjectId>, status: Option<&str>, limit: i64) -> Result<Vec<Withdrawal>, String> {
    let mut filter = doc! {};
    if let Some(u) = user_id {
        filter.insert("user_id", u);
    }
    if let Some(s) = status {
        filter.insert("status", s);
    }

    let opts = FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .limit(limit.clamp(1, 500))
        .build();

    let mut cursor = withdrawals(state).find(filter, opts).await.map_err(|e| e.to_string())?;
    let mut out = Vec::new();
    while let Some(item) = cursor.next().await {
        out.push(item.map_err(|e| e.to_string())?);
    }
    Ok(out)
}

pub async fn count_pending(state: &AppState) -> Result<u64, String> {
    withdrawals(state)
        .count_documents(doc! { "status": STATUS_PENDING }, None)
        .await
        .map_err(|e| e.to_string())
}

/// Moves a pending withdrawal to `status`. Only one reviewer can win.
async fn claim(
    state: &AppState,
    filter_extra: mongodb::bson::Document,
    id: ObjectId,
    status: &str,
    reviewer: Option<ObjectId>,
    note: Option<String>,
) -> Result<Withdrawal, ApiError> {
    let mut filter = doc! { "_id": id };
    filter.extend(filter_extra);

    let w = withdrawals(state)
        .find_one(filter.clone(), None)
        .await?
        .ok_or_else(|| ApiError::not_found("Withdrawal not found"))?;
    if w.status != STATUS_PENDING {
        return Err(ApiError::bad_request("Withdrawal is not pending"));
    }

    let now = Utc::now().timestamp();
    filter.insert("status", STATUS_PENDING);
    let res = withdrawals(state)
        .update_one(
            filter,
            doc! { "$set": {
                "status": status,
                "admin_note": note.clone(),
                "reviewed_by": reviewer,
                "reviewed_at": now,
            } },
            None,
        )
        .await?;
    if res.matched_count == 0 {
        return Err(ApiError::bad_request("Withdrawal is not pending"));
    }

    Ok(Withdrawal {
        status: status.to_string(),
        admin_note: note,
        reviewed_by: reviewer,
        reviewed_at: Some(now),
        ..w
    })
}

pub async fn cancel(state: &AppState, user_id: ObjectId, id: ObjectId) -> Result<Withdrawal, ApiError> {
    let w = claim(
        state,
        doc! { "user_id": user_id },
        id,
        STATUS_REJECTED,
        None,
        Some("cancelled by user".to_string()),
    )
    .await?;

    account_service::unlock(state, user_id, &w.currency, w.amount)
        .await
        .map_err(ApiError::internal)?;
    events::emit(&state.events_tx, user_id, WALLET_UPDATED);
    Ok(w)
}

pub async fn approve(state: &AppState, admin_id: ObjectId, id: ObjectId) -> Result<Withdrawal, ApiError> {
    let w = claim(state, doc! {}, id, STATUS_APPROVED, Some(admin_id), None).await?;

    account_service::consume_locked(state, w.user_id, &w.currency, w.amount)
        .await
        .map_err(ApiError::internal)?;
    account_service::record_transaction_logged(
        state,
        w.user_id,
        "withdrawal",
        &w.currency,
        -w.amount,
        Some(w.id.to_hex()),
    )
    .await;

    after_review(state, &w).await;
    Ok(w)
}

pub async fn reject(state: &AppState, admin_id: ObjectId, id: ObjectId, note: Option<String>) -> Result<Withdrawal, ApiError> {
    let note = note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
    let w = claim(state, doc! {}, id, STATUS_REJECTED, Some(admin_id), note).await?;

    account_service::unlock(state, w.user_id, &w.currency, w.amount)
        .await
        .map_err(ApiError::internal)?;

    after_review(state, &w).await;
    Ok(w)
}

async fn after_review(state: &AppState, w: &Withdrawal) {
    events::emit(&state.events_tx, w.user_id, WALLET_UPDATED);
    notification_service::notify_logged(
        state,
        w.user_id,
        "Withdrawal update",
        &format!("Your withdrawal of {} {} was {}.", w.amount, w.currency, w.status),
        "withdrawal",
    )
    .await;

    let users = state.db.collection::<User>("users");
    if let Ok(Some(u)) = users.find_one(doc! { "_id": w.user_id }, None).await {
        state.email.spawn_template(
            u.email,
            "withdrawal_status",
            json!({
                "username": u.username,
                "amount": w.amount,
                "currency": w.currency,
                "address": w.address,
                "status": w.status,
                "note": w.admin_note,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_currency_amount_and_address() {
        let ok = validate_withdrawal(&WithdrawalInput {
            currency: "eth".into(),
            amount: 1.5,
            address: " 0x52908400098527886E0F7030069857D2E4169EE7 ".into(),
        })
        .unwrap();
        assert_eq!(ok.0, "ETH");
        assert_eq!(ok.2, "0x52908400098527886E0F7030069857D2E4169EE7");

        let errs = validate_withdrawal(&WithdrawalInput {
            currency: "ETH".into(),
            amount: 0.0,
            address: "bc1notanethaddress".into(),
        })
        .unwrap_err();
        assert!(errs.contains_key("amount"));
        assert!(errs.contains_key("address"));

        let errs = validate_withdrawal(&WithdrawalInput {
            currency: "FOO".into(),
            amount: 1.0,
            address: "whatever".into(),
        })
        .unwrap_err();
        assert!(errs.contains_key("currency"));
    }
}
