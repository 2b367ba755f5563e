use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use hmac::{Hmac, Mac};
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::options::FindOptions;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha512;

use crate::{
    error::{ApiError, FieldErrors},
    events::{self, WALLET_UPDATED},
    models::{wallet::USD, Deposit, User},
    AppState,
};

use super::{
    account_service, audit_service, notification_service, referral_service, telegram_service::escape_html,
};

type HmacSha512 = Hmac<Sha512>;

pub const SIGNATURE_HEADER: &str = "x-nowpayments-sig";
pub const MIN_DEPOSIT_USD: f64 = 10.0;
pub const PAY_CURRENCIES: &[&str] = &[
    "btc", "eth", "usdttrc20", "usdterc20", "usdc", "ltc", "sol", "doge", "xrp", "bnbbsc", "ada", "trx", "matic",
];

pub const STATUS_WAITING: &str = "waiting";
pub const STATUS_FINISHED: &str = "finished";

/// Thin NOWPayments REST client.
#[derive(Clone)]
pub struct NowPayments {
    http: reqwest::Client,
    api_key: String,
    ipn_secret: String,
    base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentInfo {
    #[serde(deserialize_with = "id_string")]
    pub payment_id: String,
    #[serde(default)]
    pub payment_status: String,
    #[serde(default)]
    pub pay_address: Option<String>,
    #[serde(default)]
    pub pay_amount: Option<f64>,
    #[serde(default)]
    pub actually_paid: Option<f64>,
    #[serde(default)]
    pub order_id: Option<String>,
}

// payment ids come back as numbers from /payment and strings from some IPNs
fn id_string<'de, D: serde::Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("bad payment_id: {other}"))),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepositInput {
    #[serde(default)]
    pub amount_usd: f64,
    #[serde(default)]
    pub pay_currency: String,
}

impl NowPayments {
    pub fn new(api_key: String, ipn_secret: String, base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_key,
            ipn_secret,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub fn can_verify_ipn(&self) -> bool {
        !self.ipn_secret.is_empty()
    }

    pub async fn create_payment(&self, deposit: &Deposit, ipn_callback_url: &str) -> Result<PaymentInfo, String> {
        let body = json!({
            "price_amount": deposit.price_amount,
            "price_currency": "usd",
            "pay_currency": deposit.pay_currency,
            "order_id": deposit.id.to_hex(),
            "order_description": "CoinMarket deposit",
            "ipn_callback_url": ipn_callback_url,
        });

        let res = self
            .http
            .post(format!("{}/v1/payment", self.base_url))
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !res.status().is_success() {
            let code = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(format!("nowpayments {code}: {text}"));
        }
        res.json::<PaymentInfo>().await.map_err(|e| e.to_string())
    }

    pub async fn get_payment(&self, payment_id: &str) -> Result<PaymentInfo, String> {
        let res = self
            .http
            .get(format!("{}/v1/payment/{}", self.base_url, payment_id))
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !res.status().is_success() {
            return Err(format!("nowpayments {}", res.status()));
        }
        res.json::<PaymentInfo>().await.map_err(|e| e.to_string())
    }

    pub fn verify_ipn(&self, body: &[u8], signature: &str) -> bool {
        verify_ipn_signature(&self.ipn_secret, body, signature)
    }
}

/// The signed payload is the body re-serialised with object keys sorted at
/// every level.
pub fn canonical_json(body: &[u8]) -> Option<String> {
    // serde_json::Map is a BTreeMap without the preserve_order feature
    let v: Value = serde_json::from_slice(body).ok()?;
    serde_json::to_string(&v).ok()
}

pub fn sign_ipn(secret: &str, body: &[u8]) -> Option<String> {
    let canonical = canonical_json(body)?;
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(canonical.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

pub fn verify_ipn_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Some(canonical) = canonical_json(body) else {
        return false;
    };
    let Ok(sig) = hex::decode(signature.trim().to_ascii_lowercase()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(canonical.as_bytes());
    mac.verify_slice(&sig).is_ok()
}

pub fn validate_deposit(input: &DepositInput) -> Result<(f64, String), FieldErrors> {
    let mut errs = FieldErrors::new();

    if !input.amount_usd.is_finite() || input.amount_usd < MIN_DEPOSIT_USD {
        errs.insert(
            "amount_usd".into(),
            format!("Minimum deposit is ${MIN_DEPOSIT_USD:.0}."),
        );
    }

    let pay = input.pay_currency.trim().to_lowercase();
    if !PAY_CURRENCIES.contains(&pay.as_str()) {
        errs.insert("pay_currency".into(), "Unsupported pay currency.".into());
    }

    if errs.is_empty() {
        Ok((input.amount_usd, pay))
    } else {
        Err(errs)
    }
}

fn deposits(state: &AppState) -> mongodb::Collection<Deposit> {
    state.db.collection::<Deposit>("deposits")
}

pub async fn create_deposit(state: &AppState, user_id: ObjectId, input: &DepositInput) -> Result<Deposit, ApiError> {
    let (amount, pay_currency) = validate_deposit(input).map_err(ApiError::validation)?;

    if !state.payments.is_enabled() {
        return Err(ApiError::unavailable("Payments are not configured"));
    }

    let now = Utc::now().timestamp();
    let mut deposit = Deposit {
        id: ObjectId::new(),
        user_id,
        payment_id: None,
        price_amount: amount,
        pay_currency,
        pay_amount: None,
        pay_address: None,
        actually_paid: None,
        status: STATUS_WAITING.to_string(),
        credited: false,
        created_at: now,
        updated_at: now,
    };

    let callback = format!(
        "{}/api/payments/ipn",
        state.settings.public_base_url.trim_end_matches('/')
    );
    let info = state
        .payments
        .create_payment(&deposit, &callback)
        .await
        .map_err(|e| {
            tracing::warn!("create payment failed: {}", e);
            ApiError::new(axum::http::StatusCode::BAD_GATEWAY, "Payment provider error")
        })?;

    deposit.payment_id = Some(info.payment_id);
    deposit.pay_address = info.pay_address;
    deposit.pay_amount = info.pay_amount;
    if !info.payment_status.is_empty() {
        deposit.status = info.payment_status;
    }

    deposits(state).insert_one(&deposit, None).await?;

    tracing::info!("deposit {} created for {} (${})", deposit.id, user_id, amount);
    Ok(deposit)
}

pub async fn list_deposits(state: &AppState, user_id: Option<ObjectId>, status: Option<&str>, limit: i64) -> Result<Vec<Deposit>, String> {
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

    let mut cursor = deposits(state).find(filter, opts).await.map_err(|e| e.to_string())?;
    let mut out = Vec::new();
    while let Some(item) = cursor.next().await {
        out.push(item.map_err(|e| e.to_string())?);
    }
    Ok(out)
}

/// Pulls the latest status from NOWPayments for one of the user's deposits.
pub async fn refresh_status(state: &AppState, user_id: ObjectId, payment_id: &str) -> Result<Deposit, ApiError> {
    let deposit = deposits(state)
        .find_one(doc! { "payment_id": payment_id, "user_id": user_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Deposit not found"))?;

    if !state.payments.is_enabled() {
        return Ok(deposit);
    }

    let info = state.payments.get_payment(payment_id).await.map_err(|e| {
        tracing::warn!("payment status {} failed: {}", payment_id, e);
        ApiError::new(axum::http::StatusCode::BAD_GATEWAY, "Payment provider error")
    })?;

    apply_status(state, deposit, &info).await
}

/// Entry point for the IPN webhook. The signature is checked by the caller.
pub async fn handle_ipn(state: &AppState, body: &[u8]) -> Result<Deposit, ApiError> {
    let info: PaymentInfo =
        serde_json::from_slice(body).map_err(|_| ApiError::bad_request("Invalid IPN payload"))?;

    let deposit = deposits(state)
        .find_one(doc! { "payment_id": &info.payment_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Unknown payment"))?;

    tracing::info!("ipn payment={} status={}", info.payment_id, info.payment_status);
    apply_status(state, deposit, &info).await
}

async fn apply_status(state: &AppState, deposit: Deposit, info: &PaymentInfo) -> Result<Deposit, ApiError> {
    let now = Utc::now().timestamp();
    let status = if info.payment_status.is_empty() {
        deposit.status.clone()
    } else {
        info.payment_status.clone()
    };

    let mut set = doc! { "status": &status, "updated_at": now };
    if let Some(paid) = info.actually_paid {
        set.insert("actually_paid", paid);
    }
    deposits(state)
        .update_one(doc! { "_id": deposit.id }, doc! { "$set": set }, None)
        .await?;

    let mut updated = Deposit {
        status,
        actually_paid: info.actually_paid.or(deposit.actually_paid),
        updated_at: now,
        ..deposit
    };

    if updated.status == STATUS_FINISHED && credit_once(state, &updated).await? {
        updated.credited = true;
    }

    Ok(updated)
}

/// Filter and update that flip the `credited` flag from `from` to `!from`.
fn credited_flip(id: ObjectId, from: bool) -> (Document, Document) {
    (
        doc! { "_id": id, "credited": from },
        doc! { "$set": { "credited": !from, "updated_at": Utc::now().timestamp() } },
    )
}

/// Credits a finished deposit. The `credited: false` guard makes repeated
/// IPNs and status polls safe; a failed wallet credit hands the claim back.
async fn credit_once(state: &AppState, d: &Deposit) -> Result<bool, ApiError> {
    let (filter, update) = credited_flip(d.id, false);
    let claimed = deposits(state).update_one(filter, update, None).await?;
    if claimed.matched_count == 0 {
        return Ok(false);
    }

    let amount = d.price_amount;
    if let Err(e) = account_service::credit(state, d.user_id, USD, amount).await {
        tracing::error!("crediting deposit {} payment={:?} user={} failed: {}", d.id, d.payment_id, d.user_id, e);
        let (filter, update) = credited_flip(d.id, true);
        if let Err(r) = deposits(state).update_one(filter, update, None).await {
            tracing::error!("releasing credit claim on deposit {} failed: {}", d.id, r);
        }
        return Err(ApiError::internal(e));
    }
    account_service::record_transaction_logged(state, d.user_id, "deposit", USD, amount, d.payment_id.clone()).await;

    audit_service::record(
        state,
        None,
        "deposit.credited",
        Some(d.id.to_hex()),
        doc! { "user_id": d.user_id, "amount": amount, "payment_id": d.payment_id.clone() },
        None,
    )
    .await;

    if let Err(e) = referral_service::reward_first_deposit(state, d.user_id, amount).await {
        tracing::warn!("referral reward for {} failed: {}", d.user_id, e);
    }

    notification_service::notify_logged(
        state,
        d.user_id,
        "Deposit confirmed",
        &format!("${amount:.2} has been credited to your wallet."),
        "deposit",
    )
    .await;
    events::emit(&state.events_tx, d.user_id, WALLET_UPDATED);

    let users = state.db.collection::<User>("users");
    if let Ok(Some(u)) = users.find_one(doc! { "_id": d.user_id }, None).await {
        state.email.spawn_template(
            u.email.clone(),
            "deposit_confirmed",
            json!({
                "username": u.username,
                "amount": format!("{amount:.2}"),
                "pay_currency": d.pay_currency.to_uppercase(),
                "payment_id": d.payment_id,
            }),
        );
        state.telegram.spawn_admin(format!(
            "💰 Deposit <b>${amount:.2}</b> ({}) credited to {}",
            escape_html(&d.pay_currency.to_uppercase()),
            escape_html(&u.username)
        ));
    }

    tracing::info!("deposit {} credited ${} to {}", d.id, amount, d.user_id);
    Ok(true)
}

#[derive(Debug, Serialize)]
pub struct DepositTotals {
    pub finished_count: u64,
    pub finished_usd: f64,
}

pub async fn finished_totals(state: &AppState) -> Result<DepositTotals, String> {
    let mut cursor = deposits(state)
        .find(doc! { "credited": true }, None)
        .await
        .map_err(|e| e.to_string())?;

    let mut totals = DepositTotals {
        finished_count: 0,
        finished_usd: 0.0,
    };
    while let Some(item) = cursor.next().await {
        let d = item.map_err(|e| e.to_string())?;
        totals.finished_count += 1;
        totals.finished_usd += d.price_amount;
    }
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credit_claim_and_release_are_mirror_guards() {
        let id = ObjectId::new();

        let (filter, update) = credited_flip(id, false);
        assert_eq!(filter, doc! { "_id": id, "credited": false });
        assert!(update.get_document("$set").unwrap().get_bool("credited").unwrap());

        // release only matches a claimed row and puts it back up for crediting
        let (filter, update) = credited_flip(id, true);
        assert_eq!(filter, doc! { "_id": id, "credited": true });
        assert!(!update.get_document("$set").unwrap().get_bool("credited").unwrap());
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let body = br#"{"b":1,"a":{"z":true,"c":null},"payment_id":5}"#;
        assert_eq!(
            canonical_json(body).unwrap(),
            r#"{"a":{"c":null,"z":true},"b":1,"payment_id":5}"#
        );
    }

    #[test]
    fn signature_ignores_key_order() {
        let a = br#"{"payment_id":1,"payment_status":"finished"}"#;
        let b = br#"{ "payment_status": "finished", "payment_id": 1 }"#;
        let sig = sign_ipn("secret", a).unwrap();

        assert_eq!(sig.len(), 128);
        assert!(verify_ipn_signature("secret", b, &sig));
        assert!(verify_ipn_signature("secret", b, &sig.to_uppercase()));
        assert!(!verify_ipn_signature("other", b, &sig));
        assert!(!verify_ipn_signature("", b, &sig));
        assert!(!verify_ipn_signature("secret", b"not json", &sig));
        assert!(!verify_ipn_signature("secret", b, "zz"));
    }

    #[test]
    fn payment_id_accepts_numbers_and_strings() {
        let p: PaymentInfo = serde_json::from_str(r#"{"payment_id":5077125051,"payment_status":"waiting"}"#).unwrap();
        assert_eq!(p.payment_id, "5077125051");
        let p: PaymentInfo = serde_json::from_str(r#"{"payment_id":"abc"}"#).unwrap();
        assert_eq!(p.payment_id, "abc");
    }

    #[test]
    fn deposit_validation() {
        let ok = validate_deposit(&DepositInput {
            amount_usd: 25.0,
            pay_currency: " BTC ".into(),
        })
        .unwrap();
        assert_eq!(ok, (25.0, "btc".to_string()));

        let errs = validate_deposit(&DepositInput {
            amount_usd: 5.0,
            pay_currency: "monopoly".into(),
        })
        .unwrap_err();
        assert!(errs.contains_key("amount_usd"));
        assert!(errs.contains_key("pay_currency"));
    }
}
