use chrono::Utc;
use futures_util::StreamExt;
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::options::FindOptions;
use serde::Deserialize;

use crate::{
    error::{ApiError, FieldErrors},
    events::{self, ALERTS_UPDATED},
    models::PriceAlert,
    AppState,
};

use super::validators;

pub const MAX_ACTIVE_ALERTS: u64 = 50;

#[derive(Debug, Clone, Deserialize)]
pub struct AlertInput {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub target_price: f64,
}

pub fn validate_alert(input: &AlertInput) -> Result<(String, String, f64), FieldErrors> {
    let mut errs = FieldErrors::new();

    let symbol = validators::normalize_symbol(&input.symbol);
    if symbol.is_none() {
        errs.insert("symbol".into(), "Unsupported symbol.".into());
    }

    let condition = input.condition.trim().to_lowercase();
    if condition != "above" && condition != "below" {
        errs.insert("condition".into(), "Condition must be above or below.".into());
    }

    if !validators::is_valid_amount(input.target_price) {
        errs.insert("target_price".into(), "Enter a valid target price.".into());
    }

    match symbol {
        Some(s) if errs.is_empty() => Ok((s, condition, input.target_price)),
        _ => Err(errs),
    }
}

fn alerts(state: &AppState) -> mongodb::Collection<PriceAlert> {
    state.db.collection::<PriceAlert>("price_alerts")
}

pub async fn list_user_alerts(state: &AppState, user_id: ObjectId) -> Result<Vec<PriceAlert>, String> {
    let find_opts = FindOptions::builder().sort(doc! { "created_at": -1 }).build();

    let mut cursor = alerts(state)
        .find(doc! { "user_id": user_id }, find_opts)
        .await
        .map_err(|e| e.to_string())?;

    let mut items: Vec<PriceAlert> = Vec::new();
    while let Some(res) = cursor.next().await {
        items.push(res.map_err(|e| e.to_string())?);
    }

    Ok(items)
}

pub async fn create_alert(state: &AppState, user_id: ObjectId, input: &AlertInput) -> Result<PriceAlert, ApiError> {
    let (symbol, condition, target_price) = validate_alert(input).map_err(ApiError::validation)?;

    let active = alerts(state)
        .count_documents(doc! { "user_id": user_id, "triggered": false }, None)
        .await?;
    if active >= MAX_ACTIVE_ALERTS {
        return Err(ApiError::bad_request(format!(
            "You can have at most {MAX_ACTIVE_ALERTS} active alerts."
        )));
    }

    let alert = PriceAlert {
        id: ObjectId::new(),
        user_id,
        symbol,
        condition,
        target_price,
        created_at: Utc::now().timestamp(),
        triggered: false,
        triggered_at: None,
    };

    alerts(state).insert_one(&alert, None).await?;

    events::emit(&state.events_tx, user_id, ALERTS_UPDATED);

    Ok(alert)
}

/// Returns false when the alert does not exist or belongs to someone else.
pub async fn delete_alert(state: &AppState, user_id: ObjectId, alert_id: ObjectId) -> Result<bool, String> {
    let res = alerts(state)
        .delete_one(doc! { "_id": alert_id, "user_id": user_id }, None)
        .await
        .map_err(|e| e.to_string())?;

    if res.deleted_count > 0 {
        events::emit(&state.events_tx, user_id, ALERTS_UPDATED);
    }

    Ok(res.deleted_count > 0)
}

/// Returns true if the alert was newly triggered, false if it was already triggered.
pub async fn trigger_alert(state: &AppState, alert_id: ObjectId) -> Result<bool, String> {
    let now = Utc::now().timestamp();

    let res = alerts(state)
        .update_one(
            doc! { "_id": alert_id, "triggered": false },
            doc! { "$set": { "triggered": true, "triggered_at": now } },
            None,
        )
        .await
        .map_err(|e| e.to_string())?;

    Ok(res.matched_count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_alert_input() {
        let ok = validate_alert(&AlertInput {
            symbol: " eth ".into(),
            condition: "ABOVE".into(),
            target_price: 4000.0,
        })
        .unwrap();
        assert_eq!(ok, ("ETH".to_string(), "above".to_string(), 4000.0));

        let errs = validate_alert(&AlertInput {
            symbol: "XYZ".into(),
            condition: "sideways".into(),
            target_price: 0.0,
        })
        .unwrap_err();
        assert_eq!(errs.len(), 3);
    }
}
