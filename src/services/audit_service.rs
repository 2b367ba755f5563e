use chrono::Utc;
use futures_util::StreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, Document},
    options::FindOptions,
};

use crate::{models::AuditLog, AppState};

/// Writes an audit row. Failures are logged and swallowed; auditing must
/// never break the action being audited.
pub async fn record(
    state: &AppState,
    actor_id: Option<ObjectId>,
    action: &str,
    target: Option<String>,
    details: Document,
    ip: Option<String>,
) {
    let row = AuditLog {
        id: ObjectId::new(),
        actor_id,
        action: action.to_string(),
        target,
        details,
        ip,
        created_at: Utc::now().timestamp(),
    };

    if let Err(e) = state.db.collection::<AuditLog>("audit_logs").insert_one(row, None).await {
        tracing::error!("audit insert failed action={}: {}", action, e);
    }
}

pub async fn list(state: &AppState, action: Option<&str>, actor_id: Option<ObjectId>, limit: i64) -> Result<Vec<AuditLog>, String> {
    let mut filter = doc! {};
    if let Some(a) = action {
        filter.insert("action", a);
    }
    if let Some(id) = actor_id {
        filter.insert("actor_id", id);
    }

    let opts = FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .limit(limit.clamp(1, 500))
        .build();

    let mut cursor = state
        .db
        .collection::<AuditLog>("audit_logs")
        .find(filter, opts)
        .await
        .map_err(|e| e.to_string())?;

    let mut out = Vec::new();
    while let Some(item) = cursor.next().await {
        out.push(item.map_err(|e| e.to_string())?);
    }
    Ok(out)
}
