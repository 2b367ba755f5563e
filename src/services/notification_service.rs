use chrono::{Duration, Utc};
use futures_util::StreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, DateTime},
    options::FindOptions,
};

use crate::{
    events,
    models::{Notification, User},
    AppState,
};

const RETENTION_DAYS: i64 = 90;

/// Stores an in-app notification, signals open SSE streams, and pushes to
/// the user's registered devices.
pub async fn notify(state: &AppState, user_id: ObjectId, title: &str, body: &str, kind: &str) -> Result<Notification, String> {
    let now = Utc::now();
    let n = Notification {
        id: ObjectId::new(),
        user_id,
        title: title.to_string(),
        body: body.to_string(),
        kind: kind.to_string(),
        read: false,
        created_at: now.timestamp(),
        expires_at: DateTime::from_millis((now + Duration::days(RETENTION_DAYS)).timestamp_millis()),
    };

    state
        .db
        .collection::<Notification>("notifications")
        .insert_one(&n, None)
        .await
        .map_err(|e| e.to_string())?;

    events::emit(&state.events_tx, user_id, events::NOTIFICATION);

    if state.push.is_enabled() {
        let push = state.push.clone();
        let users = state.db.collection::<User>("users");
        let (title, body) = (title.to_string(), body.to_string());
        tokio::spawn(async move {
            let tokens = match users.find_one(doc! { "_id": user_id }, None).await {
                Ok(Some(u)) => u.device_tokens,
                _ => return,
            };
            if let Err(e) = push.send(&tokens, &title, &body).await {
                tracing::warn!("push to {} failed: {}", user_id, e);
            }
        });
    }

    Ok(n)
}

pub async fn notify_logged(state: &AppState, user_id: ObjectId, title: &str, body: &str, kind: &str) {
    if let Err(e) = notify(state, user_id, title, body, kind).await {
        tracing::warn!("notification for {} failed: {}", user_id, e);
    }
}

pub async fn list(state: &AppState, user_id: ObjectId, unread_only: bool, limit: i64) -> Result<Vec<Notification>, String> {
    let mut filter = doc! { "user_id": user_id };
    if unread_only {
        filter.insert("read", false);
    }

    let opts = FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .limit(limit.clamp(1, 200))
        .build();

    let mut cursor = state
        .db
        .collection::<Notification>("notifications")
        .find(filter, opts)
        .await
        .map_err(|e| e.to_string())?;

    let mut out = Vec::new();
    while let Some(item) = cursor.next().await {
        out.push(item.map_err(|e| e.to_string())?);
    }
    Ok(out)
}

pub async fn unread_count(state: &AppState, user_id: ObjectId) -> Result<u64, String> {
    state
        .db
        .collection::<Notification>("notifications")
        .count_documents(doc! { "user_id": user_id, "read": false }, None)
        .await
        .map_err(|e| e.to_string())
}

/// Returns false when no notification of this user has that id.
pub async fn mark_read(state: &AppState, user_id: ObjectId, id: ObjectId) -> Result<bool, String> {
    let res = state
        .db
        .collection::<Notification>("notifications")
        .update_one(
            doc! { "_id": id, "user_id": user_id },
            doc! { "$set": { "read": true } },
            None,
        )
        .await
        .map_err(|e| e.to_string())?;
    Ok(res.matched_count > 0)
}

pub async fn mark_all_read(state: &AppState, user_id: ObjectId) -> Result<u64, String> {
    let res = state
        .db
        .collection::<Notification>("notifications")
        .update_many(
            doc! { "user_id": user_id, "read": false },
            doc! { "$set": { "read": true } },
            None,
        )
        .await
        .map_err(|e| e.to_string())?;
    Ok(res.modified_count)
}

pub async fn add_device(state: &AppState, user_id: ObjectId, token: &str) -> Result<(), String> {
    state
        .db
        .collection::<User>("users")
        .update_one(
            doc! { "_id": user_id },
            doc! { "$addToSet": { "device_tokens": token } },
            None,
        )
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}

pub async fn remove_device(state: &AppState, user_id: ObjectId, token: &str) -> Result<(), String> {
    state
        .db
        .collection::<User>("users")
        .update_one(
            doc! { "_id": user_id },
            doc! { "$pull": { "device_tokens": token } },
            None,
        )
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}

/// Notifies every active user. Returns how many were reached.
pub async fn broadcast(state: &AppState, title: &str, body: &str) -> Result<u64, String> {
    let mut cursor = state
        .db
        .collection::<User>("users")
        .find(doc! { "status": "active" }, None)
        .await
        .map_err(|e| e.to_string())?;

    let mut sent = 0u64;
    while let Some(item) = cursor.next().await {
        let u = item.map_err(|e| e.to_string())?;
        if notify(state, u.id, title, body, "system").await.is_ok() {
            sent += 1;
        }
    }
    Ok(sent)
}
