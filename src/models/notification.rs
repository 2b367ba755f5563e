use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user_id: ObjectId,
    pub title: String,
    pub body: String,
    // "alert" | "order" | "deposit" | "withdrawal" | "referral" | "system"
    pub kind: String,
    pub read: bool,
    pub created_at: i64,
    // TTL index field
    pub expires_at: DateTime,
}

impl Notification {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id.to_hex(),
            "title": self.title,
            "body": self.body,
            "kind": self.kind,
            "read": self.read,
            "created_at": self.created_at,
        })
    }
}
