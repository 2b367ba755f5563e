use mongodb::bson::{oid::ObjectId, Document};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(default)]
    pub actor_id: Option<ObjectId>,
    pub action: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub details: Document,
    #[serde(default)]
    pub ip: Option<String>,
    pub created_at: i64,
}

impl AuditLog {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id.to_hex(),
            "actor_id": self.actor_id.map(|id| id.to_hex()),
            "action": self.action,
            "target": self.target,
            "details": serde_json::to_value(&self.details).unwrap_or(Value::Null),
            "ip": self.ip,
            "created_at": self.created_at,
        })
    }
}
