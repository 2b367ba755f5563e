use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_APPROVED: &str = "approved";
pub const STATUS_REJECTED: &str = "rejected";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user_id: ObjectId,
    pub currency: String,
    pub amount: f64,
    pub address: String,
    pub status: String,
    #[serde(default)]
    pub admin_note: Option<String>,
    #[serde(default)]
    pub reviewed_by: Option<ObjectId>,
    pub created_at: i64,
    #[serde(default)]
    pub reviewed_at: Option<i64>,
}

impl Withdrawal {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id.to_hex(),
            "user_id": self.user_id.to_hex(),
            "currency": self.currency,
            "amount": self.amount,
            "address": self.address,
            "status": self.status,
            "admin_note": self.admin_note,
            "created_at": self.created_at,
            "reviewed_at": self.reviewed_at,
        })
    }
}
