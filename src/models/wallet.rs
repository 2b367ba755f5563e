use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const USD: &str = "USD";

/// One balance row per (user, currency).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub user_id: ObjectId,
    pub currency: String,

    pub available: f64,
    #[serde(default)]
    pub locked: f64,

    // average USD cost per unit, 0 for USD
    #[serde(default)]
    pub avg_cost: f64,

    pub updated_at: i64,
}

impl Wallet {
    pub fn total(&self) -> f64 {
        self.available + self.locked
    }

    pub fn to_json(&self) -> Value {
        json!({
            "currency": self.currency,
            "available": self.available,
            "locked": self.locked,
            "total": self.total(),
            "avg_cost": self.avg_cost,
            "updated_at": self.updated_at,
        })
    }
}
