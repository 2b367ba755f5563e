use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Ledger row. `amount` is signed: credits positive, debits negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub user_id: ObjectId,
    // deposit | withdrawal | trade | fee | referral_bonus | signup_bonus | adjustment
    pub kind: String,
    pub currency: String,
    pub amount: f64,
    #[serde(default)]
    pub reference: Option<String>,
    pub created_at: i64,
}

impl Transaction {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id.to_hex(),
            "kind": self.kind,
            "currency": self.currency,
            "amount": self.amount,
            "reference": self.reference,
            "created_at": self.created_at,
        })
    }
}
