use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A NOWPayments payment tracked until it is credited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deposit {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user_id: ObjectId,

    #[serde(default)]
    pub payment_id: Option<String>,
    pub price_amount: f64,
    pub pay_currency: String,
    #[serde(default)]
    pub pay_amount: Option<f64>,
    #[serde(default)]
    pub pay_address: Option<String>,
    #[serde(default)]
    pub actually_paid: Option<f64>,

    pub status: String,
    #[serde(default)]
    pub credited: bool,

    pub created_at: i64,
    pub updated_at: i64,
}

impl Deposit {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id.to_hex(),
            "payment_id": self.payment_id,
            "price_amount": self.price_amount,
            "price_currency": "usd",
            "pay_currency": self.pay_currency,
            "pay_amount": self.pay_amount,
            "pay_address": self.pay_address,
            "actually_paid": self.actually_paid,
            "status": self.status,
            "credited": self.credited,
            "created_at": self.created_at,
            "updated_at": self.updated_at,
        })
    }
}
