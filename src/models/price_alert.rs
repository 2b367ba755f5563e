use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceAlert {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub user_id: ObjectId,
    pub symbol: String,

    // "above" | "below"
    pub condition: String,
    pub target_price: f64,

    pub created_at: i64,

    pub triggered: bool,
    pub triggered_at: Option<i64>,
}

impl PriceAlert {
    pub fn is_hit(&self, price: f64) -> bool {
        (self.condition == "above" && price >= self.target_price)
            || (self.condition == "below" && price <= self.target_price)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id.to_hex(),
            "symbol": self.symbol,
            "condition": self.condition,
            "target_price": self.target_price,
            "triggered": self.triggered,
            "triggered_at": self.triggered_at,
            "created_at": self.created_at,
        })
    }
}
