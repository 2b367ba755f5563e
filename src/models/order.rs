use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const SIDE_BUY: &str = "buy";
pub const SIDE_SELL: &str = "sell";

pub const KIND_MARKET: &str = "market";
pub const KIND_LIMIT: &str = "limit";

pub const STATUS_OPEN: &str = "open";
pub const STATUS_FILLED: &str = "filled";
pub const STATUS_CANCELLED: &str = "cancelled";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user_id: ObjectId,
    pub symbol: String,
    pub side: String,
    pub kind: String,
    pub qty: f64,
    #[serde(default)]
    pub limit_price: Option<f64>,
    #[serde(default)]
    pub fill_price: Option<f64>,
    #[serde(default)]
    pub fee: f64,
    // notional in USD (qty * fill or limit price)
    #[serde(default)]
    pub total: f64,
    // USD held for open limit buys
    #[serde(default)]
    pub locked_amount: f64,
    pub status: String,
    pub created_at: i64,
    #[serde(default)]
    pub filled_at: Option<i64>,
}

impl Order {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id.to_hex(),
            "symbol": self.symbol,
            "side": self.side,
            "kind": self.kind,
            "qty": self.qty,
            "limit_price": self.limit_price,
            "fill_price": self.fill_price,
            "fee": self.fee,
            "total": self.total,
            "status": self.status,
            "created_at": self.created_at,
            "filled_at": self.filled_at,
        })
    }
}
