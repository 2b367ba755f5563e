use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_REWARDED: &str = "rewarded";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Referral {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub referrer_id: ObjectId,
    pub referred_id: ObjectId,
    pub status: String,
    #[serde(default)]
    pub reward_usd: f64,
    pub created_at: i64,
    #[serde(default)]
    pub rewarded_at: Option<i64>,
}
