use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const ROLE_USER: &str = "user";
pub const ROLE_ADMIN: &str = "admin";

pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_SUSPENDED: &str = "suspended";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub email: String,
    pub username: String,
    pub password_hash: String,

    // "user" | "admin"
    #[serde(default = "default_role")]
    pub role: String,
    // "active" | "suspended"
    #[serde(default = "default_status")]
    pub status: String,

    pub referral_code: String,
    #[serde(default)]
    pub referred_by: Option<ObjectId>,

    // "none" | "pending" | "approved" | "rejected"
    #[serde(default = "default_kyc")]
    pub kyc_status: String,

    #[serde(default)]
    pub device_tokens: Vec<String>,

    pub created_at: i64,
    #[serde(default)]
    pub last_login_at: Option<i64>,
}

fn default_role() -> String {
    ROLE_USER.to_string()
}

fn default_status() -> String {
    STATUS_ACTIVE.to_string()
}

fn default_kyc() -> String {
    "none".to_string()
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }

    /// Public view, never includes the password hash.
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id.to_hex(),
            "email": self.email,
            "username": self.username,
            "role": self.role,
            "status": self.status,
            "referral_code": self.referral_code,
            "kyc_status": self.kyc_status,
            "created_at": self.created_at,
            "last_login_at": self.last_login_at,
        })
    }
}

/// The authenticated user as injected into request extensions.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: ObjectId,
    pub email: String,
    pub username: String,
    pub role: String,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

impl From<User> for CurrentUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            username: u.username,
            role: u.role,
        }
    }
}
