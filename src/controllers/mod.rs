use std::net::SocketAddr;

use axum::{extract::ConnectInfo, http::HeaderMap};
use mongodb::bson::{doc, oid::ObjectId};

use crate::{error::ApiError, middleware::rate_limit::forwarded_ip, models::User, AppState};

pub mod home_controller;
pub mod auth_controller;
pub mod wallet_controller;
pub mod trading_controller;
pub mod portfolio_controller;
pub mod market_controller;
pub mod alerts_controller;
pub mod notifications_controller;
pub mod payments_controller;
pub mod withdrawals_controller;
pub mod referrals_controller;
pub mod kyc_controller;
pub mod admin_controller;
pub mod realtime_controller;

/// Path ids that do not parse are reported as missing resources.
pub fn parse_id(raw: &str, what: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(raw.trim()).map_err(|_| ApiError::not_found(format!("{what} not found")))
}

pub fn request_ip(headers: &HeaderMap, peer: Option<ConnectInfo<SocketAddr>>) -> Option<String> {
    forwarded_ip(headers).or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()))
}

pub fn blank_to_none(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Full user document for the session. A session whose user vanished is
/// treated as logged out.
pub async fn load_user(state: &AppState, id: ObjectId) -> Result<User, ApiError> {
    state
        .db
        .collection::<User>("users")
        .find_one(doc! { "_id": id }, None)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Not authenticated"))
}
