use mongodb::bson::oid::ObjectId;
use tokio::sync::broadcast;

pub const ORDERS_UPDATED: &str = "ordersUpdated";
pub const WALLET_UPDATED: &str = "walletUpdated";
pub const ALERTS_UPDATED: &str = "alertsUpdated";
pub const NOTIFICATION: &str = "notification";
pub const KYC_UPDATED: &str = "kycUpdated";

/// In-process app event, fanned out to `/api/events` SSE streams.
/// `user_id: None` reaches every connected user.
#[derive(Debug, Clone)]
pub struct AppEvent {
    pub user_id: Option<ObjectId>,
    pub name: String,
}

impl AppEvent {
    pub fn is_for(&self, user_id: &ObjectId) -> bool {
        self.user_id.as_ref().map(|u| u == user_id).unwrap_or(true)
    }
}

pub fn channel() -> (broadcast::Sender<AppEvent>, broadcast::Receiver<AppEvent>) {
    broadcast::channel(256)
}

pub fn emit(tx: &broadcast::Sender<AppEvent>, user_id: ObjectId, name: &str) {
    // no live listeners is fine
    let _ = tx.send(AppEvent {
        user_id: Some(user_id),
        name: name.to_string(),
    });
}

pub fn emit_all(tx: &broadcast::Sender<AppEvent>, names: &[&str], user_id: ObjectId) {
    for n in names {
        emit(tx, user_id, n);
    }
}
