pub mod user;
pub mod wallet;
pub mod transaction;
pub mod order;
pub mod deposit;
pub mod withdrawal;
pub mod price_alert;
pub mod notification;
pub mod audit_log;
pub mod referral;
pub mod kyc_document;

pub use user::{CurrentUser, User};
pub use wallet::Wallet;
pub use transaction::Transaction;
pub use order::Order;
pub use deposit::Deposit;
pub use withdrawal::Withdrawal;
pub use price_alert::PriceAlert;
pub use notification::Notification;
pub use audit_log::AuditLog;
pub use referral::Referral;
pub use kyc_document::KycDocument;
