pub mod db_init;
pub mod alert_monitor;
pub mod order_matcher;

pub mod assets;
pub mod validators;
pub mod cache;
pub mod market_data;
pub mod price_stream;
pub mod ws_manager;

pub mod auth_service;
pub mod account_service;
pub mod trading_service;
pub mod portfolio_service;
pub mod alerts_service;
pub mod referral_service;
pub mod payment_service;
pub mod withdrawal_service;
pub mod kyc_service;
pub mod admin_service;
pub mod audit_service;

pub mod notification_service;
pub mod email_service;
pub mod push_service;
pub mod telegram_service;
