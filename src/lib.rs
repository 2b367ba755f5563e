//! Library entrypoint for CoinMarket.
//!
//! `main.rs` only wires startup; everything else lives here so integration
//! tests under `tests/` can build the full router against a lazy client.

pub mod config;
pub mod error;
pub mod events;
pub mod models;

pub mod middleware;
pub mod services;

#[path = "views/templates.rs"]
pub mod templates;

pub mod controllers;
pub mod routes;

use services::{
    cache::CacheService, email_service::EmailService, market_data::MarketDataService,
    payment_service::NowPayments, price_stream::PriceStream, push_service::PushService,
    telegram_service::TelegramService, ws_manager::ConnectionManager,
};

#[derive(Clone)]
pub struct AppState {
    pub hbs: templates::Hbs,
    pub db: mongodb::Database,
    pub settings: config::Settings,

    pub cache: CacheService,
    pub market: MarketDataService,
    pub prices: PriceStream,
    pub connections: ConnectionManager,
    pub limiter: middleware::rate_limit::RateLimiter,

    pub email: EmailService,
    pub push: PushService,
    pub telegram: TelegramService,
    pub payments: NowPayments,

    pub events_tx: tokio::sync::broadcast::Sender<events::AppEvent>,
}

impl AppState {
    /// Builds every service from settings. Nothing here touches the network.
    pub fn new(db: mongodb::Database, settings: config::Settings) -> Result<Self, String> {
        let hbs = templates::build_handlebars()?;
        let cache = CacheService::new(settings.upstash_url.clone(), settings.upstash_token.clone());
        let market = MarketDataService::new(
            cache.clone(),
            settings.coingecko_api_key.clone(),
            settings.coinmarketcap_api_key.clone(),
            settings.price_cache_ttl_secs,
        );
        let (events_tx, _rx) = events::channel();

        Ok(Self {
            email: EmailService::new(settings.sendgrid_api_key.clone(), settings.email_from.clone(), hbs.clone()),
            push: PushService::new(settings.fcm_server_key.clone()),
            telegram: TelegramService::new(
                settings.telegram_bot_token.clone(),
                settings.telegram_admin_chat_id.clone(),
            ),
            payments: NowPayments::new(
                settings.nowpayments_api_key.clone(),
                settings.nowpayments_ipn_secret.clone(),
                settings.nowpayments_base_url.clone(),
            ),
            prices: PriceStream::new(settings.price_stream_stale_secs),
            connections: ConnectionManager::new(settings.ws_max_connections, settings.ws_max_per_ip),
            limiter: middleware::rate_limit::RateLimiter::new(settings.rate_limit_burst, settings.rate_limit_per_sec),
            hbs,
            db,
            cache,
            market,
            events_tx,
            settings,
        })
    }
}
