use std::env;

#[derive(Debug, Clone)]
pub struct Settings {
    pub mongodb_uri: String,
    pub mongodb_db: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,

    pub jwt_secret: String,
    pub jwt_cookie_name: String,
    pub jwt_ttl_days: i64,
    pub cookie_secure: bool,
    pub csrf_cookie_name: String,

    pub trading_fee_rate: f64,
    pub signup_bonus_usd: f64,
    pub min_withdrawal_usd: f64,
    pub referral_bonus_pct: f64,

    pub coingecko_api_key: String,
    pub coinmarketcap_api_key: String,
    pub price_cache_ttl_secs: u64,

    pub upstash_url: String,
    pub upstash_token: String,

    pub ws_max_connections: usize,
    pub ws_max_per_ip: usize,
    pub ws_msg_rate: f64,
    pub ws_msg_burst: f64,
    pub price_stream_stale_secs: u64,

    pub rate_limit_per_sec: f64,
    pub rate_limit_burst: f64,

    pub nowpayments_api_key: String,
    pub nowpayments_ipn_secret: String,
    pub nowpayments_base_url: String,
    pub public_base_url: String,

    pub sendgrid_api_key: String,
    pub email_from: String,
    pub fcm_server_key: String,

    pub telegram_bot_token: String,
    pub telegram_admin_chat_id: String,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn bool_or(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn list_or(name: &str, default: &[&str]) -> Vec<String> {
    match env::var(name) {
        Ok(v) => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn load() -> Settings {
    // Loads .env if present (no crash if missing)
    dotenvy::dotenv().ok();

    Settings {
        mongodb_uri: var_or("MONGODB_URI", "mongodb://localhost:27017"),
        mongodb_db: var_or("MONGODB_DB", "coinmarket"),
        host: var_or("HOST", "127.0.0.1"),
        port: parse_or("PORT", 3000),
        cors_origins: list_or("CORS_ORIGINS", &["http://localhost:5173"]),

        jwt_secret: var_or("JWT_SECRET", "change-me-dev-secret"),
        jwt_cookie_name: var_or("JWT_COOKIE_NAME", "auth"),
        jwt_ttl_days: parse_or("JWT_TTL_DAYS", 7),
        cookie_secure: bool_or("COOKIE_SECURE", false),
        csrf_cookie_name: var_or("CSRF_COOKIE_NAME", "csrf_token"),

        trading_fee_rate: parse_or("TRADING_FEE_RATE", 0.001),
        signup_bonus_usd: parse_or("SIGNUP_BONUS_USD", 0.0),
        min_withdrawal_usd: parse_or("MIN_WITHDRAWAL_USD", 10.0),
        referral_bonus_pct: parse_or("REFERRAL_BONUS_PCT", 5.0),

        coingecko_api_key: var_or("COINGECKO_API_KEY", ""),
        coinmarketcap_api_key: var_or("COINMARKETCAP_API_KEY", ""),
        price_cache_ttl_secs: parse_or("PRICE_CACHE_TTL_SECS", 30),

        upstash_url: var_or("UPSTASH_REDIS_REST_URL", ""),
        upstash_token: var_or("UPSTASH_REDIS_REST_TOKEN", ""),

        ws_max_connections: parse_or("WS_MAX_CONNECTIONS", 1000),
        ws_max_per_ip: parse_or("WS_MAX_PER_IP", 10),
        ws_msg_rate: parse_or("WS_MSG_RATE", 5.0),
        ws_msg_burst: parse_or("WS_MSG_BURST", 20.0),
        price_stream_stale_secs: parse_or("PRICE_STREAM_STALE_SECS", 30),

        rate_limit_per_sec: parse_or("RATE_LIMIT_PER_SEC", 10.0),
        rate_limit_burst: parse_or("RATE_LIMIT_BURST", 60.0),

        nowpayments_api_key: var_or("NOWPAYMENTS_API_KEY", ""),
        nowpayments_ipn_secret: var_or("NOWPAYMENTS_IPN_SECRET", ""),
        nowpayments_base_url: var_or("NOWPAYMENTS_BASE_URL", "https://api.nowpayments.io"),
        public_base_url: var_or("PUBLIC_BASE_URL", "http://localhost:3000"),

        sendgrid_api_key: var_or("SENDGRID_API_KEY", ""),
        email_from: var_or("EMAIL_FROM", "no-reply@coinmarket.local"),
        fcm_server_key: var_or("FCM_SERVER_KEY", ""),

        telegram_bot_token: var_or("TELEGRAM_BOT_TOKEN", ""),
        telegram_admin_chat_id: var_or("TELEGRAM_ADMIN_CHAT_ID", ""),
    }
}
