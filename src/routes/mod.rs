use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware::from_fn_with_state,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    AppState,
    config::Settings,
    controllers::home_controller,
    middleware::{auth, csrf, rate_limit},
};

pub mod home_routes;
pub mod auth_routes;
pub mod wallet_routes;
pub mod trading_routes;
pub mod portfolio_routes;
pub mod market_routes;
pub mod alerts_routes;
pub mod notifications_routes;
pub mod payments_routes;
pub mod withdrawals_routes;
pub mod referrals_routes;
pub mod kyc_routes;
pub mod admin_routes;
pub mod realtime_routes;

fn cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(csrf::CSRF_HEADER)])
        .allow_credentials(true)
}

pub fn app(state: AppState) -> Router {
    let router = Router::<AppState>::new();

    let router = home_routes::add_routes(router);
    let router = auth_routes::add_routes(router);
    let router = wallet_routes::add_routes(router);
    let router = trading_routes::add_routes(router);
    let router = portfolio_routes::add_routes(router);
    let router = market_routes::add_routes(router);
    let router = alerts_routes::add_routes(router);
    let router = notifications_routes::add_routes(router);
    let router = payments_routes::add_routes(router);
    let router = withdrawals_routes::add_routes(router);
    let router = referrals_routes::add_routes(router);
    let router = kyc_routes::add_routes(router);
    let router = admin_routes::add_routes(router);
    let router = realtime_routes::add_routes(router);

    // last layer added runs first
    router
        .fallback(home_controller::not_found)
        .layer(from_fn_with_state(state.clone(), auth::require_auth))
        .layer(from_fn_with_state(state.clone(), csrf::verify_csrf))
        .layer(from_fn_with_state(state.clone(), auth::inject_current_user))
        .layer(from_fn_with_state(state.clone(), rate_limit::rate_limit))
        .layer(cors_layer(&state.settings))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
