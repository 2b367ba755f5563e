use std::{net::SocketAddr, num::NonZeroU32, sync::Arc, time::Duration};

use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::{Clock, DefaultClock},
    DefaultKeyedRateLimiter, Quota,
};

use crate::{error::ApiError, AppState};

/// GCRA quota from a fractional rate and a burst size. A zero rate
/// refills one cell per hour.
pub fn quota(per_sec: f64, burst: f64) -> Quota {
    let period = if per_sec > 0.0 {
        Duration::from_secs_f64(1.0 / per_sec)
    } else {
        Duration::from_secs(3600)
    };
    let burst = NonZeroU32::new(burst.round().max(1.0) as u32).unwrap_or(NonZeroU32::MIN);

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
        .allow_burst(burst)
}

/// Per-IP limiter for the HTTP API. In-memory only.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<DefaultKeyedRateLimiter<String>>,
}

impl RateLimiter {
    pub fn new(burst: f64, per_sec: f64) -> Self {
        Self {
            inner: Arc::new(governor::RateLimiter::keyed(quota(per_sec, burst))),
        }
    }

    /// `Ok(())` when allowed, `Err(retry_after_secs)` otherwise.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        self.inner.check_key(&key.to_string()).map_err(|not_until| {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            (wait.as_secs_f64().ceil() as u64).max(1)
        })
    }

    /// Drops keys whose bucket has refilled completely.
    pub fn sweep(&self) -> usize {
        let before = self.inner.len();
        self.inner.retain_recent();
        self.inner.shrink_to_fit();
        before.saturating_sub(self.inner.len())
    }

    pub fn tracked(&self) -> usize {
        self.inner.len()
    }

    pub fn spawn_sweeper(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let removed = this.sweep();
                if removed > 0 {
                    tracing::debug!("rate limiter swept {} idle keys", removed);
                }
            }
        });
    }
}

/// First X-Forwarded-For hop, else the peer address, else "unknown".
pub fn client_ip<B>(req: &Request<B>) -> String {
    if let Some(ip) = forwarded_ip(req.headers()) {
        return ip;
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("x-forwarded-for")?.to_str().ok()?;
    let first = raw.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}

pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();

    // health probes and the payment webhook are never throttled
    if path.starts_with("/health") || path == "/api/payments/ipn" {
        return next.run(req).await;
    }

    let ip = client_ip(&req);
    match state.limiter.check(&ip) {
        Ok(()) => next.run(req).await,
        Err(retry_after) => {
            tracing::warn!("rate limited {} on {}", ip, path);
            let mut res = ApiError::new(axum::http::StatusCode::TOO_MANY_REQUESTS, "Too many requests")
                .into_response();
            if let Ok(v) = HeaderValue::from_str(&retry_after.to_string()) {
                res.headers_mut().insert(header::RETRY_AFTER, v);
            }
            res
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_per_key() {
        let rl = RateLimiter::new(2.0, 0.5);

        assert!(rl.check("a").is_ok());
        assert!(rl.check("a").is_ok());
        assert_eq!(rl.check("a"), Err(2));
        assert!(rl.check("b").is_ok());
        assert_eq!(rl.tracked(), 2);
    }

    #[test]
    fn sweep_drops_refilled_keys() {
        let rl = RateLimiter::new(1.0, 1000.0);
        rl.check("a").unwrap();

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(rl.sweep(), 1);
        assert_eq!(rl.tracked(), 0);
    }

    #[test]
    fn quota_handles_fractional_and_zero_rates() {
        let q = quota(0.5, 3.0);
        assert_eq!(q.replenish_interval(), Duration::from_secs(2));
        assert_eq!(q.burst_size().get(), 3);

        let q = quota(0.0, 0.0);
        assert_eq!(q.replenish_interval(), Duration::from_secs(3600));
        assert_eq!(q.burst_size().get(), 1);
    }

    #[test]
    fn forwarded_for_uses_first_hop() {
        let mut h = HeaderMap::new();
        h.insert("x-forwarded-for", HeaderValue::from_static("9.9.9.9, 10.0.0.1"));
        assert_eq!(forwarded_ip(&h).as_deref(), Some("9.9.9.9"));
    }
}
