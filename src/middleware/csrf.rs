use axum::{
    extract::State,
    http::{HeaderMap, Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use rand::{distributions::Alphanumeric, Rng};

use super::auth::get_cookie;
use crate::{error::ApiError, AppState};

pub const CSRF_HEADER: &str = "x-csrf-token";

pub fn new_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn is_exempt(path: &str) -> bool {
    path == "/api/auth/login"
        || path == "/api/auth/register"
        || path.starts_with("/api/auth/password-reset/")
        || path == "/api/payments/ipn"
}

fn is_unsafe(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

/// Double-submit check. Only cookie-authenticated requests can be forged
/// cross-site, so requests without the auth cookie pass through.
pub fn check(headers: &HeaderMap, method: &Method, path: &str, auth_cookie: &str, csrf_cookie: &str) -> bool {
    if !path.starts_with("/api/") || !is_unsafe(method) || is_exempt(path) {
        return true;
    }
    if get_cookie(headers, auth_cookie).is_none() {
        return true;
    }

    let cookie = get_cookie(headers, csrf_cookie);
    let header = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok());

    match (cookie, header) {
        (Some(c), Some(h)) if !c.is_empty() => constant_time_eq(c.as_bytes(), h.as_bytes()),
        _ => false,
    }
}

pub async fn verify_csrf(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let ok = check(
        req.headers(),
        req.method(),
        req.uri().path(),
        &state.settings.jwt_cookie_name,
        &state.settings.csrf_cookie_name,
    );

    if !ok {
        tracing::warn!("csrf rejected {} {}", req.method(), req.uri().path());
        return ApiError::forbidden("CSRF token missing or invalid").into_response();
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderValue};

    fn headers(cookie: &str, token: Option<&'static str>) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        if let Some(t) = token {
            h.insert(CSRF_HEADER, HeaderValue::from_static(t));
        }
        h
    }

    #[test]
    fn matching_header_passes() {
        let h = headers("auth=jwt; csrf_token=abc", Some("abc"));
        assert!(check(&h, &Method::POST, "/api/orders", "auth", "csrf_token"));
    }

    #[test]
    fn missing_or_wrong_header_fails() {
        let h = headers("auth=jwt; csrf_token=abc", None);
        assert!(!check(&h, &Method::POST, "/api/orders", "auth", "csrf_token"));
        let h = headers("auth=jwt; csrf_token=abc", Some("abd"));
        assert!(!check(&h, &Method::DELETE, "/api/orders/1", "auth", "csrf_token"));
    }

    #[test]
    fn safe_methods_exempt_paths_and_anonymous_requests_pass() {
        let h = headers("auth=jwt", None);
        assert!(check(&h, &Method::GET, "/api/orders", "auth", "csrf_token"));
        assert!(check(&h, &Method::POST, "/api/payments/ipn", "auth", "csrf_token"));
        let anon = headers("other=1", None);
        assert!(check(&anon, &Method::POST, "/api/orders", "auth", "csrf_token"));
    }

    #[test]
    fn tokens_are_random() {
        let a = new_token();
        assert_eq!(a.len(), 32);
        assert_ne!(a, new_token());
    }
}
