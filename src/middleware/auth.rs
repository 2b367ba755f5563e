use axum::{
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use mongodb::bson::{doc, oid::ObjectId};
use serde::{Deserialize, Serialize};

use crate::{
    error::ApiError,
    models::{CurrentUser, User},
    AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    // user id as hex string
    pub sub: String,
    // expiry (unix timestamp seconds)
    pub exp: usize,
}

pub fn get_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;

    for part in raw.split(';') {
        let part = part.trim();
        let mut it = part.splitn(2, '=');
        let Some(k) = it.next() else { continue };
        let Some(v) = it.next() else { continue };
        if k.trim() == name {
            return Some(v.trim().to_string());
        }
    }
    None
}

pub fn decode_token(secret: &str, token: &str) -> Option<ObjectId> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation).ok()?;
    ObjectId::parse_str(&data.claims.sub).ok()
}

pub async fn inject_current_user(
    State(state): State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let cookie_name = state.settings.jwt_cookie_name.as_str();

    if let Some(token) = get_cookie(req.headers(), cookie_name) {
        if let Some(user_id) = decode_token(&state.settings.jwt_secret, &token) {
            let users = state.db.collection::<User>("users");

            match users.find_one(doc! { "_id": user_id }, None).await {
                // suspended accounts lose their session
                Ok(Some(user)) if user.is_active() => {
                    req.extensions_mut().insert(CurrentUser::from(user));
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("session lookup failed: {}", e),
            }
        }
    }

    next.run(req).await
}

fn is_public_path(path: &str) -> bool {
    !path.starts_with("/api/")
        || path == "/api/auth/login"
        || path == "/api/auth/register"
        || path == "/api/auth/logout"
        || path.starts_with("/api/auth/password-reset/")
        || path == "/api/payments/ipn"
        || path.starts_with("/api/market/")
}

pub async fn require_auth(
    State(_state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();

    if is_public_path(path) {
        return next.run(req).await;
    }

    let Some(user) = req.extensions().get::<CurrentUser>() else {
        return ApiError::unauthorized("Not authenticated").into_response();
    };

    if path.starts_with("/api/admin/") && !user.is_admin() {
        return ApiError::forbidden("Admin only").into_response();
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn cookie_lookup() {
        let mut h = HeaderMap::new();
        h.insert(header::COOKIE, HeaderValue::from_static("a=1; auth=tok=en; broken; b=2"));
        assert_eq!(get_cookie(&h, "auth").as_deref(), Some("tok=en"));
        assert_eq!(get_cookie(&h, "b").as_deref(), Some("2"));
        assert_eq!(get_cookie(&h, "missing"), None);
    }

    #[test]
    fn public_paths() {
        assert!(is_public_path("/health"));
        assert!(is_public_path("/ws/prices"));
        assert!(is_public_path("/api/market/prices"));
        assert!(is_public_path("/api/payments/ipn"));
        assert!(!is_public_path("/api/wallets"));
        assert!(!is_public_path("/api/admin/dashboard"));
    }
}
