use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Extension, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use mongodb::bson::doc;
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::{ApiError, ApiResult, FieldErrors},
    middleware::csrf,
    models::{CurrentUser, User},
    services::{audit_service, auth_service, validators},
    AppState,
};

use super::{load_user, request_ip};

#[derive(Debug, Deserialize)]
pub struct LoginInput {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordInput {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequestInput {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetConfirmInput {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub new_password: String,
}

fn validate_login(input: &LoginInput) -> FieldErrors {
    let mut errs = FieldErrors::new();
    let email = input.email.trim();

    if email.is_empty() {
        errs.insert("email".into(), "Email is required.".into());
    } else if !validators::is_valid_email(email) {
        errs.insert("email".into(), "Invalid email.".into());
    }

    if input.password.is_empty() {
        errs.insert("password".into(), "Password is required.".into());
    }

    errs
}

/// Session cookies for a freshly authenticated user.
fn start_session(state: &AppState, jar: CookieJar, user: &User) -> ApiResult<(CookieJar, String)> {
    let token = auth_service::make_jwt_with_days(state, &user.id, state.settings.jwt_ttl_days)
        .map_err(ApiError::internal)?;
    let csrf_token = csrf::new_token();

    let jar = jar
        .add(auth_service::auth_cookie(state, token))
        .add(auth_service::csrf_cookie(state, csrf_token.clone()));
    Ok((jar, csrf_token))
}

// POST /api/auth/register
pub async fn post_register(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Json(input): Json<auth_service::RegisterInput>,
) -> ApiResult<impl IntoResponse> {
    let input = input.normalized();

    let errs = auth_service::validate_registration(&input);
    if !errs.is_empty() {
        return Err(ApiError::validation(errs));
    }

    let user = auth_service::register_user(&state, &input).await?;
    let (jar, csrf_token) = start_session(&state, jar, &user)?;

    audit_service::record(
        &state,
        Some(user.id),
        "auth.register",
        Some(user.id.to_hex()),
        doc! { "referred": user.referred_by.is_some() },
        request_ip(&headers, peer),
    )
    .await;
    tracing::info!("registered {} ({})", user.username, user.id);

    Ok((
        StatusCode::CREATED,
        jar,
        Json(json!({ "user": user.to_json(), "csrf_token": csrf_token })),
    ))
}

// POST /api/auth/login
pub async fn post_login(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Json(input): Json<LoginInput>,
) -> ApiResult<impl IntoResponse> {
    let errs = validate_login(&input);
    if !errs.is_empty() {
        return Err(ApiError::validation(errs));
    }

    let ip = request_ip(&headers, peer);
    let user = match auth_service::login_user(&state, &input.email, &input.password).await {
        Ok(u) => u,
        Err(e) => {
            audit_service::record(
                &state,
                None,
                "auth.login_failed",
                None,
                doc! { "email": input.email.trim().to_lowercase(), "reason": &e.detail },
                ip,
            )
            .await;
            return Err(e);
        }
    };

    let (jar, csrf_token) = start_session(&state, jar, &user)?;
    audit_service::record(&state, Some(user.id), "auth.login", Some(user.id.to_hex()), doc! {}, ip).await;

    Ok((
        jar,
        Json(json!({ "user": user.to_json(), "csrf_token": csrf_token })),
    ))
}

// POST /api/auth/logout
pub async fn post_logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let jar = jar
        .add(auth_service::clear_cookie(state.settings.jwt_cookie_name.clone()))
        .add(auth_service::clear_cookie(state.settings.csrf_cookie_name.clone()));
    (jar, Json(json!({ "ok": true })))
}

// GET /api/auth/me
pub async fn get_me(State(state): State<AppState>, Extension(u): Extension<CurrentUser>) -> ApiResult<impl IntoResponse> {
    let user = load_user(&state, u.id).await?;
    Ok(Json(json!({ "user": user.to_json() })))
}

// POST /api/auth/password
pub async fn post_change_password(
    State(state): State<AppState>,
    Extension(u): Extension<CurrentUser>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Json(input): Json<ChangePasswordInput>,
) -> ApiResult<impl IntoResponse> {
    if input.current_password.is_empty() {
        return Err(ApiError::field("current_password", "Current password is required."));
    }

    auth_service::change_password(&state, u.id, &input.current_password, &input.new_password).await?;
    audit_service::record(
        &state,
        Some(u.id),
        "auth.password_changed",
        Some(u.id.to_hex()),
        doc! {},
        request_ip(&headers, peer),
    )
    .await;

    Ok(Json(json!({ "ok": true })))
}

// POST /api/auth/password-reset/request
pub async fn post_reset_request(
    State(state): State<AppState>,
    Json(input): Json<ResetRequestInput>,
) -> impl IntoResponse {
    let email = input.email.trim().to_lowercase();

    // same answer whether or not the account exists
    if validators::is_valid_email(&email) {
        if let Err(e) = auth_service::request_password_reset(&state, &email).await {
            tracing::warn!("password reset request failed: {}", e);
        }
    }

    Json(json!({
        "ok": true,
        "message": "If that email is registered, a reset link has been sent.",
    }))
}

// POST /api/auth/password-reset/confirm
pub async fn post_reset_confirm(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Json(input): Json<ResetConfirmInput>,
) -> ApiResult<impl IntoResponse> {
    if input.token.trim().is_empty() {
        return Err(ApiError::bad_request("Invalid or expired token."));
    }

    let user_id = auth_service::confirm_password_reset(&state, &input.token, &input.new_password).await?;
    audit_service::record(
        &state,
        Some(user_id),
        "auth.password_reset",
        Some(user_id.to_hex()),
        doc! {},
        request_ip(&headers, peer),
    )
    .await;

    Ok(Json(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_validation_messages() {
        let errs = validate_login(&LoginInput {
            email: String::new(),
            password: String::new(),
        });
        assert_eq!(errs.get("email").map(String::as_str), Some("Email is required."));
        assert_eq!(errs.get("password").map(String::as_str), Some("Password is required."));

        let errs = validate_login(&LoginInput {
            email: "nope".into(),
            password: "x".into(),
        });
        assert_eq!(errs.get("email").map(String::as_str), Some("Invalid email."));
        assert!(!errs.contains_key("password"));
    }
}
