use axum::http::StatusCode;
use axum_extra::extract::cookie::{Cookie, SameSite};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use mongodb::bson::{doc, oid::ObjectId, DateTime};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::{
    error::{ApiError, FieldErrors},
    models::{
        user::{ROLE_USER, STATUS_ACTIVE},
        wallet::USD,
        User,
    },
    AppState,
};

use super::{account_service, referral_service, telegram_service::escape_html, validators};

#[derive(Serialize)]
struct Claims {
    sub: String,
    exp: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct PasswordReset {
    #[serde(rename = "_id")]
    id: ObjectId,
    user_id: ObjectId,
    token_hash: String,
    expires_at: DateTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterInput {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub referral_code: Option<String>,
}

impl RegisterInput {
    pub fn normalized(&self) -> Self {
        Self {
            username: self.username.trim().to_string(),
            email: self.email.trim().to_lowercase(),
            password: self.password.clone(),
            referral_code: self
                .referral_code
                .as_deref()
                .map(|c| c.trim().to_uppercase())
                .filter(|c| !c.is_empty()),
        }
    }
}

pub fn validate_registration(input: &RegisterInput) -> FieldErrors {
    let mut errs = FieldErrors::new();

    if let Err(e) = validators::validate_username(&input.username) {
        errs.insert("username".into(), e);
    }

    if input.email.is_empty() {
        errs.insert("email".into(), "Email is required.".into());
    } else if !validators::is_valid_email(&input.email) {
        errs.insert("email".into(), "Invalid email.".into());
    }

    if let Err(e) = validators::validate_password(&input.password) {
        errs.insert("password".into(), e);
    }

    errs
}

pub fn generate_referral_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|b| (b as char).to_ascii_uppercase())
        .collect()
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub fn make_jwt_with_days(state: &AppState, user_id: &ObjectId, days: i64) -> Result<String, String> {
    let exp = (Utc::now() + Duration::days(days)).timestamp() as usize;

    let claims = Claims {
        sub: user_id.to_hex(),
        exp,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.settings.jwt_secret.as_bytes()),
    )
    .map_err(|e| e.to_string())
}

pub fn auth_cookie(state: &AppState, token: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(state.settings.jwt_cookie_name.clone(), token);
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_path("/");
    if state.settings.cookie_secure {
        cookie.set_secure(true);
    }
    cookie
}

/// Readable by the frontend so it can echo it in `X-CSRF-Token`.
pub fn csrf_cookie(state: &AppState, token: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(state.settings.csrf_cookie_name.clone(), token);
    cookie.set_http_only(false);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_path("/");
    if state.settings.cookie_secure {
        cookie.set_secure(true);
    }
    cookie
}

pub fn clear_cookie(name: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(name, "");
    cookie.set_path("/");
    cookie.set_same_site(SameSite::Lax);
    cookie.make_removal();
    cookie
}

async fn hash_password(password: String) -> Result<String, String> {
    tokio::task::spawn_blocking(move || hash(password, DEFAULT_COST))
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())
}

async fn verify_password(password: String, password_hash: String) -> bool {
    tokio::task::spawn_blocking(move || verify(password, &password_hash).unwrap_or(false))
        .await
        .unwrap_or(false)
}

pub async fn login_user(state: &AppState, email: &str, password: &str) -> Result<User, ApiError> {
    let users = state.db.collection::<User>("users");
    let email = email.trim().to_lowercase();

    let user = users
        .find_one(doc! { "email": &email }, None)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid email or password."))?;

    if !verify_password(password.to_string(), user.password_hash.clone()).await {
        return Err(ApiError::unauthorized("Invalid email or password."));
    }

    if !user.is_active() {
        return Err(ApiError::forbidden("Account suspended."));
    }

    let now = Utc::now().timestamp();
    users
        .update_one(doc! { "_id": user.id }, doc! { "$set": { "last_login_at": now } }, None)
        .await?;

    Ok(User {
        last_login_at: Some(now),
        ..user
    })
}

async fn unique_referral_code(state: &AppState) -> Result<String, ApiError> {
    let users = state.db.collection::<User>("users");
    for _ in 0..5 {
        let code = generate_referral_code();
        if users.find_one(doc! { "referral_code": &code }, None).await?.is_none() {
            return Ok(code);
        }
    }
    Err(ApiError::internal("could not allocate a referral code"))
}

/// Input must already be normalized and validated.
pub async fn register_user(state: &AppState, input: &RegisterInput) -> Result<User, ApiError> {
    let users = state.db.collection::<User>("users");

    let referrer = match &input.referral_code {
        Some(code) => match users.find_one(doc! { "referral_code": code }, None).await? {
            Some(u) => Some(u),
            None => return Err(ApiError::field("referral_code", "Unknown referral code.")),
        },
        None => None,
    };

    let mut taken = FieldErrors::new();
    if users.find_one(doc! { "email": &input.email }, None).await?.is_some() {
        taken.insert("email".into(), "Email has already been taken!".into());
    }
    if users.find_one(doc! { "username": &input.username }, None).await?.is_some() {
        taken.insert("username".into(), "Username has already been taken!".into());
    }
    if !taken.is_empty() {
        return Err(ApiError {
            status: StatusCode::CONFLICT,
            detail: "Account already exists".into(),
            errors: Some(taken),
        });
    }

    let password_hash = hash_password(input.password.clone()).await.map_err(ApiError::internal)?;
    let referral_code = unique_referral_code(state).await?;

    let user = User {
        id: ObjectId::new(),
        email: input.email.clone(),
        username: input.username.clone(),
        password_hash,
        role: ROLE_USER.to_string(),
        status: STATUS_ACTIVE.to_string(),
        referral_code,
        referred_by: referrer.as_ref().map(|r| r.id),
        kyc_status: "none".to_string(),
        device_tokens: Vec::new(),
        created_at: Utc::now().timestamp(),
        last_login_at: None,
    };

    users.insert_one(&user, None).await.map_err(|e| {
        // unique index race between the checks above and the insert
        if e.to_string().contains("E11000") {
            ApiError::conflict("Account already exists")
        } else {
            ApiError::internal(e)
        }
    })?;

    if let Some(r) = &referrer {
        if let Err(e) = referral_service::record_signup(state, r.id, user.id).await {
            tracing::warn!("referral record failed for {}: {}", user.id, e);
        }
    }

    account_service::get_or_create_wallet(state, user.id, USD)
        .await
        .map_err(ApiError::internal)?;

    let bonus = state.settings.signup_bonus_usd;
    if bonus > 0.0 {
        account_service::credit(state, user.id, USD, bonus)
            .await
            .map_err(ApiError::internal)?;
        account_service::record_transaction_logged(state, user.id, "signup_bonus", USD, bonus, None).await;
    }

    state.email.spawn_template(
        user.email.clone(),
        "welcome",
        json!({ "username": user.username, "referral_code": user.referral_code }),
    );
    state
        .telegram
        .spawn_admin(format!(
            "🆕 New user <b>{}</b> ({})",
            escape_html(&user.username),
            escape_html(&user.email)
        ));

    Ok(user)
}

pub async fn change_password(state: &AppState, user_id: ObjectId, current: &str, new: &str) -> Result<(), ApiError> {
    if let Err(e) = validators::validate_password(new) {
        return Err(ApiError::field("new_password", e));
    }

    let users = state.db.collection::<User>("users");
    let user = users
        .find_one(doc! { "_id": user_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if !verify_password(current.to_string(), user.password_hash.clone()).await {
        return Err(ApiError::field("current_password", "Current password is incorrect."));
    }

    let password_hash = hash_password(new.to_string()).await.map_err(ApiError::internal)?;
    users
        .update_one(doc! { "_id": user_id }, doc! { "$set": { "password_hash": password_hash } }, None)
        .await?;
    Ok(())
}

/// Silently does nothing for unknown emails.
pub async fn request_password_reset(state: &AppState, email: &str) -> Result<(), ApiError> {
    let users = state.db.collection::<User>("users");
    let Some(user) = users
        .find_one(doc! { "email": email.trim().to_lowercase() }, None)
        .await?
    else {
        return Ok(());
    };

    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect();

    let resets = state.db.collection::<PasswordReset>("password_resets");
    resets.delete_many(doc! { "user_id": user.id }, None).await?;
    resets
        .insert_one(
            PasswordReset {
                id: ObjectId::new(),
                user_id: user.id,
                token_hash: hash_token(&token),
                expires_at: DateTime::from_millis((Utc::now() + Duration::hours(1)).timestamp_millis()),
            },
            None,
        )
        .await?;

    let reset_url = format!(
        "{}/reset-password?token={}",
        state.settings.public_base_url.trim_end_matches('/'),
        token
    );
    state.email.spawn_template(
        user.email.clone(),
        "password_reset",
        json!({ "username": user.username, "reset_url": reset_url }),
    );
    Ok(())
}

/// Returns the user id whose password was reset.
pub async fn confirm_password_reset(state: &AppState, token: &str, new_password: &str) -> Result<ObjectId, ApiError> {
    if let Err(e) = validators::validate_password(new_password) {
        return Err(ApiError::field("new_password", e));
    }

    let resets = state.db.collection::<PasswordReset>("password_resets");
    // TTL cleanup is lazy, so expiry is checked here too
    let reset = resets
        .find_one(
            doc! { "token_hash": hash_token(token.trim()), "expires_at": { "$gt": DateTime::now() } },
            None,
        )
        .await?
        .ok_or_else(|| ApiError::bad_request("Invalid or expired token."))?;

    let password_hash = hash_password(new_password.to_string()).await.map_err(ApiError::internal)?;
    state
        .db
        .collection::<User>("users")
        .update_one(
            doc! { "_id": reset.user_id },
            doc! { "$set": { "password_hash": password_hash } },
            None,
        )
        .await?;
    resets.delete_many(doc! { "user_id": reset.user_id }, None).await?;

    Ok(reset.user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referral_codes_are_uppercase_alphanumeric() {
        let code = generate_referral_code();
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn token_hash_is_stable_hex() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), hash_token("abd"));
        assert_eq!(hash_token("abc").len(), 64);
    }

    #[test]
    fn registration_validation_collects_field_errors() {
        let input = RegisterInput {
            username: " x ".into(),
            email: "Nope".into(),
            password: "short".into(),
            referral_code: Some("  ".into()),
        }
        .normalized();

        assert_eq!(input.email, "nope");
        assert_eq!(input.referral_code, None);

        let errs = validate_registration(&input);
        assert!(errs.contains_key("username"));
        assert_eq!(errs.get("email").map(String::as_str), Some("Invalid email."));
        assert!(errs.contains_key("password"));
    }
}
