use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use notehive_crypto::{PasswordError, hash_password, verify_password};
use notehive_db::is_unique_violation;
use notehive_types::api::{
    DuplicateSignupResponse, LoginRequest, MessageResponse, SignupRequest, SignupResponse,
    VerificationResponse,
};
use notehive_types::models::{Credential, Identity, User, normalize_email, stored_precision};

use crate::config::Config;
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::state::{AppState, run_db};

/// Name of the session cookie.
pub const TOKEN_COOKIE: &str = "token";

pub(crate) fn session_cookie(config: &Config, token: String) -> Cookie<'static> {
    Cookie::build((TOKEN_COOKIE, token))
        .path("/")
        .same_site(SameSite::Lax)
        .http_only(config.cookie_http_only)
        .secure(config.cookie_secure)
        .build()
}

/// Builds a new password account, hashing the password with Argon2id.
pub fn create_user(
    email: &str,
    username: &str,
    password: &str,
    now: DateTime<Utc>,
) -> Result<User, PasswordError> {
    Ok(User {
        id: Uuid::new_v4(),
        email: normalize_email(email),
        username: username.trim().to_string(),
        credential: Credential::Password {
            hash: hash_password(password)?,
        },
        google_id: None,
        reset: None,
        created_at: stored_precision(now),
    })
}

/// Trimmed, non-empty value of an optional field.
pub(crate) fn required(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn already_exists() -> Response {
    Json(DuplicateSignupResponse {
        message: "User already exists".into(),
    })
    .into_response()
}

pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(req): ApiJson<SignupRequest>,
) -> Result<Response, ApiError> {
    let (Some(email), Some(password), Some(username)) = (
        required(&req.email),
        req.password.as_deref().filter(|p| !p.is_empty()),
        required(&req.username),
    ) else {
        return Err(ApiError::bad_request("All fields are required"));
    };

    let email = normalize_email(email);
    let lookup = email.clone();
    let existing = run_db(&state, move |db| db.get_user_by_email(&lookup))
        .await
        .map_err(ApiError::internal("Failed to create account"))?;
    if existing.is_some() {
        return Ok(already_exists());
    }

    let user = create_user(&email, username, password, Utc::now())
        .map_err(ApiError::internal("Failed to create account"))?;

    let record = user.clone();
    match run_db(&state, move |db| db.create_user(&record)).await {
        Ok(()) => {}
        // Lost a race with a concurrent signup for the same email.
        Err(e) if is_unique_violation(&e) => return Ok(already_exists()),
        Err(e) => return Err(ApiError::internal("Failed to create account")(e)),
    }

    let token = state
        .tokens
        .issue(user.id)
        .map_err(ApiError::internal("Failed to create account"))?;

    info!(user_id = %user.id, "User signed up");

    Ok((
        StatusCode::CREATED,
        jar.add(session_cookie(&state.config, token)),
        Json(SignupResponse {
            success: true,
            message: "User signed in successfully".into(),
            user: user.public(),
        }),
    )
        .into_response())
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(email), Some(password)) = (
        required(&req.email),
        req.password.as_deref().filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::bad_request("All fields are required"));
    };

    let email = normalize_email(email);
    let user = run_db(&state, move |db| db.get_user_by_email(&email))
        .await
        .map_err(ApiError::internal("Failed to log in"))?
        .ok_or_else(|| ApiError::unauthorized("Incorrect email or password"))?;

    let hash = match &user.credential {
        Credential::OAuthOnly => {
            return Err(ApiError::unauthorized(
                "Please use Google Sign In for this account",
            ));
        }
        Credential::Password { hash } => hash,
    };

    let valid = verify_password(password, hash).map_err(ApiError::internal("Failed to log in"))?;
    if !valid {
        warn!(user_id = %user.id, "Failed login attempt");
        return Err(ApiError::unauthorized("Incorrect email or password"));
    }

    let token = state
        .tokens
        .issue(user.id)
        .map_err(ApiError::internal("Failed to log in"))?;

    info!(user_id = %user.id, "User logged in");

    Ok((
        jar.add(session_cookie(&state.config, token)),
        Json(MessageResponse::ok("User logged in successfully")),
    ))
}

pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    (
        jar.remove(Cookie::build(TOKEN_COOKIE).path("/")),
        Json(MessageResponse::ok("Logged out successfully")),
    )
}

/// Legacy session probe; always 200.
pub async fn verify_session(
    Extension(identity): Extension<Option<Identity>>,
) -> Json<VerificationResponse> {
    Json(VerificationResponse {
        status: identity.is_some(),
        user: identity.map(|i| i.username),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_hashes_and_normalizes() {
        let user = create_user(" Alice@Example.COM ", " alice ", "hunter22", Utc::now()).unwrap();
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.username, "alice");

        let Credential::Password { hash } = &user.credential else {
            panic!("expected a password credential");
        };
        assert_ne!(hash, "hunter22");
        assert!(verify_password("hunter22", hash).unwrap());
    }

    #[test]
    fn session_cookie_follows_config() {
        let mut config = Config::from_lookup(|_| None).unwrap();
        config.cookie_http_only = true;
        let cookie = session_cookie(&config, "jwt".into());

        assert_eq!(cookie.name(), TOKEN_COOKIE);
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.http_only(), Some(true));
    }

    #[test]
    fn required_rejects_blank_values() {
        assert_eq!(required(&Some("  x ".into())), Some("x"));
        assert_eq!(required(&Some("   ".into())), None);
        assert_eq!(required(&None), None);
    }
}
