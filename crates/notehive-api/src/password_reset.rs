use axum::{Json, extract::State};
use chrono::{Duration, Utc};
use tracing::{error, info};

use notehive_crypto::{OTP_TTL_MINUTES, generate_otp, hash_password};
use notehive_types::api::{
    ForgotPasswordRequest, MessageResponse, ResetPasswordRequest, VerifyOtpRequest,
};
use notehive_types::models::{Credential, normalize_email};

use crate::auth::required;
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::state::{AppState, run_db};

pub const MIN_PASSWORD_LEN: usize = 6;

pub async fn forgot_password(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let email = required(&req.email)
        .map(normalize_email)
        .ok_or_else(|| ApiError::bad_request("Email is required"))?;

    let lookup = email.clone();
    let user = run_db(&state, move |db| db.get_user_by_email(&lookup))
        .await
        .map_err(ApiError::internal("Failed to process password reset request"))?
        .ok_or_else(|| ApiError::not_found("No account found with this email address"))?;

    if matches!(user.credential, Credential::OAuthOnly) {
        return Err(ApiError::bad_request(
            "This account uses Google Sign In. Password reset is not available.",
        ));
    }

    let otp = generate_otp();
    let expires_at = Utc::now() + Duration::minutes(OTP_TTL_MINUTES);
    let (user_id, code) = (user.id, otp.clone());
    run_db(&state, move |db| db.set_reset_otp(user_id, &code, expires_at))
        .await
        .map_err(ApiError::internal("Failed to process password reset request"))?;

    // The code stays stored even if delivery fails; a retry replaces it.
    if let Err(e) = state.mailer.send_otp(&email, &user.username, &otp).await {
        error!(user_id = %user.id, error = %e, "Failed to deliver reset code");
        return Err(ApiError::internal("Failed to send OTP email. Please try again.")(e));
    }

    info!(user_id = %user.id, "Password reset code issued");
    Ok(Json(MessageResponse::ok("OTP has been sent to your email address")))
}

pub async fn verify_otp(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<VerifyOtpRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let (Some(email), Some(otp)) = (required(&req.email), required(&req.otp)) else {
        return Err(ApiError::bad_request("Email and OTP are required"));
    };

    let (email, otp) = (normalize_email(email), otp.to_string());
    let valid = run_db(&state, move |db| db.reset_otp_matches(&email, &otp, Utc::now()))
        .await
        .map_err(ApiError::internal("Failed to verify OTP"))?;

    if !valid {
        return Err(ApiError::bad_request("Invalid or expired OTP"));
    }

    Ok(Json(MessageResponse::ok("OTP verified successfully")))
}

pub async fn reset_password(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let (Some(email), Some(otp), Some(new_password)) = (
        required(&req.email),
        required(&req.otp),
        req.new_password.as_deref().filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::bad_request(
            "Email, OTP, and new password are required",
        ));
    };

    if new_password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(
            "Password must be at least 6 characters long",
        ));
    }

    let hash = hash_password(new_password).map_err(ApiError::internal("Failed to reset password"))?;

    let (email, otp) = (normalize_email(email), otp.to_string());
    let reset = run_db(&state, move |db| {
        db.reset_password_with_otp(&email, &otp, &hash, Utc::now())
    })
    .await
    .map_err(ApiError::internal("Failed to reset password"))?;

    if !reset {
        return Err(ApiError::bad_request("Invalid or expired OTP"));
    }

    info!("Password reset completed");
    Ok(Json(MessageResponse::ok("Password has been reset successfully")))
}
