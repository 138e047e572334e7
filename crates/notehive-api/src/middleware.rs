use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, warn};

use notehive_types::models::Identity;

use crate::auth::TOKEN_COOKIE;
use crate::error::ApiError;
use crate::state::{AppState, run_db};

/// Resolves the session cookie to a live account.
async fn authenticate(state: &AppState, jar: &CookieJar) -> Result<Identity, ApiError> {
    let token = jar
        .get(TOKEN_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Access denied. No token provided."))?;

    let user_id = state.tokens.verify(&token).map_err(|e| {
        debug!(error = %e, "Rejected session token");
        ApiError::unauthorized("Invalid token.")
    })?;

    let user = run_db(state, move |db| db.get_user_by_id(user_id))
        .await
        .map_err(ApiError::internal("Failed to authenticate"))?
        .ok_or_else(|| ApiError::unauthorized("User not found."))?;

    Ok(user.identity())
}

/// Rejects requests without a valid session; otherwise attaches the caller's
/// `Identity` to the request (and the response, for error logging).
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = authenticate(&state, &jar).await?;

    req.extensions_mut().insert(identity.clone());
    let mut response = next.run(req).await;
    response.extensions_mut().insert(identity);
    Ok(response)
}

/// Like `require_auth`, but never rejects: attaches `Option<Identity>`.
pub async fn optional_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    let identity = match authenticate(&state, &jar).await {
        Ok(identity) => Some(identity),
        Err(ApiError::Internal { source, .. }) => {
            warn!(error = %source, "Session lookup failed; treating caller as anonymous");
            None
        }
        Err(_) => None,
    };

    req.extensions_mut().insert(identity);
    next.run(req).await
}
