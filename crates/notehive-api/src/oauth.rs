//! Google sign-in.
//!
//! `GET /auth/google` redirects to Google with a random CSRF state that is
//! also stored in a signed, short-lived cookie. `GET /auth/google/callback`
//! checks the returned state against that cookie, exchanges the code for a
//! profile, resolves it to a local account and sets the session cookie.
//! Every outcome of the callback is a redirect back to the client app.

use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite, SignedCookieJar};
use chrono::{Duration, Utc};
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    RedirectUrl, Scope, TokenResponse, TokenUrl,
};
use serde::Deserialize;
use tracing::{info, warn};

use notehive_types::models::{OAuthProfile, normalize_email};

use crate::auth::session_cookie;
use crate::config::GoogleConfig;
use crate::state::{AppState, run_db};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

pub const STATE_COOKIE: &str = "oauth_state";
const STATE_TTL_MINUTES: i64 = 10;

/// An external identity provider using the authorization-code flow.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Authorization URL to redirect to, and the CSRF state embedded in it.
    fn authorize_url(&self) -> (String, String);

    /// Exchanges an authorization code for the signed-in user's profile.
    async fn fetch_profile(&self, code: &str) -> anyhow::Result<OAuthProfile>;
}

/// Google user info from API.
#[derive(Debug, Deserialize)]
struct GoogleUser {
    id: String,
    email: String,
    name: Option<String>,
}

/// OAuth client type with auth URL and token URL set.
type ConfiguredClient = oauth2::Client<
    oauth2::basic::BasicErrorResponse,
    oauth2::basic::BasicTokenResponse,
    oauth2::basic::BasicTokenIntrospectionResponse,
    oauth2::StandardRevocableToken,
    oauth2::basic::BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

pub struct GoogleOAuth {
    client: ConfiguredClient,
    http: reqwest::Client,
}

impl GoogleOAuth {
    pub fn new(config: &GoogleConfig) -> anyhow::Result<Self> {
        let client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_client_secret(ClientSecret::new(config.client_secret.clone()))
            .set_auth_uri(AuthUrl::new(GOOGLE_AUTH_URL.to_string())?)
            .set_token_uri(TokenUrl::new(GOOGLE_TOKEN_URL.to_string())?)
            .set_redirect_uri(RedirectUrl::new(config.callback_url.clone())?);

        // Token exchange must not follow redirects.
        let http = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self { client, http })
    }
}

#[async_trait]
impl OAuthProvider for GoogleOAuth {
    fn authorize_url(&self) -> (String, String) {
        let (auth_url, csrf_state) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scope(Scope::new("openid".to_string()))
            .add_scope(Scope::new("email".to_string()))
            .add_scope(Scope::new("profile".to_string()))
            .url();

        (auth_url.to_string(), csrf_state.secret().clone())
    }

    async fn fetch_profile(&self, code: &str) -> anyhow::Result<OAuthProfile> {
        let token = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| anyhow::anyhow!("token exchange failed: {}", e))?;

        let user: GoogleUser = self
            .http
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(token.access_token().secret())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(OAuthProfile {
            provider_id: user.id,
            email: normalize_email(&user.email),
            display_name: user.name,
        })
    }
}

fn success_url(state: &AppState) -> String {
    format!("{}/dashboard?auth=success", state.config.client_url)
}

fn failure_url(state: &AppState) -> String {
    format!("{}/login?error=oauth_failed", state.config.client_url)
}

/// Signed cookie value: `<csrf state>.<unix expiry>`.
fn state_cookie_value(csrf: &str, now: chrono::DateTime<Utc>) -> String {
    format!("{}.{}", csrf, (now + Duration::minutes(STATE_TTL_MINUTES)).timestamp())
}

/// Whether a stored cookie value vouches for `returned` at `now`.
fn state_matches(stored: &str, returned: &str, now: chrono::DateTime<Utc>) -> bool {
    let Some((csrf, expiry)) = stored.rsplit_once('.') else {
        return false;
    };
    let Ok(expiry) = expiry.parse::<i64>() else {
        return false;
    };
    csrf == returned && expiry >= now.timestamp()
}

pub async fn google_start(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(provider) = state.oauth.clone() else {
        warn!("Google sign-in requested but OAuth is not configured");
        return Redirect::to(&failure_url(&state)).into_response();
    };

    let (url, csrf) = provider.authorize_url();

    let jar = SignedCookieJar::from_headers(&headers, state.cookie_key.clone()).add(
        Cookie::build((STATE_COOKIE, state_cookie_value(&csrf, Utc::now())))
            .path("/")
            .http_only(true)
            .secure(state.config.cookie_secure)
            .same_site(SameSite::Lax),
    );

    (jar, Redirect::to(&url)).into_response()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

pub async fn google_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    let signed = SignedCookieJar::from_headers(&headers, state.cookie_key.clone());
    let stored_state = signed.get(STATE_COOKIE).map(|c| c.value().to_string());
    let signed = signed.remove(Cookie::build(STATE_COOKIE).path("/"));

    match complete_sign_in(&state, stored_state, params).await {
        Ok(token) => {
            let jar = jar.add(session_cookie(&state.config, token));
            (signed, jar, Redirect::to(&success_url(&state))).into_response()
        }
        Err(e) => {
            warn!(error = %e, "Google sign-in failed");
            (signed, Redirect::to(&failure_url(&state))).into_response()
        }
    }
}

async fn complete_sign_in(
    state: &AppState,
    stored_state: Option<String>,
    params: CallbackParams,
) -> anyhow::Result<String> {
    let provider = state
        .oauth
        .clone()
        .ok_or_else(|| anyhow::anyhow!("OAuth is not configured"))?;

    if let Some(error) = params.error {
        anyhow::bail!("provider returned error '{}'", error);
    }

    let returned = params
        .state
        .ok_or_else(|| anyhow::anyhow!("missing state parameter"))?;
    let stored = stored_state.ok_or_else(|| anyhow::anyhow!("missing or tampered state cookie"))?;
    if !state_matches(&stored, &returned, Utc::now()) {
        anyhow::bail!("state mismatch or expired");
    }

    let code = params
        .code
        .ok_or_else(|| anyhow::anyhow!("missing authorization code"))?;

    let profile = provider.fetch_profile(&code).await?;

    let user = run_db(state, move |db| db.upsert_oauth_user(&profile, Utc::now())).await?;
    info!(user_id = %user.id, "User signed in with Google");

    Ok(state.tokens.issue(user.id)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_cookie_checks_value_and_expiry() {
        let now = Utc::now();
        let stored = state_cookie_value("abc.def", now);

        assert!(state_matches(&stored, "abc.def", now));
        assert!(!state_matches(&stored, "abc", now));
        assert!(!state_matches(&stored, "abc.def", now + Duration::minutes(STATE_TTL_MINUTES + 1)));
        assert!(!state_matches("garbage", "garbage", now));
    }

    #[test]
    fn authorize_url_requests_profile_scopes() {
        let google = GoogleOAuth::new(&GoogleConfig {
            client_id: "client".into(),
            client_secret: "secret".into(),
            callback_url: "http://localhost:4000/auth/google/callback".into(),
        })
        .unwrap();

        let (url, csrf) = google.authorize_url();
        assert!(url.starts_with(GOOGLE_AUTH_URL));
        assert!(url.contains("scope=openid+email+profile"));
        assert!(url.contains(&format!("state={}", csrf)));
    }
}
