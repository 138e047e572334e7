use std::sync::Arc;

use axum_extra::extract::cookie::Key;
use chrono::Duration;
use tracing::error;

use notehive_crypto::TokenSigner;
use notehive_db::Database;

use crate::config::{Config, MIN_SESSION_SECRET_LEN};
use crate::mailer::Mailer;
use crate::oauth::OAuthProvider;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub tokens: TokenSigner,
    pub mailer: Arc<dyn Mailer>,
    /// `None` when Google sign-in is not configured.
    pub oauth: Option<Arc<dyn OAuthProvider>>,
    pub config: Config,
    /// Signs the short-lived OAuth state cookie.
    pub cookie_key: Key,
}

impl AppStateInner {
    pub fn new(
        db: Database,
        config: Config,
        mailer: Arc<dyn Mailer>,
        oauth: Option<Arc<dyn OAuthProvider>>,
    ) -> AppState {
        let tokens = TokenSigner::new(&config.token_key, Duration::hours(config.token_ttl_hours));
        let cookie_key = if config.session_secret.len() >= MIN_SESSION_SECRET_LEN {
            Key::derive_from(config.session_secret.as_bytes())
        } else {
            Key::generate()
        };

        Arc::new(Self {
            db,
            tokens,
            mailer,
            oauth,
            config,
            cookie_key,
        })
    }
}

/// Runs a store call on the blocking pool.
pub(crate) async fn run_db<F, T>(state: &AppState, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            anyhow::anyhow!("blocking task failed: {}", e)
        })?
}
