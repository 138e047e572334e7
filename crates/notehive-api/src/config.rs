use std::path::PathBuf;
use std::str::FromStr;

use axum::http::HeaderValue;
use tracing::warn;

/// Placeholder secrets that MUST NOT be used in production.
pub const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "dev-session-secret-change-me-please-0000",
];

const DEV_TOKEN_KEY: &str = "dev-secret-change-me";
const DEV_SESSION_SECRET: &str = "dev-session-secret-change-me-please-0000";

/// Signing key derivation needs at least this many bytes of session secret.
pub const MIN_SESSION_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} has an invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
    #[error("{0} is unset or still a placeholder")]
    InsecureSecret(&'static str),
    #[error("SESSION_SECRET must be at least 32 bytes")]
    ShortSessionSecret,
    #[error("{0} must be set in production")]
    Missing(&'static str),
}

/// Session lifetimes accepted for `TOKEN_TTL_HOURS`, up to one year.
pub const TOKEN_TTL_HOURS_RANGE: std::ops::RangeInclusive<i64> = 1..=8760;

#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub callback_url: String,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub token_key: String,
    pub token_ttl_hours: i64,
    pub session_secret: String,
    pub environment: Environment,
    pub client_url: String,
    pub cookie_http_only: bool,
    pub cookie_secure: bool,
    pub google: Option<GoogleConfig>,
    pub mail: Option<MailConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let environment = match get("NOTEHIVE_ENV").as_deref() {
            None | Some("development") => Environment::Development,
            Some("production") => Environment::Production,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "NOTEHIVE_ENV",
                    value: other.to_string(),
                });
            }
        };
        let production = environment == Environment::Production;

        let token_key = match get("TOKEN_KEY") {
            Some(key) if !PLACEHOLDER_SECRETS.contains(&key.as_str()) => key,
            _ if production => return Err(ConfigError::InsecureSecret("TOKEN_KEY")),
            _ => {
                warn!("TOKEN_KEY is unset or a placeholder; using an insecure development key");
                DEV_TOKEN_KEY.to_string()
            }
        };

        let session_secret = match get("SESSION_SECRET") {
            Some(secret) if PLACEHOLDER_SECRETS.contains(&secret.as_str()) && production => {
                return Err(ConfigError::InsecureSecret("SESSION_SECRET"));
            }
            Some(secret) if secret.len() >= MIN_SESSION_SECRET_LEN => secret,
            Some(_) if production => return Err(ConfigError::ShortSessionSecret),
            None if production => return Err(ConfigError::InsecureSecret("SESSION_SECRET")),
            _ => {
                warn!("SESSION_SECRET is unset or too short; using an insecure development secret");
                DEV_SESSION_SECRET.to_string()
            }
        };

        let client_url = get("CLIENT_URL")
            .unwrap_or_else(|| "http://localhost:5173".into())
            .trim_end_matches('/')
            .to_string();
        if HeaderValue::from_str(&client_url).is_err() {
            return Err(ConfigError::Invalid {
                key: "CLIENT_URL",
                value: client_url,
            });
        }

        let google = match (get("GOOGLE_CLIENT_ID"), get("GOOGLE_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(GoogleConfig {
                client_id,
                client_secret,
                callback_url: get("GOOGLE_CALLBACK_URL")
                    .unwrap_or_else(|| "http://localhost:4000/auth/google/callback".into()),
            }),
            _ => None,
        };

        let mail = match (get("MAIL_API_URL"), get("MAIL_API_KEY")) {
            (Some(api_url), Some(api_key)) => Some(MailConfig {
                api_url,
                api_key,
                from: get("MAIL_FROM").unwrap_or_else(|| "NoteHive <no-reply@notehive.app>".into()),
            }),
            _ if production => return Err(ConfigError::Missing("MAIL_API_URL and MAIL_API_KEY")),
            _ => None,
        };

        let token_ttl_hours: i64 = parse_or("TOKEN_TTL_HOURS", get("TOKEN_TTL_HOURS"), 72)?;
        if !TOKEN_TTL_HOURS_RANGE.contains(&token_ttl_hours) {
            return Err(ConfigError::Invalid {
                key: "TOKEN_TTL_HOURS",
                value: token_ttl_hours.to_string(),
            });
        }

        Ok(Self {
            host: get("NOTEHIVE_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or("PORT", get("PORT"), 4000)?,
            db_path: get("NOTEHIVE_DB_PATH")
                .unwrap_or_else(|| "notehive.db".into())
                .into(),
            token_key,
            token_ttl_hours,
            session_secret,
            environment,
            client_url,
            cookie_http_only: parse_or(
                "SESSION_COOKIE_HTTP_ONLY",
                get("SESSION_COOKIE_HTTP_ONLY"),
                false,
            )?,
            cookie_secure: parse_or("SESSION_COOKIE_SECURE", get("SESSION_COOKIE_SECURE"), production)?,
            google,
            mail,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

fn parse_or<T: FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value }),
    }
}
