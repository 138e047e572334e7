//! Database row types — these map directly to SQLite rows.
//! Conversions into the domain types live here so the query code stays flat.
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use uuid::Uuid;

use notehive_types::models::{
    Credential, Note, NoteColor, OAUTH_PASSWORD_SENTINEL, PasswordReset, User,
};

pub(crate) const USER_COLUMNS: &str =
    "id, email, username, password, google_id, reset_otp, reset_otp_expires_at, created_at";

pub(crate) const NOTE_COLUMNS: &str = "n.id, n.user_id, n.title, n.content, n.tags, n.is_starred, \
     n.is_archived, n.color, n.word_count, n.created_at, n.modified_at";

/// Millisecond RFC 3339 in UTC; lexical order matches time order.
pub fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("corrupt timestamp '{}'", raw))?
        .with_timezone(&Utc))
}

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub google_id: Option<String>,
    pub reset_otp: Option<String>,
    pub reset_otp_expires_at: Option<String>,
    pub created_at: String,
}

impl UserRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            username: row.get(2)?,
            password: row.get(3)?,
            google_id: row.get(4)?,
            reset_otp: row.get(5)?,
            reset_otp_expires_at: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        let credential = if row.password == OAUTH_PASSWORD_SENTINEL {
            Credential::OAuthOnly
        } else {
            Credential::Password { hash: row.password }
        };

        let reset = match (row.reset_otp, row.reset_otp_expires_at) {
            (Some(otp), Some(expires)) => Some(PasswordReset {
                otp,
                expires_at: parse_timestamp(&expires)?,
            }),
            _ => None,
        };

        Ok(User {
            id: row
                .id
                .parse()
                .map_err(|e| anyhow!("corrupt user id '{}': {}", row.id, e))?,
            email: row.email,
            username: row.username,
            credential,
            google_id: row.google_id,
            reset,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

/// Value written to the password column for a credential.
pub(crate) fn password_column(credential: &Credential) -> &str {
    match credential {
        Credential::Password { hash } => hash,
        Credential::OAuthOnly => OAUTH_PASSWORD_SENTINEL,
    }
}

pub struct NoteRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub tags: String,
    pub is_starred: bool,
    pub is_archived: bool,
    pub color: String,
    pub word_count: i64,
    pub created_at: String,
    pub modified_at: String,
}

impl NoteRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            content: row.get(3)?,
            tags: row.get(4)?,
            is_starred: row.get(5)?,
            is_archived: row.get(6)?,
            color: row.get(7)?,
            word_count: row.get(8)?,
            created_at: row.get(9)?,
            modified_at: row.get(10)?,
        })
    }
}

impl TryFrom<NoteRow> for Note {
    type Error = anyhow::Error;

    fn try_from(row: NoteRow) -> Result<Self> {
        let id: Uuid = row
            .id
            .parse()
            .map_err(|e| anyhow!("corrupt note id '{}': {}", row.id, e))?;

        Ok(Note {
            id,
            user_id: row
                .user_id
                .parse()
                .map_err(|e| anyhow!("corrupt user_id '{}' on note {}: {}", row.user_id, id, e))?,
            title: row.title,
            content: row.content,
            tags: serde_json::from_str(&row.tags)
                .with_context(|| format!("corrupt tags on note {}", id))?,
            is_starred: row.is_starred,
            is_archived: row.is_archived,
            color: row.color.parse::<NoteColor>()?,
            word_count: u32::try_from(row.word_count).unwrap_or(0),
            created_at: parse_timestamp(&row.created_at)?,
            modified_at: parse_timestamp(&row.modified_at)?,
        })
    }
}
