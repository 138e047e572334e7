use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode};
use tracing::info;
use uuid::Uuid;

use notehive_types::models::{Credential, OAuthProfile, User, stored_precision};

use crate::Database;
use crate::models::{USER_COLUMNS, UserRow, password_column, timestamp};

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &User) -> Result<()> {
        self.with_conn(|conn| insert_user(conn, user))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, "email = ?1", &email))
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", &id.to_string()))
    }

    // -- Password reset --

    /// Stores a fresh reset code, replacing any earlier one.
    pub fn set_reset_otp(&self, user_id: Uuid, otp: &str, expires_at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET reset_otp = ?1, reset_otp_expires_at = ?2 WHERE id = ?3",
                rusqlite::params![otp, timestamp(expires_at), user_id.to_string()],
            )?;
            Ok(())
        })
    }

    /// True when `email` holds an unexpired code equal to `otp`. Does not consume it.
    pub fn reset_otp_matches(&self, email: &str, otp: &str, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users
                 WHERE email = ?1 AND reset_otp = ?2 AND reset_otp_expires_at > ?3",
                rusqlite::params![email, otp, timestamp(now)],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Swaps in `new_hash` and clears the code in one statement, so a code
    /// can only ever be spent once. Returns false when no valid code matched.
    pub fn reset_password_with_otp(
        &self,
        email: &str,
        otp: &str,
        new_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users
                 SET password = ?1, reset_otp = NULL, reset_otp_expires_at = NULL
                 WHERE email = ?2 AND reset_otp = ?3 AND reset_otp_expires_at > ?4",
                rusqlite::params![new_hash, email, otp, timestamp(now)],
            )?;
            Ok(updated == 1)
        })
    }

    // -- OAuth --

    /// Resolves a provider profile to a local account: provider id first,
    /// then email (linking the provider id), else a new OAuth-only account.
    pub fn upsert_oauth_user(&self, profile: &OAuthProfile, now: DateTime<Utc>) -> Result<User> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if let Some(user) = query_user(&tx, "google_id = ?1", &profile.provider_id)? {
                tx.commit()?;
                return Ok(user);
            }

            if let Some(mut user) = query_user(&tx, "email = ?1", &profile.email)? {
                tx.execute(
                    "UPDATE users SET google_id = ?1 WHERE id = ?2",
                    rusqlite::params![profile.provider_id, user.id.to_string()],
                )?;
                tx.commit()?;
                info!(user_id = %user.id, "Linked Google account to existing user");
                user.google_id = Some(profile.provider_id.clone());
                return Ok(user);
            }

            let username = profile
                .display_name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| {
                    profile
                        .email
                        .split('@')
                        .next()
                        .unwrap_or_default()
                        .to_string()
                });

            let user = User {
                id: Uuid::new_v4(),
                email: profile.email.clone(),
                username,
                credential: Credential::OAuthOnly,
                google_id: Some(profile.provider_id.clone()),
                reset: None,
                created_at: stored_precision(now),
            };
            insert_user(&tx, &user)?;
            tx.commit()?;

            info!(user_id = %user.id, "Created user from Google profile");
            Ok(user)
        })
    }
}

/// Whether an error chain bottoms out in a UNIQUE/CHECK constraint failure.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation
        )
    })
}

fn insert_user(conn: &Connection, user: &User) -> Result<()> {
    let (otp, expires) = match &user.reset {
        Some(reset) => (Some(reset.otp.clone()), Some(timestamp(reset.expires_at))),
        None => (None, None),
    };

    conn.execute(
        "INSERT INTO users (id, email, username, password, google_id, reset_otp, reset_otp_expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            user.id.to_string(),
            user.email,
            user.username,
            password_column(&user.credential),
            user.google_id,
            otp,
            expires,
            timestamp(user.created_at),
        ],
    )?;
    Ok(())
}

fn query_user(conn: &Connection, predicate: &str, value: &dyn rusqlite::ToSql) -> Result<Option<User>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM users WHERE {}", USER_COLUMNS, predicate))?;

    let row = stmt.query_row(&[value], UserRow::from_row).optional()?;

    row.map(User::try_from).transpose()
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use notehive_types::models::PasswordReset;

    fn local_user(email: &str) -> User {
        User {
            id: Uuid::new_v4(),
            email: email.into(),
            username: "alice".into(),
            credential: Credential::Password {
                hash: "$argon2id$v=19$stub".into(),
            },
            google_id: None,
            reset: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn create_and_fetch_user() {
        let db = Database::open_in_memory().unwrap();
        let user = local_user("a@x.com");
        db.create_user(&user).unwrap();

        let by_email = db.get_user_by_email("a@x.com").unwrap().unwrap();
        assert_eq!(by_email.id, user.id);
        assert_eq!(by_email.credential, user.credential);

        let by_id = db.get_user_by_id(user.id).unwrap().unwrap();
        assert_eq!(by_id.email, "a@x.com");

        assert!(db.get_user_by_email("b@x.com").unwrap().is_none());
    }

    #[test]
    fn duplicate_email_is_a_unique_violation() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&local_user("a@x.com")).unwrap();

        let err = db.create_user(&local_user("a@x.com")).unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[test]
    fn reset_code_is_single_use() {
        let db = Database::open_in_memory().unwrap();
        let user = local_user("a@x.com");
        db.create_user(&user).unwrap();

        let now = Utc::now();
        db.set_reset_otp(user.id, "123456", now + Duration::minutes(10)).unwrap();

        let stored = db.get_user_by_id(user.id).unwrap().unwrap();
        assert_eq!(stored.reset.as_ref().map(|r| r.otp.as_str()), Some("123456"));

        assert!(db.reset_otp_matches("a@x.com", "123456", now).unwrap());
        assert!(!db.reset_otp_matches("a@x.com", "000000", now).unwrap());

        assert!(db.reset_password_with_otp("a@x.com", "123456", "new-hash", now).unwrap());
        assert!(!db.reset_password_with_otp("a@x.com", "123456", "again", now).unwrap());

        let after = db.get_user_by_id(user.id).unwrap().unwrap();
        assert_eq!(after.credential, Credential::Password { hash: "new-hash".into() });
        assert!(after.reset.is_none());
    }

    #[test]
    fn expired_reset_code_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let mut user = local_user("a@x.com");
        let now = Utc::now();
        user.reset = Some(PasswordReset {
            otp: "123456".into(),
            expires_at: now - Duration::minutes(1),
        });
        db.create_user(&user).unwrap();

        assert!(!db.reset_otp_matches("a@x.com", "123456", now).unwrap());
        assert!(!db.reset_password_with_otp("a@x.com", "123456", "h", now).unwrap());
    }

    #[test]
    fn oauth_upsert_matches_links_then_creates() {
        let db = Database::open_in_memory().unwrap();
        let existing = local_user("a@x.com");
        db.create_user(&existing).unwrap();
        let now = Utc::now();

        // Email match links the provider id to the local account.
        let linked = db
            .upsert_oauth_user(
                &OAuthProfile {
                    provider_id: "g-1".into(),
                    email: "a@x.com".into(),
                    display_name: Some("Alice".into()),
                },
                now,
            )
            .unwrap();
        assert_eq!(linked.id, existing.id);
        assert_eq!(linked.google_id.as_deref(), Some("g-1"));
        assert!(!linked.is_oauth_only());

        // Provider id match wins even if the email changed upstream.
        let again = db
            .upsert_oauth_user(
                &OAuthProfile {
                    provider_id: "g-1".into(),
                    email: "renamed@x.com".into(),
                    display_name: None,
                },
                now,
            )
            .unwrap();
        assert_eq!(again.id, existing.id);

        // Unknown profile creates an OAuth-only account.
        let created = db
            .upsert_oauth_user(
                &OAuthProfile {
                    provider_id: "g-2".into(),
                    email: "bob@x.com".into(),
                    display_name: None,
                },
                now,
            )
            .unwrap();
        assert!(created.is_oauth_only());
        assert_eq!(created.username, "bob");

        let stored = db.get_user_by_email("bob@x.com").unwrap().unwrap();
        assert_eq!(stored.credential, Credential::OAuthOnly);
    }
}
