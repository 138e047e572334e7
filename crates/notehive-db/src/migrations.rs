use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (users, notes, full-text index)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id                      TEXT PRIMARY KEY,
                email                   TEXT NOT NULL UNIQUE,
                username                TEXT NOT NULL,
                password                TEXT NOT NULL,
                google_id               TEXT UNIQUE,
                reset_otp               TEXT,
                reset_otp_expires_at    TEXT,
                created_at              TEXT NOT NULL,
                CHECK (password <> 'google-oauth-user' OR google_id IS NOT NULL),
                CHECK ((reset_otp IS NULL) = (reset_otp_expires_at IS NULL))
            );

            CREATE TABLE notes (
                id              TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL REFERENCES users(id),
                title           TEXT NOT NULL CHECK (length(title) BETWEEN 1 AND 200),
                content         TEXT NOT NULL,
                tags            TEXT NOT NULL DEFAULT '[]',
                is_starred      INTEGER NOT NULL DEFAULT 0,
                is_archived     INTEGER NOT NULL DEFAULT 0,
                color           TEXT NOT NULL DEFAULT 'default'
                                CHECK (color IN ('default', 'blue', 'green', 'purple', 'orange', 'pink')),
                word_count      INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL,
                modified_at     TEXT NOT NULL
            );

            CREATE INDEX idx_notes_user_created ON notes(user_id, created_at);
            CREATE INDEX idx_notes_user_modified ON notes(user_id, modified_at);
            CREATE INDEX idx_notes_user_starred ON notes(user_id, is_starred);
            CREATE INDEX idx_notes_user_archived ON notes(user_id, is_archived);

            -- Kept in step with notes by the note queries; content holds stripped text.
            CREATE VIRTUAL TABLE notes_fts USING fts5(
                note_id UNINDEXED,
                title,
                content,
                tags,
                tokenize = 'porter unicode61'
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[test]
    fn oauth_sentinel_requires_provider_id() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO users (id, email, username, password, created_at)
             VALUES ('u1', 'a@x.com', 'a', 'google-oauth-user', '2024-01-01T00:00:00.000Z')",
            [],
        );
        assert!(result.is_err());
    }
}
