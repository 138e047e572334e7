use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params_from_iter, types::Value};
use uuid::Uuid;

use notehive_types::api::NoteListParams;
use notehive_types::models::{Note, NoteStats};

use crate::Database;
use crate::filter::{self, recent_cutoff};
use crate::models::{NOTE_COLUMNS, NoteRow, timestamp};
use crate::queries::OptionalExt;

impl Database {
    // -- Notes --

    pub fn insert_note(&self, note: &Note) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO notes (id, user_id, title, content, tags, is_starred, is_archived, color, word_count, created_at, modified_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    note.id.to_string(),
                    note.user_id.to_string(),
                    note.title,
                    note.content,
                    serde_json::to_string(&note.tags)?,
                    note.is_starred,
                    note.is_archived,
                    note.color.as_str(),
                    note.word_count,
                    timestamp(note.created_at),
                    timestamp(note.modified_at),
                ],
            )?;
            index_note(&tx, note)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Fetches a note only if `owner` owns it.
    pub fn get_note(&self, owner: Uuid, id: Uuid) -> Result<Option<Note>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM notes n WHERE n.id = ?1 AND n.user_id = ?2",
                NOTE_COLUMNS
            ))?;

            let row = stmt
                .query_row(
                    rusqlite::params![id.to_string(), owner.to_string()],
                    NoteRow::from_row,
                )
                .optional()?;

            row.map(Note::try_from).transpose()
        })
    }

    /// Writes back an edited note and re-indexes it. Returns false if the
    /// note vanished or changed hands in the meantime.
    pub fn update_note(&self, note: &Note) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE notes
                 SET title = ?1, content = ?2, tags = ?3, is_starred = ?4, color = ?5,
                     word_count = ?6, modified_at = ?7
                 WHERE id = ?8 AND user_id = ?9",
                rusqlite::params![
                    note.title,
                    note.content,
                    serde_json::to_string(&note.tags)?,
                    note.is_starred,
                    note.color.as_str(),
                    note.word_count,
                    timestamp(note.modified_at),
                    note.id.to_string(),
                    note.user_id.to_string(),
                ],
            )?;
            if updated == 0 {
                return Ok(false);
            }

            unindex_note(&tx, note.id)?;
            index_note(&tx, note)?;
            tx.commit()?;
            Ok(true)
        })
    }

    pub fn delete_note(&self, owner: Uuid, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let deleted = tx.execute(
                "DELETE FROM notes WHERE id = ?1 AND user_id = ?2",
                rusqlite::params![id.to_string(), owner.to_string()],
            )?;
            if deleted == 0 {
                return Ok(false);
            }

            unindex_note(&tx, id)?;
            tx.commit()?;
            Ok(true)
        })
    }

    /// Flips the starred flag in place. `None` when the note is not the owner's.
    pub fn toggle_star(&self, owner: Uuid, id: Uuid, now: DateTime<Utc>) -> Result<Option<bool>> {
        self.with_conn(|conn| toggle_flag(conn, "is_starred", owner, id, now))
    }

    pub fn toggle_archive(&self, owner: Uuid, id: Uuid, now: DateTime<Utc>) -> Result<Option<bool>> {
        self.with_conn(|conn| toggle_flag(conn, "is_archived", owner, id, now))
    }

    /// One page of the owner's notes plus the total number of matches.
    pub fn list_notes(
        &self,
        owner: Uuid,
        params: &NoteListParams,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Note>, u64)> {
        let query = filter::build(owner, params, now);

        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) {}", query.from_where),
                params_from_iter(query.values.iter()),
                |row| row.get(0),
            )?;

            let mut values = query.values.clone();
            values.push(Value::Integer(i64::from(params.limit)));
            values.push(Value::Integer(
                i64::try_from(params.offset()).unwrap_or(i64::MAX),
            ));

            let mut stmt = conn.prepare(&format!(
                "SELECT {} {} {} LIMIT ? OFFSET ?",
                NOTE_COLUMNS, query.from_where, query.order_by
            ))?;

            let rows = stmt
                .query_map(params_from_iter(values.iter()), NoteRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let notes = rows
                .into_iter()
                .map(Note::try_from)
                .collect::<Result<Vec<_>>>()?;

            Ok((notes, u64::try_from(total).unwrap_or(0)))
        })
    }

    /// Aggregates over every note the owner has, archived included.
    pub fn note_stats(&self, owner: Uuid, now: DateTime<Utc>) -> Result<NoteStats> {
        self.with_conn(|conn| {
            let stats = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(is_starred), 0),
                        COALESCE(SUM(is_archived), 0),
                        COALESCE(SUM(word_count), 0),
                        COALESCE(SUM(modified_at >= ?2), 0)
                 FROM notes WHERE user_id = ?1",
                rusqlite::params![owner.to_string(), timestamp(recent_cutoff(now))],
                |row| {
                    let count = |i: usize| -> rusqlite::Result<u64> {
                        Ok(u64::try_from(row.get::<_, i64>(i)?).unwrap_or(0))
                    };
                    Ok(NoteStats {
                        total_notes: count(0)?,
                        starred_notes: count(1)?,
                        archived_notes: count(2)?,
                        total_words: count(3)?,
                        recent_notes: count(4)?,
                    })
                },
            )?;
            Ok(stats)
        })
    }
}

fn toggle_flag(
    conn: &Connection,
    column: &str,
    owner: Uuid,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<bool>> {
    conn.query_row(
        &format!(
            "UPDATE notes SET {col} = NOT {col}, modified_at = ?1
             WHERE id = ?2 AND user_id = ?3
             RETURNING {col}",
            col = column
        ),
        rusqlite::params![timestamp(now), id.to_string(), owner.to_string()],
        |row| row.get(0),
    )
    .optional()
}

fn index_note(conn: &Connection, note: &Note) -> Result<()> {
    conn.execute(
        "INSERT INTO notes_fts (note_id, title, content, tags) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            note.id.to_string(),
            note.title,
            note.search_text(),
            note.tags.join(" "),
        ],
    )?;
    Ok(())
}

fn unindex_note(conn: &Connection, id: Uuid) -> Result<()> {
    conn.execute(
        "DELETE FROM notes_fts WHERE note_id = ?1",
        [id.to_string()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use notehive_types::api::{NoteFilter, SortField, SortOrder};
    use notehive_types::models::{Credential, NoteDraft, User};

    fn setup() -> (Database, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let user = User {
            id: Uuid::new_v4(),
            email: format!("{}@x.com", Uuid::new_v4()),
            username: "owner".into(),
            credential: Credential::Password { hash: "h".into() },
            google_id: None,
            reset: None,
            created_at: Utc::now(),
        };
        db.create_user(&user).unwrap();
        (db, user.id)
    }

    fn add_user(db: &Database) -> Uuid {
        let user = User {
            id: Uuid::new_v4(),
            email: format!("{}@x.com", Uuid::new_v4()),
            username: "other".into(),
            credential: Credential::Password { hash: "h".into() },
            google_id: None,
            reset: None,
            created_at: Utc::now(),
        };
        db.create_user(&user).unwrap();
        user.id
    }

    fn add_note(db: &Database, owner: Uuid, title: &str, content: &str, at: DateTime<Utc>) -> Note {
        let note = Note::new(
            owner,
            NoteDraft {
                title: title.into(),
                content: content.into(),
                ..Default::default()
            },
            at,
        )
        .unwrap();
        db.insert_note(&note).unwrap();
        note
    }

    fn titles(notes: &[Note]) -> Vec<&str> {
        notes.iter().map(|n| n.title.as_str()).collect()
    }

    #[test]
    fn insert_and_get_respects_owner() {
        let (db, owner) = setup();
        let other = add_user(&db);
        let note = add_note(&db, owner, "Groceries", "milk eggs", Utc::now());

        let fetched = db.get_note(owner, note.id).unwrap().unwrap();
        assert_eq!(fetched.title, "Groceries");
        assert_eq!(fetched.word_count, 2);

        assert!(db.get_note(other, note.id).unwrap().is_none());
        assert!(!db.delete_note(other, note.id).unwrap());
    }

    #[test]
    fn update_reindexes_search_text() {
        let (db, owner) = setup();
        let mut note = add_note(&db, owner, "Plan", "apples", Utc::now());

        note.content = "bananas".into();
        assert!(db.update_note(&note).unwrap());

        let search = |term: &str| {
            let params = NoteListParams {
                search: Some(term.into()),
                ..Default::default()
            };
            db.list_notes(owner, &params, Utc::now()).unwrap().1
        };
        assert_eq!(search("apples"), 0);
        assert_eq!(search("bananas"), 1);
    }

    #[test]
    fn delete_removes_note_and_index_entry() {
        let (db, owner) = setup();
        let note = add_note(&db, owner, "Gone", "soon", Utc::now());

        assert!(db.delete_note(owner, note.id).unwrap());
        assert!(db.get_note(owner, note.id).unwrap().is_none());

        let fts: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM notes_fts", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(fts, 0);
    }

    #[test]
    fn toggles_flip_and_scope_to_owner() {
        let (db, owner) = setup();
        let other = add_user(&db);
        let note = add_note(&db, owner, "T", "body", Utc::now());
        let now = Utc::now();

        assert_eq!(db.toggle_star(owner, note.id, now).unwrap(), Some(true));
        assert_eq!(db.toggle_star(owner, note.id, now).unwrap(), Some(false));
        assert_eq!(db.toggle_archive(owner, note.id, now).unwrap(), Some(true));
        assert_eq!(db.toggle_star(other, note.id, now).unwrap(), None);
        assert_eq!(db.toggle_archive(owner, Uuid::new_v4(), now).unwrap(), None);
    }

    #[test]
    fn listing_filters_and_paginates() {
        let (db, owner) = setup();
        let now = Utc::now();
        let old = add_note(&db, owner, "Old", "one", now - Duration::days(30));
        let starred = add_note(&db, owner, "Starred", "two words", now - Duration::days(1));
        let archived = add_note(&db, owner, "Archived", "three more words", now);
        db.toggle_star(owner, starred.id, now - Duration::days(1)).unwrap();
        db.toggle_archive(owner, archived.id, now).unwrap();

        let list = |filter: NoteFilter| {
            let params = NoteListParams {
                filter,
                ..Default::default()
            };
            db.list_notes(owner, &params, now).unwrap().0
        };

        assert_eq!(titles(&list(NoteFilter::All)), vec!["Starred", "Old"]);
        assert_eq!(titles(&list(NoteFilter::Starred)), vec!["Starred"]);
        assert_eq!(titles(&list(NoteFilter::Recent)), vec!["Starred"]);
        assert_eq!(titles(&list(NoteFilter::Archived)), vec!["Archived"]);

        let page = NoteListParams {
            sort_by: SortField::Title,
            sort_order: SortOrder::Asc,
            page: 2,
            limit: 1,
            ..Default::default()
        };
        let (notes, total) = db.list_notes(owner, &page, now).unwrap();
        assert_eq!(total, 2);
        assert_eq!(titles(&notes), vec!["Starred"]);
        assert_ne!(notes[0].id, old.id);
    }

    #[test]
    fn tag_filter_matches_any_listed_tag() {
        let (db, owner) = setup();
        let now = Utc::now();
        for (title, tags) in [("A", vec!["work"]), ("B", vec!["home", "ideas"]), ("C", vec![])] {
            let note = Note::new(
                owner,
                NoteDraft {
                    title: title.into(),
                    content: "x".into(),
                    tags: tags.into_iter().map(String::from).collect(),
                    ..Default::default()
                },
                now,
            )
            .unwrap();
            db.insert_note(&note).unwrap();
        }

        let params = NoteListParams {
            tags: vec!["work".into(), "ideas".into()],
            sort_by: SortField::Title,
            sort_order: SortOrder::Asc,
            ..Default::default()
        };
        let (notes, total) = db.list_notes(owner, &params, now).unwrap();
        assert_eq!(total, 2);
        assert_eq!(titles(&notes), vec!["A", "B"]);
    }

    #[test]
    fn relevance_ranks_title_hits_first() {
        let (db, owner) = setup();
        let now = Utc::now();
        add_note(&db, owner, "Shopping", "remember the rust remover", now);
        add_note(&db, owner, "Rust notes", "ownership and borrowing", now);
        add_note(&db, owner, "Unrelated", "nothing here", now);

        let params = NoteListParams {
            search: Some("rust".into()),
            sort_by: SortField::Relevance,
            ..Default::default()
        };
        let (notes, total) = db.list_notes(owner, &params, now).unwrap();
        assert_eq!(total, 2);
        assert_eq!(notes[0].title, "Rust notes");
    }

    #[test]
    fn search_ignores_markup_and_other_owners() {
        let (db, owner) = setup();
        let other = add_user(&db);
        let now = Utc::now();
        add_note(&db, owner, "Mine", "<p>kiwi</p>", now);
        add_note(&db, other, "Theirs", "kiwi", now);

        let search = |term: &str| NoteListParams {
            search: Some(term.into()),
            ..Default::default()
        };
        assert_eq!(db.list_notes(owner, &search("kiwi"), now).unwrap().1, 1);
        assert_eq!(db.list_notes(owner, &search("p"), now).unwrap().1, 0);
        assert_eq!(db.list_notes(owner, &search("***"), now).unwrap().1, 0);
    }

    #[test]
    fn stats_cover_archived_notes() {
        let (db, owner) = setup();
        let now = Utc::now();
        let empty = db.note_stats(owner, now).unwrap();
        assert_eq!(empty, NoteStats::default());

        add_note(&db, owner, "Old", "one two", now - Duration::days(30));
        let b = add_note(&db, owner, "New", "three four five", now);
        db.toggle_star(owner, b.id, now).unwrap();
        db.toggle_archive(owner, b.id, now).unwrap();

        let stats = db.note_stats(owner, now).unwrap();
        assert_eq!(
            stats,
            NoteStats {
                total_notes: 2,
                starred_notes: 1,
                archived_notes: 1,
                total_words: 5,
                recent_notes: 1,
            }
        );
    }
}
