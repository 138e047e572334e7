//! SQL for note listings: the shared FROM/WHERE clause, the ORDER BY and
//! the bound values, built from already-validated [`NoteListParams`].

use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Value;
use uuid::Uuid;

use notehive_types::api::{NoteFilter, NoteListParams, SortField, SortOrder};

use crate::models::timestamp;

/// Notes modified within this many days count as recent.
pub const RECENT_WINDOW_DAYS: i64 = 7;

/// Column weights for bm25: note_id, title, content, tags.
const RANK: &str = "bm25(notes_fts, 0.0, 10.0, 5.0, 3.0)";

pub fn recent_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(RECENT_WINDOW_DAYS)
}

pub(crate) struct ListQuery {
    /// `FROM ... WHERE ...`, shared by the count and the page query.
    pub from_where: String,
    pub order_by: String,
    pub values: Vec<Value>,
}

pub(crate) fn build(owner: Uuid, params: &NoteListParams, now: DateTime<Utc>) -> ListQuery {
    let mut values = vec![Value::Text(owner.to_string())];
    let mut from = String::from("FROM notes n");
    let mut clauses = vec!["n.user_id = ?".to_string()];

    match params.filter {
        NoteFilter::Archived => clauses.push("n.is_archived = 1".into()),
        NoteFilter::All => clauses.push("n.is_archived = 0".into()),
        NoteFilter::Starred => {
            clauses.push("n.is_archived = 0".into());
            clauses.push("n.is_starred = 1".into());
        }
        NoteFilter::Recent => {
            clauses.push("n.is_archived = 0".into());
            clauses.push("n.modified_at >= ?".into());
            values.push(Value::Text(timestamp(recent_cutoff(now))));
        }
    }

    let search = params.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let mut searching = false;
    if let Some(search) = search {
        match match_expression(search) {
            Some(expr) => {
                from.push_str(" JOIN notes_fts ON notes_fts.note_id = n.id");
                clauses.push("notes_fts MATCH ?".into());
                values.push(Value::Text(expr));
                searching = true;
            }
            // Nothing searchable in the input.
            None => clauses.push("0".into()),
        }
    }

    if !params.tags.is_empty() {
        let slots = vec!["?"; params.tags.len()].join(", ");
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM json_each(n.tags) WHERE json_each.value IN ({}))",
            slots
        ));
        values.extend(params.tags.iter().cloned().map(Value::Text));
    }

    ListQuery {
        from_where: format!("{} WHERE {}", from, clauses.join(" AND ")),
        order_by: order_by(params.sort_by, params.sort_order, searching),
        values,
    }
}

/// FTS5 query matching any alphanumeric word of `input`. Each word is
/// quoted so operators and column filters in user input stay literal.
pub fn match_expression(input: &str) -> Option<String> {
    let terms: Vec<String> = input
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| format!("\"{}\"", w))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

fn order_by(field: SortField, order: SortOrder, searching: bool) -> String {
    let dir = match order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };

    let column = match field {
        SortField::ModifiedAt => "n.modified_at",
        SortField::CreatedAt => "n.created_at",
        SortField::Title => "n.title COLLATE NOCASE",
        SortField::WordCount => "n.word_count",
        SortField::Relevance if searching => {
            // bm25 is lower for better matches, so "desc" means ascending rank.
            let rank_dir = match order {
                SortOrder::Asc => "DESC",
                SortOrder::Desc => "ASC",
            };
            return format!("ORDER BY {} {}, n.id {}", RANK, rank_dir, dir);
        }
        SortField::Relevance => "n.modified_at",
    };

    format!("ORDER BY {} {}, n.id {}", column, dir, dir)
}
