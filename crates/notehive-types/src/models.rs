use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, SubsecRound, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Password column value for accounts that can only sign in through Google.
pub const OAUTH_PASSWORD_SENTINEL: &str = "google-oauth-user";

pub const MAX_TITLE_LEN: usize = 200;

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("static tag pattern"));

// -- Users --

/// How an account proves its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Argon2 PHC string.
    Password { hash: String },
    /// Google-only account; the store keeps the sentinel in the password column.
    OAuthOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordReset {
    pub otp: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub credential: Credential,
    pub google_id: Option<String>,
    pub reset: Option<PasswordReset>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_oauth_only(&self) -> bool {
        matches!(self.credential, Credential::OAuthOnly) && self.google_id.is_some()
    }

    pub fn identity(&self) -> Identity {
        Identity {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
        }
    }

    pub fn public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            email: self.email.clone(),
            username: self.username.clone(),
            google_id: self.google_id.clone(),
            created_at: self.created_at,
        }
    }
}

/// Emails are matched case-insensitively.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Sanitized user projection returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The authenticated caller, attached to requests by the auth middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

/// Profile handed back by an external identity provider.
#[derive(Debug, Clone)]
pub struct OAuthProfile {
    pub provider_id: String,
    pub email: String,
    pub display_name: Option<String>,
}

// -- Notes --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteColor {
    #[default]
    Default,
    Blue,
    Green,
    Purple,
    Orange,
    Pink,
}

impl NoteColor {
    pub const ALL: [NoteColor; 6] = [
        Self::Default,
        Self::Blue,
        Self::Green,
        Self::Purple,
        Self::Orange,
        Self::Pink,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Blue => "blue",
            Self::Green => "green",
            Self::Purple => "purple",
            Self::Orange => "orange",
            Self::Pink => "pink",
        }
    }
}

impl fmt::Display for NoteColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown note color '{0}'")]
pub struct UnknownColor(pub String);

impl FromStr for NoteColor {
    type Err = UnknownColor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownColor(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NoteEditError {
    #[error("Title and content are required")]
    MissingFields,
    #[error("Title cannot exceed 200 characters")]
    TitleTooLong,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub is_starred: bool,
    pub is_archived: bool,
    pub color: NoteColor,
    pub word_count: u32,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Validated input for a new note.
#[derive(Debug, Clone, Default)]
pub struct NoteDraft {
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub is_starred: bool,
    pub color: NoteColor,
}

/// Partial update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct NotePatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub is_starred: Option<bool>,
    pub color: Option<NoteColor>,
}

impl Note {
    pub fn new(user_id: Uuid, draft: NoteDraft, now: DateTime<Utc>) -> Result<Self, NoteEditError> {
        let title = clean_title(&draft.title)?;
        if draft.content.trim().is_empty() {
            return Err(NoteEditError::MissingFields);
        }
        let now = stored_precision(now);

        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            title,
            word_count: word_count(&draft.content),
            content: draft.content,
            tags: normalize_tags(draft.tags),
            is_starred: draft.is_starred,
            is_archived: false,
            color: draft.color,
            created_at: now,
            modified_at: now,
        })
    }

    /// Applies the supplied fields. Validation runs before anything is
    /// touched, so an invalid patch leaves the note unchanged.
    ///
    /// Returns whether any field changed; `modified_at` only moves when one did.
    pub fn apply_edit(&mut self, patch: NotePatch, now: DateTime<Utc>) -> Result<bool, NoteEditError> {
        let title = patch.title.as_deref().map(clean_title).transpose()?;
        if let Some(content) = &patch.content {
            if content.trim().is_empty() {
                return Err(NoteEditError::MissingFields);
            }
        }

        let mut changed = false;

        if let Some(title) = title {
            changed |= replace(&mut self.title, title);
        }
        if let Some(content) = patch.content {
            if replace(&mut self.content, content) {
                self.word_count = word_count(&self.content);
                changed = true;
            }
        }
        if let Some(tags) = patch.tags {
            changed |= replace(&mut self.tags, normalize_tags(tags));
        }
        if let Some(starred) = patch.is_starred {
            changed |= replace(&mut self.is_starred, starred);
        }
        if let Some(color) = patch.color {
            changed |= replace(&mut self.color, color);
        }

        if changed {
            self.touch(now);
        }
        Ok(changed)
    }

    /// Plain text indexed for full-text search.
    pub fn search_text(&self) -> String {
        strip_tags(&self.content)
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        let now = stored_precision(now);
        // Never move backwards if the clock does.
        if now > self.modified_at {
            self.modified_at = now;
        }
    }
}

/// Timestamps are persisted with millisecond precision.
pub fn stored_precision(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(3)
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

fn clean_title(raw: &str) -> Result<String, NoteEditError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(NoteEditError::MissingFields);
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(NoteEditError::TitleTooLong);
    }
    Ok(title.to_string())
}

pub fn strip_tags(html: &str) -> String {
    HTML_TAG.replace_all(html, "").into_owned()
}

/// Whitespace-separated tokens of the body with markup removed.
pub fn word_count(html: &str) -> u32 {
    strip_tags(html).split_whitespace().count() as u32
}

/// Trims and lower-cases tags, dropping blanks and duplicates while keeping order.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteStats {
    pub total_notes: u64,
    pub starred_notes: u64,
    pub archived_notes: u64,
    pub total_words: u64,
    pub recent_notes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn draft(title: &str, content: &str) -> NoteDraft {
        NoteDraft {
            title: title.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    #[test]
    fn word_count_ignores_markup() {
        assert_eq!(word_count("hello world"), 2);
        assert_eq!(word_count("<p>hello</p><p>big   <b>world</b></p>"), 2);
        assert_eq!(word_count("<p>hello</p>\n<ul><li>one</li> <li>two</li></ul>"), 3);
        assert_eq!(word_count("<br/>  <div></div>"), 0);
        assert_eq!(word_count(""), 0);
    }

    #[test]
    fn tags_are_normalized() {
        assert_eq!(
            normalize_tags(["  Work ", "work", "", "Ideas"]),
            vec!["work".to_string(), "ideas".to_string()]
        );
    }

    #[test]
    fn new_note_trims_title_and_counts_words() {
        let now = Utc::now();
        let note = Note::new(Uuid::new_v4(), draft("  Groceries  ", "<p>milk eggs</p>"), now).unwrap();
        assert_eq!(note.title, "Groceries");
        assert_eq!(note.word_count, 2);
        assert_eq!(note.color, NoteColor::Default);
        assert!(!note.is_archived);
        assert_eq!(note.created_at, note.modified_at);
    }

    #[test]
    fn timestamps_drop_sub_millisecond_digits() {
        let now = "2024-03-01T10:15:30.123456789Z".parse::<DateTime<Utc>>().unwrap();
        let mut note = Note::new(Uuid::new_v4(), draft("T", "body"), now).unwrap();
        assert_eq!(note.created_at.to_rfc3339(), "2024-03-01T10:15:30.123+00:00");

        note.apply_edit(
            NotePatch {
                title: Some("U".into()),
                ..Default::default()
            },
            now + Duration::nanoseconds(1_999_999),
        )
        .unwrap();
        assert_eq!(note.modified_at.to_rfc3339(), "2024-03-01T10:15:30.125+00:00");
    }

    #[test]
    fn new_note_requires_title_and_content() {
        let now = Utc::now();
        let owner = Uuid::new_v4();
        assert_eq!(
            Note::new(owner, draft("   ", "body"), now).unwrap_err(),
            NoteEditError::MissingFields
        );
        assert_eq!(
            Note::new(owner, draft("title", "  "), now).unwrap_err(),
            NoteEditError::MissingFields
        );
        let long = "x".repeat(MAX_TITLE_LEN + 1);
        assert_eq!(
            Note::new(owner, draft(&long, "body"), now).unwrap_err(),
            NoteEditError::TitleTooLong
        );
    }

    #[test]
    fn edit_recomputes_word_count_and_modified_time() {
        let created = Utc::now() - Duration::hours(1);
        let mut note = Note::new(Uuid::new_v4(), draft("T", "one"), created).unwrap();

        let later = Utc::now();
        let changed = note
            .apply_edit(
                NotePatch {
                    content: Some("<p>one two three</p>".into()),
                    ..Default::default()
                },
                later,
            )
            .unwrap();

        assert!(changed);
        assert_eq!(note.word_count, 3);
        assert_eq!(note.modified_at, stored_precision(later));
        assert_eq!(note.created_at, stored_precision(created));
    }

    #[test]
    fn edit_with_identical_values_keeps_modified_time() {
        let created = Utc::now() - Duration::hours(1);
        let mut note = Note::new(Uuid::new_v4(), draft("T", "body"), created).unwrap();

        let changed = note
            .apply_edit(
                NotePatch {
                    title: Some(" T ".into()),
                    is_starred: Some(false),
                    ..Default::default()
                },
                Utc::now(),
            )
            .unwrap();

        assert!(!changed);
        assert_eq!(note.modified_at, stored_precision(created));
    }

    #[test]
    fn invalid_edit_leaves_note_untouched() {
        let mut note = Note::new(Uuid::new_v4(), draft("T", "body"), Utc::now()).unwrap();
        let before = note.clone();

        let err = note
            .apply_edit(
                NotePatch {
                    title: Some("new".into()),
                    content: Some(" ".into()),
                    ..Default::default()
                },
                Utc::now(),
            )
            .unwrap_err();

        assert_eq!(err, NoteEditError::MissingFields);
        assert_eq!(note.title, before.title);
        assert_eq!(note.content, before.content);
    }

    #[test]
    fn color_parses_only_palette_values() {
        assert_eq!("pink".parse::<NoteColor>().unwrap(), NoteColor::Pink);
        assert!("teal".parse::<NoteColor>().is_err());
        assert_eq!(
            serde_json::to_string(&NoteColor::Purple).unwrap(),
            "\"purple\""
        );
    }

    #[test]
    fn note_serializes_with_client_field_names() {
        let note = Note::new(Uuid::new_v4(), draft("T", "body"), Utc::now()).unwrap();
        let json = serde_json::to_value(&note).unwrap();
        assert!(json.get("_id").is_some());
        assert_eq!(json["isStarred"], false);
        assert_eq!(json["wordCount"], 1);
        assert!(json.get("modifiedAt").is_some());
    }

    #[test]
    fn public_user_omits_credentials() {
        let user = User {
            id: Uuid::new_v4(),
            email: "a@x.com".into(),
            username: "alice".into(),
            credential: Credential::Password { hash: "$argon2id$...".into() },
            google_id: None,
            reset: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(user.public()).unwrap();
        assert!(json.get("password").is_none());
        assert!(json.get("googleId").is_none());
        assert_eq!(json["username"], "alice");
    }
}
