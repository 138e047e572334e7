use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use notehive_types::api::{
    ArchiveState, CreateNoteRequest, DEFAULT_PAGE_SIZE, ListNotesQuery, MAX_PAGE_SIZE,
    MessageResponse, NoteFilter, NoteListParams, NoteListResponse, NoteResponse, Pagination,
    SortField, SortOrder, StarState, StatsResponse, ToggleResponse, UpdateNoteRequest,
};
use notehive_types::models::{
    Identity, Note, NoteColor, NoteDraft, NoteEditError, NotePatch, normalize_tags,
};

use crate::error::ApiError;
use crate::extract::{ApiJson, ApiQuery};
use crate::state::{AppState, run_db};

fn parse_note_id(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse().map_err(|_| ApiError::bad_request("Invalid note ID"))
}

fn parse_color(raw: Option<&str>) -> Result<Option<NoteColor>, ApiError> {
    raw.map(|c| c.parse::<NoteColor>())
        .transpose()
        .map_err(|_| ApiError::bad_request("Invalid color"))
}

fn edit_error(err: NoteEditError) -> ApiError {
    ApiError::bad_request(err.to_string())
}

fn note_not_found() -> ApiError {
    ApiError::not_found("Note not found")
}

/// Validates the raw query string into store parameters.
pub fn list_params(query: ListNotesQuery) -> Result<NoteListParams, ApiError> {
    let filter = match query.filter.as_deref() {
        None | Some("") => NoteFilter::default(),
        Some(raw) => raw
            .parse()
            .map_err(|_| ApiError::bad_request("Invalid filter"))?,
    };
    let sort_by = match query.sort_by.as_deref() {
        None | Some("") => SortField::default(),
        Some(raw) => raw
            .parse()
            .map_err(|_| ApiError::bad_request("Invalid sort field"))?,
    };
    let sort_order = match query.sort_order.as_deref() {
        None | Some("") => SortOrder::default(),
        Some(raw) => raw
            .parse()
            .map_err(|_| ApiError::bad_request("Invalid sort order"))?,
    };

    let page = query.page.unwrap_or(1);
    if page == 0 {
        return Err(ApiError::bad_request("Page must be at least 1"));
    }
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(ApiError::bad_request("Limit must be between 1 and 100"));
    }

    let search = query
        .search
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    if sort_by == SortField::Relevance && search.is_none() {
        return Err(ApiError::bad_request("Relevance sort requires a search term"));
    }

    let tags = normalize_tags(query.tags.iter().flat_map(|t| t.split(',')));

    Ok(NoteListParams {
        search,
        filter,
        sort_by,
        sort_order,
        page,
        limit,
        tags,
    })
}

pub async fn create_note(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ApiJson(req): ApiJson<CreateNoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(title), Some(content)) = (req.title, req.content) else {
        return Err(edit_error(NoteEditError::MissingFields));
    };
    let color = parse_color(req.color.as_deref())?.unwrap_or_default();

    let note = Note::new(
        identity.id,
        NoteDraft {
            title,
            content,
            tags: req.tags.unwrap_or_default(),
            is_starred: req.is_starred.unwrap_or(false),
            color,
        },
        Utc::now(),
    )
    .map_err(edit_error)?;

    let record = note.clone();
    run_db(&state, move |db| db.insert_note(&record))
        .await
        .map_err(ApiError::internal("Failed to create note"))?;

    info!(user_id = %identity.id, note_id = %note.id, "Note created");

    Ok((
        StatusCode::CREATED,
        Json(NoteResponse {
            success: true,
            message: Some("Note created successfully".into()),
            note,
        }),
    ))
}

pub async fn list_notes(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ApiQuery(query): ApiQuery<ListNotesQuery>,
) -> Result<Json<NoteListResponse>, ApiError> {
    let params = list_params(query)?;
    let (page, limit) = (params.page, params.limit);

    let (notes, total) = run_db(&state, move |db| {
        db.list_notes(identity.id, &params, Utc::now())
    })
    .await
    .map_err(ApiError::internal("Failed to fetch notes"))?;

    Ok(Json(NoteListResponse {
        success: true,
        notes,
        pagination: Pagination::new(page, limit, total),
    }))
}

pub async fn get_note(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<NoteResponse>, ApiError> {
    let id = parse_note_id(&id)?;

    let note = run_db(&state, move |db| db.get_note(identity.id, id))
        .await
        .map_err(ApiError::internal("Failed to fetch note"))?
        .ok_or_else(note_not_found)?;

    Ok(Json(NoteResponse {
        success: true,
        message: None,
        note,
    }))
}

pub async fn update_note(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateNoteRequest>,
) -> Result<Json<NoteResponse>, ApiError> {
    let id = parse_note_id(&id)?;
    let patch = NotePatch {
        color: parse_color(req.color.as_deref())?,
        title: req.title,
        content: req.content,
        tags: req.tags,
        is_starred: req.is_starred,
    };

    let owner = identity.id;
    let mut note = run_db(&state, move |db| db.get_note(owner, id))
        .await
        .map_err(ApiError::internal("Failed to update note"))?
        .ok_or_else(note_not_found)?;

    let changed = note.apply_edit(patch, Utc::now()).map_err(edit_error)?;

    if changed {
        let record = note.clone();
        let stored = run_db(&state, move |db| db.update_note(&record))
            .await
            .map_err(ApiError::internal("Failed to update note"))?;
        if !stored {
            return Err(note_not_found());
        }
        info!(user_id = %owner, note_id = %id, "Note updated");
    }

    Ok(Json(NoteResponse {
        success: true,
        message: Some("Note updated successfully".into()),
        note,
    }))
}

pub async fn delete_note(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = parse_note_id(&id)?;
    let owner = identity.id;

    let deleted = run_db(&state, move |db| db.delete_note(owner, id))
        .await
        .map_err(ApiError::internal("Failed to delete note"))?;
    if !deleted {
        return Err(note_not_found());
    }

    info!(user_id = %owner, note_id = %id, "Note deleted");
    Ok(Json(MessageResponse::ok("Note deleted successfully")))
}

pub async fn toggle_star(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<ToggleResponse<StarState>>, ApiError> {
    let id = parse_note_id(&id)?;

    let is_starred = run_db(&state, move |db| db.toggle_star(identity.id, id, Utc::now()))
        .await
        .map_err(ApiError::internal("Failed to update note"))?
        .ok_or_else(note_not_found)?;

    let message = if is_starred {
        "Note starred successfully"
    } else {
        "Note unstarred successfully"
    };

    Ok(Json(ToggleResponse {
        success: true,
        message: message.into(),
        note: StarState { id, is_starred },
    }))
}

pub async fn toggle_archive(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<ToggleResponse<ArchiveState>>, ApiError> {
    let id = parse_note_id(&id)?;

    let is_archived = run_db(&state, move |db| db.toggle_archive(identity.id, id, Utc::now()))
        .await
        .map_err(ApiError::internal("Failed to update note"))?
        .ok_or_else(note_not_found)?;

    let message = if is_archived {
        "Note archived successfully"
    } else {
        "Note unarchived successfully"
    };

    Ok(Json(ToggleResponse {
        success: true,
        message: message.into(),
        note: ArchiveState { id, is_archived },
    }))
}

pub async fn note_stats(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<StatsResponse>, ApiError> {
    let stats = run_db(&state, move |db| db.note_stats(identity.id, Utc::now()))
        .await
        .map_err(ApiError::internal("Failed to fetch note statistics"))?;

    Ok(Json(StatsResponse {
        success: true,
        stats,
    }))
}
