//! Owner-scoped note CRUD.
//!
//! Every handler runs behind the session guard and keys all store calls by the
//! principal's user id. A note owned by someone else is indistinguishable from
//! a missing one (404).

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    auth::{AuthState, Principal},
    error::{ApiError, ErrorResponse},
};
use crate::store::{Note, NoteStore};

const MAX_TITLE_CHARS: usize = 200;
const MAX_CONTENT_CHARS: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum NoteError {
    #[error("{0}")]
    Validation(&'static str),
    #[error("Invalid note id")]
    InvalidId,
    #[error("Note not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<NoteError> for ApiError {
    fn from(err: NoteError) -> Self {
        match err {
            NoteError::Validation(_) | NoteError::InvalidId => ApiError::bad_request(err.to_string()),
            NoteError::NotFound => ApiError::not_found(err.to_string()),
            NoteError::Store(source) => ApiError::internal(&source),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
#[serde(default)]
pub struct NoteRequest {
    pub title: String,
    pub content: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NoteResponse {
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Note> for NoteResponse {
    fn from(note: Note) -> Self {
        Self {
            id: note.id.to_string(),
            title: note.title,
            content: note.content,
            created_at: note.created_at,
            updated_at: note.updated_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct NotesResponse {
    pub notes: Vec<NoteResponse>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct NoteEnvelope {
    pub message: String,
    pub note: NoteResponse,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct NoteDeleted {
    pub message: String,
}

/// Trim and bound-check note fields.
fn validate_note(request: &NoteRequest) -> Result<(String, String), NoteError> {
    let title = request.title.trim();
    let content = request.content.trim();
    if title.is_empty() || content.is_empty() {
        return Err(NoteError::Validation("Title and content are required"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(NoteError::Validation(
            "Title must be 200 characters or fewer",
        ));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(NoteError::Validation(
            "Content must be 10000 characters or fewer",
        ));
    }
    Ok((title.to_string(), content.to_string()))
}

fn parse_note_id(raw: &str) -> Result<Uuid, NoteError> {
    Uuid::parse_str(raw.trim()).map_err(|_| NoteError::InvalidId)
}

#[utoipa::path(
    get,
    path = "/api/notes",
    responses(
        (status = 200, description = "Notes of the current user, newest first", body = NotesResponse),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse)
    ),
    tag = "notes"
)]
pub async fn list(
    principal: Extension<Principal>,
    notes: Extension<Arc<dyn NoteStore>>,
) -> Result<Json<NotesResponse>, ApiError> {
    let notes = notes
        .list_notes(principal.user_id)
        .await
        .map_err(NoteError::Store)?;
    Ok(Json(NotesResponse {
        notes: notes.into_iter().map(NoteResponse::from).collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/api/notes",
    request_body = NoteRequest,
    responses(
        (status = 201, description = "Note created", body = NoteEnvelope),
        (status = 400, description = "Invalid title or content", body = ErrorResponse),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse)
    ),
    tag = "notes"
)]
#[instrument(skip_all, fields(user_id = %principal.user_id))]
pub async fn create(
    principal: Extension<Principal>,
    auth_state: Extension<Arc<AuthState>>,
    notes: Extension<Arc<dyn NoteStore>>,
    payload: Option<Json<NoteRequest>>,
) -> Result<(StatusCode, Json<NoteEnvelope>), ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("Invalid request body"));
    };
    let (title, content) = validate_note(&request)?;
    let now = auth_state.now();
    let note = Note {
        id: Uuid::new_v4(),
        user_id: principal.user_id,
        title,
        content,
        created_at: now,
        updated_at: now,
    };
    notes.insert_note(&note).await.map_err(NoteError::Store)?;
    info!(note_id = %note.id, "note created");
    Ok((
        StatusCode::CREATED,
        Json(NoteEnvelope {
            message: "Note created successfully".to_string(),
            note: note.into(),
        }),
    ))
}

#[utoipa::path(
    put,
    path = "/api/notes/{id}",
    params(("id" = String, Path, description = "Note id")),
    request_body = NoteRequest,
    responses(
        (status = 200, description = "Note updated", body = NoteEnvelope),
        (status = 400, description = "Invalid id, title or content", body = ErrorResponse),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse),
        (status = 404, description = "Note not found", body = ErrorResponse)
    ),
    tag = "notes"
)]
#[instrument(skip_all, fields(user_id = %principal.user_id))]
pub async fn update(
    principal: Extension<Principal>,
    auth_state: Extension<Arc<AuthState>>,
    notes: Extension<Arc<dyn NoteStore>>,
    Path(id): Path<String>,
    payload: Option<Json<NoteRequest>>,
) -> Result<Json<NoteEnvelope>, ApiError> {
    let note_id = parse_note_id(&id)?;
    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("Invalid request body"));
    };
    let (title, content) = validate_note(&request)?;
    let note = notes
        .update_note(principal.user_id, note_id, &title, &content, auth_state.now())
        .await
        .map_err(NoteError::Store)?
        .ok_or(NoteError::NotFound)?;
    Ok(Json(NoteEnvelope {
        message: "Note updated successfully".to_string(),
        note: note.into(),
    }))
}

#[utoipa::path(
    delete,
    path = "/api/notes/{id}",
    params(("id" = String, Path, description = "Note id")),
    responses(
        (status = 200, description = "Note deleted", body = NoteDeleted),
        (status = 400, description = "Invalid id", body = ErrorResponse),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse),
        (status = 404, description = "Note not found", body = ErrorResponse)
    ),
    tag = "notes"
)]
#[instrument(skip_all, fields(user_id = %principal.user_id))]
pub async fn delete(
    principal: Extension<Principal>,
    notes: Extension<Arc<dyn NoteStore>>,
    Path(id): Path<String>,
) -> Result<Json<NoteDeleted>, ApiError> {
    let note_id = parse_note_id(&id)?;
    let deleted = notes
        .delete_note(principal.user_id, note_id)
        .await
        .map_err(NoteError::Store)?;
    if !deleted {
        return Err(NoteError::NotFound.into());
    }
    info!(%note_id, "note deleted");
    Ok(Json(NoteDeleted {
        message: "Note deleted successfully".to_string(),
    }))
}
