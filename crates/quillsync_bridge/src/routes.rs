//! `GET /health`, `GET /api/notes`, `GET /api/notes/:id` - the entire
//! read-only surface this bridge exposes.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use quillsync_core::error::SerializableError;
use quillsync_core::fs::RealFileSystem;
use quillsync_core::sync::SdHandle;
use quillsync_core::NoteId;

use crate::auth::RequireBearer;

/// Shared state for the bridge's routes: a handle onto the one storage
/// directory this process serves. Opening the handle doesn't start the
/// background sync loop - the bridge only ever reads what's on disk at
/// request time via `refresh_note`, it never runs its own writer.
#[derive(Clone)]
pub struct ApiState {
    pub handle: Arc<SdHandle<RealFileSystem>>,
}

/// Build the bridge's router: `/health` is open, `/api/*` requires a
/// bearer token.
pub fn routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/notes", get(list_notes))
        .route("/api/notes/{id}", get(get_note))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn list_notes(
    State(state): State<ApiState>,
    RequireBearer(_): RequireBearer,
) -> impl IntoResponse {
    let ids = match state.handle.list_notes() {
        Ok(ids) => ids,
        Err(err) => return error_response(err),
    };

    let mut notes = Vec::with_capacity(ids.len());
    for id in ids {
        match state.handle.refresh_note(id).and_then(|()| state.handle.get_info(id)) {
            Ok(info) => notes.push(info),
            Err(err) => {
                tracing::warn!("skipping note {id} in listing: {err}");
            }
        }
    }
    Json(notes).into_response()
}

async fn get_note(
    State(state): State<ApiState>,
    RequireBearer(_): RequireBearer,
    Path(id): Path<NoteId>,
) -> impl IntoResponse {
    if let Err(err) = state.handle.refresh_note(id) {
        return error_response(err);
    }
    match state.handle.get_info(id) {
        Ok(info) => Json(info).into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: quillsync_core::QuillsyncError) -> axum::response::Response {
    let status = match &err {
        quillsync_core::QuillsyncError::NoteNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(SerializableError::from(&err))).into_response()
}
