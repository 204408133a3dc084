use std::sync::Arc;

use axum::body::Body;
use axum::extract::Extension;
use axum::http::{Request, StatusCode};
use quillsync_bridge::config::Config;
use quillsync_bridge::routes::{routes, ApiState};
use quillsync_core::config::SyncConfig;
use quillsync_core::fs::RealFileSystem;
use quillsync_core::model::{InstanceId, ProfileId};
use quillsync_core::sync::SdHandle;
use tower::ServiceExt;

const TOKEN: &str = "test-token";

fn test_config() -> Arc<Config> {
    Arc::new(Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        sd_root: std::path::PathBuf::new(),
        bearer_token: TOKEN.to_string(),
        cors_origins: Vec::new(),
    })
}

fn test_app(dir: &std::path::Path) -> axum::Router {
    let handle = SdHandle::open(
        RealFileSystem::new(),
        dir.to_path_buf(),
        InstanceId::new(),
        ProfileId::new(),
        SyncConfig::default(),
    )
    .unwrap();
    routes(ApiState { handle: Arc::new(handle) }).layer(Extension(test_config()))
}

#[tokio::test]
async fn health_is_reachable_without_a_token() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn listing_notes_without_a_bearer_token_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let response = app
        .oneshot(Request::builder().uri("/api/notes").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn listing_notes_with_a_valid_token_succeeds_on_an_empty_sd() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/notes")
                .header("authorization", format!("Bearer {TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_note_returns_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/notes/{}", quillsync_core::NoteId::new()))
                .header("authorization", format!("Bearer {TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
