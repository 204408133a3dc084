//! Read-only HTTP bridge onto one quillsync storage directory.
//!
//! This crate deliberately doesn't sync anything itself - it opens an
//! [`quillsync_core::sync::SdHandle`] against a storage directory and
//! exposes its `list_notes`/`get_info` surface as JSON, gated by a
//! single static bearer token. There is no database, no sessions, no
//! write endpoints.
//!
//! ## Environment Variables
//!
//! - `HOST`: server host (default: 0.0.0.0)
//! - `PORT`: server port (default: 8787)
//! - `QUILLSYNC_SD_ROOT`: storage directory to serve (required)
//! - `QUILLSYNC_BEARER_TOKEN`: bearer token required on gated routes (required)
//! - `CORS_ORIGINS`: comma-separated list of allowed origins

pub mod auth;
pub mod config;
pub mod routes;

pub use config::Config;
