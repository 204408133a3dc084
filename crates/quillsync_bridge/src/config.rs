//! Bridge configuration loaded from environment variables.
//!
//! The bridge is a read-only window onto one storage directory, gated by
//! a single static bearer token - there is no user database, no sessions,
//! nothing to expire. Config is deliberately this small.

use std::env;
use std::path::PathBuf;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (default: 0.0.0.0).
    pub host: String,
    /// Server port (default: 8787).
    pub port: u16,
    /// Storage directory this bridge serves.
    pub sd_root: PathBuf,
    /// Bearer token required on every request. Requests without a
    /// matching `Authorization: Bearer <token>` header are rejected.
    pub bearer_token: String,
    /// CORS allowed origins (comma-separated).
    pub cors_origins: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "8787".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let sd_root = PathBuf::from(
            env::var("QUILLSYNC_SD_ROOT").map_err(|_| ConfigError::MissingSdRoot)?,
        );

        let bearer_token =
            env::var("QUILLSYNC_BEARER_TOKEN").map_err(|_| ConfigError::MissingBearerToken)?;

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Config { host, port, sd_root, bearer_token, cors_origins })
    }

    /// The server address to bind to.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    MissingSdRoot,
    MissingBearerToken,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "Invalid PORT environment variable"),
            ConfigError::MissingSdRoot => write!(f, "QUILLSYNC_SD_ROOT must be set to the storage directory to serve"),
            ConfigError::MissingBearerToken => write!(f, "QUILLSYNC_BEARER_TOKEN must be set"),
        }
    }
}

impl std::error::Error for ConfigError {}
