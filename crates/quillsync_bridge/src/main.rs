use std::sync::Arc;

use axum::extract::Extension;
use axum::http::{header, Method};
use axum::Router;
use quillsync_bridge::config::Config;
use quillsync_bridge::routes::{self, ApiState};
use quillsync_core::config::SyncConfig;
use quillsync_core::fs::RealFileSystem;
use quillsync_core::model::{InstanceId, ProfileId};
use quillsync_core::sync::SdHandle;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quillsync_bridge=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("starting quillsync bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("storage directory: {:?}", config.sd_root);
    info!("cors origins: {:?}", config.cors_origins);

    let sync_config = SyncConfig::default();
    let handle = match SdHandle::open(
        RealFileSystem::with_read_deadline(sync_config.read_deadline()),
        config.sd_root.clone(),
        InstanceId::new(),
        ProfileId::new(),
        sync_config,
    ) {
        Ok(handle) => Arc::new(handle),
        Err(e) => {
            error!("failed to open storage directory {:?}: {}", config.sd_root, e);
            std::process::exit(1);
        }
    };

    let cors = if config.cors_origins.is_empty() {
        CorsLayer::new().allow_methods([Method::GET]).allow_origin(Any)
    } else {
        let origins: Vec<axum::http::HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_methods([Method::GET])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_origin(origins)
    };

    let app = Router::new()
        .merge(routes::routes(ApiState { handle }))
        .layer(Extension(config.clone()))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = config.server_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("bridge listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    info!("bridge shut down gracefully");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
