//! HTTP surface: application state, router and server loop

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::error::AppError;
use crate::features;
use crate::ingest::{self, Pipeline};
use crate::middleware;
use crate::storage::{config::StorageConfig, Storage};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub pipeline: Arc<Pipeline>,
    pub run_timeout: Duration,
}

impl AppState {
    /// Connect the database, apply migrations, initialize staging storage
    /// and wire the pipeline
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let db = db::create_pool(&config.database).await?;
        db::migrate(&db).await?;

        let storage = Storage::new(StorageConfig::from_env()?).await?;
        info!(bucket = %ingest::staging::StagingStore::bucket(&storage), "Storage client initialized");

        let pipeline =
            ingest::build_pipeline(&config.ingest, &config.database, db.clone(), storage).await?;

        Ok(Self {
            db,
            pipeline: Arc::new(pipeline),
            run_timeout: config.ingest.run_timeout(),
        })
    }
}

/// Create the application router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    let feature_state = features::FeatureState {
        pipeline: state.pipeline.clone(),
        run_timeout: state.run_timeout,
    };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .with_state(state)
        .nest("/api/v1", features::router(feature_state))
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
}

/// Bind and serve until a shutdown signal arrives
pub async fn serve(config: &Config, state: AppState) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "Ferry Server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// Health check handler
async fn health_check(State(state): State<AppState>) -> Result<Response, AppError> {
    match db::health_check(&state.db).await {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected"
            })),
        )
            .into_response()),
        Err(e) => Err(AppError::Unavailable(format!("Database unreachable: {}", e))),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
