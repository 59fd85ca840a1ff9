//! Ferry Server - Main entry point

use anyhow::Result;
use ferry_common::logging::{init_logging, LogConfig};
use tracing::info;

use ferry_server::{api, config::Config, ingest::ExtractOrchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let log_config = LogConfig::builder()
        .log_file_prefix("ferry-server")
        .filter_directives("ferry_server=debug,tower_http=debug,sqlx=warn")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().with_env().unwrap_or(log_config);

    init_logging(&log_config)?;

    info!("Starting Ferry Server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let state = api::AppState::from_config(&config).await?;

    let _orchestrator_handle = if config.ingest.schedule_enabled {
        let orchestrator = ExtractOrchestrator::new(
            state.pipeline.clone(),
            config.ingest.extract_interval(),
            config.ingest.run_timeout(),
        );
        let handle = orchestrator.start();
        info!("Extraction orchestrator started");
        Some(handle)
    } else {
        info!("Scheduled extraction is disabled (EXTRACT_SCHEDULE_ENABLED=false)");
        None
    };

    api::serve(&config, state).await
}
