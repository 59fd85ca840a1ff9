//! Ferry CLI - run pipeline triggers and inspect the ledger from a shell

use anyhow::Result;
use clap::{Parser, Subcommand};
use ferry_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use serde::Serialize;
use std::process;
use tracing::error;

use ferry_server::{
    api::AppState,
    config::Config,
    db,
    features::ledger::{queries::list_entries, ListLedgerEntriesQuery},
    ingest::{LoadDisposition, StorageNotification},
};

#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one extraction: land every new source file in staging
    Extract,

    /// Load one staged object, as if its storage notification had arrived
    Load {
        /// Staging bucket
        #[arg(long, env = "S3_BUCKET")]
        bucket: String,

        /// Object key under the incoming prefix
        #[arg(long)]
        key: String,
    },

    /// List ledger entries
    Ledger {
        #[arg(long)]
        source_path: Option<String>,

        #[arg(long)]
        object_uri: Option<String>,

        /// LANDING, LANDED, LAND_FAILED, LOADING, SUCCESS or FAILED
        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        limit: Option<i64>,
    },

    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Warn })
        .output(LogOutput::Console)
        .log_file_prefix("ferry-cli")
        .build();
    let log_config = log_config.clone().with_env().unwrap_or(log_config);

    if let Some(warning) = logging_warning(init_logging(&log_config)) {
        eprintln!("{}", warning);
    }

    match execute_command(&cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            process::exit(1);
        },
    }
}

/// The CLI works without logging, but says so on stderr
fn logging_warning(init: Result<()>) -> Option<String> {
    init.err()
        .map(|e| format!("Warning: logging disabled: {:#}", e))
}

/// Execute the command, returning the process exit code
async fn execute_command(cli: &Cli) -> Result<i32> {
    let config = Config::load()?;

    match &cli.command {
        Commands::Migrate => {
            let pool = db::create_pool(&config.database).await?;
            db::migrate(&pool).await?;
            println!("Migrations applied");
            Ok(0)
        },

        Commands::Extract => {
            let state = AppState::from_config(&config).await?;
            let report = state.pipeline.run_extract_within(state.run_timeout).await?;
            print_json(&report)?;
            Ok(if report.failed > 0 { 2 } else { 0 })
        },

        Commands::Load { bucket, key } => {
            let state = AppState::from_config(&config).await?;
            let notification = StorageNotification {
                bucket: bucket.clone(),
                name: key.clone(),
            };
            let report = state
                .pipeline
                .handle_notification_within(notification, state.run_timeout)
                .await?;
            print_json(&report)?;
            Ok(if report.disposition == LoadDisposition::Failed { 2 } else { 0 })
        },

        Commands::Ledger {
            source_path,
            object_uri,
            status,
            limit,
        } => {
            let state = AppState::from_config(&config).await?;
            let query = ListLedgerEntriesQuery {
                source_system: None,
                source_path: source_path.clone(),
                object_uri: object_uri.clone(),
                status: status.clone(),
                limit: *limit,
            };
            let response = list_entries::handle(state.pipeline.clone(), query).await?;
            print_json(&response)?;
            Ok(0)
        },
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
