use agriclime::api::{self, AppState};
use agriclime::config::Config;
use agriclime::db::Repository;
use agriclime::ingest::Coordinator;
use agriclime::stats;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "agriclime", about = "Weather and crop yield data service")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest weather observation files from the configured directory
    IngestWeather,
    /// Ingest crop yield files from the configured directory
    IngestCrops,
    /// Recompute yearly per-station statistics from stored observations
    Stats,
    /// Serve the read API
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,agriclime=debug,sqlx=warn")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration: {}\n\n\
             Make sure:\n\
             1. {} exists\n\
             2. All required environment variables are set (check .env.example)\n\
             3. Create a .env file if needed",
            e,
            cli.config
        )
    })?;
    info!("Configuration loaded");

    // Connect to database
    let connection_string = config.database.connection_string();
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&connection_string)
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to connect to database: {}\n\n\
                 Host: {}:{}\n\
                 Database: {}\n\
                 User: {}\n\n\
                 Common fixes:\n\
                 1. Ensure PostgreSQL is running\n\
                 2. Check username/password are correct (DB_USER, DB_PASSWORD)\n\
                 3. Verify database exists: createdb {}\n\
                 4. Check host and port (DB_HOST, DB_PORT)",
                e,
                config.database.host,
                config.database.port,
                config.database.name,
                config.database.user,
                config.database.name
            )
        })?;

    info!(
        "Connected to database: {}@{}:{}/{}",
        config.database.user, config.database.host, config.database.port, config.database.name
    );

    // Create repository and run migrations
    let repository = Arc::new(Repository::new(pool));
    repository.run_migrations().await?;

    match cli.command {
        Command::IngestWeather => {
            let coordinator = Coordinator::new(repository, config.ingest.clone());
            let report = coordinator.ingest_weather().await?;
            info!(
                "Weather ingestion finished: {} files, {} created, {} updated, {} skipped",
                report.files, report.counts.created, report.counts.updated, report.counts.skipped
            );
        }
        Command::IngestCrops => {
            let coordinator = Coordinator::new(repository, config.ingest.clone());
            let report = coordinator.ingest_crops().await?;
            info!(
                "Crop ingestion finished: {} files, {} created, {} updated, {} skipped",
                report.files, report.counts.created, report.counts.updated, report.counts.skipped
            );
        }
        Command::Stats => {
            let counts = stats::recompute_stats(&repository).await?;
            info!(
                "Stats recompute finished: {} created, {} updated",
                counts.created, counts.updated
            );
        }
        Command::Serve => {
            let state = Arc::new(AppState {
                repository,
                page_size: config.server.page_size,
            });
            api::serve(state, &config.server.bind, shutdown_signal()).await?;
            info!("Read API shut down");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
