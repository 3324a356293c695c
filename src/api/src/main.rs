//! GateIn settlement service
//!
//! Fetches official race results, settles users' pick votes into points,
//! and keeps profiles, monthly contests, badges and ranks up to date.

mod admin;
mod cli;
mod config;
mod error;
mod ingest;
mod models;
mod points;
mod routes;
mod scraper;
mod settlement;
mod storage;
mod types;

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatein_api=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Commands::Serve { host, port } => run_server(config, host, port).await,
        Commands::Ingest { now } => cli::run_ingest(&config, now).await,
        Commands::Watch => cli::run_watch(&config).await,
        Commands::Settle { race_id } => cli::run_settle(&config, &race_id),
        Commands::Resettle { race_id, date } => cli::run_resettle(&config, race_id, date),
        Commands::RecordResults {
            race_id,
            file,
            settle,
        } => cli::run_record_results(&config, &race_id, &file, settle),
        Commands::OpenContest => cli::run_open_contest(&config),
        Commands::WeeklyContest {
            contest_id,
            name,
            race_ids,
        } => cli::run_weekly_contest(&config, &contest_id, &name, &race_ids),
        Commands::CloseContest { contest_id } => cli::run_close_contest(&config, &contest_id),
        Commands::ResetMonthly => cli::run_reset_monthly(&config),
        Commands::InitDb => cli::run_init_db(&config),
    }
}

/// Run the API server.
async fn run_server(
    mut config: AppConfig,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    if let Some(h) = host {
        config.server.host = h;
    }
    if let Some(p) = port {
        config.server.port = p;
    }

    tracing::info!("Configuration loaded");
    tracing::info!("Database path: {}", config.database.path);
    if config.auth.cron_secret.is_empty() {
        tracing::warn!("No cron secret configured; scheduler and admin endpoints will reject every call");
    }

    let store = cli::open_store(&config)?;
    let engine = cli::build_engine(&config, store);
    let ingestor = cli::build_ingestor(&config, engine.clone())?;

    let state = Arc::new(AppState {
        engine,
        ingestor,
        cron_secret: config.auth.cron_secret.clone(),
    });
    let app = routes::router(state);

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
