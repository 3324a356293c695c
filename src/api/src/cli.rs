//! CLI commands for gatein-api.
//!
//! Server mode, one-shot and looping result ingestion, and the admin
//! recovery and maintenance paths.

use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::admin::{record_results, resettle};
use crate::config::AppConfig;
use crate::ingest::{ResultIngestor, RetryWindow};
use crate::scraper::NetkeibaResultSource;
use crate::settlement::contest::open_monthly_contest;
use crate::settlement::weekly::{close_contest, create_weekly_contest};
use crate::settlement::SettlementEngine;
use crate::storage::votes::reset_monthly_points;
use crate::storage::Store;
use crate::types::RecordResultsRequest;

#[derive(Parser)]
#[command(name = "gatein-api")]
#[command(version, about = "GateIn: race result ingestion and vote settlement", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run one ingestion cycle
    Ingest {
        /// Evaluate the retry window at this RFC3339 time instead of now
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },

    /// Run ingestion cycles on the configured poll interval
    Watch,

    /// Settle one race from its stored results
    Settle {
        #[arg(value_name = "RACE_ID")]
        race_id: String,
    },

    /// Settle voting-open races by id or race date
    Resettle {
        #[arg(long, conflicts_with = "date")]
        race_id: Option<String>,

        /// Race date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Store results for a race from a JSON file
    RecordResults {
        #[arg(value_name = "RACE_ID")]
        race_id: String,

        /// JSON file with `results` and optional `payouts`
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Settle the race after storing
        #[arg(long)]
        settle: bool,
    },

    /// Open the current month's contest and close earlier ones
    OpenContest,

    /// Create a weekly contest over an ordered card of races
    WeeklyContest {
        #[arg(value_name = "CONTEST_ID")]
        contest_id: String,

        #[arg(long)]
        name: String,

        /// Races in card order
        #[arg(value_name = "RACE_IDS", required = true)]
        race_ids: Vec<String>,
    },

    /// Close an active contest
    CloseContest {
        #[arg(value_name = "CONTEST_ID")]
        contest_id: String,
    },

    /// Zero every user's monthly points
    ResetMonthly,

    /// Create the database and tables
    InitDb,
}

pub fn open_store(config: &AppConfig) -> anyhow::Result<Arc<Store>> {
    let store = Store::open(Path::new(&config.database.path))
        .with_context(|| format!("Failed to open database {}", config.database.path))?;
    Ok(Arc::new(store))
}

pub fn build_engine(config: &AppConfig, store: Arc<Store>) -> Arc<SettlementEngine> {
    Arc::new(SettlementEngine::with_default_handlers(
        store,
        config.points.clone(),
    ))
}

pub fn build_ingestor(
    config: &AppConfig,
    engine: Arc<SettlementEngine>,
) -> anyhow::Result<ResultIngestor<NetkeibaResultSource>> {
    let source = NetkeibaResultSource::new(&config.ingest)?;
    Ok(ResultIngestor::new(
        source,
        engine,
        RetryWindow::from_config(&config.ingest),
        config.ingest.fetch_timeout(),
    ))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One ingestion cycle, printing the outcomes.
pub async fn run_ingest(config: &AppConfig, now: Option<DateTime<Utc>>) -> anyhow::Result<()> {
    let engine = build_engine(config, open_store(config)?);
    let ingestor = build_ingestor(config, engine)?;

    let now = now.unwrap_or_else(Utc::now);
    eprintln!("Running ingestion cycle at {}", now.to_rfc3339());
    let outcomes = ingestor.run_ingestion_cycle(now).await;
    ingestor.into_source().shutdown().await;

    print_json(&outcomes?)
}

/// Ingestion loop until Ctrl-C.
pub async fn run_watch(config: &AppConfig) -> anyhow::Result<()> {
    let engine = build_engine(config, open_store(config)?);
    let ingestor = build_ingestor(config, engine)?;

    let mut ticker = tokio::time::interval(config.ingest.poll_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::info!(
        "Watching for results every {}s",
        config.ingest.poll_interval_secs
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = ingestor.run_ingestion_cycle(Utc::now()).await {
                    tracing::error!("Ingestion cycle failed: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    ingestor.into_source().shutdown().await;
    Ok(())
}

pub fn run_settle(config: &AppConfig, race_id: &str) -> anyhow::Result<()> {
    let engine = build_engine(config, open_store(config)?);
    let report = engine.settle(race_id)?;
    eprintln!(
        "Settled {} votes on {} ({} points)",
        report.settled_votes, report.race_id, report.total_points_awarded
    );
    print_json(&report)
}

pub fn run_resettle(
    config: &AppConfig,
    race_id: Option<String>,
    date: Option<NaiveDate>,
) -> anyhow::Result<()> {
    if race_id.is_none() && date.is_none() {
        bail!("Either --race-id or --date is required");
    }
    let engine = build_engine(config, open_store(config)?);
    let outcomes = resettle(&engine, race_id.as_deref(), date, Utc::now())?;
    eprintln!("Processed {} races", outcomes.len());
    print_json(&outcomes)
}

pub fn run_record_results(
    config: &AppConfig,
    race_id: &str,
    file: &Path,
    settle: bool,
) -> anyhow::Result<()> {
    let input = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let req: RecordResultsRequest =
        serde_json::from_str(&input).context("Failed to parse results file")?;

    let engine = build_engine(config, open_store(config)?);
    record_results(engine.store(), race_id, &req.results, &req.payouts)?;
    eprintln!(
        "Recorded {} results and {} payouts for {}",
        req.results.len(),
        req.payouts.len(),
        race_id
    );

    if settle || req.settle {
        print_json(&engine.settle(race_id)?)?;
    }
    Ok(())
}

pub fn run_open_contest(config: &AppConfig) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let rollover = open_monthly_contest(&store.conn(), Utc::now(), config.contest.default_min_votes)?;
    eprintln!(
        "Contest {} ({}), closed {} earlier",
        rollover.contest.id,
        if rollover.created { "created" } else { "already open" },
        rollover.closed
    );
    print_json(&rollover.contest)
}

pub fn run_weekly_contest(
    config: &AppConfig,
    contest_id: &str,
    name: &str,
    race_ids: &[String],
) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let contest = create_weekly_contest(&mut store.conn(), contest_id, name, race_ids)
        .with_context(|| format!("Failed to create weekly contest {}", contest_id))?;
    eprintln!("Weekly contest {} over {} races", contest.id, race_ids.len());
    print_json(&contest)
}

pub fn run_close_contest(config: &AppConfig, contest_id: &str) -> anyhow::Result<()> {
    let store = open_store(config)?;
    if !close_contest(&store.conn(), contest_id)? {
        bail!("Contest {} is not active", contest_id);
    }
    eprintln!("Closed contest {}", contest_id);
    Ok(())
}

pub fn run_reset_monthly(config: &AppConfig) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let reset = reset_monthly_points(&store.conn())?;
    eprintln!("Reset monthly points for {} profiles", reset);
    Ok(())
}

pub fn run_init_db(config: &AppConfig) -> anyhow::Result<()> {
    open_store(config)?;
    eprintln!("Database ready at {}", config.database.path);
    Ok(())
}
