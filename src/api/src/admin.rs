//! Manual result entry and batch re-settlement.
//!
//! Admin-entered results go through the same clear-and-replace persistence as
//! scraped ones, so a race can be settled after its retry window has closed.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, warn};

use crate::error::AdminError;
use crate::models::{Payout, RaceResult};
use crate::settlement::{SettlementEngine, SettlementReport};
use crate::storage::repository::{get_race, get_race_entries, replace_results, voting_open_races};
use crate::storage::Store;

/// Upper bound on races settled by one resettle call
pub const RESETTLE_BATCH: usize = 50;

/// Validate and store results for a race, replacing any earlier ones
pub fn record_results(
    store: &Store,
    race_id: &str,
    results: &[RaceResult],
    payouts: &[Payout],
) -> Result<(), AdminError> {
    let mut conn = store.conn();

    if get_race(&conn, race_id)?.is_none() {
        return Err(AdminError::RaceNotFound(race_id.to_string()));
    }
    let entries: HashSet<String> = get_race_entries(&conn, race_id)?
        .into_iter()
        .map(|e| e.id)
        .collect();
    validate_results(results, &entries)?;

    replace_results(&mut conn, race_id, results, payouts)?;
    info!(
        race_id,
        results = results.len(),
        payouts = payouts.len(),
        "Recorded manual results"
    );
    Ok(())
}

fn validate_results(results: &[RaceResult], entries: &HashSet<String>) -> Result<(), AdminError> {
    if results.is_empty() {
        return Err(AdminError::EmptyResults);
    }

    let mut seen_entries = HashSet::new();
    let mut seen_positions = HashSet::new();
    for result in results {
        if !entries.contains(&result.race_entry_id) {
            return Err(AdminError::UnknownEntry(result.race_entry_id.clone()));
        }
        if !seen_entries.insert(result.race_entry_id.as_str()) {
            return Err(AdminError::DuplicateEntry(result.race_entry_id.clone()));
        }
        if result.finish_position < 1 {
            return Err(AdminError::InvalidPosition(result.race_entry_id.clone()));
        }
        if !seen_positions.insert(result.finish_position) {
            return Err(AdminError::DuplicatePosition(result.finish_position));
        }
    }

    if !seen_positions.contains(&1) {
        return Err(AdminError::MissingWinner);
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct ResettleOutcome {
    pub race_id: String,
    #[serde(flatten)]
    pub status: ResettleStatus,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResettleStatus {
    Settled { settlement: SettlementReport },
    Failed { error: String },
}

/// Settle voting-open races selected by id or race date. Races without
/// recorded results come back as failures; the batch carries on.
pub fn resettle(
    engine: &SettlementEngine,
    race_id: Option<&str>,
    race_date: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> rusqlite::Result<Vec<ResettleOutcome>> {
    let races = {
        let conn = engine.store().conn();
        voting_open_races(&conn, race_id, race_date, RESETTLE_BATCH)?
    };

    let outcomes: Vec<ResettleOutcome> = races
        .into_iter()
        .map(|race| {
            let status = match engine.settle_at(&race.id, now) {
                Ok(settlement) => ResettleStatus::Settled { settlement },
                Err(e) => {
                    warn!(race_id = %race.id, "Resettle failed: {}", e);
                    ResettleStatus::Failed {
                        error: e.to_string(),
                    }
                }
            };
            ResettleOutcome {
                race_id: race.id,
                status,
            }
        })
        .collect();

    info!(races = outcomes.len(), "Resettle finished");
    Ok(outcomes)
}
