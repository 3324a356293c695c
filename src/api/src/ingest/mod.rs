//! Scheduled result acquisition
//!
//! Each cycle selects voting-open races whose post time puts them inside the
//! retry window, fetches their results, checks they are final, replaces the
//! stored results and payouts, and hands the race to settlement. Every race
//! gets its own outcome; nothing one race does stops the others.

pub mod source;
pub mod window;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{FetchError, SkipReason};
use crate::models::{Race, RaceEntry, RaceResult};
use crate::settlement::{SettlementEngine, SettlementReport};
use crate::storage::repository::{get_race_entries, races_awaiting_results, replace_results};

pub use self::source::{FetchOutcome, Finisher, ResultSource, ScrapedResult};
pub use self::window::RetryWindow;

/// Payout categories that must be present before a result counts as final
pub const REQUIRED_PAYOUTS: [&str; 2] = ["win", "place"];

#[derive(Debug, Clone, Serialize)]
pub struct RaceOutcome {
    pub race_id: String,
    pub name: String,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Settled {
        /// Scraped finishers dropped for lack of a matching entry or for
        /// repeating a post number
        unmatched: usize,
        settlement: SettlementReport,
    },
    Skipped {
        reason: SkipReason,
    },
    Error {
        error: String,
    },
}

/// Removes the race from the in-flight set when dropped
struct Claim<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    race_id: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let mut set = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        set.remove(&self.race_id);
    }
}

pub struct ResultIngestor<S> {
    source: S,
    engine: Arc<SettlementEngine>,
    window: RetryWindow,
    fetch_timeout: Duration,
    in_flight: Mutex<HashSet<String>>,
}

impl<S: ResultSource> ResultIngestor<S> {
    pub fn new(
        source: S,
        engine: Arc<SettlementEngine>,
        window: RetryWindow,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            source,
            engine,
            window,
            fetch_timeout,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Process every race currently inside the retry window.
    ///
    /// Only the candidate query can fail the cycle as a whole; per-race
    /// failures are reported in the returned outcomes.
    pub async fn run_ingestion_cycle(
        &self,
        now: DateTime<Utc>,
    ) -> rusqlite::Result<Vec<RaceOutcome>> {
        let candidates = {
            let conn = self.engine.store().conn();
            races_awaiting_results(&conn)?
        };

        let mut expired = 0;
        let mut due = Vec::new();
        for race in candidates {
            let Some(post_time) = race.post_time else {
                continue;
            };
            if self.window.contains(post_time, now) {
                due.push(race);
            } else if self.window.has_expired(post_time, now) {
                expired += 1;
            }
        }

        let mut outcomes = Vec::with_capacity(due.len());
        let (mut settled, mut skipped, mut errors) = (0, 0, 0);
        for race in due {
            let status = self.process_race(&race, now).await;
            match &status {
                OutcomeStatus::Settled { settlement, .. } => {
                    settled += 1;
                    info!(
                        race_id = %race.id,
                        settled_votes = settlement.settled_votes,
                        points = settlement.total_points_awarded,
                        "Race settled from fetched result"
                    );
                }
                OutcomeStatus::Skipped { reason } => {
                    skipped += 1;
                    info!(race_id = %race.id, "Race skipped: {}", reason);
                }
                OutcomeStatus::Error { error } => {
                    errors += 1;
                    warn!(race_id = %race.id, "Race failed: {}", error);
                }
            }
            outcomes.push(RaceOutcome {
                race_id: race.id,
                name: race.name,
                status,
            });
        }

        info!(settled, skipped, errors, expired, "Ingestion cycle complete");

        Ok(outcomes)
    }

    fn claim(&self, race_id: &str) -> Option<Claim<'_>> {
        let mut set = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !set.insert(race_id.to_string()) {
            return None;
        }
        Some(Claim {
            in_flight: &self.in_flight,
            race_id: race_id.to_string(),
        })
    }

    async fn process_race(&self, race: &Race, now: DateTime<Utc>) -> OutcomeStatus {
        let Some(_claim) = self.claim(&race.id) else {
            return OutcomeStatus::Skipped {
                reason: SkipReason::InFlight,
            };
        };
        let Some(external_id) = race.external_id.as_deref() else {
            return OutcomeStatus::Error {
                error: "race has no external id".to_string(),
            };
        };

        debug!(race_id = %race.id, external_id, "Fetching result");
        let fetched =
            match tokio::time::timeout(self.fetch_timeout, self.source.fetch_result(external_id))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(self.fetch_timeout)),
            };

        match fetched {
            Ok(FetchOutcome::Fetched(scraped)) => self.ingest(race, scraped, now),
            Ok(FetchOutcome::Incomplete) => OutcomeStatus::Skipped {
                reason: SkipReason::NotPublished,
            },
            Err(e) => OutcomeStatus::Error {
                error: e.to_string(),
            },
        }
    }

    /// Validate, persist and settle a fetched result
    fn ingest(&self, race: &Race, scraped: ScrapedResult, now: DateTime<Utc>) -> OutcomeStatus {
        if scraped.finishers.is_empty() {
            return OutcomeStatus::Skipped {
                reason: SkipReason::NotPublished,
            };
        }
        if !REQUIRED_PAYOUTS.iter().all(|b| scraped.has_category(b)) {
            return OutcomeStatus::Skipped {
                reason: SkipReason::IncompletePayouts {
                    found: scraped.payout_categories(),
                },
            };
        }

        let store = self.engine.store();
        let entries = match get_race_entries(&store.conn(), &race.id) {
            Ok(entries) => entries,
            Err(e) => {
                error!(race_id = %race.id, "Failed to load entries: {}", e);
                return OutcomeStatus::Error {
                    error: e.to_string(),
                };
            }
        };
        let by_post: HashMap<u32, &RaceEntry> =
            entries.iter().map(|e| (e.post_number, e)).collect();

        let mut results = Vec::with_capacity(scraped.finishers.len());
        let mut seen_posts = HashSet::new();
        let mut unmatched = 0;
        for finisher in &scraped.finishers {
            let Some(entry) = by_post.get(&finisher.post_number) else {
                unmatched += 1;
                continue;
            };
            // a repeated post number keeps its first row
            if !seen_posts.insert(finisher.post_number) {
                unmatched += 1;
                continue;
            }
            if finisher.popularity.is_some() && finisher.popularity != entry.popularity {
                debug!(
                    race_id = %race.id,
                    entry_id = %entry.id,
                    locked = ?entry.popularity,
                    confirmed = ?finisher.popularity,
                    confirmed_odds = ?finisher.odds,
                    "Confirmed popularity differs from lock time; scoring keeps lock time"
                );
            }
            results.push(RaceResult {
                race_entry_id: entry.id.clone(),
                finish_position: finisher.position,
                finish_time: finisher.finish_time.clone(),
            });
        }

        if unmatched > 0 {
            warn!(
                race_id = %race.id,
                unmatched,
                matched = results.len(),
                "Scraped finishers without a matching entry, or repeating a post number, were dropped"
            );
        }
        // without a matched winner settlement cannot run; leave the race alone
        if !results.iter().any(|r| r.finish_position == 1) {
            return OutcomeStatus::Skipped {
                reason: SkipReason::EntryMismatch,
            };
        }

        let persisted = {
            let mut conn = store.conn();
            replace_results(&mut conn, &race.id, &results, &scraped.payouts)
        };
        if let Err(e) = persisted {
            error!(race_id = %race.id, "Failed to store results: {}", e);
            return OutcomeStatus::Error {
                error: e.to_string(),
            };
        }

        match self.engine.settle_at(&race.id, now) {
            Ok(settlement) => OutcomeStatus::Settled {
                unmatched,
                settlement,
            },
            Err(e) => OutcomeStatus::Error {
                error: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PointRules;
    use crate::models::{Grade, Payout, PickType, RaceStatus, VoteStatus};
    use crate::storage::fixtures::{full_payouts, seed_race, seed_vote};
    use crate::storage::repository::{get_race, get_results};
    use crate::storage::votes::get_vote_summary;
    use crate::storage::Store;
    use chrono::TimeZone;

    enum Scripted {
        Outcome(FetchOutcome),
        Fail(&'static str),
        Hang,
    }

    struct ScriptedSource {
        responses: Mutex<HashMap<String, Scripted>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<(&str, Scripted)>) -> Self {
            Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .map(|(id, s)| (id.to_string(), s))
                        .collect(),
                ),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ResultSource for ScriptedSource {
        async fn fetch_result(&self, external_race_id: &str) -> Result<FetchOutcome, FetchError> {
            self.calls.lock().unwrap().push(external_race_id.to_string());
            let (result, hang) = {
                let responses = self.responses.lock().unwrap();
                match responses.get(external_race_id) {
                    Some(Scripted::Outcome(outcome)) => (Ok(outcome.clone()), false),
                    Some(Scripted::Fail(msg)) => (Err(FetchError::Transient(msg.to_string())), false),
                    Some(Scripted::Hang) => (Ok(FetchOutcome::Incomplete), true),
                    None => (Ok(FetchOutcome::Incomplete), false),
                }
            };
            if hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            result
        }
    }

    fn finisher(post: u32, position: u32) -> Finisher {
        Finisher {
            post_number: post,
            position,
            finish_time: None,
            popularity: None,
            odds: None,
        }
    }

    fn fetched(finish: &[u32], payouts: Vec<Payout>) -> Scripted {
        Scripted::Outcome(FetchOutcome::Fetched(ScrapedResult {
            finishers: finish
                .iter()
                .enumerate()
                .map(|(i, post)| finisher(*post, i as u32 + 1))
                .collect(),
            payouts,
        }))
    }

    /// 20 minutes after the fixture post time
    fn in_window() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 22, 6, 45, 0).unwrap()
    }

    fn setup(races: &[&str]) -> Arc<SettlementEngine> {
        let store = Arc::new(Store::in_memory().unwrap());
        {
            let conn = store.conn();
            for (i, race_id) in races.iter().enumerate() {
                seed_race(&conn, race_id, Grade::None, 8);
                seed_vote(&conn, &format!("v{}", i), "alice", race_id, &[(PickType::Win, 1)]);
            }
        }
        Arc::new(SettlementEngine::new(store, PointRules::default()))
    }

    fn ingestor(engine: Arc<SettlementEngine>, source: ScriptedSource) -> ResultIngestor<ScriptedSource> {
        ResultIngestor::new(source, engine, RetryWindow::default(), Duration::from_millis(200))
    }

    fn race_status(engine: &SettlementEngine, race_id: &str) -> RaceStatus {
        get_race(&engine.store().conn(), race_id).unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_complete_result_is_settled() {
        let engine = setup(&["r1"]);
        let source = ScriptedSource::new(vec![("ext-r1", fetched(&[1, 2, 3, 4], full_payouts()))]);
        let ingestor = ingestor(engine.clone(), source);

        let outcomes = ingestor.run_ingestion_cycle(in_window()).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0].status {
            OutcomeStatus::Settled { unmatched, settlement } => {
                assert_eq!(*unmatched, 0);
                assert_eq!(settlement.settled_votes, 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(race_status(&engine, "r1"), RaceStatus::Finished);
        assert_eq!(get_results(&engine.store().conn(), "r1").unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_missing_payouts_skips_without_writing() {
        let engine = setup(&["r1"]);
        let source = ScriptedSource::new(vec![("ext-r1", fetched(&[1, 2, 3], Vec::new()))]);
        let ingestor = ingestor(engine.clone(), source);

        let outcomes = ingestor.run_ingestion_cycle(in_window()).await.unwrap();
        assert!(matches!(
            &outcomes[0].status,
            OutcomeStatus::Skipped { reason: SkipReason::IncompletePayouts { found } } if found.is_empty()
        ));
        assert_eq!(race_status(&engine, "r1"), RaceStatus::VotingOpen);
        assert!(get_results(&engine.store().conn(), "r1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_place_payout_required() {
        let engine = setup(&["r1"]);
        let win_only = vec![full_payouts().remove(0)];
        let source = ScriptedSource::new(vec![("ext-r1", fetched(&[1, 2, 3], win_only))]);
        let ingestor = ingestor(engine.clone(), source);

        let outcomes = ingestor.run_ingestion_cycle(in_window()).await.unwrap();
        match &outcomes[0].status {
            OutcomeStatus::Skipped { reason } => {
                assert_eq!(reason.to_string(), "payouts not finalized (found: win)")
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(race_status(&engine, "r1"), RaceStatus::VotingOpen);
    }

    #[tokio::test]
    async fn test_unpublished_result_is_skipped() {
        let engine = setup(&["r1"]);
        let source = ScriptedSource::new(vec![("ext-r1", Scripted::Outcome(FetchOutcome::Incomplete))]);
        let ingestor = ingestor(engine.clone(), source);

        let outcomes = ingestor.run_ingestion_cycle(in_window()).await.unwrap();
        assert!(matches!(
            outcomes[0].status,
            OutcomeStatus::Skipped { reason: SkipReason::NotPublished }
        ));
    }

    #[tokio::test]
    async fn test_unmatched_finisher_does_not_block_settlement() {
        let engine = setup(&["r1"]);
        let source = ScriptedSource::new(vec![("ext-r1", fetched(&[1, 99, 2, 3], full_payouts()))]);
        let ingestor = ingestor(engine.clone(), source);

        let outcomes = ingestor.run_ingestion_cycle(in_window()).await.unwrap();
        match &outcomes[0].status {
            OutcomeStatus::Settled { unmatched, settlement } => {
                assert_eq!(*unmatched, 1);
                assert_eq!(settlement.settled_votes, 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(get_results(&engine.store().conn(), "r1").unwrap().len(), 3);
        assert_eq!(
            get_vote_summary(&engine.store().conn(), "v0")
                .unwrap()
                .unwrap()
                .status,
            VoteStatus::SettledHit
        );
    }

    #[tokio::test]
    async fn test_unmatched_winner_is_skipped() {
        let engine = setup(&["r1"]);
        let source = ScriptedSource::new(vec![("ext-r1", fetched(&[99, 1, 2], full_payouts()))]);
        let ingestor = ingestor(engine.clone(), source);

        let outcomes = ingestor.run_ingestion_cycle(in_window()).await.unwrap();
        assert!(matches!(
            outcomes[0].status,
            OutcomeStatus::Skipped { reason: SkipReason::EntryMismatch }
        ));
        assert!(get_results(&engine.store().conn(), "r1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_failing_race_does_not_stop_others() {
        let engine = setup(&["r1", "r2"]);
        let source = ScriptedSource::new(vec![
            ("ext-r1", Scripted::Fail("connection reset")),
            ("ext-r2", fetched(&[1, 2, 3], full_payouts())),
        ]);
        let ingestor = ingestor(engine.clone(), source);

        let outcomes = ingestor.run_ingestion_cycle(in_window()).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        let by_id: HashMap<_, _> = outcomes.iter().map(|o| (o.race_id.as_str(), &o.status)).collect();
        assert!(matches!(by_id["r1"], OutcomeStatus::Error { error } if error.contains("connection reset")));
        assert!(matches!(by_id["r2"], OutcomeStatus::Settled { .. }));
        assert_eq!(race_status(&engine, "r1"), RaceStatus::VotingOpen);
        assert_eq!(race_status(&engine, "r2"), RaceStatus::Finished);
    }

    #[tokio::test]
    async fn test_fetch_timeout_is_transient() {
        let engine = setup(&["r1"]);
        let source = ScriptedSource::new(vec![("ext-r1", Scripted::Hang)]);
        let ingestor = ingestor(engine.clone(), source);

        let outcomes = ingestor.run_ingestion_cycle(in_window()).await.unwrap();
        assert!(matches!(&outcomes[0].status, OutcomeStatus::Error { error } if error.contains("timed out")));
        assert_eq!(race_status(&engine, "r1"), RaceStatus::VotingOpen);
    }

    #[tokio::test]
    async fn test_only_races_inside_window_are_fetched() {
        let engine = setup(&["r1"]);
        let source = ScriptedSource::new(vec![("ext-r1", fetched(&[1, 2, 3], full_payouts()))]);
        let ingestor = ingestor(engine.clone(), source);
        let post = Utc.with_ymd_and_hms(2024, 12, 22, 6, 25, 0).unwrap();

        let early = ingestor
            .run_ingestion_cycle(post + chrono::Duration::minutes(10))
            .await
            .unwrap();
        let late = ingestor
            .run_ingestion_cycle(post + chrono::Duration::minutes(46))
            .await
            .unwrap();
        assert!(early.is_empty());
        assert!(late.is_empty());
        assert!(ingestor.source.calls().is_empty());
        assert_eq!(race_status(&engine, "r1"), RaceStatus::VotingOpen);
    }

    #[tokio::test]
    async fn test_claimed_race_is_skipped() {
        let engine = setup(&["r1"]);
        let source = ScriptedSource::new(vec![("ext-r1", fetched(&[1, 2, 3], full_payouts()))]);
        let ingestor = ingestor(engine.clone(), source);

        let claim = ingestor.claim("r1").unwrap();
        let outcomes = ingestor.run_ingestion_cycle(in_window()).await.unwrap();
        assert!(matches!(
            outcomes[0].status,
            OutcomeStatus::Skipped { reason: SkipReason::InFlight }
        ));
        assert!(ingestor.source.calls().is_empty());

        drop(claim);
        let outcomes = ingestor.run_ingestion_cycle(in_window()).await.unwrap();
        assert!(matches!(outcomes[0].status, OutcomeStatus::Settled { .. }));
    }

    #[tokio::test]
    async fn test_confirmed_popularity_keeps_lock_time_scoring() {
        let engine = setup(&["r1"]);
        let mut winner = finisher(1, 1);
        winner.popularity = Some(12);
        winner.odds = Some(41.3);
        let scripted = Scripted::Outcome(FetchOutcome::Fetched(ScrapedResult {
            finishers: vec![winner, finisher(2, 2), finisher(3, 3)],
            payouts: full_payouts(),
        }));
        let ingestor = ingestor(engine.clone(), ScriptedSource::new(vec![("ext-r1", scripted)]));

        ingestor.run_ingestion_cycle(in_window()).await.unwrap();

        let conn = engine.store().conn();
        let entries = get_race_entries(&conn, "r1").unwrap();
        assert_eq!(entries[0].popularity, Some(1));
        assert_eq!(entries[0].odds, Some(1.5));
        // win points for the locked popularity 1
        let vote = get_vote_summary(&conn, "v0").unwrap().unwrap();
        assert_eq!(vote.earned_points, 30);
    }

    #[tokio::test]
    async fn test_repeated_post_number_keeps_first_row() {
        let engine = setup(&["r1"]);
        let scripted = Scripted::Outcome(FetchOutcome::Fetched(ScrapedResult {
            finishers: vec![finisher(1, 1), finisher(2, 2), finisher(2, 3), finisher(3, 4)],
            payouts: full_payouts(),
        }));
        let ingestor = ingestor(engine.clone(), ScriptedSource::new(vec![("ext-r1", scripted)]));

        let outcomes = ingestor.run_ingestion_cycle(in_window()).await.unwrap();
        match &outcomes[0].status {
            OutcomeStatus::Settled { unmatched, settlement } => {
                assert_eq!(*unmatched, 1);
                assert_eq!(settlement.settled_votes, 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let results = get_results(&engine.store().conn(), "r1").unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[1].race_entry_id, "r1-02");
        assert_eq!(results[1].finish_position, 2);
        assert_eq!(race_status(&engine, "r1"), RaceStatus::Finished);
    }

    #[test]
    fn test_outcome_serializes_flat() {
        let outcome = RaceOutcome {
            race_id: "r1".to_string(),
            name: "Test".to_string(),
            status: OutcomeStatus::Skipped {
                reason: SkipReason::NotPublished,
            },
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "results not yet published");
        assert_eq!(json["race_id"], "r1");
    }
}
