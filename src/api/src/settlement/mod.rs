//! Settlement engine
//!
//! Settles every pending vote on a race exactly once. Each vote is its own
//! SQLite transaction: the status flip (guarded by `status = 'pending'`),
//! pick updates, ledger rows and profile counters commit together or not at
//! all. Contest (monthly and weekly), badge and rank effects run after commit as
//! [`VoteSettled`](events::VoteSettled) handlers.

pub mod badges;
pub mod contest;
pub mod events;
pub mod rank;
pub mod weekly;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::PointRules;
use crate::error::{SettleError, VoteError};
use crate::models::{Race, RaceStatus, Vote};
use crate::points::{score_vote, FinishOrder, VoteScore};
use crate::storage::repository::{get_race, get_race_entries, get_results, set_race_status};
use crate::storage::votes::{
    apply_profile_delta, ensure_profile, insert_points_transaction, mark_vote_settled,
    pending_votes, read_streak, update_pick, ProfileDelta,
};
use crate::storage::Store;

use self::badges::BadgeEvaluator;
use self::contest::ContestLedger;
use self::events::{dispatch, VoteSettled, VoteSettledHandler};
use self::rank::RankEvaluator;
use self::weekly::WeeklyContestLedger;

/// Outcome of settling one race
#[derive(Debug, Clone, Serialize)]
pub struct SettlementReport {
    pub race_id: String,
    /// True when every pending vote settled without error
    pub success: bool,
    pub settled_votes: usize,
    pub total_points_awarded: i64,
    pub errors: Vec<VoteError>,
}

pub struct SettlementEngine {
    store: Arc<Store>,
    rules: PointRules,
    handlers: Vec<Box<dyn VoteSettledHandler>>,
}

impl SettlementEngine {
    /// Engine with no post-commit handlers
    pub fn new(store: Arc<Store>, rules: PointRules) -> Self {
        Self {
            store,
            rules,
            handlers: Vec::new(),
        }
    }

    /// Engine wired to the contest ledger, rank ladder and badges. Rank runs
    /// before badges so rank badges see the promotion.
    pub fn with_default_handlers(store: Arc<Store>, rules: PointRules) -> Self {
        Self::new(store, rules)
            .with_handler(ContestLedger)
            .with_handler(WeeklyContestLedger)
            .with_handler(RankEvaluator)
            .with_handler(BadgeEvaluator)
    }

    pub fn with_handler(mut self, handler: impl VoteSettledHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn settle(&self, race_id: &str) -> Result<SettlementReport, SettleError> {
        self.settle_at(race_id, Utc::now())
    }

    /// Settle all pending votes on `race_id`, stamping them with `now`.
    ///
    /// Fails before any write when the race is unknown or has no usable
    /// results. Otherwise the race ends `finished` whatever happened to
    /// individual votes.
    pub fn settle_at(
        &self,
        race_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SettlementReport, SettleError> {
        let (race, order, votes) = {
            let conn = self.store.conn();
            let race = get_race(&conn, race_id)?
                .ok_or_else(|| SettleError::RaceNotFound(race_id.to_string()))?;

            let results = get_results(&conn, race_id)?;
            if results.is_empty() {
                return Err(SettleError::NoResults(race_id.to_string()));
            }
            let entries = get_race_entries(&conn, race_id)?;
            let order = FinishOrder::from_results(&results, &entries)
                .ok_or_else(|| SettleError::NoWinner(race_id.to_string()))?;

            (race, order, pending_votes(&conn, race_id)?)
        };

        info!(
            race_id = %race.id,
            grade = %race.grade,
            winner = %order.winner_entry_id,
            pending = votes.len(),
            "Settling race"
        );

        let mut report = SettlementReport {
            race_id: race.id.clone(),
            success: true,
            settled_votes: 0,
            total_points_awarded: 0,
            errors: Vec::new(),
        };

        for vote in &votes {
            let mut conn = self.store.conn();
            match settle_vote(&mut conn, &race, vote, &order, &self.rules, now) {
                Ok(Some(score)) => {
                    report.settled_votes += 1;
                    report.total_points_awarded += score.earned_points();
                    debug!(
                        vote_id = %vote.id,
                        user_id = %vote.user_id,
                        points = score.earned_points(),
                        status = %score.status(),
                        "Vote settled"
                    );

                    let event = VoteSettled {
                        vote_id: vote.id.clone(),
                        user_id: vote.user_id.clone(),
                        race_id: race.id.clone(),
                        earned_points: score.earned_points(),
                        win_hit: score.win_hit,
                        any_hit: score.any_hit,
                        is_perfect: score.is_perfect,
                        is_upset: score.is_upset,
                        is_g1_win: score.is_g1_win,
                        settled_at: now,
                    };
                    dispatch(&self.handlers, &conn, &event);
                }
                Ok(None) => {
                    debug!(vote_id = %vote.id, "Vote already settled, skipping");
                }
                Err(e) => {
                    warn!(vote_id = %vote.id, user_id = %vote.user_id, "Failed to settle vote: {}", e);
                    report.errors.push(VoteError {
                        vote_id: vote.id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        set_race_status(&self.store.conn(), &race.id, RaceStatus::Finished)?;

        report.success = report.errors.is_empty();
        info!(
            race_id = %race.id,
            settled = report.settled_votes,
            points = report.total_points_awarded,
            errors = report.errors.len(),
            "Race settled"
        );
        Ok(report)
    }
}

/// Score and persist one vote in a single transaction. Returns `None` when
/// the vote was no longer pending; nothing is written in that case.
fn settle_vote(
    conn: &mut Connection,
    race: &Race,
    vote: &Vote,
    order: &FinishOrder,
    rules: &PointRules,
    now: DateTime<Utc>,
) -> rusqlite::Result<Option<VoteScore>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    ensure_profile(&tx, &vote.user_id)?;
    let prior = read_streak(&tx, &vote.user_id)?;
    let score = score_vote(&vote.picks, order, race.grade, prior, rules);

    let changed = mark_vote_settled(
        &tx,
        &vote.id,
        score.status(),
        score.earned_points(),
        score.is_perfect,
        now,
    )?;
    if changed == 0 {
        // dropping the transaction rolls back the profile insert
        return Ok(None);
    }

    for pick in &score.picks {
        update_pick(&tx, pick.pick_id, pick.is_hit, pick.points)?;
    }
    for award in &score.awards {
        insert_points_transaction(&tx, &vote.user_id, &vote.id, &race.id, award, now)?;
    }
    apply_profile_delta(
        &tx,
        &vote.user_id,
        &ProfileDelta {
            points: score.earned_points(),
            win_hit: score.win_hit,
            place_hits: score.place_hits,
            danger_hit: score.danger_hit,
            streak: score.streak,
        },
    )?;

    tx.commit()?;
    Ok(Some(score))
}
