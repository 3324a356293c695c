//! Weekly contests over a fixed, ordered card of races.
//!
//! A settled vote on a carded race adds its points, one vote and (on a hit)
//! one hit race to the owner's entry. Consecutive hits across the card earn a
//! streak bonus that is credited to the contest entry only; it never reaches
//! the points ledger or the profile, so a vote's ledger rows still sum to its
//! earned points.

use rusqlite::{params, Connection, OptionalExtension, Result};
use serde::Serialize;
use tracing::{debug, info};

use super::contest::{contest_from_row, Contest};
use super::events::{VoteSettled, VoteSettledHandler};
use crate::models::VoteStatus;

/// Votes needed before a weekly entry is eligible
pub const WEEKLY_MIN_VOTES: i64 = 3;

/// Bonus for a run of consecutive hits on the card
pub fn streak_bonus(consecutive_hits: u32) -> i64 {
    match consecutive_hits {
        2 => 20,
        3 => 50,
        4 => 100,
        5 => 200,
        _ => 0,
    }
}

/// Where a race sits on a weekly card
#[derive(Debug, Clone, PartialEq)]
pub struct CardSlot {
    pub contest_id: String,
    pub race_order: i64,
}

/// Contribution of one settled vote to a weekly entry
#[derive(Debug, Clone, PartialEq)]
pub struct WeeklyDelta {
    pub contest_id: String,
    pub user_id: String,
    pub points_delta: i64,
    pub streak_bonus: i64,
    pub hit: bool,
    pub voted_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeeklyEntry {
    pub contest_id: String,
    pub user_id: String,
    pub total_points: i64,
    pub vote_count: i64,
    pub hit_race_count: i64,
    pub streak_bonus: i64,
    pub earliest_vote_at: Option<String>,
    pub is_eligible: bool,
}

/// Create an active weekly contest whose card is `race_ids` in order
pub fn create_weekly_contest(
    conn: &mut Connection,
    contest_id: &str,
    name: &str,
    race_ids: &[String],
) -> Result<Contest> {
    let tx = conn.transaction()?;
    tx.execute(
        r#"
        INSERT INTO contests (id, name, kind, status, min_votes)
        VALUES (?1, ?2, 'weekly', 'active', ?3)
        "#,
        params![contest_id, name, WEEKLY_MIN_VOTES],
    )?;
    for (i, race_id) in race_ids.iter().enumerate() {
        tx.execute(
            "INSERT INTO contest_races (contest_id, race_id, race_order) VALUES (?1, ?2, ?3)",
            params![contest_id, race_id, i as i64 + 1],
        )?;
    }
    let contest = tx.query_row(
        "SELECT id, name, kind, year_month, status, min_votes FROM contests WHERE id = ?1",
        [contest_id],
        contest_from_row,
    )?;
    tx.commit()?;

    info!(contest_id, races = race_ids.len(), "Created weekly contest");
    Ok(contest)
}

/// Mark a contest closed. Returns false when it was not active.
pub fn close_contest(conn: &Connection, contest_id: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE contests SET status = 'closed' WHERE id = ?1 AND status = 'active'",
        [contest_id],
    )?;
    Ok(changed > 0)
}

/// Slot of the race on an active weekly card, if any
pub fn card_slot(conn: &Connection, race_id: &str) -> Result<Option<CardSlot>> {
    conn.query_row(
        r#"
        SELECT cr.contest_id, cr.race_order
        FROM contest_races cr
        JOIN contests c ON c.id = cr.contest_id
        WHERE cr.race_id = ?1 AND c.kind = 'weekly' AND c.status = 'active'
        "#,
        [race_id],
        |row| {
            Ok(CardSlot {
                contest_id: row.get(0)?,
                race_order: row.get(1)?,
            })
        },
    )
    .optional()
}

/// Hits immediately before `slot` on the card. The run stops at the first
/// earlier race the user missed, skipped or has not settled yet.
pub fn previous_hit_run(conn: &Connection, slot: &CardSlot, user_id: &str) -> Result<u32> {
    let mut stmt = conn.prepare(
        r#"
        SELECT v.status
        FROM contest_races cr
        LEFT JOIN votes v ON v.race_id = cr.race_id AND v.user_id = ?2
        WHERE cr.contest_id = ?1 AND cr.race_order < ?3
        ORDER BY cr.race_order DESC
        "#,
    )?;
    let statuses = stmt.query_map(params![slot.contest_id, user_id, slot.race_order], |row| {
        row.get::<_, Option<VoteStatus>>(0)
    })?;

    let mut run = 0;
    for status in statuses {
        if status? != Some(VoteStatus::SettledHit) {
            break;
        }
        run += 1;
    }
    Ok(run)
}

/// Upsert a weekly entry. The streak bonus counts toward `total_points`;
/// the earliest vote time is kept once set.
pub fn record_weekly(conn: &Connection, delta: &WeeklyDelta, min_votes: i64) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO contest_entries (
            contest_id, user_id, total_points, vote_count, hit_race_count,
            streak_bonus, earliest_vote_at, is_eligible
        )
        VALUES (?1, ?2, ?3 + ?4, 1, ?5, ?4, ?6, 1 >= ?7)
        ON CONFLICT(contest_id, user_id) DO UPDATE SET
            total_points = total_points + excluded.total_points,
            vote_count = vote_count + 1,
            hit_race_count = hit_race_count + excluded.hit_race_count,
            streak_bonus = streak_bonus + excluded.streak_bonus,
            earliest_vote_at = COALESCE(earliest_vote_at, excluded.earliest_vote_at),
            is_eligible = (vote_count + 1) >= ?7
        "#,
        params![
            delta.contest_id,
            delta.user_id,
            delta.points_delta,
            delta.streak_bonus,
            delta.hit,
            delta.voted_at,
            min_votes
        ],
    )?;
    Ok(())
}

pub fn get_weekly_entry(
    conn: &Connection,
    contest_id: &str,
    user_id: &str,
) -> Result<Option<WeeklyEntry>> {
    conn.query_row(
        r#"
        SELECT contest_id, user_id, total_points, vote_count, hit_race_count,
               streak_bonus, earliest_vote_at, is_eligible
        FROM contest_entries
        WHERE contest_id = ?1 AND user_id = ?2
        "#,
        params![contest_id, user_id],
        |row| {
            Ok(WeeklyEntry {
                contest_id: row.get(0)?,
                user_id: row.get(1)?,
                total_points: row.get(2)?,
                vote_count: row.get(3)?,
                hit_race_count: row.get(4)?,
                streak_bonus: row.get(5)?,
                earliest_vote_at: row.get(6)?,
                is_eligible: row.get(7)?,
            })
        },
    )
    .optional()
}

/// Adds settled votes on carded races to their weekly contest
pub struct WeeklyContestLedger;

impl VoteSettledHandler for WeeklyContestLedger {
    fn name(&self) -> &'static str {
        "weekly_contest_ledger"
    }

    fn handle(&self, conn: &Connection, event: &VoteSettled) -> anyhow::Result<()> {
        let Some(slot) = card_slot(conn, &event.race_id)? else {
            return Ok(());
        };

        let consecutive = if event.any_hit {
            1 + previous_hit_run(conn, &slot, &event.user_id)?
        } else {
            0
        };
        let bonus = streak_bonus(consecutive);

        let voted_at: Option<String> = conn
            .query_row(
                "SELECT created_at FROM votes WHERE id = ?1",
                [&event.vote_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        let delta = WeeklyDelta {
            contest_id: slot.contest_id,
            user_id: event.user_id.clone(),
            points_delta: event.earned_points,
            streak_bonus: bonus,
            hit: event.any_hit,
            voted_at,
        };
        record_weekly(conn, &delta, WEEKLY_MIN_VOTES)?;
        debug!(
            contest_id = %delta.contest_id,
            user_id = %delta.user_id,
            consecutive,
            bonus,
            "Recorded weekly contest vote"
        );
        Ok(())
    }
}
