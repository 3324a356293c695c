//! Monthly contest ledger.
//!
//! Monthly contests are keyed by the JST calendar month. Each settled vote
//! adds its points and one vote to the owner's entry in the month's active
//! contest. Weekly contests live in `weekly.rs`.

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result};
use serde::Serialize;
use tracing::{debug, info};

use super::events::{VoteSettled, VoteSettledHandler};

const JST_OFFSET_HOURS: i64 = 9;

/// Contribution of one settled vote to a contest entry
#[derive(Debug, Clone, PartialEq)]
pub struct ContestDelta {
    pub contest_id: String,
    pub user_id: String,
    pub points_delta: i64,
    pub vote_increment: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Contest {
    pub id: String,
    pub name: String,
    pub kind: String,
    /// Only monthly contests carry a month key
    pub year_month: Option<String>,
    pub status: String,
    pub min_votes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContestEntry {
    pub contest_id: String,
    pub user_id: String,
    pub total_points: i64,
    pub vote_count: i64,
    pub is_eligible: bool,
}

/// Result of the monthly rollover
#[derive(Debug, Clone, Serialize)]
pub struct MonthlyRollover {
    pub contest: Contest,
    pub created: bool,
    pub closed: usize,
}

/// Wall-clock time in Japan (no DST)
fn jst(ts: DateTime<Utc>) -> NaiveDateTime {
    ts.naive_utc() + Duration::hours(JST_OFFSET_HOURS)
}

/// `YYYY-MM` of the instant in Japan time
pub fn year_month_jst(ts: DateTime<Utc>) -> String {
    jst(ts).format("%Y-%m").to_string()
}

pub(crate) fn contest_from_row(row: &rusqlite::Row<'_>) -> Result<Contest> {
    Ok(Contest {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: row.get(2)?,
        year_month: row.get(3)?,
        status: row.get(4)?,
        min_votes: row.get(5)?,
    })
}

pub fn active_contest(conn: &Connection, year_month: &str) -> Result<Option<Contest>> {
    conn.query_row(
        r#"
        SELECT id, name, kind, year_month, status, min_votes
        FROM contests
        WHERE kind = 'monthly' AND year_month = ?1 AND status = 'active'
        "#,
        [year_month],
        contest_from_row,
    )
    .optional()
}

/// Upsert a contest entry. A new entry starts from the delta; eligibility
/// follows `vote_count >= min_votes` after the increment.
pub fn record(conn: &Connection, delta: &ContestDelta, min_votes: i64) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO contest_entries (contest_id, user_id, total_points, vote_count, is_eligible)
        VALUES (?1, ?2, ?3, ?4, ?4 >= ?5)
        ON CONFLICT(contest_id, user_id) DO UPDATE SET
            total_points = total_points + excluded.total_points,
            vote_count = vote_count + excluded.vote_count,
            is_eligible = (vote_count + excluded.vote_count) >= ?5
        "#,
        params![
            delta.contest_id,
            delta.user_id,
            delta.points_delta,
            delta.vote_increment,
            min_votes
        ],
    )?;
    Ok(())
}

pub fn get_entry(conn: &Connection, contest_id: &str, user_id: &str) -> Result<Option<ContestEntry>> {
    conn.query_row(
        r#"
        SELECT contest_id, user_id, total_points, vote_count, is_eligible
        FROM contest_entries
        WHERE contest_id = ?1 AND user_id = ?2
        "#,
        params![contest_id, user_id],
        |row| {
            Ok(ContestEntry {
                contest_id: row.get(0)?,
                user_id: row.get(1)?,
                total_points: row.get(2)?,
                vote_count: row.get(3)?,
                is_eligible: row.get(4)?,
            })
        },
    )
    .optional()
}

/// Create the contest for the current JST month if missing and close any
/// earlier month still marked active.
pub fn open_monthly_contest(
    conn: &Connection,
    now: DateTime<Utc>,
    min_votes: i64,
) -> Result<MonthlyRollover> {
    let local = jst(now);
    let year_month = local.format("%Y-%m").to_string();
    let id = format!("contest-{}", year_month);
    let name = format!("{}/{:02} monthly contest", local.year(), local.month());

    let created = conn.execute(
        r#"
        INSERT OR IGNORE INTO contests (id, name, kind, year_month, status, min_votes)
        VALUES (?1, ?2, 'monthly', ?3, 'active', ?4)
        "#,
        params![id, name, year_month, min_votes],
    )? > 0;

    let closed = conn.execute(
        r#"
        UPDATE contests SET status = 'closed'
        WHERE kind = 'monthly' AND status = 'active' AND year_month < ?1
        "#,
        [&year_month],
    )?;

    let contest = conn.query_row(
        "SELECT id, name, kind, year_month, status, min_votes FROM contests WHERE year_month = ?1",
        [&year_month],
        contest_from_row,
    )?;

    if created {
        info!(contest_id = %contest.id, closed, "Opened monthly contest");
    }

    Ok(MonthlyRollover {
        contest,
        created,
        closed,
    })
}

/// Adds settled votes to the active monthly contest
pub struct ContestLedger;

impl VoteSettledHandler for ContestLedger {
    fn name(&self) -> &'static str {
        "contest_ledger"
    }

    fn handle(&self, conn: &Connection, event: &VoteSettled) -> anyhow::Result<()> {
        let year_month = year_month_jst(event.settled_at);
        let Some(contest) = active_contest(conn, &year_month)? else {
            debug!(year_month = %year_month, "No active contest, skipping ledger");
            return Ok(());
        };

        let delta = ContestDelta {
            contest_id: contest.id,
            user_id: event.user_id.clone(),
            points_delta: event.earned_points,
            vote_increment: 1,
        };
        record(conn, &delta, contest.min_votes)?;
        Ok(())
    }
}
