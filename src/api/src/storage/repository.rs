//! Race, entry, result and payout queries

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Result, Row};

use super::{format_ts, parse_ts};
use crate::models::{Payout, Race, RaceEntry, RaceResult, RaceStatus};

const RACE_COLUMNS: &str = "id, name, external_id, grade, race_date, post_time, status";

fn race_from_row(row: &Row<'_>) -> Result<Race> {
    let race_date: Option<String> = row.get(4)?;
    let post_time: Option<String> = row.get(5)?;
    Ok(Race {
        id: row.get(0)?,
        name: row.get(1)?,
        external_id: row.get(2)?,
        grade: row.get(3)?,
        race_date: race_date.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
        post_time: post_time.as_deref().and_then(parse_ts),
        status: row.get(6)?,
    })
}

// ==================== Races ====================

/// Insert a race (upsert)
pub fn insert_race(conn: &Connection, race: &Race) -> Result<()> {
    conn.execute(
        r#"
        INSERT OR REPLACE INTO races
        (id, name, external_id, grade, race_date, post_time, status)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            race.id,
            race.name,
            race.external_id,
            race.grade,
            race.race_date.map(|d| d.to_string()),
            race.post_time.map(format_ts),
            race.status,
        ],
    )?;
    Ok(())
}

pub fn get_race(conn: &Connection, race_id: &str) -> Result<Option<Race>> {
    conn.query_row(
        &format!("SELECT {} FROM races WHERE id = ?1", RACE_COLUMNS),
        [race_id],
        race_from_row,
    )
    .optional()
}

/// Races the scheduled fetch may act on: voting open, with a netkeiba id
/// and a post time. The retry window is applied by the caller.
pub fn races_awaiting_results(conn: &Connection) -> Result<Vec<Race>> {
    let mut stmt = conn.prepare(&format!(
        r#"
        SELECT {} FROM races
        WHERE status = ?1 AND external_id IS NOT NULL AND post_time IS NOT NULL
        ORDER BY post_time
        "#,
        RACE_COLUMNS
    ))?;
    let races = stmt
        .query_map([RaceStatus::VotingOpen], race_from_row)?
        .collect::<Result<Vec<_>>>()?;
    Ok(races)
}

/// Voting-open races, optionally narrowed to one id or one race date
pub fn voting_open_races(
    conn: &Connection,
    race_id: Option<&str>,
    race_date: Option<NaiveDate>,
    limit: usize,
) -> Result<Vec<Race>> {
    let mut stmt = conn.prepare(&format!(
        r#"
        SELECT {} FROM races
        WHERE status = ?1
          AND (?2 IS NULL OR id = ?2)
          AND (?3 IS NULL OR race_date = ?3)
        ORDER BY post_time, id
        LIMIT ?4
        "#,
        RACE_COLUMNS
    ))?;
    let races = stmt
        .query_map(
            params![
                RaceStatus::VotingOpen,
                race_id,
                race_date.map(|d| d.to_string()),
                limit as i64
            ],
            race_from_row,
        )?
        .collect::<Result<Vec<_>>>()?;
    Ok(races)
}

pub fn set_race_status(conn: &Connection, race_id: &str, status: RaceStatus) -> Result<()> {
    conn.execute(
        "UPDATE races SET status = ?1 WHERE id = ?2",
        params![status, race_id],
    )?;
    Ok(())
}

// ==================== Entries ====================

/// Insert a race entry (upsert)
pub fn insert_entry(conn: &Connection, entry: &RaceEntry) -> Result<()> {
    conn.execute(
        r#"
        INSERT OR REPLACE INTO race_entries
        (id, race_id, post_number, horse_name, odds, popularity)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            entry.id,
            entry.race_id,
            entry.post_number,
            entry.horse_name,
            entry.odds,
            entry.popularity,
        ],
    )?;
    Ok(())
}

/// Get entries for a race
pub fn get_race_entries(conn: &Connection, race_id: &str) -> Result<Vec<RaceEntry>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, race_id, post_number, horse_name, odds, popularity
        FROM race_entries
        WHERE race_id = ?1
        ORDER BY post_number
        "#,
    )?;

    let entries = stmt
        .query_map([race_id], |row| {
            Ok(RaceEntry {
                id: row.get(0)?,
                race_id: row.get(1)?,
                post_number: row.get(2)?,
                horse_name: row.get(3)?,
                odds: row.get(4)?,
                popularity: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;

    Ok(entries)
}

// ==================== Results & payouts ====================

/// Results for a race in finishing order
pub fn get_results(conn: &Connection, race_id: &str) -> Result<Vec<RaceResult>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT race_entry_id, finish_position, finish_time
        FROM race_results
        WHERE race_id = ?1
        ORDER BY finish_position, id
        "#,
    )?;

    let results = stmt
        .query_map([race_id], |row| {
            Ok(RaceResult {
                race_entry_id: row.get(0)?,
                finish_position: row.get(1)?,
                finish_time: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;

    Ok(results)
}

pub fn get_payouts(conn: &Connection, race_id: &str) -> Result<Vec<Payout>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT bet_type, combination, payout_amount, popularity
        FROM payouts
        WHERE race_id = ?1
        ORDER BY id
        "#,
    )?;

    let payouts = stmt
        .query_map([race_id], |row| {
            Ok(Payout {
                bet_type: row.get(0)?,
                combination: row.get(1)?,
                payout_amount: row.get(2)?,
                popularity: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;

    Ok(payouts)
}

/// Clear and replace a race's results and payouts in one transaction.
/// Entries keep their lock-time popularity and odds.
pub fn replace_results(
    conn: &mut Connection,
    race_id: &str,
    results: &[RaceResult],
    payouts: &[Payout],
) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute("DELETE FROM race_results WHERE race_id = ?1", [race_id])?;
    tx.execute("DELETE FROM payouts WHERE race_id = ?1", [race_id])?;

    {
        let mut insert_result = tx.prepare(
            r#"
            INSERT INTO race_results (race_id, race_entry_id, finish_position, finish_time)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )?;
        for r in results {
            insert_result.execute(params![
                race_id,
                r.race_entry_id,
                r.finish_position,
                r.finish_time
            ])?;
        }

        let mut insert_payout = tx.prepare(
            r#"
            INSERT INTO payouts (race_id, bet_type, combination, payout_amount, popularity)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )?;
        for p in payouts {
            insert_payout.execute(params![
                race_id,
                p.bet_type,
                p.combination,
                p.payout_amount,
                p.popularity
            ])?;
        }
    }

    tx.commit()
}
