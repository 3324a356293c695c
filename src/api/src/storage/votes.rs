//! Vote, pick, ledger and profile writes used by settlement

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result};
use serde::Serialize;

use super::{format_ts, parse_ts};
use crate::models::{Profile, Vote, VotePick, VoteStatus};
use crate::points::{Award, Streak};

/// Settled view of a vote row
#[derive(Debug, Clone, Serialize)]
pub struct VoteSummary {
    pub id: String,
    pub user_id: String,
    pub race_id: String,
    pub status: VoteStatus,
    pub earned_points: i64,
    pub is_perfect: bool,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Increments applied to a profile for one settled vote
#[derive(Debug, Clone, Copy)]
pub struct ProfileDelta {
    pub points: i64,
    pub win_hit: bool,
    pub place_hits: i64,
    pub danger_hit: bool,
    pub streak: Streak,
}

/// Pending votes for a race, with their picks in submission order
pub fn pending_votes(conn: &Connection, race_id: &str) -> Result<Vec<Vote>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, user_id, race_id, status
        FROM votes
        WHERE race_id = ?1 AND status = ?2
        ORDER BY created_at, id
        "#,
    )?;
    let mut votes = stmt
        .query_map(params![race_id, VoteStatus::Pending], |row| {
            Ok(Vote {
                id: row.get(0)?,
                user_id: row.get(1)?,
                race_id: row.get(2)?,
                status: row.get(3)?,
                picks: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>>>()?;

    let mut picks_stmt = conn.prepare(
        r#"
        SELECT id, race_entry_id, pick_type
        FROM vote_picks
        WHERE vote_id = ?1
        ORDER BY id
        "#,
    )?;
    for vote in &mut votes {
        vote.picks = picks_stmt
            .query_map([&vote.id], |row| {
                Ok(VotePick {
                    id: row.get(0)?,
                    race_entry_id: row.get(1)?,
                    pick_type: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
    }

    Ok(votes)
}

pub fn get_vote_summary(conn: &Connection, vote_id: &str) -> Result<Option<VoteSummary>> {
    conn.query_row(
        r#"
        SELECT id, user_id, race_id, status, earned_points, is_perfect, settled_at
        FROM votes WHERE id = ?1
        "#,
        [vote_id],
        |row| {
            let settled_at: Option<String> = row.get(6)?;
            Ok(VoteSummary {
                id: row.get(0)?,
                user_id: row.get(1)?,
                race_id: row.get(2)?,
                status: row.get(3)?,
                earned_points: row.get(4)?,
                is_perfect: row.get(5)?,
                settled_at: settled_at.as_deref().and_then(parse_ts),
            })
        },
    )
    .optional()
}

/// Create the profile row on first settlement
pub fn ensure_profile(conn: &Connection, user_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO profiles (user_id) VALUES (?1)",
        [user_id],
    )?;
    Ok(())
}

pub fn read_streak(conn: &Connection, user_id: &str) -> Result<Streak> {
    let streak = conn
        .query_row(
            "SELECT current_streak, best_streak FROM profiles WHERE user_id = ?1",
            [user_id],
            |row| {
                Ok(Streak {
                    current: row.get(0)?,
                    best: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(streak.unwrap_or_default())
}

/// Flip a vote out of `pending`. Returns the number of rows changed: zero
/// means another run already settled it.
pub fn mark_vote_settled(
    conn: &Connection,
    vote_id: &str,
    status: VoteStatus,
    earned_points: i64,
    is_perfect: bool,
    settled_at: DateTime<Utc>,
) -> Result<usize> {
    conn.execute(
        r#"
        UPDATE votes
        SET status = ?2, earned_points = ?3, is_perfect = ?4, settled_at = ?5
        WHERE id = ?1 AND status = ?6
        "#,
        params![
            vote_id,
            status,
            earned_points,
            is_perfect,
            format_ts(settled_at),
            VoteStatus::Pending
        ],
    )
}

pub fn update_pick(conn: &Connection, pick_id: i64, is_hit: bool, points: i64) -> Result<()> {
    conn.execute(
        "UPDATE vote_picks SET is_hit = ?2, points_earned = ?3 WHERE id = ?1",
        params![pick_id, is_hit, points],
    )?;
    Ok(())
}

/// Append one ledger row
pub fn insert_points_transaction(
    conn: &Connection,
    user_id: &str,
    vote_id: &str,
    race_id: &str,
    award: &Award,
    created_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO points_transactions
        (user_id, vote_id, race_id, amount, reason, description, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            user_id,
            vote_id,
            race_id,
            award.amount,
            award.reason.as_str(),
            award.description,
            format_ts(created_at),
        ],
    )?;
    Ok(())
}

pub fn apply_profile_delta(conn: &Connection, user_id: &str, delta: &ProfileDelta) -> Result<()> {
    conn.execute(
        r#"
        UPDATE profiles SET
            cumulative_points = cumulative_points + ?2,
            monthly_points = monthly_points + ?2,
            total_votes = total_votes + 1,
            win_hits = win_hits + ?3,
            place_hits = place_hits + ?4,
            danger_hits = danger_hits + ?5,
            current_streak = ?6,
            best_streak = MAX(best_streak, ?7)
        WHERE user_id = ?1
        "#,
        params![
            user_id,
            delta.points,
            i64::from(delta.win_hit),
            delta.place_hits,
            i64::from(delta.danger_hit),
            delta.streak.current,
            delta.streak.best,
        ],
    )?;
    Ok(())
}

pub fn get_profile(conn: &Connection, user_id: &str) -> Result<Option<Profile>> {
    conn.query_row(
        r#"
        SELECT user_id, cumulative_points, monthly_points, total_votes, win_hits,
               place_hits, danger_hits, current_streak, best_streak, rank_id
        FROM profiles WHERE user_id = ?1
        "#,
        [user_id],
        |row| {
            Ok(Profile {
                user_id: row.get(0)?,
                cumulative_points: row.get(1)?,
                monthly_points: row.get(2)?,
                total_votes: row.get(3)?,
                win_hits: row.get(4)?,
                place_hits: row.get(5)?,
                danger_hits: row.get(6)?,
                current_streak: row.get(7)?,
                best_streak: row.get(8)?,
                rank_id: row.get(9)?,
            })
        },
    )
    .optional()
}

/// Sum of ledger rows for a vote
pub fn points_total_for_vote(conn: &Connection, vote_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM points_transactions WHERE vote_id = ?1",
        [vote_id],
        |row| row.get(0),
    )
}

/// Number of a user's settled votes that earned the perfect bonus
pub fn count_perfect_votes(conn: &Connection, user_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM votes WHERE user_id = ?1 AND is_perfect = 1",
        [user_id],
        |row| row.get(0),
    )
}

/// Zero every profile's monthly points. Returns rows touched.
pub fn reset_monthly_points(conn: &Connection) -> Result<usize> {
    conn.execute(
        "UPDATE profiles SET monthly_points = 0 WHERE monthly_points <> 0",
        [],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Grade, PickType};
    use crate::points::AwardReason;
    use crate::storage::{fixtures, Store};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 22, 6, 45, 0).unwrap()
    }

    #[test]
    fn test_pending_votes_loads_picks() {
        let store = Store::in_memory().unwrap();
        let conn = store.conn();
        fixtures::seed_race(&conn, "r1", Grade::None, 8);
        fixtures::seed_vote(
            &conn,
            "v1",
            "alice",
            "r1",
            &[(PickType::Win, 3), (PickType::Place, 1), (PickType::Danger, 8)],
        );
        fixtures::seed_vote(&conn, "v2", "bob", "r1", &[(PickType::Win, 1)]);

        let votes = pending_votes(&conn, "r1").unwrap();
        assert_eq!(votes.len(), 2);
        let alice = votes.iter().find(|v| v.id == "v1").unwrap();
        assert_eq!(alice.picks.len(), 3);
        assert_eq!(alice.picks[0].pick_type, PickType::Win);
        assert_eq!(alice.picks[0].race_entry_id, "r1-03");
        assert_eq!(alice.picks[2].pick_type, PickType::Danger);
    }

    #[test]
    fn test_mark_vote_settled_only_once() {
        let store = Store::in_memory().unwrap();
        let conn = store.conn();
        fixtures::seed_race(&conn, "r1", Grade::None, 3);
        fixtures::seed_vote(&conn, "v1", "alice", "r1", &[(PickType::Win, 1)]);

        let first = mark_vote_settled(&conn, "v1", VoteStatus::SettledHit, 30, false, now()).unwrap();
        let second =
            mark_vote_settled(&conn, "v1", VoteStatus::SettledMiss, 0, false, now()).unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 0);

        let summary = get_vote_summary(&conn, "v1").unwrap().unwrap();
        assert_eq!(summary.status, VoteStatus::SettledHit);
        assert_eq!(summary.earned_points, 30);
        assert_eq!(summary.settled_at, Some(now()));
        assert!(pending_votes(&conn, "r1").unwrap().is_empty());
    }

    #[test]
    fn test_profile_delta_accumulates() {
        let store = Store::in_memory().unwrap();
        let conn = store.conn();
        ensure_profile(&conn, "alice").unwrap();
        ensure_profile(&conn, "alice").unwrap();
        assert_eq!(read_streak(&conn, "alice").unwrap(), Streak::default());

        let hit = ProfileDelta {
            points: 80,
            win_hit: true,
            place_hits: 2,
            danger_hit: false,
            streak: Streak { current: 1, best: 1 },
        };
        apply_profile_delta(&conn, "alice", &hit).unwrap();
        let miss = ProfileDelta {
            points: 0,
            win_hit: false,
            place_hits: 0,
            danger_hit: true,
            streak: Streak { current: 0, best: 1 },
        };
        apply_profile_delta(&conn, "alice", &miss).unwrap();

        let profile = get_profile(&conn, "alice").unwrap().unwrap();
        assert_eq!(profile.cumulative_points, 80);
        assert_eq!(profile.monthly_points, 80);
        assert_eq!(profile.total_votes, 2);
        assert_eq!(profile.win_hits, 1);
        assert_eq!(profile.place_hits, 2);
        assert_eq!(profile.danger_hits, 1);
        assert_eq!(profile.current_streak, 0);
        assert_eq!(profile.best_streak, 1);
        assert_eq!(profile.rank_id, "beginner_1");

        assert_eq!(reset_monthly_points(&conn).unwrap(), 1);
        let profile = get_profile(&conn, "alice").unwrap().unwrap();
        assert_eq!(profile.monthly_points, 0);
        assert_eq!(profile.cumulative_points, 80);
    }

    #[test]
    fn test_ledger_total() {
        let store = Store::in_memory().unwrap();
        let conn = store.conn();
        fixtures::seed_race(&conn, "r1", Grade::G1, 3);
        fixtures::seed_vote(&conn, "v1", "alice", "r1", &[(PickType::Win, 1)]);

        for (reason, amount) in [(AwardReason::WinHit, 30), (AwardReason::G1Bonus, 30)] {
            let award = Award {
                reason,
                amount,
                description: String::new(),
            };
            insert_points_transaction(&conn, "alice", "v1", "r1", &award, now()).unwrap();
        }
        assert_eq!(points_total_for_vote(&conn, "v1").unwrap(), 60);
        assert_eq!(points_total_for_vote(&conn, "v2").unwrap(), 0);
    }
}
