//! Rank ladder driven by cumulative points. Promotion only.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use super::events::{VoteSettled, VoteSettledHandler};

/// (rank id, cumulative points threshold), ascending
pub const RANKS: &[(&str, i64)] = &[
    ("beginner_1", 0),
    ("beginner_2", 30),
    ("beginner_3", 80),
    ("beginner_4", 200),
    ("beginner_5", 400),
    ("forecaster_1", 700),
    ("forecaster_2", 1100),
    ("forecaster_3", 1600),
    ("forecaster_4", 2200),
    ("forecaster_5", 3000),
    ("advanced_1", 4000),
    ("advanced_2", 5500),
    ("advanced_3", 7500),
    ("advanced_4", 10000),
    ("advanced_5", 13000),
    ("master_1", 16500),
    ("master_2", 20500),
    ("master_3", 25000),
    ("master_4", 30000),
    ("master_5", 36000),
    ("legend", 45000),
];

/// Position of a rank id on the ladder; unknown ids sit at the bottom.
pub fn rank_index(rank_id: &str) -> usize {
    RANKS.iter().position(|(id, _)| *id == rank_id).unwrap_or(0)
}

/// Highest rank reachable with the given points
pub fn rank_for_points(points: i64) -> &'static str {
    RANKS
        .iter()
        .rev()
        .find(|(_, threshold)| points >= *threshold)
        .map(|(id, _)| *id)
        .unwrap_or(RANKS[0].0)
}

/// Promote the user if their points reach a higher rank. Returns the new
/// rank id when it changed.
pub fn check_rank_up(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<&'static str>> {
    let profile: Option<(String, i64)> = conn
        .query_row(
            "SELECT rank_id, cumulative_points FROM profiles WHERE user_id = ?1",
            [user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((current, points)) = profile else {
        return Ok(None);
    };

    let reached = rank_for_points(points);
    if rank_index(reached) <= rank_index(&current) {
        return Ok(None);
    }

    conn.execute(
        "UPDATE profiles SET rank_id = ?2 WHERE user_id = ?1",
        params![user_id, reached],
    )?;
    info!(user_id = %user_id, from = %current, to = reached, "Rank up");
    Ok(Some(reached))
}

pub struct RankEvaluator;

impl VoteSettledHandler for RankEvaluator {
    fn name(&self) -> &'static str {
        "rank"
    }

    fn handle(&self, conn: &Connection, event: &VoteSettled) -> anyhow::Result<()> {
        check_rank_up(conn, &event.user_id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::create_tables;

    fn conn_with_profile(rank: &str, points: i64) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn.execute(
            "INSERT INTO profiles (user_id, rank_id, cumulative_points) VALUES ('alice', ?1, ?2)",
            params![rank, points],
        )
        .unwrap();
        conn
    }

    fn rank_of(conn: &Connection) -> String {
        conn.query_row("SELECT rank_id FROM profiles WHERE user_id = 'alice'", [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    #[test]
    fn test_ladder_is_ascending() {
        for pair in RANKS.windows(2) {
            assert!(pair[0].1 < pair[1].1, "{} >= {}", pair[0].0, pair[1].0);
        }
    }

    #[test]
    fn test_rank_for_points() {
        assert_eq!(rank_for_points(0), "beginner_1");
        assert_eq!(rank_for_points(79), "beginner_2");
        assert_eq!(rank_for_points(700), "forecaster_1");
        assert_eq!(rank_for_points(1_000_000), "legend");
    }

    #[test]
    fn test_promotes() {
        let conn = conn_with_profile("beginner_1", 250);
        assert_eq!(check_rank_up(&conn, "alice").unwrap(), Some("beginner_4"));
        assert_eq!(rank_of(&conn), "beginner_4");
        assert_eq!(check_rank_up(&conn, "alice").unwrap(), None);
    }

    #[test]
    fn test_never_demotes() {
        let conn = conn_with_profile("advanced_1", 100);
        assert_eq!(check_rank_up(&conn, "alice").unwrap(), None);
        assert_eq!(rank_of(&conn), "advanced_1");
    }

    #[test]
    fn test_missing_profile() {
        let conn = conn_with_profile("beginner_1", 0);
        assert_eq!(check_rank_up(&conn, "bob").unwrap(), None);
    }
}
