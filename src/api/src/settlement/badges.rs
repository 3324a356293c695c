//! Badge grants after settlement.
//!
//! Milestone badges follow the profile counters; event badges follow the
//! settled vote itself. Each badge is granted at most once per user.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::info;

use super::events::{VoteSettled, VoteSettledHandler};
use crate::storage::format_ts;
use crate::storage::votes::{count_perfect_votes, get_profile};

/// Facts the evaluator needs about the vote that triggered it
#[derive(Debug, Clone)]
pub struct BadgeFacts {
    pub user_id: String,
    pub is_perfect: bool,
    pub is_upset: bool,
    pub is_g1_win: bool,
}

impl From<&VoteSettled> for BadgeFacts {
    fn from(event: &VoteSettled) -> Self {
        Self {
            user_id: event.user_id.clone(),
            is_perfect: event.is_perfect,
            is_upset: event.is_upset,
            is_g1_win: event.is_g1_win,
        }
    }
}

fn is_rank_at_least(rank_id: &str, tier: &str) -> bool {
    const TIERS: [&str; 4] = ["forecaster", "advanced", "master", "legend"];
    let Some(min) = TIERS.iter().position(|t| *t == tier) else {
        return false;
    };
    TIERS
        .iter()
        .position(|t| rank_id.starts_with(t))
        .map(|idx| idx >= min)
        .unwrap_or(false)
}

/// Badge ids the user currently qualifies for
fn qualifying_badges(conn: &Connection, facts: &BadgeFacts) -> rusqlite::Result<Vec<&'static str>> {
    let Some(profile) = get_profile(conn, &facts.user_id)? else {
        return Ok(Vec::new());
    };
    let perfects = count_perfect_votes(conn, &facts.user_id)?;

    let checks = [
        ("first_vote", profile.total_votes >= 1),
        ("vote_10", profile.total_votes >= 10),
        ("vote_50", profile.total_votes >= 50),
        ("vote_100", profile.total_votes >= 100),
        ("first_win", profile.win_hits >= 1),
        ("win_10", profile.win_hits >= 10),
        ("win_50", profile.win_hits >= 50),
        ("perfect_1", facts.is_perfect || perfects >= 1),
        ("perfect_5", perfects >= 5),
        ("streak_3", profile.best_streak >= 3),
        ("streak_5", profile.best_streak >= 5),
        ("streak_10", profile.best_streak >= 10),
        ("rank_forecaster", is_rank_at_least(&profile.rank_id, "forecaster")),
        ("rank_advanced", is_rank_at_least(&profile.rank_id, "advanced")),
        ("rank_master", is_rank_at_least(&profile.rank_id, "master")),
        ("rank_legend", profile.rank_id == "legend"),
        ("big_upset", facts.is_upset),
        ("g1_winner", facts.is_g1_win),
    ];

    Ok(checks
        .into_iter()
        .filter(|(_, ok)| *ok)
        .map(|(id, _)| id)
        .collect())
}

/// Grant every badge the user qualifies for and does not own yet. Returns
/// the newly granted ids.
pub fn evaluate(
    conn: &Connection,
    facts: &BadgeFacts,
    now: DateTime<Utc>,
) -> rusqlite::Result<Vec<&'static str>> {
    let mut granted = Vec::new();
    let mut insert = conn.prepare(
        "INSERT OR IGNORE INTO user_badges (user_id, badge_id, earned_at) VALUES (?1, ?2, ?3)",
    )?;
    for badge in qualifying_badges(conn, facts)? {
        if insert.execute(params![facts.user_id, badge, format_ts(now)])? > 0 {
            granted.push(badge);
        }
    }
    if !granted.is_empty() {
        info!(user_id = %facts.user_id, badges = ?granted, "Badges granted");
    }
    Ok(granted)
}

pub struct BadgeEvaluator;

impl VoteSettledHandler for BadgeEvaluator {
    fn name(&self) -> &'static str {
        "badges"
    }

    fn handle(&self, conn: &Connection, event: &VoteSettled) -> anyhow::Result<()> {
        evaluate(conn, &BadgeFacts::from(event), event.settled_at)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::create_tables;
    use chrono::TimeZone;

    fn setup(total_votes: i64, win_hits: i64, best_streak: i64) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn.execute(
            "INSERT INTO profiles (user_id, total_votes, win_hits, best_streak) VALUES ('alice', ?1, ?2, ?3)",
            params![total_votes, win_hits, best_streak],
        )
        .unwrap();
        conn
    }

    fn facts() -> BadgeFacts {
        BadgeFacts {
            user_id: "alice".to_string(),
            is_perfect: false,
            is_upset: false,
            is_g1_win: false,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 22, 7, 0, 0).unwrap()
    }

    #[test]
    fn test_milestones_granted_once() {
        let conn = setup(10, 1, 3);
        let granted = evaluate(&conn, &facts(), now()).unwrap();
        assert_eq!(granted, vec!["first_vote", "vote_10", "first_win", "streak_3"]);

        let again = evaluate(&conn, &facts(), now()).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_event_badges() {
        let conn = setup(1, 1, 1);
        let facts = BadgeFacts {
            is_upset: true,
            is_g1_win: true,
            ..facts()
        };
        let granted = evaluate(&conn, &facts, now()).unwrap();
        assert!(granted.contains(&"big_upset"));
        assert!(granted.contains(&"g1_winner"));
    }

    #[test]
    fn test_rank_tiers() {
        assert!(is_rank_at_least("advanced_2", "forecaster"));
        assert!(is_rank_at_least("legend", "master"));
        assert!(!is_rank_at_least("beginner_5", "forecaster"));
        assert!(!is_rank_at_least("forecaster_5", "advanced"));
    }

    #[test]
    fn test_unknown_user_gets_nothing() {
        let conn = setup(0, 0, 0);
        let facts = BadgeFacts {
            user_id: "bob".to_string(),
            is_upset: true,
            ..facts()
        };
        assert!(evaluate(&conn, &facts, now()).unwrap().is_empty());
    }
}
