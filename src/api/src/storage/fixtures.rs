//! Shared test data: races with numbered entries, votes and results.

use chrono::{NaiveDate, TimeZone, Utc};
use rusqlite::{params, Connection};

use super::repository::{self, insert_entry, insert_race};
use crate::models::{Grade, Payout, PickType, Race, RaceEntry, RaceResult, RaceStatus};

/// A voting-open race posting at 2024-12-22 15:25 JST.
pub fn race(id: &str, grade: Grade) -> Race {
    Race {
        id: id.to_string(),
        name: format!("Test Stakes {}", id),
        external_id: Some(format!("ext-{}", id)),
        grade,
        race_date: NaiveDate::from_ymd_opt(2024, 12, 22),
        post_time: Utc.with_ymd_and_hms(2024, 12, 22, 6, 25, 0).single(),
        status: RaceStatus::VotingOpen,
    }
}

pub fn entry_id(race_id: &str, post: u32) -> String {
    format!("{}-{:02}", race_id, post)
}

/// Insert a race with `runners` entries. Entry `{race}-NN` has post number
/// and popularity NN.
pub fn seed_race(conn: &Connection, id: &str, grade: Grade, runners: u32) -> Race {
    let race = race(id, grade);
    insert_race(conn, &race).unwrap();
    for n in 1..=runners {
        insert_entry(
            conn,
            &RaceEntry {
                id: entry_id(id, n),
                race_id: id.to_string(),
                post_number: n,
                horse_name: format!("Horse {}", n),
                odds: Some(1.5 * n as f64),
                popularity: Some(n),
            },
        )
        .unwrap();
    }
    race
}

pub fn seed_vote(conn: &Connection, vote_id: &str, user_id: &str, race_id: &str, picks: &[(PickType, u32)]) {
    conn.execute(
        "INSERT INTO votes (id, user_id, race_id) VALUES (?1, ?2, ?3)",
        params![vote_id, user_id, race_id],
    )
    .unwrap();
    for (pick_type, post) in picks {
        conn.execute(
            "INSERT INTO vote_picks (vote_id, race_entry_id, pick_type) VALUES (?1, ?2, ?3)",
            params![vote_id, entry_id(race_id, *post), pick_type],
        )
        .unwrap();
    }
}

/// Results in finishing order for the given posts
pub fn results_for(race_id: &str, finish: &[u32]) -> Vec<RaceResult> {
    finish
        .iter()
        .enumerate()
        .map(|(i, post)| RaceResult {
            race_entry_id: entry_id(race_id, *post),
            finish_position: i as u32 + 1,
            finish_time: None,
        })
        .collect()
}

/// Minimal finalized payout set: win and place
pub fn full_payouts() -> Vec<Payout> {
    vec![
        Payout {
            bet_type: "win".to_string(),
            combination: "1".to_string(),
            payout_amount: 230,
            popularity: Some(1),
        },
        Payout {
            bet_type: "place".to_string(),
            combination: "1".to_string(),
            payout_amount: 110,
            popularity: Some(1),
        },
    ]
}

pub fn seed_results(conn: &mut Connection, race_id: &str, finish: &[u32]) {
    repository::replace_results(conn, race_id, &results_for(race_id, finish), &full_payouts())
        .unwrap();
}
