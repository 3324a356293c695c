//! SQLite schema definitions for races, votes and settlement output
//!
//! Tables:
//! - races: Race card header and lifecycle status
//! - race_entries: Starters with lock-time odds and popularity
//! - race_results: Finishing positions (one row per finisher)
//! - payouts: Official payouts, used to confirm a result is final
//! - votes / vote_picks: User predictions and their settled outcome
//! - profiles: Per-user running aggregates
//! - points_transactions: Append-only points ledger
//! - contests / contest_entries: Monthly and weekly contest rollups
//! - contest_races: Ordered race card of a weekly contest
//! - user_badges: Granted badges

use rusqlite::{Connection, Result};

/// Create all tables in the database
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS races (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            external_id TEXT,
            grade TEXT NOT NULL DEFAULT 'none',
            race_date TEXT,
            post_time TEXT,
            status TEXT NOT NULL DEFAULT 'upcoming',
            created_at TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS race_entries (
            id TEXT PRIMARY KEY,
            race_id TEXT NOT NULL REFERENCES races(id),
            post_number INTEGER NOT NULL,
            horse_name TEXT NOT NULL,
            odds REAL,
            popularity INTEGER,
            UNIQUE(race_id, post_number)
        );

        CREATE TABLE IF NOT EXISTS race_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            race_id TEXT NOT NULL REFERENCES races(id),
            race_entry_id TEXT NOT NULL REFERENCES race_entries(id),
            finish_position INTEGER NOT NULL,
            finish_time TEXT,
            UNIQUE(race_id, race_entry_id)
        );

        CREATE TABLE IF NOT EXISTS payouts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            race_id TEXT NOT NULL REFERENCES races(id),
            bet_type TEXT NOT NULL,
            combination TEXT NOT NULL,
            payout_amount INTEGER NOT NULL,
            popularity INTEGER
        );

        CREATE TABLE IF NOT EXISTS votes (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            race_id TEXT NOT NULL REFERENCES races(id),
            status TEXT NOT NULL DEFAULT 'pending',
            earned_points INTEGER NOT NULL DEFAULT 0,
            is_perfect INTEGER NOT NULL DEFAULT 0,
            settled_at TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            UNIQUE(user_id, race_id)
        );

        CREATE TABLE IF NOT EXISTS vote_picks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            vote_id TEXT NOT NULL REFERENCES votes(id),
            race_entry_id TEXT NOT NULL REFERENCES race_entries(id),
            pick_type TEXT NOT NULL,
            is_hit INTEGER,
            points_earned INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS profiles (
            user_id TEXT PRIMARY KEY,
            cumulative_points INTEGER NOT NULL DEFAULT 0,
            monthly_points INTEGER NOT NULL DEFAULT 0,
            total_votes INTEGER NOT NULL DEFAULT 0,
            win_hits INTEGER NOT NULL DEFAULT 0,
            place_hits INTEGER NOT NULL DEFAULT 0,
            danger_hits INTEGER NOT NULL DEFAULT 0,
            current_streak INTEGER NOT NULL DEFAULT 0,
            best_streak INTEGER NOT NULL DEFAULT 0,
            rank_id TEXT NOT NULL DEFAULT 'beginner_1'
        );

        CREATE TABLE IF NOT EXISTS points_transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            vote_id TEXT REFERENCES votes(id),
            race_id TEXT REFERENCES races(id),
            amount INTEGER NOT NULL,
            reason TEXT NOT NULL,
            description TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS contests (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'monthly',
            year_month TEXT UNIQUE,
            status TEXT NOT NULL DEFAULT 'active',
            min_votes INTEGER NOT NULL DEFAULT 5
        );

        CREATE TABLE IF NOT EXISTS contest_races (
            contest_id TEXT NOT NULL REFERENCES contests(id),
            race_id TEXT NOT NULL UNIQUE REFERENCES races(id),
            race_order INTEGER NOT NULL,
            PRIMARY KEY (contest_id, race_id),
            UNIQUE(contest_id, race_order)
        );

        CREATE TABLE IF NOT EXISTS contest_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            contest_id TEXT NOT NULL REFERENCES contests(id),
            user_id TEXT NOT NULL,
            total_points INTEGER NOT NULL DEFAULT 0,
            vote_count INTEGER NOT NULL DEFAULT 0,
            hit_race_count INTEGER NOT NULL DEFAULT 0,
            streak_bonus INTEGER NOT NULL DEFAULT 0,
            earliest_vote_at TEXT,
            is_eligible INTEGER NOT NULL DEFAULT 0,
            UNIQUE(contest_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS user_badges (
            user_id TEXT NOT NULL,
            badge_id TEXT NOT NULL,
            earned_at TEXT NOT NULL,
            PRIMARY KEY (user_id, badge_id)
        );

        CREATE INDEX IF NOT EXISTS idx_races_status ON races(status);
        CREATE INDEX IF NOT EXISTS idx_races_date ON races(race_date);
        CREATE INDEX IF NOT EXISTS idx_race_entries_race ON race_entries(race_id);
        CREATE INDEX IF NOT EXISTS idx_race_results_race ON race_results(race_id);
        CREATE INDEX IF NOT EXISTS idx_payouts_race ON payouts(race_id);
        CREATE INDEX IF NOT EXISTS idx_votes_race_status ON votes(race_id, status);
        CREATE INDEX IF NOT EXISTS idx_vote_picks_vote ON vote_picks(vote_id);
        CREATE INDEX IF NOT EXISTS idx_points_vote ON points_transactions(vote_id);
        "#,
    )
}
