//! Post-commit settlement events.
//!
//! Handlers run after a vote's transaction has committed. A handler failure
//! is logged and never rolls back or blocks the settlement itself.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::warn;

/// Facts about one freshly settled vote
#[derive(Debug, Clone, Serialize)]
pub struct VoteSettled {
    pub vote_id: String,
    pub user_id: String,
    pub race_id: String,
    pub earned_points: i64,
    pub win_hit: bool,
    pub any_hit: bool,
    pub is_perfect: bool,
    /// Win hit on a winner at or past the upset popularity
    pub is_upset: bool,
    pub is_g1_win: bool,
    pub settled_at: DateTime<Utc>,
}

pub trait VoteSettledHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn handle(&self, conn: &Connection, event: &VoteSettled) -> anyhow::Result<()>;
}

/// Run every handler in order. Returns the number that failed.
pub fn dispatch(
    handlers: &[Box<dyn VoteSettledHandler>],
    conn: &Connection,
    event: &VoteSettled,
) -> usize {
    let mut failed = 0;
    for handler in handlers {
        if let Err(e) = handler.handle(conn, event) {
            failed += 1;
            warn!(
                handler = handler.name(),
                vote_id = %event.vote_id,
                user_id = %event.user_id,
                "Settlement handler failed: {:#}",
                e
            );
        }
    }
    failed
}
