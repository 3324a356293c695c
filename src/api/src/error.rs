//! Failure kinds for result acquisition and settlement.

use serde::{Serialize, Serializer};
use std::time::Duration;
use thiserror::Error;

/// Fetch-side failure; the race is retried on the next cycle while it is
/// still inside the retry window.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("fetch failed: {0}")]
    Transient(String),

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// Why a race was left alone this cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    #[error("results not yet published")]
    NotPublished,

    #[error("payouts not finalized (found: {})", found.join(","))]
    IncompletePayouts { found: Vec<String> },

    #[error("no scraped finisher matched a race entry")]
    EntryMismatch,

    #[error("race already being processed")]
    InFlight,
}

impl Serialize for SkipReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Race-level settlement failure. Raised before any mutation.
#[derive(Error, Debug)]
pub enum SettleError {
    #[error("race not found: {0}")]
    RaceNotFound(String),

    #[error("no results recorded for race {0}")]
    NoResults(String),

    #[error("no first-place finisher for race {0}")]
    NoWinner(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

/// Failure settling one vote. Recorded and skipped; siblings carry on.
#[derive(Error, Debug, Clone, Serialize)]
#[error("vote {vote_id}: {message}")]
pub struct VoteError {
    pub vote_id: String,
    pub message: String,
}

/// Manual result entry rejected
#[derive(Error, Debug)]
pub enum AdminError {
    #[error("race not found: {0}")]
    RaceNotFound(String),

    #[error("results are required")]
    EmptyResults,

    #[error("entry {0} does not belong to this race")]
    UnknownEntry(String),

    #[error("entry {0} listed more than once")]
    DuplicateEntry(String),

    #[error("finish position must be at least 1 (entry {0})")]
    InvalidPosition(String),

    #[error("finish position {0} given to more than one entry")]
    DuplicatePosition(u32),

    #[error("no first-place finisher given")]
    MissingWinner,

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_reason_serializes_as_text() {
        let reason = SkipReason::IncompletePayouts {
            found: vec!["win".to_string(), "quinella".to_string()],
        };
        assert_eq!(
            serde_json::to_string(&reason).unwrap(),
            "\"payouts not finalized (found: win,quinella)\""
        );
    }

    #[test]
    fn test_vote_error_display() {
        let err = VoteError {
            vote_id: "v1".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "vote v1: boom");
    }
}
