use chrono::{DateTime, Duration, Utc};

use crate::config::IngestConfig;

/// Bounded retry window, relative to post time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryWindow {
    pub start_offset: Duration,
    pub end_offset: Duration,
}

impl RetryWindow {
    pub fn new(start_offset: Duration, end_offset: Duration) -> Self {
        Self {
            start_offset,
            end_offset,
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(
            Duration::minutes(config.retry_start_offset_mins),
            Duration::minutes(config.retry_end_offset_mins),
        )
    }

    /// Whether `now` lies in `[post_time + start, post_time + end]`
    pub fn contains(&self, post_time: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now >= post_time + self.start_offset && now <= post_time + self.end_offset
    }

    /// The window has closed for good; only an admin can settle the race now
    pub fn has_expired(&self, post_time: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now > post_time + self.end_offset
    }
}

impl Default for RetryWindow {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}
