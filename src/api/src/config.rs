//! Configuration for the GateIn settlement service.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/gatein.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Scheduled result acquisition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Minutes after post time before the first fetch attempt
    #[serde(default = "default_retry_start")]
    pub retry_start_offset_mins: i64,
    /// Minutes after post time after which the race is left to admins
    #[serde(default = "default_retry_end")]
    pub retry_end_offset_mins: i64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    /// Chrome executable override (platform default when unset)
    #[serde(default)]
    pub chrome_path: Option<String>,
}

fn default_retry_start() -> i64 {
    15
}

fn default_retry_end() -> i64 {
    45
}

fn default_poll_interval() -> u64 {
    300
}

fn default_fetch_timeout() -> u64 {
    60
}

fn default_requests_per_minute() -> u32 {
    20
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            retry_start_offset_mins: default_retry_start(),
            retry_end_offset_mins: default_retry_end(),
            poll_interval_secs: default_poll_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
            requests_per_minute: default_requests_per_minute(),
            chrome_path: None,
        }
    }
}

impl IngestConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Point award rules applied at settlement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointRules {
    /// Win points indexed by winner popularity (1-based)
    #[serde(default = "default_win_points")]
    pub win_points_by_popularity: Vec<i64>,
    /// Win points for popularities past the table, or unknown
    #[serde(default = "default_win_points_default")]
    pub win_points_default: i64,
    #[serde(default = "default_place_points")]
    pub place_points: i64,
    /// Danger points indexed by the danger pick's popularity (1-based)
    #[serde(default = "default_danger_points")]
    pub danger_points_by_popularity: Vec<i64>,
    #[serde(default = "default_danger_points_default")]
    pub danger_points_default: i64,
    #[serde(default = "default_g1_bonus")]
    pub g1_bonus: i64,
    #[serde(default = "default_perfect_bonus")]
    pub perfect_bonus: i64,
    #[serde(default = "default_streak_bonus")]
    pub streak_bonus: i64,
    #[serde(default = "default_streak_interval")]
    pub streak_interval: u32,
    /// Minimum winner popularity that counts as an upset
    #[serde(default = "default_upset_popularity")]
    pub upset_popularity: u32,
}

fn default_win_points() -> Vec<i64> {
    vec![30, 50, 50, 80, 80, 120, 120, 200, 200]
}

fn default_win_points_default() -> i64 {
    300
}

fn default_place_points() -> i64 {
    20
}

fn default_danger_points() -> Vec<i64> {
    vec![50, 40, 30, 20, 15]
}

fn default_danger_points_default() -> i64 {
    10
}

fn default_g1_bonus() -> i64 {
    30
}

fn default_perfect_bonus() -> i64 {
    200
}

fn default_streak_bonus() -> i64 {
    50
}

fn default_streak_interval() -> u32 {
    3
}

fn default_upset_popularity() -> u32 {
    10
}

impl Default for PointRules {
    fn default() -> Self {
        Self {
            win_points_by_popularity: default_win_points(),
            win_points_default: default_win_points_default(),
            place_points: default_place_points(),
            danger_points_by_popularity: default_danger_points(),
            danger_points_default: default_danger_points_default(),
            g1_bonus: default_g1_bonus(),
            perfect_bonus: default_perfect_bonus(),
            streak_bonus: default_streak_bonus(),
            streak_interval: default_streak_interval(),
            upset_popularity: default_upset_popularity(),
        }
    }
}

/// Monthly contest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContestConfig {
    /// Settled votes needed before an entry is prize-eligible
    #[serde(default = "default_min_votes")]
    pub default_min_votes: i64,
}

fn default_min_votes() -> i64 {
    5
}

impl Default for ContestConfig {
    fn default() -> Self {
        Self {
            default_min_votes: default_min_votes(),
        }
    }
}

/// Scheduler and admin endpoint authentication
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer token expected on cron/admin calls; empty rejects everything
    #[serde(default)]
    pub cron_secret: String,
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub points: PointRules,
    #[serde(default)]
    pub contest: ContestConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Load configuration from environment and config file
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // Add config file if exists
            .add_source(config::File::with_name("config").required(false))
            // Override with environment variables (GATEIN_INGEST__FETCH_TIMEOUT_SECS, etc.)
            .add_source(
                config::Environment::with_prefix("GATEIN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
