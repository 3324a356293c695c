//! Request and response types for the GateIn API.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::admin::ResettleOutcome;
use crate::ingest::RaceOutcome;
use crate::models::{Payout, RaceResult};

/// Manual result entry body. Also the file format of `record-results`.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordResultsRequest {
    pub results: Vec<RaceResult>,
    #[serde(default)]
    pub payouts: Vec<Payout>,
    /// Settle the race right after storing the results
    #[serde(default)]
    pub settle: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResettleRequest {
    #[serde(default)]
    pub race_id: Option<String>,
    #[serde(default)]
    pub race_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub processed: usize,
    pub outcomes: Vec<RaceOutcome>,
}

#[derive(Debug, Serialize)]
pub struct ResettleResponse {
    pub processed: usize,
    pub outcomes: Vec<ResettleOutcome>,
}

#[derive(Debug, Serialize)]
pub struct RecordResultsResponse {
    pub race_id: String,
    pub results: usize,
    pub payouts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement: Option<crate::settlement::SettlementReport>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
