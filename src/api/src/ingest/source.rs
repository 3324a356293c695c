//! Result source abstraction.

use std::future::Future;

use crate::error::FetchError;
use crate::models::Payout;

/// One finisher as published by the source
#[derive(Debug, Clone, PartialEq)]
pub struct Finisher {
    pub post_number: u32,
    pub position: u32,
    pub finish_time: Option<String>,
    /// Confirmed popularity, when the page shows it
    pub popularity: Option<u32>,
    /// Confirmed win odds, when the page shows it
    pub odds: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrapedResult {
    pub finishers: Vec<Finisher>,
    pub payouts: Vec<Payout>,
}

impl ScrapedResult {
    /// Distinct payout categories present, in first-seen order
    pub fn payout_categories(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for payout in &self.payouts {
            if !seen.iter().any(|b| *b == payout.bet_type) {
                seen.push(payout.bet_type.clone());
            }
        }
        seen
    }

    pub fn has_category(&self, bet_type: &str) -> bool {
        self.payouts.iter().any(|p| p.bet_type == bet_type)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Fetched(ScrapedResult),
    /// The page exists but no result is published yet
    Incomplete,
}

/// Fetches published results for a race by its external id
pub trait ResultSource: Send + Sync {
    fn fetch_result(
        &self,
        external_race_id: &str,
    ) -> impl Future<Output = Result<FetchOutcome, FetchError>> + Send;
}
