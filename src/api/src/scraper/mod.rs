//! Result acquisition from race.netkeiba.com
//!
//! Headless rendering, rate limiting, and result page parsing.

pub mod browser;
pub mod netkeiba;
pub mod rate_limiter;
pub mod result_page;

pub use browser::Browser;
pub use netkeiba::NetkeibaResultSource;
pub use rate_limiter::RateLimiter;
pub use result_page::ResultPageParser;

pub const BASE_URL: &str = "https://race.netkeiba.com";

/// Build result page URL
pub fn result_url(race_id: &str) -> String {
    format!("{}/race/result.html?race_id={}", BASE_URL, race_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_url() {
        assert_eq!(
            result_url("202406050811"),
            "https://race.netkeiba.com/race/result.html?race_id=202406050811"
        );
    }
}
