//! netkeiba-backed result source.

use tokio::sync::OnceCell;

use super::{result_url, Browser, RateLimiter, ResultPageParser};
use crate::config::IngestConfig;
use crate::error::FetchError;
use crate::ingest::{FetchOutcome, ResultSource};

/// Renders result pages in headless Chrome. The browser is launched on
/// first use so that `serve` can start without Chrome installed.
pub struct NetkeibaResultSource {
    chrome_path: Option<String>,
    browser: OnceCell<Browser>,
    limiter: RateLimiter,
    parser: ResultPageParser,
}

impl NetkeibaResultSource {
    pub fn new(config: &IngestConfig) -> anyhow::Result<Self> {
        Ok(Self {
            chrome_path: config.chrome_path.clone(),
            browser: OnceCell::new(),
            limiter: RateLimiter::for_results(config.requests_per_minute),
            parser: ResultPageParser::new()?,
        })
    }

    async fn browser(&self) -> Result<&Browser, FetchError> {
        self.browser
            .get_or_try_init(|| Browser::launch(self.chrome_path.as_deref()))
            .await
            .map_err(|e| FetchError::Transient(format!("{:#}", e)))
    }

    /// Close the browser if one was launched
    pub async fn shutdown(self) {
        if let Some(browser) = self.browser.into_inner() {
            if let Err(e) = browser.close().await {
                tracing::warn!("Failed to close browser: {:#}", e);
            }
        }
    }
}

impl ResultSource for NetkeibaResultSource {
    async fn fetch_result(&self, external_race_id: &str) -> Result<FetchOutcome, FetchError> {
        self.limiter.acquire().await;

        let browser = self.browser().await?;
        let url = result_url(external_race_id);
        let html = browser
            .fetch_page(&url)
            .await
            .map_err(|e| FetchError::Transient(format!("{:#}", e)))?;

        let scraped = self.parser.parse(&html);
        tracing::debug!(
            "Parsed {}: {} finishers, {} payouts",
            url,
            scraped.finishers.len(),
            scraped.payouts.len()
        );

        if scraped.finishers.is_empty() {
            Ok(FetchOutcome::Incomplete)
        } else {
            Ok(FetchOutcome::Fetched(scraped))
        }
    }
}
