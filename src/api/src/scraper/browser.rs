//! Headless Chrome session used to render result pages.

use anyhow::{anyhow, Result};
use chromiumoxide::browser::{Browser as ChromeBrowser, BrowserConfig};
use futures::StreamExt;
use tokio::time::Duration;

/// Result pages fill their payout table from script after load
const RENDER_WAIT: Duration = Duration::from_millis(1500);

fn default_chrome_path() -> &'static str {
    if cfg!(target_os = "macos") {
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"
    } else if cfg!(target_os = "windows") {
        "C:\\Program Files\\Google\\Chrome\\Application\\chrome.exe"
    } else {
        "google-chrome"
    }
}

/// Configured executable, or the platform default
fn chrome_executable(chrome_path: Option<&str>) -> &str {
    chrome_path.unwrap_or(default_chrome_path())
}

pub struct Browser {
    browser: ChromeBrowser,
    handle: tokio::task::JoinHandle<()>,
}

impl Browser {
    /// Launch headless Chrome, at `chrome_path` or the platform default
    pub async fn launch(chrome_path: Option<&str>) -> Result<Self> {
        let executable = chrome_executable(chrome_path);

        let config = BrowserConfig::builder()
            .chrome_executable(executable)
            .no_sandbox()
            .disable_default_args()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg("--mute-audio")
            .window_size(1280, 1024)
            .build()
            .map_err(|e| anyhow!("Failed to build browser config: {}", e))?;

        let (browser, mut handler) = ChromeBrowser::launch(config)
            .await
            .map_err(|e| anyhow!("Failed to launch browser at {}: {}", executable, e))?;

        // The CDP handler must be polled for the browser to make progress
        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("Browser handler error: {}", e);
                }
            }
        });

        tracing::info!("Launched headless browser ({})", executable);
        Ok(Self { browser, handle })
    }

    /// Render `url` and return the resulting HTML
    pub async fn fetch_page(&self, url: &str) -> Result<String> {
        let page = self
            .browser
            .new_page(url)
            .await
            .map_err(|e| anyhow!("Failed to open {}: {}", url, e))?;

        tokio::time::sleep(RENDER_WAIT).await;

        let html = page
            .content()
            .await
            .map_err(|e| anyhow!("Failed to read content of {}: {}", url, e));

        let _ = page.close().await;
        html
    }

    pub async fn close(mut self) -> Result<()> {
        let _ = self.browser.close().await;
        self.handle.abort();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chrome_executable_prefers_configured_path() {
        assert_eq!(
            chrome_executable(Some("/opt/chromium/chrome")),
            "/opt/chromium/chrome"
        );
        assert_eq!(chrome_executable(None), default_chrome_path());
    }
}
