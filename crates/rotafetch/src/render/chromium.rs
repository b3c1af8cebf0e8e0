//! Headless Chromium fallback using chromiumoxide.

use super::{BlockDetector, RenderFallback};
use crate::config::RenderConfig;
use crate::credentials::Credentials;
use crate::error::{FetchError, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

/// How often the content selector is polled while waiting.
const SELECTOR_POLL: Duration = Duration::from_millis(250);
/// Settle time after scrolling, for lazily loaded sections.
const SCROLL_SETTLE: Duration = Duration::from_secs(1);

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. ROTAFETCH_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("ROTAFETCH_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.rotafetch/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".rotafetch/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".rotafetch/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".rotafetch/chromium/chrome-linux64/chrome"),
                home.join(".rotafetch/chromium/chrome"),
            ]
        };
        if let Some(found) = candidates.into_iter().find(|c| c.exists()) {
            return Some(found);
        }
    }

    // 3. System PATH
    ["google-chrome", "chromium", "chromium-browser"]
        .iter()
        .find_map(|bin| which::which(bin).ok())
}

/// Renders pages in a lazily launched headless browser.
///
/// The browser is started on first use and shared by later renders; each
/// render gets its own page, closed afterwards.
pub struct ChromiumFallback {
    browser: OnceCell<Browser>,
    content_selector: Option<String>,
    detector: BlockDetector,
}

impl ChromiumFallback {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            browser: OnceCell::new(),
            content_selector: config.content_selector.clone(),
            detector: BlockDetector::new(config.block_markers.clone()),
        }
    }

    async fn browser(&self) -> Result<&Browser> {
        self.browser.get_or_try_init(launch).await
    }

    async fn render_page(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
        timeout: Duration,
    ) -> Result<String> {
        let browser = self.browser().await?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| FetchError::Render(format!("failed to create page: {e}")))?;

        let result = self.load(&page, url, credentials, timeout).await;
        if let Err(e) = page.close().await {
            tracing::debug!("failed to close render page: {e}");
        }
        result
    }

    async fn load(
        &self,
        page: &Page,
        url: &str,
        credentials: Option<&Credentials>,
        timeout: Duration,
    ) -> Result<String> {
        if let Some(creds) = credentials {
            let cookies = creds
                .iter()
                .filter_map(|(name, value)| {
                    CookieParam::builder()
                        .name(name)
                        .value(value)
                        .url(url)
                        .build()
                        .ok()
                })
                .collect::<Vec<_>>();
            page.set_cookies(cookies)
                .await
                .map_err(|e| FetchError::Render(format!("failed to set cookies: {e}")))?;
        }

        let start = Instant::now();
        match tokio::time::timeout(timeout, page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(FetchError::Render(format!("navigation failed: {e}"))),
            Err(_) => {
                return Err(FetchError::Render(format!(
                    "navigation timed out after {}ms",
                    timeout.as_millis()
                )))
            }
        }

        if let Some(selector) = &self.content_selector {
            let mut found = false;
            while start.elapsed() < timeout {
                if page.find_element(selector.as_str()).await.is_ok() {
                    found = true;
                    break;
                }
                tokio::time::sleep(SELECTOR_POLL).await;
            }
            if !found {
                tracing::warn!("content selector {selector} never appeared on {url}");
            }
        }

        if let Err(e) = page
            .evaluate("window.scrollTo(0, document.body.scrollHeight)")
            .await
        {
            tracing::debug!("scroll on {url} failed: {e}");
        }
        tokio::time::sleep(SCROLL_SETTLE).await;

        let html: String = page
            .evaluate("document.documentElement.outerHTML")
            .await
            .map_err(|e| FetchError::Render(format!("failed to get HTML: {e}")))?
            .into_value()
            .map_err(|e| FetchError::Render(format!("failed to convert HTML result: {e:?}")))?;
        Ok(html)
    }
}

async fn launch() -> Result<Browser> {
    let chrome_path = find_chromium().ok_or_else(|| {
        FetchError::Render("Chromium not found. Set ROTAFETCH_CHROMIUM_PATH.".into())
    })?;

    let config = BrowserConfig::builder()
        .chrome_executable(chrome_path)
        .arg("--headless=new")
        .arg("--disable-gpu")
        .arg("--no-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--disable-background-networking")
        .build()
        .map_err(|e| FetchError::Render(format!("failed to build browser config: {e}")))?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| FetchError::Render(format!("failed to launch Chromium: {e}")))?;

    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            let _ = event;
        }
    });

    tracing::info!("headless browser launched");
    Ok(browser)
}

#[async_trait]
impl RenderFallback for ChromiumFallback {
    async fn render(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
        timeout: Duration,
    ) -> Option<String> {
        tracing::info!("rendering {url} in headless browser");
        // Launch, page setup and teardown all count against the budget.
        match tokio::time::timeout(timeout, self.render_page(url, credentials, timeout)).await {
            Ok(Ok(html)) => Some(html),
            Ok(Err(e)) => {
                tracing::warn!("browser render of {url} failed: {e}");
                None
            }
            Err(_) => {
                tracing::warn!(
                    "browser render of {url} timed out after {}ms",
                    timeout.as_millis()
                );
                None
            }
        }
    }

    fn looks_blocked(&self, html: &str) -> bool {
        self.detector.is_blocked(html)
    }
}
