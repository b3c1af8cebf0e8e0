//! Cookie-less fallback through a reader-proxy service such as `r.jina.ai`.

use super::{BlockDetector, RenderFallback};
use crate::config::RenderConfig;
use crate::credentials::Credentials;
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Fetches `<endpoint><url>` and returns whatever the service rendered.
///
/// The service fetches the page from its own network, so credentials are
/// never forwarded.
pub struct ReaderFallback {
    client: reqwest::Client,
    endpoint: String,
    detector: BlockDetector,
}

impl ReaderFallback {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.reader_endpoint.clone(),
            detector: BlockDetector::new(config.block_markers.clone()),
        }
    }

    fn reader_url(&self, url: &str) -> String {
        if self.endpoint.ends_with('/') {
            format!("{}{url}", self.endpoint)
        } else {
            format!("{}/{url}", self.endpoint)
        }
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Option<String>> {
        let resp = self
            .client
            .get(self.reader_url(url))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(timeout)
            .send()
            .await?;
        if !resp.status().is_success() {
            tracing::warn!("reader service returned {} for {url}", resp.status());
            return Ok(None);
        }
        let body = resp.text().await?;
        Ok((!body.is_empty()).then_some(body))
    }
}

#[async_trait]
impl RenderFallback for ReaderFallback {
    async fn render(
        &self,
        url: &str,
        _credentials: Option<&Credentials>,
        timeout: Duration,
    ) -> Option<String> {
        match self.fetch(url, timeout).await {
            Ok(Some(text)) => {
                tracing::info!("reader service fetched {} chars", text.len());
                Some(text)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("reader service request for {url} failed: {e}");
                None
            }
        }
    }

    fn looks_blocked(&self, html: &str) -> bool {
        self.detector.is_blocked(html)
    }
}
