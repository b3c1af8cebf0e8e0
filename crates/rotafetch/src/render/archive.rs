//! Cookie-less fallback that serves the closest Wayback Machine snapshot.

use super::{BlockDetector, RenderFallback};
use crate::config::RenderConfig;
use crate::credentials::Credentials;
use crate::error::{FetchError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Default, Deserialize)]
struct Availability {
    #[serde(default)]
    archived_snapshots: Snapshots,
}

#[derive(Debug, Default, Deserialize)]
struct Snapshots {
    closest: Option<Snapshot>,
}

#[derive(Debug, Deserialize)]
struct Snapshot {
    #[serde(default)]
    available: bool,
    url: Option<String>,
}

/// Looks the target up in a web archive and returns the snapshot body.
///
/// Credentials are never forwarded to the archive.
pub struct ArchiveFallback {
    client: reqwest::Client,
    endpoint: String,
    detector: BlockDetector,
}

impl ArchiveFallback {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.archive_endpoint.clone(),
            detector: BlockDetector::new(config.block_markers.clone()),
        }
    }

    async fn snapshot_url(&self, url: &str, timeout: Duration) -> Result<Option<String>> {
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("url", url)])
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(timeout)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(FetchError::Render(format!(
                "archive lookup returned {}",
                resp.status()
            )));
        }
        let avail: Availability = resp.json().await?;
        Ok(avail
            .archived_snapshots
            .closest
            .filter(|s| s.available)
            .and_then(|s| s.url))
    }

    async fn fetch_snapshot(&self, url: &str, timeout: Duration) -> Result<Option<String>> {
        let Some(snapshot) = self.snapshot_url(url, timeout).await? else {
            return Ok(None);
        };
        let resp = self
            .client
            .get(&snapshot)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(timeout)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let body = resp.text().await?;
        Ok((!body.is_empty()).then_some(body))
    }
}

#[async_trait]
impl RenderFallback for ArchiveFallback {
    async fn render(
        &self,
        url: &str,
        _credentials: Option<&Credentials>,
        timeout: Duration,
    ) -> Option<String> {
        match self.fetch_snapshot(url, timeout).await {
            Ok(Some(html)) => {
                tracing::info!("archive snapshot fetched: {} chars", html.len());
                Some(html)
            }
            Ok(None) => {
                tracing::warn!("no archive snapshot available for {url}");
                None
            }
            Err(e) => {
                tracing::warn!("archive lookup for {url} failed: {e}");
                None
            }
        }
    }

    fn looks_blocked(&self, html: &str) -> bool {
        self.detector.is_blocked(html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fallback(server: &MockServer) -> ArchiveFallback {
        ArchiveFallback::new(&RenderConfig {
            archive_endpoint: format!("{}/wayback/available", server.uri()),
            ..RenderConfig::default()
        })
    }

    #[tokio::test]
    async fn test_snapshot_returned() {
        let server = MockServer::start().await;
        let snap = format!("{}/web/2024/https://example.com/in/jane", server.uri());
        Mock::given(method("GET"))
            .and(path("/wayback/available"))
            .and(query_param("url", "https://example.com/in/jane"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "archived_snapshots": {"closest": {"available": true, "url": snap, "status": "200"}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/web/2024/https://example.com/in/jane"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>snapshot</html>"))
            .mount(&server)
            .await;

        let html = fallback(&server)
            .render("https://example.com/in/jane", None, Duration::from_secs(5))
            .await;
        assert_eq!(html.as_deref(), Some("<html>snapshot</html>"));
    }

    #[tokio::test]
    async fn test_no_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wayback/available"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"archived_snapshots": {}})),
            )
            .mount(&server)
            .await;

        let html = fallback(&server)
            .render("https://example.com/x", None, Duration::from_secs(5))
            .await;
        assert!(html.is_none());
    }

    #[tokio::test]
    async fn test_lookup_error_is_absorbed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let html = fallback(&server)
            .render("https://example.com/x", None, Duration::from_secs(5))
            .await;
        assert!(html.is_none());
    }
}
