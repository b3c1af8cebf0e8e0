//! Heavyweight fallback used once the lightweight path is exhausted.
//!
//! Defines the [`RenderFallback`] trait and the block-page detector shared
//! by every implementation. A fallback that cannot produce a page returns
//! `None`; it never fails the fetch by itself.

pub mod archive;
pub mod chain;
pub mod chromium;
pub mod reader;

pub use archive::ArchiveFallback;
pub use chain::ChainFallback;
pub use chromium::ChromiumFallback;
pub use reader::ReaderFallback;

use crate::config::{RenderConfig, RenderEngine, DEFAULT_BLOCK_MARKERS};
use crate::credentials::Credentials;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A renderer of last resort.
#[async_trait]
pub trait RenderFallback: Send + Sync {
    /// Load `url` and return the resulting document markup.
    async fn render(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
        timeout: Duration,
    ) -> Option<String>;

    /// Whether `html` is a block page rather than content.
    fn looks_blocked(&self, html: &str) -> bool {
        BlockDetector::default().is_blocked(html)
    }
}

/// Fixed-marker block-page check.
#[derive(Debug, Clone)]
pub struct BlockDetector {
    markers: Vec<String>,
}

impl Default for BlockDetector {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_MARKERS.iter().map(|s| s.to_string()).collect())
    }
}

impl BlockDetector {
    pub fn new(markers: Vec<String>) -> Self {
        Self { markers }
    }

    pub fn is_blocked(&self, html: &str) -> bool {
        match self.markers.iter().find(|m| html.contains(m.as_str())) {
            Some(marker) => {
                tracing::warn!("block marker found in rendered page: {marker}");
                true
            }
            None => false,
        }
    }
}

/// A fallback that never renders, for setups without a browser.
pub struct NoopFallback;

#[async_trait]
impl RenderFallback for NoopFallback {
    async fn render(&self, url: &str, _: Option<&Credentials>, _: Duration) -> Option<String> {
        tracing::debug!("no render fallback configured, skipping {url}");
        None
    }
}

/// Build the fallback selected by the config.
pub fn from_config(config: &RenderConfig) -> Arc<dyn RenderFallback> {
    match config.engine {
        RenderEngine::Chain => Arc::new(chain_from_config(config)),
        engine => single(engine, config),
    }
}

fn single(engine: RenderEngine, config: &RenderConfig) -> Arc<dyn RenderFallback> {
    match engine {
        RenderEngine::Chromium => Arc::new(ChromiumFallback::new(config)),
        RenderEngine::Archive => Arc::new(ArchiveFallback::new(config)),
        RenderEngine::Reader => Arc::new(ReaderFallback::new(config)),
        RenderEngine::Chain | RenderEngine::None => Arc::new(NoopFallback),
    }
}

fn chain_from_config(config: &RenderConfig) -> ChainFallback {
    let detector = BlockDetector::new(config.block_markers.clone());
    config
        .chain
        .iter()
        .filter(|e| !matches!(e, RenderEngine::Chain | RenderEngine::None))
        .fold(ChainFallback::new(detector), |chain, engine| {
            let name = match engine {
                RenderEngine::Chromium => "chromium",
                RenderEngine::Archive => "archive",
                _ => "reader",
            };
            chain.with(name, single(*engine, config))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_markers() {
        let d = BlockDetector::default();
        assert!(d.is_blocked("<script>window.onload = function() { go() }</script>"));
        assert!(d.is_blocked("<a href=\"/x?trkCode=bf\">"));
        assert!(!d.is_blocked("<html><body><h1>Jane Doe</h1></body></html>"));
    }

    #[test]
    fn test_custom_markers() {
        let d = BlockDetector::new(vec!["captcha-wall".into()]);
        assert!(d.is_blocked("<div id=captcha-wall>"));
        assert!(!d.is_blocked("trkCode=bf"));
    }

    #[tokio::test]
    async fn test_noop_renders_nothing() {
        let out = NoopFallback
            .render("https://example.com", None, Duration::from_secs(1))
            .await;
        assert!(out.is_none());
    }

    #[test]
    fn test_chain_skips_nested_and_none_entries() {
        let cfg = RenderConfig {
            engine: RenderEngine::Chain,
            chain: vec![
                RenderEngine::Reader,
                RenderEngine::None,
                RenderEngine::Chain,
                RenderEngine::Archive,
            ],
            ..RenderConfig::default()
        };
        assert_eq!(chain_from_config(&cfg).len(), 2);
    }

    #[test]
    fn test_from_config_none() {
        let cfg = RenderConfig {
            engine: RenderEngine::None,
            ..RenderConfig::default()
        };
        let fb = from_config(&cfg);
        assert!(fb.looks_blocked("If you are the owner of this page"));
    }
}
