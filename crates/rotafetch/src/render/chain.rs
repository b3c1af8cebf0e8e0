//! Ordered list of fallbacks sharing one render budget.

use super::{BlockDetector, RenderFallback};
use crate::credentials::Credentials;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Tries each fallback in turn and returns the first page its producer does
/// not consider blocked. All members draw on the same deadline.
pub struct ChainFallback {
    members: Vec<(&'static str, Arc<dyn RenderFallback>)>,
    detector: BlockDetector,
}

impl ChainFallback {
    pub fn new(detector: BlockDetector) -> Self {
        Self {
            members: Vec::new(),
            detector,
        }
    }

    /// Append a fallback, labelled for logging.
    pub fn with(mut self, name: &'static str, fallback: Arc<dyn RenderFallback>) -> Self {
        self.members.push((name, fallback));
        self
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[async_trait]
impl RenderFallback for ChainFallback {
    async fn render(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
        timeout: Duration,
    ) -> Option<String> {
        let deadline = Instant::now() + timeout;
        for (name, member) in &self.members {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!("render budget for {url} spent before trying {name}");
                break;
            }
            match member.render(url, credentials, remaining).await {
                Some(html) if !member.looks_blocked(&html) => {
                    tracing::info!("{name} fallback produced {url}");
                    return Some(html);
                }
                Some(_) => tracing::info!("{name} fallback returned a block page, moving on"),
                None => tracing::debug!("{name} fallback produced nothing for {url}"),
            }
        }
        None
    }

    fn looks_blocked(&self, html: &str) -> bool {
        self.detector.is_blocked(html)
    }
}
