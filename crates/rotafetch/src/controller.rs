//! Escalation controller: turns one logical fetch into a bounded sequence
//! of attempts.
//!
//! Every attempt outcome is classified into a closed [`Signal`], and each
//! signal maps to a fixed [`Remedy`]. Remedies escalate with the signal's
//! severity: an identity refresh for soft blocks, proxy exclusion plus a
//! bound identity for automation defenses, a full session teardown for
//! quota exhaustion. A 404 is never retried.

use crate::config::{EngineConfig, FetchConfig, TargetConfig};
use crate::credentials::Credentials;
use crate::error::{FetchError, Result};
use crate::executor::{AttemptExecutor, AttemptRequest, AttemptStatus, HttpExecutor, TransportFault};
use crate::governor::RateGovernor;
use crate::identity::{Identity, IdentityPool, IdentityStats};
use crate::proxy::{Proxy, ProxyPool, ProxyStats};
use crate::render::{self, RenderFallback};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Classified outcome of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// 200: content delivered.
    Delivered,
    /// 404: the resource does not exist.
    NotFound,
    /// 403: access denied.
    BlockedSoft,
    /// 999: automation defense triggered.
    BlockedHard,
    /// 429: rate-limited by the target.
    QuotaExceeded,
    /// Timeout, refused connection or unusable proxy.
    TransportFault,
    /// Any other status.
    Unexpected,
}

/// What happens to the identity after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityAction {
    Keep,
    /// Clear the identity's cookies and rotate its user agent.
    Refresh,
    /// Replace the whole pool with one fresh identity.
    DiscardAll,
    /// Create a fresh identity bound to the proxy just used.
    BindToProxy,
}

/// Response to a [`Signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Remedy {
    pub fail_proxy: bool,
    pub identity: IdentityAction,
    /// Multiple of the base retry delay slept before the next attempt.
    pub backoff_factor: u32,
    pub retry: bool,
    /// Try the rendering fallback when this happens on the final attempt.
    pub render_on_final: bool,
    /// Skip the proxy on the next attempt if the proxy itself was unusable.
    pub bypass_invalid_proxy: bool,
}

const GIVE_UP: Remedy = Remedy {
    fail_proxy: false,
    identity: IdentityAction::Keep,
    backoff_factor: 0,
    retry: false,
    render_on_final: false,
    bypass_invalid_proxy: false,
};

const GENERIC_RETRY: Remedy = Remedy {
    fail_proxy: true,
    identity: IdentityAction::Keep,
    backoff_factor: 1,
    retry: true,
    render_on_final: false,
    bypass_invalid_proxy: false,
};

impl Signal {
    pub fn classify(status: &AttemptStatus) -> Self {
        match status {
            AttemptStatus::Http(200) => Signal::Delivered,
            AttemptStatus::Http(404) => Signal::NotFound,
            AttemptStatus::Http(403) => Signal::BlockedSoft,
            AttemptStatus::Http(999) => Signal::BlockedHard,
            AttemptStatus::Http(429) => Signal::QuotaExceeded,
            AttemptStatus::Http(_) => Signal::Unexpected,
            AttemptStatus::Transport { .. } => Signal::TransportFault,
        }
    }

    pub fn remedy(self) -> Remedy {
        match self {
            Signal::Delivered | Signal::NotFound => GIVE_UP,
            Signal::BlockedSoft => Remedy {
                identity: IdentityAction::Refresh,
                ..GENERIC_RETRY
            },
            Signal::BlockedHard => Remedy {
                identity: IdentityAction::BindToProxy,
                backoff_factor: 2,
                render_on_final: true,
                ..GENERIC_RETRY
            },
            Signal::QuotaExceeded => Remedy {
                identity: IdentityAction::DiscardAll,
                backoff_factor: 3,
                ..GENERIC_RETRY
            },
            Signal::TransportFault => Remedy {
                bypass_invalid_proxy: true,
                ..GENERIC_RETRY
            },
            Signal::Unexpected => GENERIC_RETRY,
        }
    }
}

/// Why a fetch failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The target answered 404. Distinct from being blocked.
    NotFound,
    /// Every attempt was used up.
    Exhausted { last_signal: Signal },
    /// The target could not be turned into a fetchable URL.
    InvalidUrl { message: String },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::NotFound => write!(f, "not found"),
            FailureReason::Exhausted { last_signal } => {
                write!(f, "attempts exhausted (last signal: {last_signal:?})")
            }
            FailureReason::InvalidUrl { message } => write!(f, "invalid URL: {message}"),
        }
    }
}

/// Outcome of one logical fetch.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchResult {
    Success {
        html: String,
        identity_used: String,
        /// `None` when the request went out directly or via the fallback.
        proxy_used: Option<String>,
        attempts: u32,
        via_fallback: bool,
    },
    Failure {
        reason: FailureReason,
        attempts: u32,
        last_status: Option<AttemptStatus>,
    },
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            FetchResult::Success { attempts, .. } | FetchResult::Failure { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn html(&self) -> Option<&str> {
        match self {
            FetchResult::Success { html, .. } => Some(html),
            FetchResult::Failure { .. } => None,
        }
    }
}

/// Diagnostics snapshot of the shared pools.
#[derive(Debug, Serialize)]
pub struct EngineStats {
    pub proxies: ProxyStats,
    pub identities: IdentityStats,
}

/// Drives attempts across the shared pools.
///
/// Pools are owned through `Arc`s so several controllers, or several
/// concurrent fetches on one controller, share a single rate gate and a
/// single set of proxies and identities.
pub struct EscalationController {
    governor: Arc<RateGovernor>,
    proxies: Arc<ProxyPool>,
    identities: Arc<IdentityPool>,
    executor: Arc<dyn AttemptExecutor>,
    fallback: Arc<dyn RenderFallback>,
    fetch: FetchConfig,
    render_timeout: Duration,
    target: TargetConfig,
}

impl EscalationController {
    /// Build a controller and all of its collaborators from one config.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            governor: Arc::new(RateGovernor::new(&config.rate_limit)),
            proxies: Arc::new(ProxyPool::from_config(&config.proxy)),
            identities: Arc::new(IdentityPool::new(&config.identity)),
            executor: Arc::new(HttpExecutor::new()),
            fallback: render::from_config(&config.render),
            fetch: config.fetch.clone(),
            render_timeout: config.render.timeout(),
            target: config.target.clone(),
        })
    }

    pub fn with_executor(mut self, executor: Arc<dyn AttemptExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn RenderFallback>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_proxies(mut self, proxies: Arc<ProxyPool>) -> Self {
        self.proxies = proxies;
        self
    }

    pub fn with_identities(mut self, identities: Arc<IdentityPool>) -> Self {
        self.identities = identities;
        self
    }

    pub fn with_governor(mut self, governor: Arc<RateGovernor>) -> Self {
        self.governor = governor;
        self
    }

    pub fn proxies(&self) -> &Arc<ProxyPool> {
        &self.proxies
    }

    pub fn identities(&self) -> &Arc<IdentityPool> {
        &self.identities
    }

    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            proxies: self.proxies.stats(),
            identities: self.identities.stats(),
        }
    }

    /// Expand a bare handle or rooted path against the configured base URL.
    pub fn normalize_target(&self, target: &str) -> Result<String> {
        let target = target.trim();
        let invalid = |message: &str| FetchError::InvalidUrl {
            url: target.to_string(),
            message: message.to_string(),
        };
        if target.is_empty() {
            return Err(invalid("empty target"));
        }

        let candidate = if target.contains("://") {
            target.to_string()
        } else {
            let base = self
                .target
                .base_url
                .as_deref()
                .ok_or_else(|| invalid("relative target and no base_url configured"))?
                .trim_end_matches('/');
            if target.starts_with('/') {
                format!("{base}{target}")
            } else {
                match self.target.path_prefix.trim_matches('/') {
                    "" => format!("{base}/{target}"),
                    prefix => format!("{base}/{prefix}/{target}"),
                }
            }
        };

        let parsed = url::Url::parse(&candidate).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid("only http and https are supported"));
        }
        if parsed.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing host"));
        }
        Ok(parsed.to_string())
    }

    /// Fetch one target, escalating across attempts until success,
    /// a 404, or exhaustion.
    pub async fn fetch(&self, target: &str, credentials: Option<&Credentials>) -> FetchResult {
        let url = match self.normalize_target(target) {
            Ok(url) => url,
            Err(e) => {
                warn!("rejecting target {target}: {e}");
                return FetchResult::Failure {
                    reason: FailureReason::InvalidUrl {
                        message: e.to_string(),
                    },
                    attempts: 0,
                    last_status: None,
                };
            }
        };
        if let Some(creds) = credentials {
            debug!("applying credentials {:?} to {url}", creds.names());
        }

        let max_attempts = self.fetch.max_attempts.max(1);
        let mut bypass_proxy = false;
        let mut pinned: Option<Identity> = None;
        let mut last_status = None;
        let mut last_signal = Signal::Unexpected;

        for attempt in 1..=max_attempts {
            let is_final = attempt == max_attempts;
            self.governor.wait().await;

            let proxy = if std::mem::take(&mut bypass_proxy) {
                None
            } else {
                self.proxies.acquire().await
            };
            let identity = pinned.take().unwrap_or_else(|| self.identities.acquire());
            info!(
                "attempt {attempt}/{max_attempts} for {url} via {} as {}",
                proxy.as_ref().map_or("direct", |p| p.address.as_str()),
                identity.id
            );

            let outcome = self
                .executor
                .execute(AttemptRequest {
                    url: &url,
                    identity: &identity,
                    proxy: proxy.as_ref(),
                    credentials,
                    timeout: self.fetch.timeout(),
                })
                .await;
            self.identities
                .absorb_cookies(&identity.id, &outcome.set_cookies);

            let signal = Signal::classify(&outcome.status);
            debug!(
                "{url}: {} in {}ms, {} bytes, final url {}",
                outcome.status,
                outcome.elapsed_ms,
                outcome.body_size(),
                outcome.final_url
            );
            last_signal = signal;

            match signal {
                Signal::Delivered => {
                    if let Some(p) = &proxy {
                        self.proxies.report_success(p, outcome.elapsed_ms);
                    }
                    info!("fetched {url} on attempt {attempt}");
                    return FetchResult::Success {
                        html: outcome.body,
                        identity_used: identity.id,
                        proxy_used: proxy.map(|p| p.address),
                        attempts: attempt,
                        via_fallback: false,
                    };
                }
                Signal::NotFound => {
                    info!("{url} not found, not retrying");
                    return FetchResult::Failure {
                        reason: FailureReason::NotFound,
                        attempts: attempt,
                        last_status: Some(outcome.status),
                    };
                }
                _ => warn!("{url}: {signal:?} ({})", outcome.status),
            }

            let remedy = signal.remedy();
            if remedy.fail_proxy {
                if let Some(p) = &proxy {
                    self.proxies.report_failure(p);
                    self.executor.release_proxy(p);
                }
            }

            if remedy.render_on_final && is_final {
                if let Some(html) = self.render_fallback(&url, credentials).await {
                    return FetchResult::Success {
                        html,
                        identity_used: identity.id,
                        proxy_used: None,
                        attempts: attempt,
                        via_fallback: true,
                    };
                }
            }

            pinned = self.apply_identity_action(remedy.identity, &identity, proxy.as_ref());
            bypass_proxy = remedy.bypass_invalid_proxy
                && matches!(
                    outcome.status,
                    AttemptStatus::Transport {
                        fault: TransportFault::InvalidProxy,
                        ..
                    }
                );
            last_status = Some(outcome.status);

            if is_final || !remedy.retry {
                break;
            }
            let backoff = self.fetch.retry_delay() * remedy.backoff_factor;
            if !backoff.is_zero() {
                debug!("backing off {}ms before next attempt", backoff.as_millis());
                tokio::time::sleep(backoff).await;
            }
        }

        warn!("giving up on {url} after {max_attempts} attempts");
        FetchResult::Failure {
            reason: FailureReason::Exhausted { last_signal },
            attempts: max_attempts,
            last_status,
        }
    }

    /// Fetch targets one after another. Each target gets its own
    /// independent run; a failure never stops the batch.
    pub async fn fetch_batch(
        &self,
        targets: &[String],
        credentials: Option<&Credentials>,
    ) -> Vec<FetchResult> {
        let mut results = Vec::with_capacity(targets.len());
        for (i, target) in targets.iter().enumerate() {
            info!("batch item {}/{}: {target}", i + 1, targets.len());
            results.push(self.fetch(target, credentials).await);
        }
        results
    }

    /// Fetch targets with up to `concurrency` runs in flight, results in
    /// input order. The rate gate still spaces every outbound attempt.
    pub async fn fetch_concurrent(
        &self,
        targets: &[String],
        credentials: Option<&Credentials>,
        concurrency: usize,
    ) -> Vec<FetchResult> {
        stream::iter(targets)
            .map(|target| self.fetch(target, credentials))
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    async fn render_fallback(&self, url: &str, credentials: Option<&Credentials>) -> Option<String> {
        info!("lightweight path exhausted for {url}, trying render fallback");
        let html = self
            .fallback
            .render(url, credentials, self.render_timeout)
            .await?;
        if self.fallback.looks_blocked(&html) {
            warn!("render fallback for {url} returned a block page");
            return None;
        }
        Some(html)
    }

    /// Apply an identity remedy. Returns the identity the next attempt
    /// must use, if the remedy created one.
    fn apply_identity_action(
        &self,
        action: IdentityAction,
        identity: &Identity,
        proxy: Option<&Proxy>,
    ) -> Option<Identity> {
        match action {
            IdentityAction::Keep => None,
            IdentityAction::Refresh => {
                self.identities.invalidate(&identity.id);
                self.identities.rotate_user_agent(Some(&identity.id));
                None
            }
            IdentityAction::DiscardAll => Some(self.identities.discard_all()),
            IdentityAction::BindToProxy => {
                let tag = proxy.map_or("direct", |p| p.address.as_str());
                Some(self.identities.create_bound_to(tag))
            }
        }
    }
}
