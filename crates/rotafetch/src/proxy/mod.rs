//! Egress proxy pool with per-proxy statistics and soft exclusion.
//!
//! ## Lifecycle of a record
//!
//! `Untested` on admission, `Healthy` after its first success, `Failed` on
//! any failure. Failed records are never removed: they stay in the pool for
//! diagnostics and are skipped by [`ProxyPool::acquire`]. A refresh does not
//! re-admit them unless `readmit_after_secs` is configured and has elapsed;
//! [`ProxyPool::reset`] clears every failure mark.

pub mod parse;
pub mod source;

pub use parse::normalize_address;
pub use source::{HttpProxySource, ProxySource, StaticProxySource};

use crate::config::ProxyConfig;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Minimum spacing between refreshes triggered by an exhausted pool.
const EMPTY_REFRESH_COOLDOWN: Duration = Duration::from_secs(30);

/// A proxy handed out for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Proxy {
    pub address: String,
}

impl Proxy {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    /// Proxy URL as understood by the HTTP client.
    pub fn url(&self) -> String {
        format!("http://{}", self.address)
    }

    /// Host part of the address.
    pub fn host(&self) -> &str {
        self.address
            .rsplit_once(':')
            .map(|(h, _)| h)
            .unwrap_or(&self.address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyState {
    Untested,
    Healthy,
    Failed,
}

/// Bookkeeping for one proxy address.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyRecord {
    pub address: String,
    pub state: ProxyState,
    pub request_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_response_time_ms: f64,
    pub first_used_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    failed_at: Option<Instant>,
}

impl ProxyRecord {
    fn new(address: String) -> Self {
        Self {
            address,
            state: ProxyState::Untested,
            request_count: 0,
            success_count: 0,
            failure_count: 0,
            avg_response_time_ms: 0.0,
            first_used_at: None,
            last_used_at: None,
            failed_at: None,
        }
    }

    pub fn success_rate(&self) -> f64 {
        let finished = self.success_count + self.failure_count;
        if finished == 0 {
            0.0
        } else {
            self.success_count as f64 / finished as f64
        }
    }
}

/// Aggregate pool diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyStats {
    pub enabled: bool,
    pub total: usize,
    pub untested: usize,
    pub healthy: usize,
    pub failed: usize,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub success_rate: f64,
    /// Per-proxy breakdown, most used first.
    pub proxies: Vec<ProxyRecord>,
}

#[derive(Default)]
struct PoolState {
    records: Vec<ProxyRecord>,
    cursor: usize,
    last_refresh: Option<Instant>,
    last_refresh_attempt: Option<Instant>,
}

impl PoolState {
    fn selectable(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.state != ProxyState::Failed)
            .count()
    }

    fn find_mut(&mut self, address: &str) -> Option<&mut ProxyRecord> {
        self.records.iter_mut().find(|r| r.address == address)
    }
}

/// Shared pool of candidate egress proxies.
pub struct ProxyPool {
    enabled: bool,
    max_proxies: usize,
    refresh_interval: Duration,
    readmit_after: Option<Duration>,
    probe_url: String,
    probe_timeout: Duration,
    sources: Vec<Box<dyn ProxySource>>,
    state: Mutex<PoolState>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl ProxyPool {
    /// Build a pool with the HTTP providers and static list from the config.
    pub fn from_config(config: &ProxyConfig) -> Self {
        let mut sources: Vec<Box<dyn ProxySource>> = config
            .sources
            .iter()
            .map(|s| Box::new(HttpProxySource::new(s)) as Box<dyn ProxySource>)
            .collect();
        if !config.static_proxies.is_empty() {
            sources.push(Box::new(StaticProxySource::new(
                "static",
                config.static_proxies.clone(),
            )));
        }
        Self::with_sources(config, sources)
    }

    /// Build a pool over explicit sources.
    pub fn with_sources(config: &ProxyConfig, sources: Vec<Box<dyn ProxySource>>) -> Self {
        Self {
            enabled: config.enabled,
            max_proxies: config.max_proxies.max(1),
            refresh_interval: config.refresh_interval(),
            readmit_after: config.readmit_after_secs.map(Duration::from_secs),
            probe_url: config.probe_url.clone(),
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
            sources,
            state: Mutex::new(PoolState::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// A pool that always answers "connect directly".
    pub fn disabled() -> Self {
        Self::with_sources(
            &ProxyConfig {
                enabled: false,
                ..ProxyConfig::default()
            },
            Vec::new(),
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of records, failed ones included.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pull candidates from every source and rebuild the pool.
    ///
    /// Returns the number of admitted (non-failed) proxies. A failing or
    /// empty source is logged and skipped; if no source yields a valid
    /// candidate the previous contents are kept and 0 is returned.
    pub async fn refresh(&self) -> usize {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    /// Refresh body; the caller holds `refresh_lock`.
    async fn refresh_locked(&self) -> usize {
        let mut candidates = Vec::new();
        for source in &self.sources {
            match source.fetch().await {
                Ok(raw) => {
                    let total = raw.len();
                    let before = candidates.len();
                    candidates.extend(raw.iter().filter_map(|r| normalize_address(r)));
                    let valid = candidates.len() - before;
                    if valid == 0 {
                        warn!("proxy source {} returned no usable proxies", source.name());
                    } else {
                        debug!(
                            "proxy source {}: {valid} valid of {total} entries",
                            source.name()
                        );
                    }
                }
                Err(e) => warn!("proxy source {} failed: {e}", source.name()),
            }
        }

        if candidates.is_empty() {
            warn!("no proxy candidates from any source, keeping current pool");
            self.lock().last_refresh_attempt = Some(Instant::now());
            return 0;
        }

        let now = Instant::now();
        let mut state = self.lock();
        let mut previous: HashMap<String, ProxyRecord> = state
            .records
            .drain(..)
            .map(|r| (r.address.clone(), r))
            .collect();

        let mut seen = HashSet::new();
        let mut admitted = Vec::new();
        for address in candidates {
            if admitted.len() >= self.max_proxies {
                break;
            }
            if !seen.insert(address.clone()) {
                continue;
            }
            let excluded = previous
                .get(&address)
                .is_some_and(|r| r.state == ProxyState::Failed && !self.readmissible(r, now));
            if excluded {
                continue;
            }
            let mut record = previous
                .remove(&address)
                .unwrap_or_else(|| ProxyRecord::new(address));
            if record.state == ProxyState::Failed {
                debug!("re-admitting proxy {}", record.address);
                record.state = ProxyState::Untested;
                record.failed_at = None;
            }
            admitted.push(record);
        }

        let count = admitted.len();
        let mut retained: Vec<ProxyRecord> = previous
            .into_values()
            .filter(|r| r.state == ProxyState::Failed)
            .collect();
        retained.sort_by(|a, b| a.address.cmp(&b.address));

        state.records = admitted;
        state.records.extend(retained);
        state.cursor = 0;
        state.last_refresh = Some(now);
        state.last_refresh_attempt = Some(now);

        info!(
            "proxy pool refreshed: {count} active, {} failed retained",
            state.records.len() - count
        );
        count
    }

    /// Next proxy by round-robin over non-failed records, or `None` to
    /// connect directly.
    pub async fn acquire(&self) -> Option<Proxy> {
        if !self.enabled {
            return None;
        }

        if self.needs_refresh() {
            let _guard = self.refresh_lock.lock().await;
            // Another caller may have refreshed while this one waited.
            if self.needs_refresh() {
                self.refresh_locked().await;
            }
        }

        let mut state = self.lock();
        let len = state.records.len();
        if len == 0 {
            debug!("proxy pool empty, connecting directly");
            return None;
        }

        for _ in 0..len * 2 {
            let idx = state.cursor % len;
            state.cursor = (idx + 1) % len;
            let record = &mut state.records[idx];
            if record.state == ProxyState::Failed {
                continue;
            }
            let now = Utc::now();
            record.request_count += 1;
            record.first_used_at.get_or_insert(now);
            record.last_used_at = Some(now);
            return Some(Proxy::new(record.address.clone()));
        }

        warn!("all proxies failed, connecting directly");
        None
    }

    /// Record a successful attempt through `proxy`.
    ///
    /// A failed proxy stays failed; only refresh or reset re-admits it.
    pub fn report_success(&self, proxy: &Proxy, elapsed_ms: u64) {
        let mut state = self.lock();
        let Some(record) = state.find_mut(&proxy.address) else {
            return;
        };
        record.success_count += 1;
        let n = record.success_count as f64;
        record.avg_response_time_ms += (elapsed_ms as f64 - record.avg_response_time_ms) / n;
        if record.state == ProxyState::Untested {
            record.state = ProxyState::Healthy;
        }
    }

    /// Record a failed attempt through `proxy` and exclude it from selection.
    pub fn report_failure(&self, proxy: &Proxy) {
        let mut state = self.lock();
        let Some(record) = state.find_mut(&proxy.address) else {
            return;
        };
        record.failure_count += 1;
        record.state = ProxyState::Failed;
        record.failed_at = Some(Instant::now());
        debug!("proxy {} marked failed", proxy.address);
    }

    /// Clear every failure mark and rewind the cursor.
    pub fn reset(&self) {
        let mut state = self.lock();
        for record in &mut state.records {
            if record.state == ProxyState::Failed {
                record.state = ProxyState::Untested;
                record.failed_at = None;
            }
        }
        state.cursor = 0;
    }

    pub fn record(&self, address: &str) -> Option<ProxyRecord> {
        self.lock()
            .records
            .iter()
            .find(|r| r.address == address)
            .cloned()
    }

    pub fn stats(&self) -> ProxyStats {
        let state = self.lock();
        let mut proxies = state.records.clone();
        proxies.sort_by(|a, b| {
            b.request_count
                .cmp(&a.request_count)
                .then_with(|| a.address.cmp(&b.address))
        });

        let count = |s: ProxyState| proxies.iter().filter(|r| r.state == s).count();
        let total_successes: u64 = proxies.iter().map(|r| r.success_count).sum();
        let total_failures: u64 = proxies.iter().map(|r| r.failure_count).sum();
        let finished = total_successes + total_failures;

        ProxyStats {
            enabled: self.enabled,
            total: proxies.len(),
            untested: count(ProxyState::Untested),
            healthy: count(ProxyState::Healthy),
            failed: count(ProxyState::Failed),
            total_requests: proxies.iter().map(|r| r.request_count).sum(),
            total_successes,
            total_failures,
            success_rate: if finished == 0 {
                0.0
            } else {
                total_successes as f64 / finished as f64
            },
            proxies,
        }
    }

    /// Check one address by fetching the probe URL through it.
    pub async fn probe(&self, address: &str) -> bool {
        let proxy = match reqwest::Proxy::all(format!("http://{address}")) {
            Ok(p) => p,
            Err(e) => {
                debug!("proxy {address} rejected by client: {e}");
                return false;
            }
        };
        let client = match reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.probe_timeout)
            .build()
        {
            Ok(c) => c,
            Err(_) => return false,
        };
        match client.get(&self.probe_url).send().await {
            Ok(resp) => resp.status().as_u16() == 200,
            Err(e) => {
                debug!("proxy {address} probe failed: {e}");
                false
            }
        }
    }

    /// Probe every selectable proxy and mark the unresponsive ones failed.
    ///
    /// Returns `(responsive, failed)` counts.
    pub async fn probe_all(&self, concurrency: usize) -> (usize, usize) {
        let addresses: Vec<String> = self
            .lock()
            .records
            .iter()
            .filter(|r| r.state != ProxyState::Failed)
            .map(|r| r.address.clone())
            .collect();

        let results: Vec<(String, bool, u64)> = stream::iter(addresses)
            .map(|address| async move {
                let start = Instant::now();
                let ok = self.probe(&address).await;
                (address, ok, start.elapsed().as_millis() as u64)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut ok_count = 0;
        for (address, ok, elapsed_ms) in &results {
            let proxy = Proxy::new(address.clone());
            if *ok {
                ok_count += 1;
                self.report_success(&proxy, *elapsed_ms);
            } else {
                self.report_failure(&proxy);
            }
        }
        info!("proxy probe: {ok_count} responsive, {} failed", results.len() - ok_count);
        (ok_count, results.len() - ok_count)
    }

    /// Whether `acquire` should pull from the sources first. Outside the
    /// regular interval, refreshes are spaced by `EMPTY_REFRESH_COOLDOWN`
    /// so dead sources are not hit on every attempt.
    fn needs_refresh(&self) -> bool {
        let state = self.lock();
        let cooled_down = state
            .last_refresh_attempt
            .map_or(true, |t| t.elapsed() > EMPTY_REFRESH_COOLDOWN);
        match state.last_refresh {
            None => cooled_down,
            Some(last) if last.elapsed() > self.refresh_interval => cooled_down,
            Some(_) => state.selectable() == 0 && cooled_down,
        }
    }

    fn readmissible(&self, record: &ProxyRecord, now: Instant) -> bool {
        match (self.readmit_after, record.failed_at) {
            (Some(after), Some(at)) => now.duration_since(at) >= after,
            _ => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FailingSource;

    #[async_trait]
    impl ProxySource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }
        async fn fetch(&self) -> Result<Vec<String>> {
            Err(FetchError::source_failed("failing", "connection refused"))
        }
    }

    /// Serves a different list on each call.
    struct SequenceSource {
        lists: Vec<Vec<String>>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ProxySource for SequenceSource {
        fn name(&self) -> &str {
            "sequence"
        }
        async fn fetch(&self) -> Result<Vec<String>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(self.lists.get(n).or(self.lists.last()).cloned().unwrap_or_default())
        }
    }

    fn config() -> ProxyConfig {
        ProxyConfig {
            sources: Vec::new(),
            ..ProxyConfig::default()
        }
    }

    fn static_pool(addresses: &[&str]) -> ProxyPool {
        ProxyPool::with_sources(
            &config(),
            vec![Box::new(StaticProxySource::new(
                "static",
                addresses.iter().map(|s| s.to_string()).collect(),
            ))],
        )
    }

    #[tokio::test]
    async fn test_round_robin_wraps() {
        let pool = static_pool(&["1.1.1.1:80", "2.2.2.2:80", "3.3.3.3:80"]);
        let mut got = Vec::new();
        for _ in 0..4 {
            got.push(pool.acquire().await.unwrap().address);
        }
        assert_eq!(got, vec!["1.1.1.1:80", "2.2.2.2:80", "3.3.3.3:80", "1.1.1.1:80"]);
    }

    #[tokio::test]
    async fn test_refresh_validates_dedupes_and_caps() {
        let mut cfg = config();
        cfg.max_proxies = 2;
        let pool = ProxyPool::with_sources(
            &cfg,
            vec![Box::new(StaticProxySource::new(
                "static",
                vec![
                    "1.1.1.1:80".into(),
                    "not a proxy".into(),
                    "1.1.1.1:80".into(),
                    "2.2.2.2:0".into(),
                    "3.3.3.3:3128".into(),
                    "4.4.4.4:8080".into(),
                ],
            ))],
        );
        assert_eq!(pool.refresh().await, 2);
        let stats = pool.stats();
        let mut addrs: Vec<_> = stats.proxies.iter().map(|r| r.address.clone()).collect();
        addrs.sort();
        assert_eq!(addrs, vec!["1.1.1.1:80", "3.3.3.3:3128"]);
    }

    #[tokio::test]
    async fn test_failed_proxy_never_reacquired() {
        let pool = static_pool(&["1.1.1.1:80", "2.2.2.2:80"]);
        let first = pool.acquire().await.unwrap();
        pool.report_failure(&first);
        for _ in 0..6 {
            assert_ne!(pool.acquire().await.unwrap(), first);
        }
        // A refresh with the same source data keeps it excluded.
        pool.refresh().await;
        for _ in 0..6 {
            assert_ne!(pool.acquire().await.unwrap(), first);
        }
        let record = pool.record(&first.address).unwrap();
        assert_eq!(record.state, ProxyState::Failed);
        assert_eq!(record.failure_count, 1);
    }

    #[tokio::test]
    async fn test_all_failed_connects_directly() {
        let pool = static_pool(&["1.1.1.1:80", "2.2.2.2:80"]);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        pool.report_failure(&a);
        pool.report_failure(&b);
        assert!(pool.acquire().await.is_none());
        // Failed records are kept for inspection.
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn test_success_does_not_revive_failed() {
        let pool = static_pool(&["1.1.1.1:80"]);
        let p = pool.acquire().await.unwrap();
        pool.report_failure(&p);
        pool.report_success(&p, 120);
        assert_eq!(pool.record(&p.address).unwrap().state, ProxyState::Failed);
    }

    #[tokio::test]
    async fn test_success_updates_stats() {
        let pool = static_pool(&["1.1.1.1:80"]);
        let p = pool.acquire().await.unwrap();
        pool.report_success(&p, 100);
        let p = pool.acquire().await.unwrap();
        pool.report_success(&p, 300);

        let rec = pool.record(&p.address).unwrap();
        assert_eq!(rec.state, ProxyState::Healthy);
        assert_eq!(rec.request_count, 2);
        assert_eq!(rec.success_count, 2);
        assert!((rec.avg_response_time_ms - 200.0).abs() < f64::EPSILON);
        assert!(rec.first_used_at.is_some());
        assert_eq!(pool.stats().success_rate, 1.0);
    }

    #[tokio::test]
    async fn test_failing_source_does_not_abort_others() {
        let pool = ProxyPool::with_sources(
            &config(),
            vec![
                Box::new(FailingSource),
                Box::new(StaticProxySource::new("static", vec!["5.5.5.5:55".into()])),
            ],
        );
        assert_eq!(pool.refresh().await, 1);
        assert_eq!(pool.acquire().await.unwrap().address, "5.5.5.5:55");
    }

    #[tokio::test]
    async fn test_all_sources_failing_keeps_previous_contents() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pool = ProxyPool::with_sources(
            &config(),
            vec![Box::new(SequenceSource {
                lists: vec![vec!["6.6.6.6:66".into()], vec![]],
                calls: Arc::clone(&calls),
            })],
        );
        assert_eq!(pool.refresh().await, 1);
        assert_eq!(pool.refresh().await, 0);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.acquire().await.unwrap().address, "6.6.6.6:66");
    }

    #[tokio::test]
    async fn test_dead_sources_not_refetched_on_every_acquire() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pool = ProxyPool::with_sources(
            &config(),
            vec![Box::new(SequenceSource {
                lists: vec![vec![]],
                calls: Arc::clone(&calls),
            })],
        );
        for _ in 0..5 {
            assert!(pool.acquire().await.is_none());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_acquires_share_one_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pool = ProxyPool::with_sources(
            &config(),
            vec![Box::new(SequenceSource {
                lists: vec![vec!["8.8.8.8:88".into()]],
                calls: Arc::clone(&calls),
            })],
        );
        let (a, b, c) = tokio::join!(pool.acquire(), pool.acquire(), pool.acquire());
        assert!(a.is_some() && b.is_some() && c.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reset_clears_failures() {
        let pool = static_pool(&["1.1.1.1:80"]);
        let p = pool.acquire().await.unwrap();
        pool.report_failure(&p);
        assert!(pool.acquire().await.is_none());
        pool.reset();
        assert_eq!(pool.acquire().await.unwrap(), p);
    }

    #[tokio::test]
    async fn test_readmit_after_cooldown() {
        let mut cfg = config();
        cfg.readmit_after_secs = Some(0);
        let pool = ProxyPool::with_sources(
            &cfg,
            vec![Box::new(StaticProxySource::new("static", vec!["7.7.7.7:77".into()]))],
        );
        let p = pool.acquire().await.unwrap();
        pool.report_failure(&p);
        pool.refresh().await;
        let rec = pool.record(&p.address).unwrap();
        assert_eq!(rec.state, ProxyState::Untested);
        assert_eq!(rec.failure_count, 1);
    }

    #[tokio::test]
    async fn test_disabled_pool_returns_none() {
        let pool = ProxyPool::disabled();
        assert!(!pool.is_enabled());
        assert!(pool.acquire().await.is_none());
    }

    #[tokio::test]
    async fn test_stats_sorted_by_usage() {
        let pool = static_pool(&["1.1.1.1:80", "2.2.2.2:80"]);
        pool.acquire().await;
        pool.acquire().await;
        pool.acquire().await;
        let stats = pool.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.proxies[0].address, "1.1.1.1:80");
        assert_eq!(stats.proxies[0].request_count, 2);
        assert_eq!(stats.total_requests, 3);
    }

    #[test]
    fn test_proxy_host_and_url() {
        let p = Proxy::new("10.1.2.3:8080");
        assert_eq!(p.host(), "10.1.2.3");
        assert_eq!(p.url(), "http://10.1.2.3:8080");
    }
}
