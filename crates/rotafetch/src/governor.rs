//! Process-wide request spacing.
//!
//! The governor is a gate, not a sleep: the time of the last request is
//! read, waited on and rewritten while holding one async mutex, so two
//! concurrent callers can never both pass inside the same window.

use crate::config::RateLimitConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Enforces a random minimum interval between consecutive outbound requests.
pub struct RateGovernor {
    enabled: bool,
    min_delay: Duration,
    max_delay: Duration,
    last_request: tokio::sync::Mutex<Option<Instant>>,
    rng: Mutex<StdRng>,
}

impl RateGovernor {
    /// Create a governor with an entropy-seeded RNG.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Create a governor whose delay samples are reproducible.
    pub fn with_seed(config: &RateLimitConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &RateLimitConfig, rng: StdRng) -> Self {
        Self {
            enabled: config.enabled,
            min_delay: Duration::from_millis(config.min_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.min_delay_ms)),
            last_request: tokio::sync::Mutex::new(None),
            rng: Mutex::new(rng),
        }
    }

    /// A governor that never waits.
    pub fn disabled() -> Self {
        Self::new(&RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Block until a freshly sampled delay has passed since the previous
    /// call returned.
    pub async fn wait(&self) {
        if !self.enabled {
            return;
        }

        let mut last = self.last_request.lock().await;
        let delay = self.sample_delay();

        if let Some(prev) = *last {
            let since = prev.elapsed();
            if since < delay {
                let remaining = delay - since;
                tracing::debug!("rate governor waiting {:.2}s", remaining.as_secs_f64());
                tokio::time::sleep(remaining).await;
            }
        }

        *last = Some(Instant::now());
    }

    /// Forget the last request time; the next `wait()` returns immediately.
    pub async fn reset(&self) {
        *self.last_request.lock().await = None;
    }

    fn sample_delay(&self) -> Duration {
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        Duration::from_millis(rng.gen_range(min..=max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn config(min: u64, max: u64) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            min_delay_ms: min,
            max_delay_ms: max,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_call_does_not_wait() {
        let gov = RateGovernor::with_seed(&config(1_000, 2_000), 7);
        let start = Instant::now();
        gov.wait().await;
        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_calls_spaced_by_min_delay() {
        let gov = RateGovernor::with_seed(&config(1_000, 2_000), 7);
        gov.wait().await;
        let mut prev = Instant::now();
        for _ in 0..5 {
            gov.wait().await;
            let now = Instant::now();
            let gap = now - prev;
            assert!(gap >= Duration::from_millis(1_000), "gap {gap:?}");
            assert!(gap <= Duration::from_millis(2_050), "gap {gap:?}");
            prev = now;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_are_serialized() {
        let gov = Arc::new(RateGovernor::with_seed(&config(500, 500), 1));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let g = Arc::clone(&gov);
            handles.push(tokio::spawn(async move {
                g.wait().await;
                Instant::now()
            }));
        }
        let mut times = Vec::new();
        for h in handles {
            times.push(h.await.unwrap());
        }
        times.sort();
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_never_waits() {
        let gov = RateGovernor::disabled();
        let start = Instant::now();
        for _ in 0..10 {
            gov.wait().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_last_request() {
        let gov = RateGovernor::with_seed(&config(3_000, 3_000), 3);
        gov.wait().await;
        gov.reset().await;
        let start = Instant::now();
        gov.wait().await;
        assert!(start.elapsed() < Duration::from_millis(1));
    }
}
