//! Reusable network identities: user agent, header set and cookie jar.
//!
//! The pool hands out snapshots; callers report back by identity id. Every
//! operation runs under one mutex, so a `discard_all` can never interleave
//! with an `acquire` and hand out an identity that is being dropped.

use crate::config::IdentityConfig;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Browser-like request headers sent with every identity, in order.
const BASE_HEADERS: &[(&str, &str)] = &[
    (
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
    ),
    ("Accept-Language", "en-US,en;q=0.5"),
    ("Connection", "keep-alive"),
    ("Upgrade-Insecure-Requests", "1"),
    ("Sec-Fetch-Dest", "document"),
    ("Sec-Fetch-Mode", "navigate"),
    ("Sec-Fetch-Site", "none"),
    ("Cache-Control", "max-age=0"),
];

const FALLBACK_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// One simulated browser session.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub id: String,
    pub user_agent: String,
    /// Request headers other than `User-Agent` and `Cookie`, in send order.
    pub headers: Vec<(String, String)>,
    pub cookies: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    /// Tag this identity was created for, if any (e.g. a proxy address).
    pub bound_to: Option<String>,
}

impl Identity {
    /// `Cookie` header value for the jar, if it holds anything.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Per-identity diagnostics entry.
#[derive(Debug, Clone, Serialize)]
pub struct IdentitySummary {
    pub id: String,
    pub user_agent: String,
    pub cookie_count: usize,
    pub bound_to: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentityStats {
    pub total: usize,
    pub identities: Vec<IdentitySummary>,
}

struct PoolInner {
    identities: BTreeMap<String, Identity>,
    next_id: u64,
    rng: StdRng,
}

/// Bounded set of identities shared by all fetches.
pub struct IdentityPool {
    max_identities: usize,
    create_probability: f64,
    rotate_probability: f64,
    user_agents: Vec<String>,
    bound_header: String,
    inner: Mutex<PoolInner>,
}

impl IdentityPool {
    /// Create a pool seeded from entropy, holding one identity.
    pub fn new(config: &IdentityConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Create a pool whose random choices are reproducible.
    pub fn with_seed(config: &IdentityConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &IdentityConfig, rng: StdRng) -> Self {
        let user_agents = if config.user_agents.is_empty() {
            vec![FALLBACK_USER_AGENT.to_string()]
        } else {
            config.user_agents.clone()
        };
        let pool = Self {
            max_identities: config.max_identities.max(1),
            create_probability: config.create_probability.clamp(0.0, 1.0),
            rotate_probability: config.rotate_probability.clamp(0.0, 1.0),
            user_agents,
            bound_header: config.bound_header.clone(),
            inner: Mutex::new(PoolInner {
                identities: BTreeMap::new(),
                next_id: 0,
                rng,
            }),
        };
        {
            let mut inner = pool.lock();
            pool.create_locked(&mut inner, None);
        }
        pool
    }

    /// Pick an identity at random, sometimes creating a new one first and
    /// sometimes rotating the chosen identity's user agent.
    pub fn acquire(&self) -> Identity {
        let mut inner = self.lock();

        let under_cap = inner.identities.len() < self.max_identities;
        if inner.identities.is_empty()
            || (under_cap && inner.rng.gen_bool(self.create_probability))
        {
            self.create_locked(&mut inner, None);
        }

        let ids: Vec<String> = inner.identities.keys().cloned().collect();
        let id = ids
            .choose(&mut inner.rng)
            .cloned()
            .unwrap_or_default();

        if inner.rng.gen_bool(self.rotate_probability) {
            self.rotate_locked(&mut inner, &id);
        }

        inner
            .identities
            .get(&id)
            .cloned()
            .unwrap_or_else(|| self.create_locked(&mut inner, None))
    }

    /// Snapshot of one identity.
    pub fn get(&self, id: &str) -> Option<Identity> {
        self.lock().identities.get(id).cloned()
    }

    /// Clear one identity's cookie jar, keeping its user agent.
    pub fn invalidate(&self, id: &str) {
        if let Some(identity) = self.lock().identities.get_mut(id) {
            identity.cookies.clear();
            info!("cleared cookies for {id}");
        }
    }

    /// Clear every cookie jar.
    pub fn invalidate_all(&self) {
        let mut inner = self.lock();
        for identity in inner.identities.values_mut() {
            identity.cookies.clear();
        }
        info!("cleared cookies for all {} identities", inner.identities.len());
    }

    /// Drop every identity and start over with exactly one fresh one.
    pub fn discard_all(&self) -> Identity {
        let mut inner = self.lock();
        let dropped = inner.identities.len();
        inner.identities.clear();
        let fresh = self.create_locked(&mut inner, None);
        info!("discarded {dropped} identities, created {}", fresh.id);
        fresh
    }

    /// Create and register an identity carrying a marker header for `tag`.
    ///
    /// At capacity, the oldest identity is evicted to make room.
    pub fn create_bound_to(&self, tag: &str) -> Identity {
        let mut inner = self.lock();
        if inner.identities.len() >= self.max_identities {
            let oldest = inner
                .identities
                .values()
                .min_by_key(|i| i.created_at)
                .map(|i| i.id.clone());
            if let Some(oldest) = oldest {
                inner.identities.remove(&oldest);
                debug!("evicted {oldest} to make room for bound identity");
            }
        }
        self.create_locked(&mut inner, Some(tag))
    }

    /// Replace the user agent of one identity, or of all when `id` is `None`.
    pub fn rotate_user_agent(&self, id: Option<&str>) {
        let mut inner = self.lock();
        match id {
            Some(id) => self.rotate_locked(&mut inner, id),
            None => {
                let ids: Vec<String> = inner.identities.keys().cloned().collect();
                for id in ids {
                    self.rotate_locked(&mut inner, &id);
                }
            }
        }
    }

    /// Store cookies set by a response into the identity's jar.
    pub fn absorb_cookies(&self, id: &str, cookies: &[(String, String)]) {
        if cookies.is_empty() {
            return;
        }
        if let Some(identity) = self.lock().identities.get_mut(id) {
            for (name, value) in cookies {
                identity.cookies.insert(name.clone(), value.clone());
            }
        }
    }

    /// Remove a single identity. The pool is refilled on the next acquire.
    pub fn remove(&self, id: &str) -> bool {
        self.lock().identities.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> IdentityStats {
        let inner = self.lock();
        IdentityStats {
            total: inner.identities.len(),
            identities: inner
                .identities
                .values()
                .map(|i| IdentitySummary {
                    id: i.id.clone(),
                    user_agent: i.user_agent.clone(),
                    cookie_count: i.cookies.len(),
                    bound_to: i.bound_to.clone(),
                })
                .collect(),
        }
    }

    fn create_locked(&self, inner: &mut PoolInner, tag: Option<&str>) -> Identity {
        let n = inner.next_id;
        inner.next_id += 1;
        let id = match tag {
            Some(tag) => format!("ident-{n}-{}", sanitize_tag(tag)),
            None => format!("ident-{n}"),
        };

        let user_agent = self.pick_user_agent(&mut inner.rng, None);
        let mut headers: Vec<(String, String)> = BASE_HEADERS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        if let Some(tag) = tag {
            headers.push((self.bound_header.clone(), tag.to_string()));
        }

        let identity = Identity {
            id: id.clone(),
            user_agent,
            headers,
            cookies: BTreeMap::new(),
            created_at: Utc::now(),
            bound_to: tag.map(str::to_string),
        };
        debug!("created identity {id} ({})", identity.user_agent);
        inner.identities.insert(id, identity.clone());
        identity
    }

    fn rotate_locked(&self, inner: &mut PoolInner, id: &str) {
        let current = match inner.identities.get(id) {
            Some(i) => i.user_agent.clone(),
            None => return,
        };
        let next = self.pick_user_agent(&mut inner.rng, Some(&current));
        if let Some(identity) = inner.identities.get_mut(id) {
            debug!("rotated user agent of {id}");
            identity.user_agent = next;
        }
    }

    /// Random user agent, avoiding `current` when there is an alternative.
    fn pick_user_agent(&self, rng: &mut StdRng, current: Option<&str>) -> String {
        let candidates: Vec<&String> = self
            .user_agents
            .iter()
            .filter(|ua| Some(ua.as_str()) != current)
            .collect();
        match candidates.choose(rng) {
            Some(ua) => (*ua).clone(),
            None => self.user_agents[0].clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn sanitize_tag(tag: &str) -> String {
    tag.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(create: f64, rotate: f64, max: usize) -> IdentityConfig {
        IdentityConfig {
            max_identities: max,
            create_probability: create,
            rotate_probability: rotate,
            ..IdentityConfig::default()
        }
    }

    #[test]
    fn test_starts_with_one_identity() {
        let pool = IdentityPool::with_seed(&IdentityConfig::default(), 1);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_acquire_never_exceeds_max() {
        let pool = IdentityPool::with_seed(&config(1.0, 0.0, 4), 2);
        for _ in 0..20 {
            pool.acquire();
        }
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn test_zero_create_probability_reuses() {
        let pool = IdentityPool::with_seed(&config(0.0, 0.0, 10), 3);
        let first = pool.acquire();
        for _ in 0..10 {
            assert_eq!(pool.acquire().id, first.id);
        }
    }

    #[test]
    fn test_same_seed_same_choices() {
        let a = IdentityPool::with_seed(&config(0.5, 0.5, 10), 42);
        let b = IdentityPool::with_seed(&config(0.5, 0.5, 10), 42);
        for _ in 0..15 {
            let (x, y) = (a.acquire(), b.acquire());
            assert_eq!(x.id, y.id);
            assert_eq!(x.user_agent, y.user_agent);
        }
    }

    #[test]
    fn test_rotation_changes_user_agent() {
        let pool = IdentityPool::with_seed(&config(0.0, 1.0, 10), 4);
        let before = pool.get("ident-0").unwrap().user_agent;
        let after = pool.acquire();
        assert_eq!(after.id, "ident-0");
        assert_ne!(after.user_agent, before);
    }

    #[test]
    fn test_invalidate_clears_cookies_only() {
        let pool = IdentityPool::with_seed(&config(0.0, 0.0, 10), 5);
        let id = pool.acquire().id;
        pool.absorb_cookies(&id, &[("sid".into(), "abc".into())]);
        let ua = pool.get(&id).unwrap().user_agent;
        assert_eq!(pool.get(&id).unwrap().cookie_header().as_deref(), Some("sid=abc"));

        pool.invalidate(&id);
        let after = pool.get(&id).unwrap();
        assert!(after.cookies.is_empty());
        assert_eq!(after.user_agent, ua);
    }

    #[test]
    fn test_invalidate_all() {
        let pool = IdentityPool::with_seed(&config(1.0, 0.0, 3), 6);
        for _ in 0..3 {
            let id = pool.acquire().id;
            pool.absorb_cookies(&id, &[("a".into(), "1".into())]);
        }
        pool.invalidate_all();
        assert!(pool.stats().identities.iter().all(|i| i.cookie_count == 0));
    }

    #[test]
    fn test_discard_all_leaves_exactly_one() {
        let pool = IdentityPool::with_seed(&config(1.0, 0.0, 8), 7);
        for _ in 0..10 {
            pool.acquire();
        }
        assert!(pool.len() > 1);
        let fresh = pool.discard_all();
        assert_eq!(pool.len(), 1);
        assert!(pool.get(&fresh.id).is_some());
    }

    #[test]
    fn test_create_bound_to_carries_marker_header() {
        let pool = IdentityPool::with_seed(&IdentityConfig::default(), 8);
        let bound = pool.create_bound_to("10.0.0.9");
        assert_eq!(bound.bound_to.as_deref(), Some("10.0.0.9"));
        assert!(bound
            .headers
            .iter()
            .any(|(k, v)| k == "X-Forwarded-For" && v == "10.0.0.9"));
        assert!(bound.id.ends_with("10_0_0_9"));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_create_bound_to_respects_capacity() {
        let pool = IdentityPool::with_seed(&config(0.0, 0.0, 1), 9);
        let bound = pool.create_bound_to("1.2.3.4");
        assert_eq!(pool.len(), 1);
        assert!(pool.get("ident-0").is_none());
        assert!(pool.get(&bound.id).is_some());
    }

    #[test]
    fn test_removed_pool_refills_on_acquire() {
        let pool = IdentityPool::with_seed(&config(0.0, 0.0, 5), 10);
        assert!(pool.remove("ident-0"));
        assert!(pool.is_empty());
        let fresh = pool.acquire();
        assert_eq!(pool.len(), 1);
        assert_eq!(fresh.id, "ident-1");
    }
}
