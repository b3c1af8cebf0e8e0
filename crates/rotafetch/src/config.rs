//! Engine configuration.
//!
//! Every field has a default, so a partial JSON file only needs to name the
//! values it overrides. [`EngineConfig::load`] falls back to the defaults
//! when the file does not exist and fails on a file it cannot parse.

use crate::error::{FetchError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default proxy provider: newline-delimited `ip:port` list.
pub const DEFAULT_PROXY_SOURCE: &str = "https://api.proxyscrape.com/v2/?request=get&protocol=http&timeout=10000&country=all&ssl=all&anonymity=all";

/// Desktop-browser user agents used when the config supplies none.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_1) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

/// Page markers that identify a block/interstitial page instead of content.
pub const DEFAULT_BLOCK_MARKERS: &[&str] = &[
    "window.onload = function()",
    "trkCode=bf",
    "If you are the owner",
];

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub proxy: ProxyConfig,
    pub rate_limit: RateLimitConfig,
    pub fetch: FetchConfig,
    pub identity: IdentityConfig,
    pub render: RenderConfig,
    pub target: TargetConfig,
}

impl EngineConfig {
    /// Load configuration from a JSON file, using defaults if it is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| FetchError::Config(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limit;
        if rl.min_delay_ms > rl.max_delay_ms {
            return Err(FetchError::Config(format!(
                "rate_limit.min_delay_ms ({}) exceeds max_delay_ms ({})",
                rl.min_delay_ms, rl.max_delay_ms
            )));
        }
        if self.fetch.max_attempts == 0 {
            return Err(FetchError::Config("fetch.max_attempts must be at least 1".into()));
        }
        if self.proxy.max_proxies == 0 {
            return Err(FetchError::Config("proxy.max_proxies must be at least 1".into()));
        }
        if self.identity.max_identities == 0 {
            return Err(FetchError::Config(
                "identity.max_identities must be at least 1".into(),
            ));
        }
        for (name, p) in [
            ("identity.create_probability", self.identity.create_probability),
            ("identity.rotate_probability", self.identity.rotate_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(FetchError::Config(format!("{name} must be within [0, 1], got {p}")));
            }
        }
        if self.render.chain.contains(&RenderEngine::Chain) {
            return Err(FetchError::Config("render.chain cannot contain \"chain\"".into()));
        }
        if let Some(base) = &self.target.base_url {
            url::Url::parse(base)
                .map_err(|e| FetchError::Config(format!("target.base_url '{base}': {e}")))?;
        }
        Ok(())
    }
}

/// Format of the text a proxy provider returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// One `host:port` per line.
    #[default]
    Plain,
    /// JSON array, or an object holding the array under `json_field`.
    Json,
    /// HTML page with an address/port table.
    HtmlTable,
}

/// One proxy provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxySourceConfig {
    pub url: String,
    #[serde(default)]
    pub format: SourceFormat,
    /// Field holding the proxy list when `format` is `json` and the
    /// document is an object.
    #[serde(default)]
    pub json_field: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub sources: Vec<ProxySourceConfig>,
    /// Fixed addresses admitted on every refresh alongside the sources.
    pub static_proxies: Vec<String>,
    pub max_proxies: usize,
    pub refresh_interval_secs: u64,
    /// Failed addresses re-enter the pool on refresh once their last failure
    /// is this old. `None` keeps them excluded until an explicit reset.
    pub readmit_after_secs: Option<u64>,
    pub probe_url: String,
    pub probe_timeout_ms: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sources: vec![ProxySourceConfig {
                url: DEFAULT_PROXY_SOURCE.to_string(),
                format: SourceFormat::Plain,
                json_field: None,
            }],
            static_proxies: Vec::new(),
            max_proxies: 50,
            refresh_interval_secs: 300,
            readmit_after_secs: None,
            probe_url: "https://httpbin.org/ip".to_string(),
            probe_timeout_ms: 5_000,
        }
    }
}

impl ProxyConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_delay_ms: 2_000,
            max_delay_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub max_attempts: u32,
    /// Base backoff between attempts; escalated per failure class.
    pub retry_delay_ms: u64,
    pub timeout_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 5_000,
            timeout_ms: 30_000,
        }
    }
}

impl FetchConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub max_identities: usize,
    pub create_probability: f64,
    pub rotate_probability: f64,
    pub user_agents: Vec<String>,
    /// Header carrying the tag of an identity created for a specific path.
    pub bound_header: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            max_identities: 10,
            create_probability: 0.3,
            rotate_probability: 0.2,
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            bound_header: "X-Forwarded-For".to_string(),
        }
    }
}

/// Which heavyweight fallback to use once the lightweight path is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderEngine {
    #[default]
    Chromium,
    Archive,
    /// Reader-proxy service that returns a text rendering of the page.
    Reader,
    /// Every engine in `render.chain`, in order.
    Chain,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub engine: RenderEngine,
    pub timeout_ms: u64,
    /// CSS selector whose presence means the content has loaded.
    pub content_selector: Option<String>,
    pub block_markers: Vec<String>,
    /// Availability endpoint for the archive fallback.
    pub archive_endpoint: String,
    /// Prefix the target URL is appended to for the reader fallback.
    pub reader_endpoint: String,
    /// Engines tried in order when `engine` is `chain`.
    pub chain: Vec<RenderEngine>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            engine: RenderEngine::Chromium,
            timeout_ms: 30_000,
            content_selector: None,
            block_markers: DEFAULT_BLOCK_MARKERS.iter().map(|s| s.to_string()).collect(),
            archive_endpoint: "https://archive.org/wayback/available".to_string(),
            reader_endpoint: "https://r.jina.ai/".to_string(),
            chain: vec![RenderEngine::Chromium, RenderEngine::Reader, RenderEngine::Archive],
        }
    }
}

impl RenderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// How bare handles and rooted paths expand into absolute URLs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub base_url: Option<String>,
    /// Prefix placed between `base_url` and a bare handle, e.g. `/in/`.
    pub path_prefix: String,
}
