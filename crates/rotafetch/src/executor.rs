//! Single-attempt fetch.
//!
//! An executor performs exactly one request and reports what happened. It
//! never retries and never returns an error: transport faults are part of
//! the [`AttemptOutcome`]. All retry policy lives in the controller.

use crate::credentials::Credentials;
use crate::identity::Identity;
use crate::proxy::Proxy;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::debug;

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 10;

/// Class of a request that never produced an HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportFault {
    Timeout,
    Connect,
    /// The proxy address could not be used by the client at all.
    InvalidProxy,
    Other,
}

/// HTTP status or transport fault of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttemptStatus {
    Http(u16),
    Transport { fault: TransportFault, message: String },
}

impl AttemptStatus {
    pub fn http_code(&self) -> Option<u16> {
        match self {
            AttemptStatus::Http(code) => Some(*code),
            AttemptStatus::Transport { .. } => None,
        }
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptStatus::Http(code) => write!(f, "HTTP {code}"),
            AttemptStatus::Transport { fault, message } => write!(f, "{fault:?}: {message}"),
        }
    }
}

/// What one attempt observed. Consumed immediately by the controller.
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub status: AttemptStatus,
    pub elapsed_ms: u64,
    /// URL after redirects; equals the requested URL on transport faults.
    pub final_url: String,
    pub body: String,
    /// `Set-Cookie` name/value pairs from the response.
    pub set_cookies: Vec<(String, String)>,
}

impl AttemptOutcome {
    pub fn body_size(&self) -> usize {
        self.body.len()
    }

    pub fn transport(fault: TransportFault, message: impl Into<String>, url: &str, elapsed_ms: u64) -> Self {
        Self {
            status: AttemptStatus::Transport {
                fault,
                message: message.into(),
            },
            elapsed_ms,
            final_url: url.to_string(),
            body: String::new(),
            set_cookies: Vec::new(),
        }
    }
}

/// Inputs of one attempt.
#[derive(Debug, Clone, Copy)]
pub struct AttemptRequest<'a> {
    pub url: &'a str,
    pub identity: &'a Identity,
    pub proxy: Option<&'a Proxy>,
    pub credentials: Option<&'a Credentials>,
    pub timeout: Duration,
}

/// Performs one network fetch.
#[async_trait]
pub trait AttemptExecutor: Send + Sync {
    async fn execute(&self, request: AttemptRequest<'_>) -> AttemptOutcome;

    /// Drop any per-route state held for `proxy`. Called once the pool has
    /// marked it failed.
    fn release_proxy(&self, _proxy: &Proxy) {}
}

/// reqwest-backed executor. Keeps one client per egress route, since
/// proxies are bound at client construction. A route's client is evicted on
/// a transport fault or when the proxy is released.
pub struct HttpExecutor {
    clients: DashMap<Option<String>, reqwest::Client>,
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpExecutor {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    fn client_for(&self, proxy: Option<&Proxy>) -> Result<reqwest::Client, TransportFault> {
        let key = proxy.map(|p| p.address.clone());
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS));
        if let Some(p) = proxy {
            let proxy = reqwest::Proxy::all(p.url()).map_err(|_| TransportFault::InvalidProxy)?;
            builder = builder.proxy(proxy);
        } else {
            builder = builder.no_proxy();
        }
        let client = builder.build().map_err(|_| {
            if proxy.is_some() {
                TransportFault::InvalidProxy
            } else {
                TransportFault::Other
            }
        })?;
        self.clients.insert(key, client.clone());
        Ok(client)
    }

    /// Number of cached clients, the direct route included.
    pub fn route_count(&self) -> usize {
        self.clients.len()
    }

    fn evict(&self, proxy: Option<&Proxy>) {
        if let Some(p) = proxy {
            if self.clients.remove(&Some(p.address.clone())).is_some() {
                debug!("dropped client for proxy {}", p.address);
            }
        }
    }
}

#[async_trait]
impl AttemptExecutor for HttpExecutor {
    async fn execute(&self, request: AttemptRequest<'_>) -> AttemptOutcome {
        let start = Instant::now();
        let elapsed = |s: Instant| s.elapsed().as_millis() as u64;

        let client = match self.client_for(request.proxy) {
            Ok(c) => c,
            Err(fault) => {
                return AttemptOutcome::transport(
                    fault,
                    format!("cannot route through {:?}", request.proxy.map(|p| &p.address)),
                    request.url,
                    elapsed(start),
                )
            }
        };

        let identity = request.identity;
        let mut builder = client
            .get(request.url)
            .timeout(request.timeout)
            .header(reqwest::header::USER_AGENT, identity.user_agent.as_str());
        for (name, value) in &identity.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let cookie = match request.credentials {
            Some(creds) => creds.merged_header(&identity.cookies),
            None => identity.cookie_header(),
        };
        if let Some(cookie) = cookie {
            builder = builder.header(reqwest::header::COOKIE, cookie);
        }

        let resp = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                let fault = classify_error(&e, request.proxy.is_some());
                self.evict(request.proxy);
                return AttemptOutcome::transport(fault, e.to_string(), request.url, elapsed(start));
            }
        };

        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let set_cookies = resp
            .headers()
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(parse_set_cookie)
            .collect();

        // A status line without a complete body is not a delivered page.
        let body = match resp.text().await {
            Ok(b) => b,
            Err(e) => {
                let fault = if e.is_timeout() {
                    TransportFault::Timeout
                } else {
                    TransportFault::Other
                };
                self.evict(request.proxy);
                return AttemptOutcome::transport(
                    fault,
                    format!("HTTP {status} with unreadable body: {e}"),
                    request.url,
                    elapsed(start),
                );
            }
        };

        AttemptOutcome {
            status: AttemptStatus::Http(status),
            elapsed_ms: elapsed(start),
            final_url,
            body,
            set_cookies,
        }
    }

    fn release_proxy(&self, proxy: &Proxy) {
        self.evict(Some(proxy));
    }
}

fn classify_error(e: &reqwest::Error, via_proxy: bool) -> TransportFault {
    if e.is_timeout() {
        TransportFault::Timeout
    } else if e.is_builder() && via_proxy {
        TransportFault::InvalidProxy
    } else if e.is_connect() {
        TransportFault::Connect
    } else {
        TransportFault::Other
    }
}

/// Name and value of a `Set-Cookie` header; attributes are dropped.
fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}
