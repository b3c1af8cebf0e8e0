//! Proxy providers.

use super::parse::parse_payload;
use crate::config::{ProxySourceConfig, SourceFormat};
use crate::error::{FetchError, Result};
use async_trait::async_trait;
use std::time::Duration;

const SOURCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Anything that can produce raw proxy candidates.
#[async_trait]
pub trait ProxySource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;
    /// Fetch the current candidate list. Entries are not yet validated.
    async fn fetch(&self) -> Result<Vec<String>>;
}

/// A provider reached over plain HTTP GET.
pub struct HttpProxySource {
    url: String,
    format: SourceFormat,
    json_field: Option<String>,
    client: reqwest::Client,
}

impl HttpProxySource {
    pub fn new(config: &ProxySourceConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SOURCE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            url: config.url.clone(),
            format: config.format,
            json_field: config.json_field.clone(),
            client,
        }
    }
}

#[async_trait]
impl ProxySource for HttpProxySource {
    fn name(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<Vec<String>> {
        let resp = self.client.get(&self.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::source_failed(&self.url, format!("HTTP {status}")));
        }
        let body = resp.text().await?;
        parse_payload(self.format, &body, self.json_field.as_deref())
    }
}

/// A fixed list of addresses, e.g. operator-provided proxies.
pub struct StaticProxySource {
    name: String,
    addresses: Vec<String>,
}

impl StaticProxySource {
    pub fn new(name: impl Into<String>, addresses: Vec<String>) -> Self {
        Self {
            name: name.into(),
            addresses,
        }
    }
}

#[async_trait]
impl ProxySource for StaticProxySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<String>> {
        Ok(self.addresses.clone())
    }
}
