//! Pre-obtained session credentials (cookie name/value pairs).
//!
//! Values are never logged; use [`Credentials::names`] for diagnostics.

use std::collections::BTreeMap;

/// Cookie-equivalent credentials applied to every outgoing request.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    cookies: BTreeMap<String, String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("names", &self.names())
            .finish()
    }
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `name=value; name2=value2` cookie string.
    ///
    /// Parts without `=` or with an empty name are skipped; surrounding
    /// double quotes are stripped from values.
    pub fn parse(cookie_string: &str) -> Self {
        let mut creds = Self::new();
        for part in cookie_string.split(';') {
            let Some((name, value)) = part.split_once('=') else {
                continue;
            };
            creds.insert(name, value);
        }
        creds
    }

    /// Load from the environment.
    ///
    /// `<PREFIX>_COOKIE` holds a full cookie string and wins if set;
    /// otherwise each of `names` is read from `<PREFIX>_<NAME>` (upper-cased).
    pub fn from_env(prefix: &str, names: &[&str]) -> Option<Self> {
        let prefix = prefix.to_ascii_uppercase();
        if let Ok(raw) = std::env::var(format!("{prefix}_COOKIE")) {
            let creds = Self::parse(raw.trim());
            return (!creds.is_empty()).then_some(creds);
        }

        let mut creds = Self::new();
        for name in names {
            if let Ok(value) = std::env::var(format!("{prefix}_{}", name.to_ascii_uppercase())) {
                creds.insert(name, &value);
            }
        }
        (!creds.is_empty()).then_some(creds)
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        self.cookies.insert(name.to_string(), value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    /// Cookie names only, safe to log.
    pub fn names(&self) -> Vec<&str> {
        self.cookies.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cookies.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merge with an identity's jar into one `Cookie` header value.
    /// Credentials override jar entries of the same name.
    pub fn merged_header(&self, jar: &BTreeMap<String, String>) -> Option<String> {
        let mut merged = jar.clone();
        for (k, v) in &self.cookies {
            merged.insert(k.clone(), v.clone());
        }
        if merged.is_empty() {
            return None;
        }
        Some(
            merged
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}
