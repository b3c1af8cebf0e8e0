//! Tolerant parsers for proxy-provider payloads.
//!
//! Each parser returns raw candidates and skips anything it cannot read;
//! only a document that is unreadable as a whole (e.g. invalid JSON) is an
//! error. Candidates are validated separately by [`normalize_address`].

use crate::config::SourceFormat;
use crate::error::{FetchError, Result};
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

/// Keys tried, in order, when a JSON object wraps the proxy list.
const JSON_LIST_FIELDS: &[&str] = &["proxies", "data", "list", "results"];

/// Parse a payload according to its declared format.
pub fn parse_payload(
    format: SourceFormat,
    body: &str,
    json_field: Option<&str>,
) -> Result<Vec<String>> {
    match format {
        SourceFormat::Plain => Ok(parse_plain(body)),
        SourceFormat::Json => parse_json(body, json_field),
        SourceFormat::HtmlTable => Ok(parse_html_table(body)),
    }
}

/// Newline-delimited `host:port`, with `#` comments and blank lines ignored.
pub fn parse_plain(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// JSON array of `"host:port"` strings or `{ip|host, port}` objects, either
/// at the top level or under a list field.
pub fn parse_json(body: &str, json_field: Option<&str>) -> Result<Vec<String>> {
    let doc: Value = serde_json::from_str(body)?;

    let list = match &doc {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => {
            let found = match json_field {
                Some(field) => map.get(field),
                None => JSON_LIST_FIELDS.iter().find_map(|k| map.get(*k)),
            };
            match found.and_then(Value::as_array) {
                Some(items) => items.as_slice(),
                None => {
                    return Err(FetchError::Json(serde::de::Error::custom(
                        "no proxy list field in JSON document",
                    )))
                }
            }
        }
        _ => &[],
    };

    Ok(list.iter().filter_map(json_entry).collect())
}

fn json_entry(item: &Value) -> Option<String> {
    match item {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Object(obj) => {
            let host = ["ip", "host", "address"]
                .iter()
                .find_map(|k| obj.get(*k).and_then(Value::as_str))?;
            let port = match obj.get("port")? {
                Value::Number(n) => n.to_string(),
                Value::String(s) => s.trim().to_string(),
                _ => return None,
            };
            Some(format!("{}:{}", host.trim(), port))
        }
        _ => None,
    }
}

/// HTML table rows holding either a `host:port` cell or a host cell
/// followed by a port cell.
pub fn parse_html_table(body: &str) -> Vec<String> {
    let doc = Html::parse_document(body);
    let (Ok(row_sel), Ok(cell_sel)) = (Selector::parse("tr"), Selector::parse("td")) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for row in doc.select(&row_sel) {
        let cells: Vec<String> = row
            .select(&cell_sel)
            .map(|c| c.text().collect::<String>().trim().to_string())
            .collect();

        if let Some(joined) = cells.iter().find(|c| normalize_address(c).is_some()) {
            out.push(joined.clone());
            continue;
        }
        for pair in cells.windows(2) {
            if is_valid_host(&pair[0]) && pair[1].parse::<u16>().is_ok_and(|p| p > 0) {
                out.push(format!("{}:{}", pair[0], pair[1]));
                break;
            }
        }
    }
    out
}

/// Validate a `host:port` candidate and return its canonical form.
///
/// Accepts an optional `http://` / `https://` scheme and trailing slash.
/// The host must be a dotted-quad IPv4 address or a syntactically valid
/// hostname; the port must be in `1..=65535`.
pub fn normalize_address(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"))
        .unwrap_or(trimmed)
        .trim_end_matches('/');

    let (host, port) = stripped.rsplit_once(':')?;
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let port: u16 = port.parse().ok()?;
    if port == 0 || !is_valid_host(host) {
        return None;
    }
    Some(format!("{}:{}", host.to_ascii_lowercase(), port))
}

fn is_valid_host(host: &str) -> bool {
    static HOSTNAME: OnceLock<Regex> = OnceLock::new();
    let re = HOSTNAME.get_or_init(|| {
        Regex::new(r"^(?i)[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)*$")
            .expect("hostname pattern is valid")
    });

    if host.is_empty() || host.len() > 253 {
        return false;
    }
    // All-numeric dotted names must be real IPv4 addresses.
    if host.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return host.parse::<Ipv4Addr>().is_ok();
    }
    re.is_match(host)
}
