//! `rotafetch fetch <url>`: fetch, extract and export one page.

use super::output::Output;
use crate::app::App;
use anyhow::{bail, Result};
use rotafetch::{Credentials, FetchResult};

/// Run the fetch command.
pub async fn run(app: &App, out: Output, url: &str, cookie: Option<&str>, save: bool) -> Result<()> {
    let creds = cookie.map(Credentials::parse);
    out.line(format!("Fetching {url}..."));

    let processed = app.process(url, creds.as_ref(), save).await?;
    if out.json {
        out.print_json(&processed.to_json(true));
    }

    match &processed.result {
        FetchResult::Success {
            attempts,
            via_fallback,
            proxy_used,
            ..
        } => {
            let via = match (via_fallback, proxy_used) {
                (true, _) => "render fallback".to_string(),
                (false, Some(p)) => format!("proxy {p}"),
                (false, None) => "direct connection".to_string(),
            };
            out.line(format!("  Fetched in {attempts} attempt(s) via {via}"));
            if let Some(title) = processed.record.as_ref().and_then(|r| r.title.as_deref()) {
                out.line(format!("  Title: {title}"));
            }
            if let Some(path) = &processed.saved_to {
                out.line(format!("  Saved to {}", path.display()));
            }
            Ok(())
        }
        FetchResult::Failure {
            reason, attempts, ..
        } => bail!("fetch of {url} failed after {attempts} attempt(s): {reason}"),
    }
}
