//! `rotafetch batch --file <path>`: fetch every URL listed in a file.

use super::output::Output;
use crate::app::App;
use anyhow::{Context, Result};
use rotafetch::Credentials;
use serde_json::json;
use std::path::Path;

/// One target per line; blank lines are skipped.
pub fn read_targets(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read URL list {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Run the batch command.
pub async fn run(
    app: &App,
    out: Output,
    file: &Path,
    cookie: Option<&str>,
    save: bool,
) -> Result<()> {
    let targets = read_targets(file)?;
    tracing::info!("found {} URLs in {}", targets.len(), file.display());
    let creds = cookie.map(Credentials::parse);

    let results = app.process_batch(&targets, creds.as_ref(), save).await;

    let mut succeeded = 0;
    let mut items = Vec::with_capacity(results.len());
    for (target, result) in targets.iter().zip(&results) {
        match result {
            Ok(p) => {
                if p.is_success() {
                    succeeded += 1;
                }
                let item = p.to_json(false);
                out.line(format!(
                    "  {} {target} ({})",
                    if p.is_success() { "ok  " } else { "FAIL" },
                    item["saved_to"]
                        .as_str()
                        .or(item["error"].as_str())
                        .unwrap_or("not saved")
                ));
                items.push(item);
            }
            Err(e) => {
                out.line(format!("  FAIL {target} ({e:#})"));
                items.push(json!({ "url": target, "status": "error", "error": format!("{e:#}") }));
            }
        }
    }

    if out.json {
        out.print_json(&json!({
            "status": "completed",
            "total": targets.len(),
            "succeeded": succeeded,
            "results": items,
        }));
    }
    out.line(format!("Processed successfully: {succeeded}/{}", targets.len()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_targets_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "https://example.com/in/a\n\n   \n  https://example.com/in/b  ").unwrap();
        let targets = read_targets(file.path()).unwrap();
        assert_eq!(
            targets,
            vec!["https://example.com/in/a", "https://example.com/in/b"]
        );
    }

    #[test]
    fn test_read_targets_missing_file() {
        assert!(read_targets(Path::new("/definitely/not/here.txt")).is_err());
    }
}
