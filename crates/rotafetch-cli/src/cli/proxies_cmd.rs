//! `rotafetch proxies`: refresh the proxy pool and show its health.

use super::output::Output;
use crate::app::App;
use anyhow::{bail, Result};
use serde_json::json;

/// Run the proxies command.
pub async fn run(app: &App, out: Output, probe: bool, concurrency: usize) -> Result<()> {
    let pool = app.controller.proxies();
    if !pool.is_enabled() {
        bail!("proxy use is disabled in the configuration");
    }

    let admitted = pool.refresh().await;
    out.line(format!("Refreshed pool: {admitted} proxies admitted"));

    let probed = if probe {
        out.line(format!("Probing with concurrency {concurrency}..."));
        let (ok, failed) = pool.probe_all(concurrency).await;
        out.line(format!("  {ok} responsive, {failed} failed"));
        Some(json!({ "responsive": ok, "failed": failed }))
    } else {
        None
    };

    let stats = pool.stats();
    if out.json {
        out.print_json(&json!({ "admitted": admitted, "probe": probed, "stats": stats }));
        return Ok(());
    }

    println!(
        "  {} total, {} untested, {} healthy, {} failed",
        stats.total, stats.untested, stats.healthy, stats.failed
    );
    for p in &stats.proxies {
        println!(
            "  {:<22} {:<9} {:>5} req {:>6.1}% ok {:>8.0} ms",
            p.address,
            format!("{:?}", p.state),
            p.request_count,
            p.success_rate() * 100.0,
            p.avg_response_time_ms
        );
    }
    Ok(())
}
