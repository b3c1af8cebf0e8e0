//! Rotafetch command-line entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use rotafetch_cli::cli::output::Output;
use rotafetch_cli::cli::{batch_cmd, fetch_cmd, proxies_cmd};
use rotafetch_cli::{logging, rest, resolve_config_path, App, AppConfig};

#[derive(Parser)]
#[command(
    name = "rotafetch",
    about = "Resilient page fetcher with rotating proxies and identities",
    version,
    after_help = "Run 'rotafetch <command> --help' for details on each command."
)]
struct Cli {
    /// Path to a JSON config file (default: $ROTAFETCH_CONFIG or ./rotafetch.json)
    #[arg(long, short, global = true)]
    config: Option<String>,

    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Log filter, e.g. "debug" or "rotafetch=trace" (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one page, extract a record and save it
    Fetch {
        /// Absolute URL, rooted path or bare handle
        url: String,
        /// Session cookie string ("name=value; name2=value2")
        #[arg(long)]
        cookie: Option<String>,
        /// Do not write the record to the output directory
        #[arg(long)]
        no_save: bool,
    },
    /// Fetch every URL listed in a file, one per line
    Batch {
        /// File with one URL per line
        #[arg(long, short)]
        file: PathBuf,
        /// Session cookie string applied to every request
        #[arg(long)]
        cookie: Option<String>,
        /// Do not write records to the output directory
        #[arg(long)]
        no_save: bool,
    },
    /// Start the HTTP API
    Serve {
        /// Listen address (host:port)
        #[arg(long, default_value = "127.0.0.1:5000")]
        addr: String,
    },
    /// Refresh the proxy pool and print per-proxy statistics
    Proxies {
        /// Probe every proxy and mark unresponsive ones failed
        #[arg(long)]
        probe: bool,
        /// Probes in flight at once
        #[arg(long, default_value = "10")]
        concurrency: usize,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish)
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "rotafetch", &mut std::io::stdout());
        return Ok(());
    }

    logging::init(cli.log_level.as_deref(), cli.log_json);
    let out = Output::new(cli.json);

    let result = run(cli, out).await;

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        if out.json {
            out.print_json(&serde_json::json!({
                "error": true,
                "message": format!("{e:#}"),
            }));
        } else {
            eprintln!("  Error: {e:#}");
        }
        std::process::exit(1);
    }

    result
}

async fn run(cli: Cli, out: Output) -> Result<()> {
    let config_path = resolve_config_path(cli.config.as_deref());
    let config = AppConfig::load(config_path.as_deref())?;
    let app = App::from_config(&config)?;
    tracing::info!("rotafetch v{} ready", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Fetch {
            url,
            cookie,
            no_save,
        } => fetch_cmd::run(&app, out, &url, cookie.as_deref(), !no_save).await,
        Commands::Batch {
            file,
            cookie,
            no_save,
        } => batch_cmd::run(&app, out, &file, cookie.as_deref(), !no_save).await,
        Commands::Serve { addr } => rest::start(&addr, Arc::new(app)).await,
        Commands::Proxies { probe, concurrency } => {
            proxies_cmd::run(&app, out, probe, concurrency).await
        }
        Commands::Completions { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "rotafetch",
            "fetch",
            "jane-doe",
            "--no-save",
            "--json",
            "--config",
            "custom.json",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.config.as_deref(), Some("custom.json"));
        assert!(matches!(cli.command, Commands::Fetch { no_save: true, .. }));
    }

    #[test]
    fn test_serve_default_addr() {
        let cli = Cli::try_parse_from(["rotafetch", "serve"]).unwrap();
        match cli.command {
            Commands::Serve { addr } => assert_eq!(addr, "127.0.0.1:5000"),
            _ => panic!("expected serve"),
        }
    }
}
