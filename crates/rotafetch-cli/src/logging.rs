//! Tracing subscriber setup for the binary.

use tracing_subscriber::EnvFilter;

/// Directives used when neither `--log-level` nor `RUST_LOG` is set.
pub const DEFAULT_DIRECTIVES: &str = "rotafetch=info,rotafetch_cli=info";

/// Build the filter: an explicit level wins, then `RUST_LOG`, then the default.
pub fn filter(level: Option<&str>) -> EnvFilter {
    match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES)),
    }
}

/// Install the global subscriber, writing to stderr so stdout stays clean
/// for `--json` output.
pub fn init(level: Option<&str>, json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_writer(std::io::stderr);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = installed {
        eprintln!("  Warning: logging already initialized: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_explicit_level_used() {
        assert_eq!(filter(Some("debug")).max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn test_default_directives_parse() {
        let f = EnvFilter::new(DEFAULT_DIRECTIVES);
        assert_eq!(f.max_level_hint(), Some(LevelFilter::INFO));
    }
}
