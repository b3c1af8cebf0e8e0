//! Human and JSON output for subcommands.

use serde_json::Value;

/// Output mode selected by the global `--json` flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    pub json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// Print a JSON value to stdout, pretty-printed.
    pub fn print_json(&self, value: &Value) {
        match serde_json::to_string_pretty(value) {
            Ok(s) => println!("{s}"),
            Err(_) => println!("{value}"),
        }
    }

    /// Print a line only in human mode.
    pub fn line(&self, text: impl AsRef<str>) {
        if !self.json {
            println!("{}", text.as_ref());
        }
    }
}
