//! Subcommand implementations for the `rotafetch` binary.

pub mod batch_cmd;
pub mod fetch_cmd;
pub mod output;
pub mod proxies_cmd;
