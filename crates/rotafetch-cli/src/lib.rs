//! Rotafetch front-end: CLI and HTTP surfaces over the fetch engine, plus
//! record extraction and JSON export.

pub mod app;
pub mod cli;
pub mod config;
pub mod export;
pub mod extract;
pub mod logging;
pub mod rest;

pub use app::{App, Processed};
pub use config::{resolve_config_path, AppConfig};
