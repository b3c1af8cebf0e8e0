//! Rotafetch: resilient page fetching across rotating proxies and browser identities.

pub mod config;
pub mod controller;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod governor;
pub mod identity;
pub mod proxy;
pub mod render;

pub use config::EngineConfig;
pub use controller::{EngineStats, EscalationController, FailureReason, FetchResult, Signal};
pub use credentials::Credentials;
pub use error::{FetchError, Result};
pub use executor::{AttemptExecutor, AttemptOutcome, AttemptRequest, AttemptStatus, HttpExecutor};
pub use governor::RateGovernor;
pub use identity::{Identity, IdentityPool};
pub use proxy::{Proxy, ProxyPool, ProxySource};
pub use render::{
    ArchiveFallback, ChainFallback, ChromiumFallback, NoopFallback, ReaderFallback, RenderFallback,
};
