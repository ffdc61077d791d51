//! Harvest application shell
//!
//! This is the thin layer hosts talk to: a request/response message contract,
//! a dispatcher that runs each verb against the per-site collector and export
//! tracker, and export artifact rendering. Core logic lives in the other
//! `harvest-*` crates.

pub mod commands;
pub mod error;
pub mod export;
pub mod state;

pub use commands::{Dispatcher, Request, Response};
pub use error::CommandError;
pub use export::ExportArtifact;
pub use state::{ActiveRun, AppState, SiteSession};

/// Initialize tracing subscriber for logging
///
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,harvest=debug"));

    // A host may already have installed a subscriber
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}

/// Application version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_init_tracing_twice() {
        init_tracing();
        init_tracing();
    }
}
