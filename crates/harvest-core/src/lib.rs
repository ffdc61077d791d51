//! Harvest Core - Foundation crate for the Harvest identifier collector.
//!
//! This crate provides the shared types, error handling and configuration
//! management that every other Harvest crate depends on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Shared newtypes (`SiteId`, `TaskId`, `Identifier`, `Timestamp`)
//!
//! # Example
//!
//! ```rust
//! use harvest_core::{AppConfig, SiteId};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! assert_eq!(config.scroll.max_attempts, 8);
//!
//! let site = SiteId::new("amazon")?;
//! assert_eq!(site.as_str(), "amazon");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{
    AppConfig, BrowserConfig, CollectionConfig, NavigationConfig, ScrollConfig, StorageConfig,
};
pub use error::{ConfigError, ConfigResult, HarvestError, Result};
pub use types::{Identifier, SiteId, TaskId, Timestamp};
