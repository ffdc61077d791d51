//! Harvest Site - Per-site collection strategies loaded from TOML.
//!
//! Every site-specific detail the collector needs (identifier format,
//! denylisted prefixes, marker elements, pagination controls, storage keys,
//! export naming) is data in a site definition file. The collector core is
//! shared and only ever sees a [`SiteDefinition`].
//!
//! # Architecture
//!
//! - **Definition Types** ([`definition`]): Strongly-typed site strategy
//! - **Format** ([`format`]): Compiled identifier validation predicate
//! - **Loader** ([`loader`]): TOML file loading from `site-definitions/`
//! - **Registry** ([`registry`]): In-memory cache keyed by site ID
//! - **Errors** ([`error`]): Site-specific error types
//!
//! # Example
//!
//! ```rust,no_run
//! use harvest_core::SiteId;
//! use harvest_site::{SiteLoader, SiteRegistry};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let loader = SiteLoader::with_default_dir()?;
//! let registry = SiteRegistry::load_from(&loader)?;
//!
//! let site = registry.get(&SiteId::new("1688")?)?;
//! let format = site.identifier_format()?;
//! assert!(format.is_valid("123456789012"));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod definition;
pub mod error;
pub mod format;
pub mod loader;
pub mod registry;

// Re-export commonly used types
pub use definition::{
    ExportFormat, ExportSettings, ExtractionRules, IdentifierRules, LoadingRules, MarkerRule,
    PaginationRules, SiteDefinition, SiteMetadata, StorageKeys,
};
pub use error::{Result, SiteError};
pub use format::IdentifierFormat;
pub use loader::SiteLoader;
pub use registry::SiteRegistry;
