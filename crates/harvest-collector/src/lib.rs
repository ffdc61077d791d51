//! Harvest Collector - multi-page identifier collection.
//!
//! This crate turns a live result page into persisted identifiers. It scrolls
//! the page until lazy-loaded listings stop appearing, extracts identifiers
//! from the DOM and captured API payloads, pages through results with
//! verified navigation, and keeps a task record in the store so an
//! interrupted run can pick up where it stopped.
//!
//! # Example
//!
//! ```rust,ignore
//! use harvest_collector::{CollectRequest, Collector};
//! use tokio_util::sync::CancellationToken;
//!
//! let collector = Collector::new(site, page, store, &config)?;
//! if let Some(report) = collector.resume(&CancellationToken::new()).await? {
//!     println!("resumed run finished: {:?}", report.status);
//! }
//!
//! let report = collector
//!     .run(CollectRequest::pages(5), &CancellationToken::new())
//!     .await?;
//! println!("{} new, {} total", report.added, report.total);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod error;
pub mod extractor;
pub mod loader;
pub mod machine;
pub mod navigator;
#[allow(missing_docs)]
pub mod poll;
pub mod task;

pub use error::{CollectError, Result};
pub use extractor::{Extractor, Snapshot};
pub use loader::{PageLoader, ScrollReport};
pub use machine::{CollectRequest, CollectionReport, CollectionStatus, Collector, RunState};
pub use navigator::{rewrite_page_param, NavigationMechanism, NavigationOutcome, Navigator};
pub use poll::{poll_until, poll_until_stable, PollOutcome, StabilitySettings};
pub use task::{CollectionTask, TaskStore};
