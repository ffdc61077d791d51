//! Live page control for identifier collection.
//!
//! [`PageDriver`] is the seam between the collector and a browser tab.
//! [`BrowserPage`] drives a real Chromium tab. With the `testing` feature,
//! `ScriptedPage` replays a fixed set of pages in memory.

pub mod capture;
pub mod driver;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod page;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;

pub use driver::{host_of, Control, PageDriver, ScrollMetrics};
pub use engine::BrowserEngine;
pub use error::{BrowserError, Result};
pub use fingerprint::FingerprintConfig;
pub use page::BrowserPage;
#[cfg(any(test, feature = "testing"))]
pub use scripted::{ClickAction, PageFixture, ScriptedPage};
