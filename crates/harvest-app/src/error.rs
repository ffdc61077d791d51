//! Error type returned across the message boundary.

use harvest_browser::BrowserError;
use harvest_collector::CollectError;
use harvest_core::{ConfigError, HarvestError};
use harvest_site::SiteError;
use harvest_store::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// Serializable error for request handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandError {
    /// Error code for host handling (e.g., "BUSY")
    pub code: String,
    /// User-friendly error message
    pub message: String,
    /// Optional debugging context
    pub details: Option<serde_json::Value>,
}

impl CommandError {
    /// Create a new command error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Create a command error with details.
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: Some(details),
        }
    }

    /// A request with the same verb is still in flight.
    pub fn busy(verb: &str) -> Self {
        Self::with_details(
            "BUSY",
            format!("A '{verb}' request is already in progress"),
            json!({ "verb": verb }),
        )
    }

    /// The handler did not answer in time.
    pub fn timed_out(verb: &str, limit: Duration) -> Self {
        Self::with_details(
            "TIMEOUT",
            format!("'{verb}' did not finish within {}s", limit.as_secs()),
            json!({ "verb": verb, "limitMs": u64::try_from(limit.as_millis()).unwrap_or(u64::MAX) }),
        )
    }

    /// No live page is attached for the site.
    pub fn no_page(site_id: &str) -> Self {
        Self::with_details(
            "NO_PAGE",
            format!("No page is open for site '{site_id}'"),
            json!({ "siteId": site_id }),
        )
    }
}

impl From<CollectError> for CommandError {
    fn from(err: CollectError) -> Self {
        match err {
            CollectError::NothingExtracted { pages } => Self::with_details(
                "NOTHING_EXTRACTED",
                "No identifiers were found on the page",
                json!({ "pages": pages }),
            ),
            CollectError::NoNavigation { target } => Self::with_details(
                "NO_NAVIGATION",
                format!("Cannot navigate to page {target}: no pagination control found"),
                json!({ "target": target }),
            ),
            CollectError::Unverified { target, timeout_ms } => Self::with_details(
                "NAVIGATION_UNVERIFIED",
                format!("Navigation to page {target} did not complete"),
                json!({ "target": target, "timeoutMs": timeout_ms }),
            ),
            CollectError::InvalidSelector { selector, reason } => Self::with_details(
                "INVALID_SELECTOR",
                format!("Invalid selector: {reason}"),
                json!({ "selector": selector }),
            ),
            CollectError::InvalidRequest(msg) => Self::new("INVALID_REQUEST", msg),
            CollectError::Busy => Self::new("BUSY", "A collection run is already in progress"),
            CollectError::Browser(err) => err.into(),
            CollectError::Store(err) => err.into(),
            CollectError::Site(err) => err.into(),
        }
    }
}

impl From<BrowserError> for CommandError {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::SelectorNotFound(selector) => Self::with_details(
                "SELECTOR_NOT_FOUND",
                "Page element not found",
                json!({ "selector": selector }),
            ),
            BrowserError::Timeout(what) => {
                Self::new("BROWSER_TIMEOUT", format!("Browser timed out: {what}"))
            }
            BrowserError::NavigationError(msg) => {
                Self::new("NAVIGATION_FAILED", format!("Navigation failed: {msg}"))
            }
            BrowserError::ScriptError(msg) => {
                Self::new("SCRIPT_ERROR", format!("Page script failed: {msg}"))
            }
            BrowserError::ChromiumError(msg) => {
                Self::new("BROWSER_ERROR", format!("Browser error: {msg}"))
            }
        }
    }
}

impl From<StoreError> for CommandError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Decode { key, reason } => Self::with_details(
                "CORRUPT_RECORD",
                format!("Stored data is unreadable: {reason}"),
                json!({ "key": key }),
            ),
            other => Self::new("STORAGE_ERROR", format!("Storage error: {other}")),
        }
    }
}

impl From<SiteError> for CommandError {
    fn from(err: SiteError) -> Self {
        match err {
            SiteError::NotFound { site_id } => Self::with_details(
                "SITE_NOT_FOUND",
                format!("Unknown site: {site_id}"),
                json!({ "siteId": site_id }),
            ),
            other => Self::new("SITE_DEFINITION_ERROR", other.to_string()),
        }
    }
}

impl From<csv::Error> for CommandError {
    fn from(err: csv::Error) -> Self {
        Self::new("EXPORT_ERROR", format!("Failed to render export: {err}"))
    }
}

impl From<ConfigError> for CommandError {
    fn from(err: ConfigError) -> Self {
        Self::new("CONFIG_ERROR", format!("Configuration error: {err}"))
    }
}

impl From<HarvestError> for CommandError {
    fn from(err: HarvestError) -> Self {
        match err {
            HarvestError::Config(err) => err.into(),
            HarvestError::Validation(msg) => Self::new("INVALID_REQUEST", msg),
            HarvestError::Io(err) => Self::new("IO_ERROR", err.to_string()),
        }
    }
}
