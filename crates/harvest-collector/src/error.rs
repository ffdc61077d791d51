use harvest_browser::BrowserError;
use harvest_site::SiteError;
use harvest_store::StoreError;
use thiserror::Error;

/// Errors raised while collecting.
#[derive(Debug, Error)]
pub enum CollectError {
    /// A run yielded no identifiers
    #[error("no identifiers found on {pages} page(s)")]
    NothingExtracted {
        /// Pages processed
        pages: u32,
    },

    /// Neither a control nor a URL rewrite can reach the page
    #[error("no way to navigate to page {target}")]
    NoNavigation {
        /// Requested page
        target: u32,
    },

    /// Navigation was triggered but the page never changed
    #[error("navigation to page {target} not verified within {timeout_ms}ms")]
    Unverified {
        /// Requested page
        target: u32,
        /// Verification budget
        timeout_ms: u64,
    },

    /// A configured selector does not parse
    #[error("invalid selector '{selector}': {reason}")]
    InvalidSelector {
        /// Offending selector
        selector: String,
        /// Parser message
        reason: String,
    },

    /// A run is already driving the page
    #[error("a collection run is already in progress")]
    Busy,

    /// The request itself is malformed
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Browser error
    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Site definition error
    #[error("Site error: {0}")]
    Site(#[from] SiteError),
}

impl CollectError {
    /// Whether this error ends navigation but keeps what was collected.
    #[must_use]
    pub fn is_navigation_failure(&self) -> bool {
        matches!(self, Self::NoNavigation { .. } | Self::Unverified { .. })
    }
}

/// Result type for collector operations.
pub type Result<T> = std::result::Result<T, CollectError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CollectError::Unverified {
            target: 2,
            timeout_ms: 10_000,
        };
        assert_eq!(
            err.to_string(),
            "navigation to page 2 not verified within 10000ms"
        );
    }

    #[test]
    fn test_navigation_failure_classification() {
        assert!(CollectError::NoNavigation { target: 3 }.is_navigation_failure());
        assert!(!CollectError::NothingExtracted { pages: 1 }.is_navigation_failure());
        assert!(!CollectError::Busy.is_navigation_failure());
        assert!(!CollectError::from(BrowserError::Timeout("x".into())).is_navigation_failure());
    }
}
