use crate::error::{BrowserError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A clickable element as seen on the live page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Control {
    /// Trimmed visible text
    pub text: String,
    pub classes: Vec<String>,
    pub visible: bool,
    /// `disabled` property or `aria-disabled="true"`
    pub disabled: bool,
    /// `data-*` attributes
    pub attributes: HashMap<String, String>,
    pub href: Option<String>,
}

impl Control {
    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    /// Enabled, visible and not carrying any of `disabled_classes`.
    pub fn is_usable(&self, disabled_classes: &[String]) -> bool {
        self.visible && !self.disabled && !disabled_classes.iter().any(|c| self.has_class(c))
    }
}

/// Scroll geometry of the document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollMetrics {
    pub scroll_height: u64,
    pub scroll_y: u64,
    pub viewport_height: u64,
}

impl ScrollMetrics {
    /// Pixels left below the viewport.
    pub fn remaining(&self) -> u64 {
        self.scroll_height
            .saturating_sub(self.scroll_y + self.viewport_height)
    }
}

/// Operations the collector needs from a live page.
#[async_trait::async_trait]
pub trait PageDriver: Send + Sync {
    /// Current document URL
    async fn current_url(&self) -> Result<String>;

    /// Navigate and wait for the new document
    async fn goto(&self, url: &str) -> Result<()>;

    /// Serialized DOM of the current document
    async fn html(&self) -> Result<String>;

    async fn scroll_metrics(&self) -> Result<ScrollMetrics>;

    async fn scroll_to(&self, y: u64) -> Result<()>;

    /// Number of elements matching `selector`
    async fn count(&self, selector: &str) -> Result<usize>;

    /// Whether any element matching `selector` is visible
    async fn any_visible(&self, selector: &str) -> Result<bool>;

    /// Every element matching `selector`, in document order
    async fn controls(&self, selector: &str) -> Result<Vec<Control>>;

    /// Click the `index`th element matching `selector`
    async fn click(&self, selector: &str, index: usize) -> Result<()>;

    /// Trimmed text of the first element matching `selector`
    async fn text_of(&self, selector: &str) -> Result<Option<String>>;

    /// JSON values of the named window globals that exist and serialize.
    ///
    /// Dotted names walk nested properties.
    async fn globals(&self, names: &[String]) -> Result<Vec<serde_json::Value>>;

    /// API payloads captured since the last call
    async fn take_payloads(&self) -> Result<Vec<serde_json::Value>>;
}

/// Helper to extract the host from a URL
pub fn host_of(url: &str) -> Result<String> {
    let url = url::Url::parse(url)
        .map_err(|e| BrowserError::NavigationError(format!("Invalid URL: {e}")))?;

    url.host_str()
        .ok_or_else(|| BrowserError::NavigationError("No host in URL".to_string()))
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_of() {
        assert_eq!(
            host_of("https://s.1688.com/selloffer/offer_search.htm?beginPage=2").unwrap(),
            "s.1688.com"
        );
        assert_eq!(
            host_of("http://www.amazon.com:8080/s?k=lamp").unwrap(),
            "www.amazon.com"
        );
        assert!(host_of("not-a-url").is_err());
    }

    #[test]
    fn test_control_usable() {
        let disabled = vec!["fui-disabled".to_string()];
        let mut control = Control {
            text: "2".to_string(),
            visible: true,
            ..Control::default()
        };
        assert!(control.is_usable(&disabled));

        control.classes.push("fui-disabled".to_string());
        assert!(!control.is_usable(&disabled));

        control.classes.clear();
        control.visible = false;
        assert!(!control.is_usable(&disabled));
    }

    #[test]
    fn test_scroll_remaining() {
        let metrics = ScrollMetrics {
            scroll_height: 5000,
            scroll_y: 1000,
            viewport_height: 1000,
        };
        assert_eq!(metrics.remaining(), 3000);
        assert_eq!(ScrollMetrics::default().remaining(), 0);
    }
}
