//! Site definition types.
//!
//! A site definition is the full collection strategy for one source site,
//! deserialized from a TOML file in `site-definitions/`.

use crate::error::{Result, SiteError};
use crate::format::IdentifierFormat;
use harvest_core::SiteId;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Prefix reserved for collection task records in the store.
pub const TASK_KEY_PREFIX: &str = "task:";

/// Complete site definition loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteDefinition {
    /// Core site metadata
    pub site: SiteMetadata,

    /// Identifier format and denylist
    pub identifier: IdentifierRules,

    /// Where identifiers live in the DOM and in API payloads
    pub extraction: ExtractionRules,

    /// Pagination controls and page-number parameter
    pub pagination: PaginationRules,

    /// Lazy-load indicators
    #[serde(default)]
    pub loading: LoadingRules,

    /// Persisted record keys
    pub storage: StorageKeys,

    /// Export artifact naming
    pub export: ExportSettings,
}

impl SiteDefinition {
    /// Get the site ID.
    #[must_use]
    pub fn id(&self) -> &SiteId {
        &self.site.id
    }

    /// Get the human-readable site name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.site.name
    }

    /// Compile the identifier validation predicate.
    pub fn identifier_format(&self) -> Result<IdentifierFormat> {
        IdentifierFormat::new(
            self.id(),
            &self.identifier.pattern,
            self.identifier.denylist_prefixes.clone(),
        )
    }

    /// Compile the anchor href patterns. Each must capture the token in group 1.
    pub fn href_patterns(&self) -> Result<Vec<Regex>> {
        self.extraction
            .href_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| SiteError::InvalidPattern {
                    site_id: self.id().to_string(),
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect()
    }

    /// CSS selector list matching every marker element.
    ///
    /// Used to count markers when checking scroll stability and navigation.
    #[must_use]
    pub fn marker_selector(&self) -> String {
        self.extraction
            .markers
            .iter()
            .map(|m| m.selector.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Detail page URL for an identifier.
    #[must_use]
    pub fn detail_url(&self, id: &str) -> String {
        self.export.detail_url_template.replace("{id}", id)
    }

    /// Validate the site definition for completeness and correctness.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: &str| SiteError::ValidationError {
            site_id: self.id().to_string(),
            reason: reason.to_string(),
        };

        if self.site.name.is_empty() {
            return Err(fail("site name cannot be empty"));
        }

        if self.identifier.pattern.is_empty() {
            return Err(fail("identifier pattern cannot be empty"));
        }
        if self.identifier.denylist_prefixes.iter().any(String::is_empty) {
            return Err(fail("denylist prefixes cannot be empty strings"));
        }
        self.identifier_format()?;

        if self.extraction.markers.is_empty() && self.extraction.href_patterns.is_empty() {
            return Err(fail("at least one marker or href pattern is required"));
        }
        if self
            .extraction
            .markers
            .iter()
            .any(|m| m.selector.is_empty() || m.attribute.is_empty())
        {
            return Err(fail("marker selector and attribute cannot be empty"));
        }
        for pattern in self.href_patterns()? {
            if pattern.captures_len() < 2 {
                return Err(fail("href patterns must capture the identifier in group 1"));
            }
        }
        if self.extraction.max_depth == Some(0) {
            return Err(fail("extraction max_depth must be at least 1"));
        }

        let pagination = &self.pagination;
        if pagination.allow_url_rewrite && pagination.page_param.is_none() {
            return Err(fail("allow_url_rewrite requires page_param"));
        }
        if pagination.next_selectors.is_empty()
            && pagination.page_item_selectors.is_empty()
            && pagination.container_selectors.is_empty()
            && !pagination.allow_url_rewrite
        {
            return Err(fail("no pagination mechanism configured"));
        }

        let keys = [
            &self.storage.ids_key,
            &self.storage.exported_key,
            &self.storage.stats_key,
        ];
        if keys.iter().any(|k| k.is_empty()) {
            return Err(fail("storage keys cannot be empty"));
        }
        if keys.iter().any(|k| k.starts_with(TASK_KEY_PREFIX)) {
            return Err(fail("storage keys cannot use the task record prefix"));
        }
        if keys[0] == keys[1] || keys[0] == keys[2] || keys[1] == keys[2] {
            return Err(fail("storage keys must be distinct"));
        }

        if !self.export.detail_url_template.contains("{id}") {
            return Err(fail("detail_url_template must contain {id}"));
        }
        if self.export.file_prefix.is_empty() {
            return Err(fail("export file_prefix cannot be empty"));
        }

        Ok(())
    }
}

/// Core site metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteMetadata {
    /// Unique site identifier (e.g., "1688", "amazon")
    pub id: SiteId,

    /// Human-readable site name
    pub name: String,

    /// Site domain (e.g., "1688.com")
    pub domain: String,
}

/// Identifier format rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifierRules {
    /// Unanchored regex for one identifier token (e.g. `\d{12,13}`)
    pub pattern: String,

    /// Prefixes of tokens that look valid but are known non-listings.
    ///
    /// Extend this list when new false positives show up.
    #[serde(default)]
    pub denylist_prefixes: Vec<String>,
}

/// A DOM element kind that carries an identifier in an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerRule {
    /// CSS selector for the marker element
    pub selector: String,
    /// Attribute holding the identifier (the last matching run is used)
    pub attribute: String,
}

/// Extraction rules for DOM snapshots and API payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRules {
    /// Marker elements
    #[serde(default)]
    pub markers: Vec<MarkerRule>,

    /// Anchor href regexes; group 1 is the identifier
    #[serde(default)]
    pub href_patterns: Vec<String>,

    /// Scalar fields in API objects that may hold an identifier
    #[serde(default = "default_api_id_fields")]
    pub api_id_fields: Vec<String>,

    /// List fields in API objects whose elements are listing objects
    #[serde(default)]
    pub api_list_fields: Vec<String>,

    /// URL substrings of network responses worth capturing as API payloads
    #[serde(default)]
    pub api_url_patterns: Vec<String>,

    /// Also walk inline scripts whose body is JSON, typed or not
    #[serde(default)]
    pub json_scripts: bool,

    /// Window globals walked like API payloads; dotted names reach nested
    /// properties
    #[serde(default)]
    pub globals: Vec<String>,

    /// Override for the API walk recursion bound
    #[serde(default)]
    pub max_depth: Option<usize>,
}

fn default_api_id_fields() -> Vec<String> {
    vec!["id".to_string()]
}

/// Pagination controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationRules {
    /// "Next page" controls, in preference order
    #[serde(default)]
    pub next_selectors: Vec<String>,

    /// Class names marking a control as disabled
    #[serde(default)]
    pub disabled_classes: Vec<String>,

    /// Numbered page controls matched by visible label
    #[serde(default)]
    pub page_item_selectors: Vec<String>,

    /// Pagination containers whose links are matched by label or data attribute
    #[serde(default)]
    pub container_selectors: Vec<String>,

    /// Attributes that may hold a link's page number
    #[serde(default = "default_page_attributes")]
    pub page_attributes: Vec<String>,

    /// Element whose text is the current page number
    #[serde(default)]
    pub current_page_selector: Option<String>,

    /// Query parameter holding the page number
    #[serde(default)]
    pub page_param: Option<String>,

    /// Whether rewriting `page_param` in the URL is an acceptable fallback
    #[serde(default)]
    pub allow_url_rewrite: bool,
}

fn default_page_attributes() -> Vec<String> {
    vec!["data-page".to_string()]
}

/// Loading indicator rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadingRules {
    /// Selectors of spinners or placeholders shown while content loads
    #[serde(default)]
    pub indicator_selectors: Vec<String>,
}

impl LoadingRules {
    /// Combined selector, or `None` when the site has no indicators.
    #[must_use]
    pub fn indicator_selector(&self) -> Option<String> {
        if self.indicator_selectors.is_empty() {
            None
        } else {
            Some(self.indicator_selectors.join(", "))
        }
    }
}

/// Persisted record keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageKeys {
    /// Collected Set key (e.g. `ids`, `asins`)
    pub ids_key: String,
    /// Exported Set key (e.g. `exportedIds`, `exportedAsins`)
    pub exported_key: String,
    /// Collection stats key
    pub stats_key: String,
}

/// Export artifact format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// One identifier per line
    #[default]
    Text,
    /// Quoted `id, detail URL, timestamp` rows with a header
    Csv,
}

/// Export artifact naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSettings {
    /// Detail page URL with an `{id}` placeholder
    pub detail_url_template: String,
    /// File name prefix
    pub file_prefix: String,
    /// Default artifact format
    #[serde(default)]
    pub format: ExportFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE_1688: &str = include_str!("../../../site-definitions/1688.toml");
    const SITE_AMAZON: &str = include_str!("../../../site-definitions/amazon.toml");

    fn parse(contents: &str) -> SiteDefinition {
        toml::from_str(contents).expect("parse site definition")
    }

    #[test]
    fn test_shipped_definitions_validate() {
        for contents in [SITE_1688, SITE_AMAZON] {
            let definition = parse(contents);
            definition.validate().expect("shipped definition is valid");
        }
    }

    #[test]
    fn test_marker_selector_joins_rules() {
        let definition = parse(SITE_AMAZON);
        let selector = definition.marker_selector();
        assert!(selector.contains("[data-asin]"));
        assert!(selector.contains(", "));
    }

    #[test]
    fn test_detail_url() {
        let definition = parse(SITE_1688);
        assert_eq!(
            definition.detail_url("123456789012"),
            "https://detail.1688.com/offer/123456789012.html"
        );
    }

    #[test]
    fn test_validation_rejects_rewrite_without_param() {
        let mut definition = parse(SITE_1688);
        definition.pagination.page_param = None;
        let err = definition.validate().expect_err("rewrite without param");
        assert!(matches!(err, SiteError::ValidationError { .. }));
    }

    #[test]
    fn test_validation_rejects_task_prefixed_keys() {
        let mut definition = parse(SITE_AMAZON);
        definition.storage.ids_key = "task:asins".to_string();
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_duplicate_keys() {
        let mut definition = parse(SITE_AMAZON);
        definition.storage.exported_key = definition.storage.ids_key.clone();
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_uncaptured_href_pattern() {
        let mut definition = parse(SITE_AMAZON);
        definition.extraction.href_patterns = vec!["/dp/[A-Z0-9]{10}".to_string()];
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_pattern() {
        let mut definition = parse(SITE_1688);
        definition.identifier.pattern = "[0-9".to_string();
        assert!(matches!(
            definition.validate(),
            Err(SiteError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_loading_indicator_selector() {
        assert_eq!(LoadingRules::default().indicator_selector(), None);
        let rules = LoadingRules {
            indicator_selectors: vec![".a".to_string(), ".b".to_string()],
        };
        assert_eq!(rules.indicator_selector().as_deref(), Some(".a, .b"));
    }
}
