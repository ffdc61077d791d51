//! Identifier validation predicate.

use crate::error::{Result, SiteError};
use harvest_core::SiteId;
use regex::Regex;

/// Compiled identifier format for one site.
///
/// A token is valid when it matches the full pattern and does not start
/// with any denylisted prefix.
#[derive(Debug, Clone)]
pub struct IdentifierFormat {
    exact: Regex,
    token: Regex,
    denylist: Vec<String>,
}

impl IdentifierFormat {
    /// Compile a format from an unanchored token pattern.
    pub fn new(site_id: &SiteId, pattern: &str, denylist: Vec<String>) -> Result<Self> {
        let compile = |source: &str| {
            Regex::new(source).map_err(|e| SiteError::InvalidPattern {
                site_id: site_id.to_string(),
                pattern: pattern.to_string(),
                source: e,
            })
        };

        Ok(Self {
            exact: compile(&format!("^(?:{pattern})$"))?,
            token: compile(pattern)?,
            denylist,
        })
    }

    /// Whether `token` is an acceptable identifier.
    #[must_use]
    pub fn is_valid(&self, token: &str) -> bool {
        !token.is_empty() && self.exact.is_match(token) && !self.is_denylisted(token)
    }

    /// Whether `token` starts with a denylisted prefix.
    #[must_use]
    pub fn is_denylisted(&self, token: &str) -> bool {
        self.denylist.iter().any(|prefix| token.starts_with(prefix.as_str()))
    }

    /// The last run in `text` that matches the token pattern.
    ///
    /// Composite keys embed the identifier as their trailing group, so the
    /// last run wins over earlier ones.
    #[must_use]
    pub fn last_token<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.token.find_iter(text).last().map(|m| m.as_str())
    }

    /// Add a prefix to the denylist at runtime.
    pub fn deny_prefix(&mut self, prefix: impl Into<String>) {
        let prefix = prefix.into();
        if !prefix.is_empty() && !self.denylist.contains(&prefix) {
            self.denylist.push(prefix);
        }
    }
}
