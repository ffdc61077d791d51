//! Identifier extraction from page snapshots.
//!
//! Extraction is a pure function of a [`Snapshot`]: rendered HTML plus any
//! JSON payloads captured from the site's API while the page loaded.

use crate::error::{CollectError, Result};
use harvest_core::Identifier;
use harvest_site::{IdentifierFormat, SiteDefinition};
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{debug, trace};

/// What the extractor reads: the DOM and captured API payloads.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Serialized DOM
    pub html: String,
    /// JSON bodies of matching API responses and page globals
    pub payloads: Vec<Value>,
}

struct MarkerSelector {
    selector: Selector,
    attribute: String,
}

/// Site-specific identifier extractor.
pub struct Extractor {
    format: IdentifierFormat,
    markers: Vec<MarkerSelector>,
    anchors: Selector,
    href_patterns: Vec<Regex>,
    json_scripts: Option<Selector>,
    globals: Vec<String>,
    id_fields: Vec<String>,
    list_fields: Vec<String>,
    max_depth: usize,
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| CollectError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

/// Identifiers in first-seen order, validated on the way in.
struct Candidates<'a> {
    format: &'a IdentifierFormat,
    seen: HashSet<String>,
    ids: Vec<Identifier>,
}

impl<'a> Candidates<'a> {
    fn new(format: &'a IdentifierFormat) -> Self {
        Self {
            format,
            seen: HashSet::new(),
            ids: Vec::new(),
        }
    }

    fn offer(&mut self, token: &str) {
        if !self.format.is_valid(token) {
            trace!(token, "rejected candidate");
            return;
        }
        if self.seen.insert(token.to_string()) {
            if let Ok(id) = Identifier::new(token) {
                self.ids.push(id);
            }
        }
    }
}

impl Extractor {
    /// Build an extractor from a site definition.
    ///
    /// `default_depth` bounds the API walk unless the site sets its own.
    pub fn new(site: &SiteDefinition, default_depth: usize) -> Result<Self> {
        let markers = site
            .extraction
            .markers
            .iter()
            .map(|rule| {
                Ok(MarkerSelector {
                    selector: parse_selector(&rule.selector)?,
                    attribute: rule.attribute.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let json_scripts = if site.extraction.json_scripts {
            Some(parse_selector(
                r#"script[type="application/json"], script:not([src])"#,
            )?)
        } else {
            None
        };

        Ok(Self {
            format: site.identifier_format()?,
            markers,
            anchors: parse_selector("a[href]")?,
            href_patterns: site.href_patterns()?,
            json_scripts,
            globals: site.extraction.globals.clone(),
            id_fields: site.extraction.api_id_fields.clone(),
            list_fields: site.extraction.api_list_fields.clone(),
            max_depth: site.extraction.max_depth.unwrap_or(default_depth),
        })
    }

    /// The validation predicate in use.
    #[must_use]
    pub fn format(&self) -> &IdentifierFormat {
        &self.format
    }

    /// Window globals to read alongside each snapshot.
    #[must_use]
    pub fn globals(&self) -> &[String] {
        &self.globals
    }

    /// Every valid identifier in the snapshot, deduplicated, in first-seen
    /// order: DOM markers, then anchors, then embedded JSON, then payloads.
    #[must_use]
    pub fn extract(&self, snapshot: &Snapshot) -> Vec<Identifier> {
        let mut candidates = Candidates::new(&self.format);
        self.scan_html(&snapshot.html, &mut candidates);
        for payload in &snapshot.payloads {
            self.scan_payload(payload, &mut candidates);
        }

        debug!(
            found = candidates.ids.len(),
            payloads = snapshot.payloads.len(),
            "extracted identifiers"
        );
        candidates.ids
    }

    /// Identifiers in an HTML document only.
    #[must_use]
    pub fn extract_html(&self, html: &str) -> Vec<Identifier> {
        let mut candidates = Candidates::new(&self.format);
        self.scan_html(html, &mut candidates);
        candidates.ids
    }

    /// Identifiers in one API payload only.
    #[must_use]
    pub fn extract_payload(&self, payload: &Value) -> Vec<Identifier> {
        let mut candidates = Candidates::new(&self.format);
        self.scan_payload(payload, &mut candidates);
        candidates.ids
    }

    fn scan_html(&self, html: &str, candidates: &mut Candidates<'_>) {
        let document = Html::parse_document(html);

        for marker in &self.markers {
            for element in document.select(&marker.selector) {
                // Composite keys carry the identifier as their last run
                if let Some(token) = element
                    .value()
                    .attr(&marker.attribute)
                    .and_then(|value| self.format.last_token(value))
                {
                    candidates.offer(token);
                }
            }
        }

        for anchor in document.select(&self.anchors) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            for pattern in &self.href_patterns {
                if let Some(token) = pattern.captures(href).and_then(|c| c.get(1)) {
                    candidates.offer(token.as_str());
                }
            }
        }

        if let Some(scripts) = &self.json_scripts {
            for script in document.select(scripts) {
                let text: String = script.text().collect();
                match serde_json::from_str::<Value>(text.trim()) {
                    Ok(value) => self.scan_payload(&value, candidates),
                    Err(e) => trace!(error = %e, "skipping script that is not JSON"),
                }
            }
        }
    }

    fn scan_payload(&self, payload: &Value, candidates: &mut Candidates<'_>) {
        if is_failed_response(payload) {
            debug!("ignoring failed API response");
            return;
        }
        self.walk(payload, 0, candidates);
    }

    fn walk(&self, value: &Value, depth: usize, candidates: &mut Candidates<'_>) {
        if depth > self.max_depth {
            return;
        }

        match value {
            Value::Array(items) => {
                for item in items {
                    self.walk(item, depth + 1, candidates);
                }
            }
            Value::Object(map) => {
                for field in &self.id_fields {
                    if let Some(token) = map.get(field).and_then(scalar_token) {
                        candidates.offer(&token);
                    }
                }

                // Listing arrays first so ids keep the order of the list
                for field in &self.list_fields {
                    if let Some(Value::Array(items)) = map.get(field) {
                        for item in items {
                            self.walk(item, depth + 1, candidates);
                        }
                    }
                }

                for (key, child) in map {
                    if self.list_fields.contains(key) || !is_container(child) {
                        continue;
                    }
                    self.walk(child, depth + 1, candidates);
                }
            }
            _ => {}
        }
    }
}

fn is_container(value: &Value) -> bool {
    matches!(value, Value::Array(_) | Value::Object(_))
}

fn scalar_token(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => n.as_u64().map(|n| n.to_string()),
        _ => None,
    }
}

/// Top-level `ret` array carrying a FAIL or ERROR code.
fn is_failed_response(payload: &Value) -> bool {
    payload
        .as_object()
        .and_then(|map: &Map<String, Value>| map.get("ret"))
        .and_then(Value::as_array)
        .is_some_and(|codes| {
            codes.iter().filter_map(Value::as_str).any(|code| {
                let code = code.to_ascii_uppercase();
                code.contains("FAIL") || code.contains("ERROR")
            })
        })
}
