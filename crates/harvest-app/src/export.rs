//! Export artifact rendering.
//!
//! Hosts receive the rendered file and take care of the actual download.

use crate::error::CommandError;
use csv::{QuoteStyle, WriterBuilder};
use harvest_core::{Identifier, Timestamp};
use harvest_site::{ExportFormat, SiteDefinition};
use serde::{Deserialize, Serialize};

/// Which identifiers an export covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportScope {
    /// Collected but not yet exported
    New,
    /// Everything collected
    All,
}

/// A rendered export file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportArtifact {
    pub filename: String,
    pub mime_type: String,
    pub content: String,
    /// Identifiers in the file
    pub count: usize,
}

/// Render `ids` for `site` in `format`.
pub fn render(
    site: &SiteDefinition,
    ids: &[Identifier],
    format: ExportFormat,
    scope: ExportScope,
    at: Timestamp,
) -> Result<ExportArtifact, CommandError> {
    let (content, mime_type) = match format {
        ExportFormat::Text => (render_text(ids), "text/plain;charset=utf-8"),
        ExportFormat::Csv => (render_csv(site, ids, at)?, "text/csv;charset=utf-8"),
    };

    Ok(ExportArtifact {
        filename: filename(&site.export.file_prefix, format, scope, at),
        mime_type: mime_type.to_string(),
        content,
        count: ids.len(),
    })
}

/// One identifier per line.
pub fn render_text(ids: &[Identifier]) -> String {
    ids.iter()
        .map(Identifier::as_str)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Header row, then one `id,detail URL,timestamp` row per identifier, every
/// field quoted.
pub fn render_csv(
    site: &SiteDefinition,
    ids: &[Identifier],
    at: Timestamp,
) -> Result<String, CommandError> {
    let timestamp = at.to_rfc3339();
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_writer(Vec::new());

    writer.write_record(["id", "detail_url", "collected_at"])?;
    for id in ids {
        let url = site.detail_url(id.as_str());
        writer.write_record([id.as_str(), url.as_str(), timestamp.as_str()])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    String::from_utf8(bytes)
        .map_err(|e| CommandError::new("EXPORT_ERROR", format!("Export is not UTF-8: {e}")))
}

/// `<prefix>_<date>.csv` / `<prefix>_new_<millis>.txt`, with `all` in place
/// of `new` for full exports.
pub fn filename(prefix: &str, format: ExportFormat, scope: ExportScope, at: Timestamp) -> String {
    let date = at.as_datetime().format("%Y-%m-%d");
    match (format, scope) {
        (ExportFormat::Csv, ExportScope::New) => format!("{prefix}_{date}.csv"),
        (ExportFormat::Csv, ExportScope::All) => format!("{prefix}_all_{date}.csv"),
        (ExportFormat::Text, ExportScope::New) => {
            format!("{prefix}_new_{}.txt", at.timestamp_millis())
        }
        (ExportFormat::Text, ExportScope::All) => {
            format!("{prefix}_all_{}.txt", at.timestamp_millis())
        }
    }
}
