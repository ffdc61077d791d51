//! Export-tracking verbs. None of them need a live page.

use super::Response;
use crate::error::CommandError;
use crate::export::{self, ExportScope};
use crate::state::AppState;
use harvest_core::{SiteId, Timestamp};
use harvest_site::ExportFormat;
use serde_json::json;
use tracing::info;

pub(super) async fn pending(state: &AppState, site: &SiteId) -> Result<Response, CommandError> {
    let pending = state.tracker(site)?.pending().await?;
    Ok(Response::ok(format!("{} ids not yet exported", pending.len()))
        .with_count(pending.len())
        .with_ids(&pending))
}

pub(super) async fn export_new(
    state: &AppState,
    site: &SiteId,
    format: Option<ExportFormat>,
) -> Result<Response, CommandError> {
    let definition = state.site(site)?;
    let tracker = state.tracker(site)?;
    let pending = tracker.pending().await?;
    if pending.is_empty() {
        return Err(CommandError::new("NOTHING_TO_EXPORT", "No new ids to export"));
    }

    let format = format.unwrap_or(definition.export.format);
    let artifact =
        export::render(&definition, &pending, format, ExportScope::New, Timestamp::now())?;
    let marked = tracker.mark_exported(&pending).await?;
    info!(%site, count = artifact.count, marked, file = %artifact.filename, "exported new ids");

    Ok(Response::ok(format!("Exported {} new ids", artifact.count))
        .with_count(artifact.count)
        .with_data(artifact))
}

pub(super) async fn export_all(state: &AppState, site: &SiteId) -> Result<Response, CommandError> {
    let definition = state.site(site)?;
    let tracker = state.tracker(site)?;
    let all = tracker.mark_all_exported().await?;
    if all.is_empty() {
        return Err(CommandError::new("NOTHING_TO_EXPORT", "No ids collected yet"));
    }

    let artifact = export::render(
        &definition,
        &all,
        definition.export.format,
        ExportScope::All,
        Timestamp::now(),
    )?;
    info!(%site, count = artifact.count, file = %artifact.filename, "exported all ids");

    Ok(Response::ok(format!("Exported all {} ids", artifact.count))
        .with_count(artifact.count)
        .with_data(artifact))
}

pub(super) async fn reset_export(state: &AppState, site: &SiteId) -> Result<Response, CommandError> {
    state.tracker(site)?.reset_export().await?;
    info!(%site, "export history reset");
    Ok(Response::ok("Export history reset"))
}

pub(super) async fn clear(state: &AppState, site: &SiteId) -> Result<Response, CommandError> {
    state.tracker(site)?.clear_all().await?;
    info!(%site, "collected ids cleared");
    Ok(Response::ok("All collected ids cleared"))
}

pub(super) async fn stats(state: &AppState, site: &SiteId) -> Result<Response, CommandError> {
    let tracker = state.tracker(site)?;
    let collected = tracker.sets().collected().await?.len();
    let exported = tracker.sets().exported().await?.len();
    let pending = tracker.pending().await?.len();
    let stats = tracker.stats().await?;

    Ok(Response::ok(format!("{collected} collected, {pending} pending"))
        .with_count(collected)
        .with_data(json!({
            "collected": collected,
            "exported": exported,
            "pending": pending,
            "stats": stats,
        })))
}
