//! Collection verbs: collect, collectOne, advancePage, currentPage, abort.

use super::Response;
use crate::error::CommandError;
use crate::state::AppState;
use harvest_collector::{CollectRequest, CollectionReport, CollectionStatus};
use harvest_core::{Identifier, SiteId};
use serde_json::json;
use tracing::info;

pub(super) async fn collect(
    state: &AppState,
    site: &SiteId,
    pages: Option<u32>,
    start_page: Option<u32>,
) -> Result<Response, CommandError> {
    let session = state.session(site)?;
    let mut request = CollectRequest::pages(pages.unwrap_or(1));
    if let Some(start) = start_page {
        request = request.starting_at(start);
    }

    let report = {
        let run = session.begin_run();
        session.collector().run(request, run.token()).await?
    };

    info!(
        %site,
        status = ?report.status,
        pages = report.pages_completed,
        found = report.ids.len(),
        added = report.added,
        "collect finished"
    );
    Ok(respond(&report))
}

/// Turn a finished run into a response. Completed and partial runs succeed.
fn respond(report: &CollectionReport) -> Response {
    let found = report.ids.len();
    let mut message = match report.status {
        CollectionStatus::Completed => format!(
            "Collected {found} ids from {} page(s): {} new, {} total",
            report.pages_completed, report.added, report.total
        ),
        CollectionStatus::Partial => format!(
            "Stopped after {} of {} pages ({}): {} new, {} total",
            report.pages_completed,
            report.target_pages,
            report.failure.as_deref().unwrap_or("navigation failed"),
            report.added,
            report.total
        ),
        CollectionStatus::Aborted => format!(
            "Aborted after {} of {} pages: {} new, {} total",
            report.pages_completed, report.target_pages, report.added, report.total
        ),
        CollectionStatus::Failed => report
            .failure
            .clone()
            .unwrap_or_else(|| "Collection failed".to_string()),
    };
    if report.save_failed {
        message.push_str(" (warning: results could not be saved)");
    }

    let response = match report.status {
        CollectionStatus::Completed | CollectionStatus::Partial => Response::ok(message),
        CollectionStatus::Aborted | CollectionStatus::Failed => Response::fail(message),
    };
    response
        .with_count(found)
        .with_ids(&report.ids)
        .with_data(report)
}

/// Merge a single identifier into the Collected Set. Needs no live page.
pub(super) async fn collect_one(
    state: &AppState,
    site: &SiteId,
    id: &str,
) -> Result<Response, CommandError> {
    let format = state.site(site)?.identifier_format()?;
    let token = id.trim();
    if !format.is_valid(token) {
        return Err(CommandError::with_details(
            "INVALID_REQUEST",
            format!("'{token}' is not a valid {site} identifier"),
            json!({ "id": id }),
        ));
    }

    let id = Identifier::new(token)?;
    let merge = state
        .tracker(site)?
        .sets()
        .append_unique(std::slice::from_ref(&id))
        .await?;
    info!(%site, %id, added = merge.added, total = merge.total, "collected single id");

    let message = if merge.added == 0 {
        format!("{id} was already collected ({} total)", merge.total)
    } else {
        format!("Collected {id} ({} total)", merge.total)
    };
    Ok(Response::ok(message)
        .with_count(merge.added)
        .with_ids(std::slice::from_ref(&id))
        .with_data(merge))
}

pub(super) async fn advance_page(state: &AppState, site: &SiteId) -> Result<Response, CommandError> {
    let session = state.session(site)?;
    let outcome = session.collector().advance_page().await?;
    Ok(Response::ok(format!("Moved to page {}", outcome.target)).with_data(outcome))
}

pub(super) async fn current_page(state: &AppState, site: &SiteId) -> Result<Response, CommandError> {
    let session = state.session(site)?;
    let collector = session.collector();
    let page = collector.current_page().await?;
    Ok(Response::ok(format!("Page {page}")).with_data(json!({
        "page": page,
        "state": collector.state(),
    })))
}

pub(super) fn abort(state: &AppState, site: &SiteId) -> Result<Response, CommandError> {
    let session = state.session(site)?;
    if session.abort() {
        info!(%site, "abort requested");
        Ok(Response::ok("Abort requested"))
    } else {
        Err(CommandError::new("NO_RUN", "No collection is running"))
    }
}
