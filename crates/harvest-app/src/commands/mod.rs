//! Request/response contract and dispatch.
//!
//! Every request names a verb. Only one request per verb and site may be in
//! flight; a duplicate is answered with a `BUSY` failure instead of queuing.
//! Every handler runs under a deadline and every failure comes back as a
//! [`Response`] carrying a [`CommandError`].

mod collect;
mod export;

use crate::error::CommandError;
use crate::state::AppState;
use harvest_core::SiteId;
use harvest_site::ExportFormat;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Deadline for verbs that do not drive the page across pages.
const QUICK_TIMEOUT: Duration = Duration::from_secs(30);

/// A request from a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "camelCase")]
pub enum Request {
    /// Collect the current page, or `pages` pages from `startPage`
    Collect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pages: Option<u32>,
        #[serde(default, rename = "startPage", skip_serializing_if = "Option::is_none")]
        start_page: Option<u32>,
    },
    /// Add one identifier picked by the user
    CollectOne { id: String },
    /// Move one page forward
    AdvancePage,
    /// Report the page number shown
    CurrentPage,
    /// Health check
    Ping,
    /// Stop the running collection
    Abort,
    /// List identifiers not yet exported
    Pending,
    /// Export identifiers not yet exported
    Export {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<ExportFormat>,
    },
    /// Export every collected identifier
    ExportAll,
    /// Forget what was exported
    ResetExport,
    /// Delete collected and exported identifiers
    Clear,
    /// Collection and export statistics
    Stats,
}

impl Request {
    /// The wire name of the verb.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Collect { .. } => "collect",
            Self::CollectOne { .. } => "collectOne",
            Self::AdvancePage => "advancePage",
            Self::CurrentPage => "currentPage",
            Self::Ping => "ping",
            Self::Abort => "abort",
            Self::Pending => "pending",
            Self::Export { .. } => "export",
            Self::ExportAll => "exportAll",
            Self::ResetExport => "resetExport",
            Self::Clear => "clear",
            Self::Stats => "stats",
        }
    }
}

/// Answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    /// Verb-specific payload (reports, export artifacts, stats)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
}

impl Response {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            count: None,
            ids: None,
            data: None,
            error: None,
        }
    }

    /// An unsuccessful outcome that is not an error (e.g. nothing to export).
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::ok(message)
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_ids<'a>(mut self, ids: impl IntoIterator<Item = &'a harvest_core::Identifier>) -> Self {
        self.ids = Some(ids.into_iter().map(ToString::to_string).collect());
        self
    }

    pub fn with_data(mut self, data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => self.data = Some(value),
            Err(e) => warn!(error = %e, "response payload not serializable"),
        }
        self
    }
}

impl From<CommandError> for Response {
    fn from(error: CommandError) -> Self {
        Self {
            success: false,
            message: error.message.clone(),
            count: None,
            ids: None,
            data: None,
            error: Some(error),
        }
    }
}

/// Removes its slot from the in-flight set when dropped.
struct InFlight<'a> {
    slots: &'a Mutex<HashSet<(SiteId, &'static str)>>,
    slot: (SiteId, &'static str),
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.slot);
    }
}

/// Routes requests to handlers.
pub struct Dispatcher {
    state: Arc<AppState>,
    in_flight: Mutex<HashSet<(SiteId, &'static str)>>,
}

impl Dispatcher {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Handle one request for `site`. Never fails: errors become failure
    /// responses.
    pub async fn handle(&self, site: &SiteId, request: Request) -> Response {
        let verb = request.verb();
        let Some(_guard) = self.claim(site, verb) else {
            debug!(%site, verb, "rejecting duplicate request");
            return CommandError::busy(verb).into();
        };

        let limit = self.deadline(&request);
        match tokio::time::timeout(limit, self.route(site, request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => {
                warn!(%site, verb, code = %error.code, "request failed: {}", error.message);
                error.into()
            }
            Err(_) => {
                warn!(%site, verb, ?limit, "request timed out");
                CommandError::timed_out(verb, limit).into()
            }
        }
    }

    fn claim(&self, site: &SiteId, verb: &'static str) -> Option<InFlight<'_>> {
        let slot = (site.clone(), verb);
        let inserted = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(slot.clone());
        inserted.then_some(InFlight {
            slots: &self.in_flight,
            slot,
        })
    }

    /// Upper bound on how long a request may take.
    ///
    /// A collection gets the worst case of scrolling and navigating each
    /// requested page on top of the quick budget.
    fn deadline(&self, request: &Request) -> Duration {
        let pages = match request {
            Request::Collect { pages, .. } => pages.unwrap_or(1),
            Request::AdvancePage => 1,
            _ => return QUICK_TIMEOUT,
        };

        let config = &self.state.config;
        let scroll = &config.scroll;
        let per_attempt = scroll
            .step_pause()
            .saturating_mul(scroll.steps_per_attempt)
            .saturating_add(scroll.settle_pause(true));
        let per_page = per_attempt
            .saturating_mul(scroll.max_attempts)
            .saturating_add(config.navigation.verify_timeout())
            .saturating_add(config.navigation.settle_delay());

        // Reaching a start page costs one more navigation
        QUICK_TIMEOUT.saturating_add(per_page.saturating_mul(pages.saturating_add(1)))
    }

    async fn route(&self, site: &SiteId, request: Request) -> Result<Response, CommandError> {
        let state = self.state.as_ref();
        match request {
            Request::Ping => Ok(Response::ok("pong").with_data(serde_json::json!({
                "version": crate::version(),
                "attached": state.session(site).is_ok(),
            }))),
            Request::Collect { pages, start_page } => {
                collect::collect(state, site, pages, start_page).await
            }
            Request::CollectOne { id } => collect::collect_one(state, site, &id).await,
            Request::AdvancePage => collect::advance_page(state, site).await,
            Request::CurrentPage => collect::current_page(state, site).await,
            Request::Abort => collect::abort(state, site),
            Request::Pending => export::pending(state, site).await,
            Request::Export { format } => export::export_new(state, site, format).await,
            Request::ExportAll => export::export_all(state, site).await,
            Request::ResetExport => export::reset_export(state, site).await,
            Request::Clear => export::clear(state, site).await,
            Request::Stats => export::stats(state, site).await,
        }
    }
}
