//! The multi-page collection state machine.
//!
//! A run walks `pages` result pages starting from the current one (or a
//! requested start page). For each page it scrolls until stable, extracts,
//! folds the identifiers into the task record, persists the record, and
//! navigates on. The record is written before every navigation, so a run cut
//! short by a crash or reload can be resumed from the last completed page.

use crate::error::{CollectError, Result};
use crate::extractor::{Extractor, Snapshot};
use crate::loader::PageLoader;
use crate::navigator::{NavigationOutcome, Navigator};
use crate::task::{CollectionTask, TaskStore};
use harvest_browser::PageDriver;
use harvest_core::{AppConfig, Identifier};
use harvest_site::SiteDefinition;
use harvest_store::{IdentifierSets, KeyValueStore};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What to collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectRequest {
    /// Number of pages, at least 1
    pub pages: u32,
    /// Page to start from; the current page when `None`
    pub start_page: Option<u32>,
}

impl CollectRequest {
    /// Collect `pages` pages from the current one.
    #[must_use]
    pub fn pages(pages: u32) -> Self {
        Self {
            pages,
            start_page: None,
        }
    }

    /// Collect only the current page.
    #[must_use]
    pub fn current_page() -> Self {
        Self::pages(1)
    }

    /// Start from `page` instead of the current page.
    #[must_use]
    pub fn starting_at(mut self, page: u32) -> Self {
        self.start_page = Some(page);
        self
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CollectionStatus {
    /// Every requested page was processed
    Completed,
    /// Navigation failed part way; earlier pages were kept
    Partial,
    /// Stopped by the user; earlier pages were kept
    Aborted,
    /// Nothing usable came out of the run
    Failed,
}

/// Where the machine is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum RunState {
    /// No run has started
    Idle,
    /// Working on the `page_index`th page of the run (1-based)
    Running {
        /// Page index within the run
        #[serde(rename = "pageIndex")]
        page_index: u32,
    },
    /// Last run completed
    Completed,
    /// Last run stopped on a navigation failure
    Partial,
    /// Last run failed
    Failed,
    /// Last run was aborted
    Aborted,
}

impl From<CollectionStatus> for RunState {
    fn from(status: CollectionStatus) -> Self {
        match status {
            CollectionStatus::Completed => Self::Completed,
            CollectionStatus::Partial => Self::Partial,
            CollectionStatus::Aborted => Self::Aborted,
            CollectionStatus::Failed => Self::Failed,
        }
    }
}

/// Result of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionReport {
    /// How the run ended
    pub status: CollectionStatus,
    /// Pages fully processed
    pub pages_completed: u32,
    /// Pages requested
    pub target_pages: u32,
    /// Identifiers found by this run, first-seen order
    pub ids: Vec<Identifier>,
    /// Identifiers new to the Collected Set
    pub added: usize,
    /// Size of the Collected Set afterwards
    pub total: usize,
    /// The result could not be fully persisted
    pub save_failed: bool,
    /// The run continued an interrupted task
    pub resumed: bool,
    /// Why the run stopped early or failed
    pub failure: Option<String>,
}

/// Orchestrates loader, extractor and navigator over one live page.
pub struct Collector {
    site: Arc<SiteDefinition>,
    page: Arc<dyn PageDriver>,
    extractor: Extractor,
    loader: PageLoader,
    navigator: Navigator,
    sets: IdentifierSets,
    tasks: TaskStore,
    max_pages: u32,
    state: Mutex<RunState>,
}

impl Collector {
    /// Collector for `site` driving `page`, persisting into `store`.
    pub fn new(
        site: Arc<SiteDefinition>,
        page: Arc<dyn PageDriver>,
        store: Arc<dyn KeyValueStore>,
        config: &AppConfig,
    ) -> Result<Self> {
        Ok(Self {
            extractor: Extractor::new(&site, config.collection.max_extract_depth)?,
            loader: PageLoader::new(config.scroll.clone(), &site),
            navigator: Navigator::new(&site, config.navigation.clone()),
            sets: IdentifierSets::new(store.clone(), site.storage.clone()),
            tasks: TaskStore::new(store),
            max_pages: config.collection.max_pages,
            state: Mutex::new(RunState::Idle),
            site,
            page,
        })
    }

    /// The site being collected.
    #[must_use]
    pub fn site(&self) -> &SiteDefinition {
        &self.site
    }

    /// The site's identifier sets.
    #[must_use]
    pub fn sets(&self) -> &IdentifierSets {
        &self.sets
    }

    /// Current machine state.
    #[must_use]
    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: RunState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Page number the live page shows.
    pub async fn current_page(&self) -> Result<u32> {
        self.navigator.current_page(self.page.as_ref()).await
    }

    /// Navigate one page forward.
    ///
    /// Refused while a run is driving the page.
    pub async fn advance_page(&self) -> Result<NavigationOutcome> {
        if let RunState::Running { .. } = self.state() {
            return Err(CollectError::Busy);
        }
        let current = self.current_page().await?;
        let next = current.checked_add(1).ok_or_else(|| {
            CollectError::InvalidRequest(format!("page {current} is the last addressable page"))
        })?;
        self.navigator.advance(self.page.as_ref(), next).await
    }

    /// Collect the current page only.
    pub async fn collect_current(&self) -> Result<CollectionReport> {
        self.run(CollectRequest::current_page(), &CancellationToken::new())
            .await
    }

    /// Run a collection. `cancel` is checked before every page.
    pub async fn run(
        &self,
        request: CollectRequest,
        cancel: &CancellationToken,
    ) -> Result<CollectionReport> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if let RunState::Running { .. } = *state {
                return Err(CollectError::Busy);
            }
            *state = RunState::Running { page_index: 0 };
        }
        let _settle = Settle(&self.state);
        let result = self.start(request, cancel).await;
        if result.is_err() {
            self.set_state(RunState::Failed);
        }
        result
    }

    /// Continue an interrupted run for this site, if one was left behind.
    ///
    /// The record is discarded when the live page is neither the page the
    /// run was about to process nor the one just before it.
    pub async fn resume(&self, cancel: &CancellationToken) -> Result<Option<CollectionReport>> {
        let _settle = Settle(&self.state);
        let result = self.resume_orphan(cancel).await;
        if result.is_err() {
            self.set_state(RunState::Failed);
        }
        result
    }

    async fn start(
        &self,
        request: CollectRequest,
        cancel: &CancellationToken,
    ) -> Result<CollectionReport> {
        if request.pages == 0 {
            return Err(CollectError::InvalidRequest("page count must be at least 1".into()));
        }
        if request.pages > self.max_pages {
            return Err(CollectError::InvalidRequest(format!(
                "page count {} exceeds the limit of {}",
                request.pages, self.max_pages
            )));
        }
        if request.start_page == Some(0) {
            return Err(CollectError::InvalidRequest("pages are numbered from 1".into()));
        }

        for stale in self.tasks.for_site(self.site.id()).await? {
            warn!(task_id = %stale.id, "closing unfinished task before a new run");
            self.salvage(&stale).await?;
        }

        let current = self.current_page().await?;
        let start = request.start_page.unwrap_or(current);
        if start.checked_add(request.pages).is_none() {
            return Err(CollectError::InvalidRequest(format!(
                "{} pages from page {start} run past the last addressable page",
                request.pages
            )));
        }
        if start != current {
            match self.navigator.go_to(self.page.as_ref(), start).await {
                Ok(_) => {}
                Err(e) if e.is_navigation_failure() => {
                    warn!(start, error = %e, "could not reach start page");
                    let task = CollectionTask::new(self.site.id().clone(), start, request.pages);
                    self.set_state(RunState::Failed);
                    return Ok(report(&task, CollectionStatus::Failed, Some(e.to_string())));
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            site = %self.site.id(),
            start,
            pages = request.pages,
            "collection started"
        );

        let task = CollectionTask::new(self.site.id().clone(), start, request.pages);
        let mut save_failed = false;
        self.persist(&task, &mut save_failed).await;
        self.drive(task, cancel, save_failed, false).await
    }

    async fn resume_orphan(&self, cancel: &CancellationToken) -> Result<Option<CollectionReport>> {
        let Some(task) = self.tasks.take_orphan(self.site.id()).await? else {
            return Ok(None);
        };

        info!(
            task_id = %task.id,
            completed = task.current_index,
            target = task.target_page_count,
            "found unfinished task"
        );
        self.set_state(RunState::Running {
            page_index: task.current_index,
        });

        if task.is_finished() {
            return self
                .finish(task, CollectionStatus::Completed, None, false, true)
                .await
                .map(Some);
        }

        let expected = task.expected_page();
        let live = self.current_page().await?;

        if live != expected {
            if task.current_index > 0 && live.checked_add(1) == Some(expected) {
                // Stopped after persisting but before the page changed
                match self.navigator.advance(self.page.as_ref(), expected).await {
                    Ok(_) => {}
                    Err(e) if e.is_navigation_failure() => {
                        return self
                            .finish(task, CollectionStatus::Partial, Some(e.to_string()), false, true)
                            .await
                            .map(Some);
                    }
                    Err(e) => return Err(e),
                }
            } else {
                warn!(
                    task_id = %task.id,
                    expected,
                    live,
                    "live page does not match unfinished task, discarding it"
                );
                self.salvage(&task).await?;
                self.set_state(RunState::Idle);
                return Ok(None);
            }
        }

        self.drive(task, cancel, false, true).await.map(Some)
    }

    async fn drive(
        &self,
        mut task: CollectionTask,
        cancel: &CancellationToken,
        mut save_failed: bool,
        resumed: bool,
    ) -> Result<CollectionReport> {
        let page = self.page.as_ref();

        while !task.is_finished() {
            if cancel.is_cancelled() {
                info!(task_id = %task.id, completed = task.current_index, "collection aborted");
                return self
                    .finish(task, CollectionStatus::Aborted, None, save_failed, resumed)
                    .await;
            }

            let index = task.current_index + 1;
            let page_number = task.expected_page();
            self.set_state(RunState::Running { page_index: index });

            let scroll = self.loader.stabilize(page).await?;
            let mut payloads = page.take_payloads().await?;
            payloads.extend(page.globals(self.extractor.globals()).await?);
            let snapshot = Snapshot {
                html: page.html().await?,
                payloads,
            };
            let ids = self.extractor.extract(&snapshot);
            let found = ids.len();
            let new = task.absorb(ids);

            info!(
                page = page_number,
                index,
                found,
                new,
                stabilized = scroll.stabilized,
                "page collected"
            );

            task.complete_page(index);
            self.persist(&task, &mut save_failed).await;

            if task.is_finished() {
                break;
            }

            let next = task.expected_page();
            match self.navigator.advance(page, next).await {
                Ok(outcome) => debug!(page = next, mechanism = ?outcome.mechanism, "moved to next page"),
                Err(e) if e.is_navigation_failure() => {
                    warn!(page = next, error = %e, "stopping run early");
                    return self
                        .finish(
                            task,
                            CollectionStatus::Partial,
                            Some(e.to_string()),
                            save_failed,
                            resumed,
                        )
                        .await;
                }
                Err(e) => return Err(e),
            }
        }

        self.finish(task, CollectionStatus::Completed, None, save_failed, resumed)
            .await
    }

    /// Merge the accumulated identifiers and drop the task record.
    async fn finish(
        &self,
        task: CollectionTask,
        status: CollectionStatus,
        failure: Option<String>,
        save_failed: bool,
        resumed: bool,
    ) -> Result<CollectionReport> {
        let mut report = report(&task, status, failure);
        report.save_failed = save_failed;
        report.resumed = resumed;

        if task.collected_ids.is_empty() {
            if status == CollectionStatus::Completed {
                report.status = CollectionStatus::Failed;
                report.failure = Some(
                    CollectError::NothingExtracted {
                        pages: task.current_index,
                    }
                    .to_string(),
                );
            }
            match self.sets.collected().await {
                Ok(collected) => report.total = collected.len(),
                Err(e) => warn!(error = %e, "could not read collected identifiers"),
            }
        } else {
            match self.sets.append_unique(&task.collected_ids).await {
                Ok(merge) => {
                    report.added = merge.added;
                    report.total = merge.total;
                }
                Err(e) => {
                    // Keep the record so a later resume can retry the merge
                    warn!(task_id = %task.id, error = %e, "failed to save collected identifiers");
                    report.save_failed = true;
                    self.set_state(report.status.into());
                    return Ok(report);
                }
            }
        }

        if let Err(e) = self.tasks.delete(&task).await {
            warn!(task_id = %task.id, error = %e, "failed to delete task record");
            report.save_failed = true;
        }

        self.set_state(report.status.into());
        info!(
            status = ?report.status,
            pages = report.pages_completed,
            added = report.added,
            total = report.total,
            "collection finished"
        );
        Ok(report)
    }

    /// Merge what an abandoned task had collected, then delete its record.
    ///
    /// The record stays when the merge fails.
    async fn salvage(&self, task: &CollectionTask) -> Result<()> {
        if !task.collected_ids.is_empty() {
            let merge = self.sets.append_unique(&task.collected_ids).await?;
            info!(
                task_id = %task.id,
                added = merge.added,
                total = merge.total,
                "kept identifiers from unfinished task"
            );
        }
        self.tasks.delete(task).await
    }

    async fn persist(&self, task: &CollectionTask, save_failed: &mut bool) {
        if let Err(e) = self.tasks.save(task).await {
            warn!(task_id = %task.id, error = %e, "failed to persist task record");
            *save_failed = true;
        }
    }
}

/// Marks the machine Failed when a run is dropped before it settles, e.g.
/// by a caller's timeout.
struct Settle<'a>(&'a Mutex<RunState>);

impl Drop for Settle<'_> {
    fn drop(&mut self) {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if let RunState::Running { page_index } = *state {
            warn!(page_index, "run dropped before it finished");
            *state = RunState::Failed;
        }
    }
}

fn report(task: &CollectionTask, status: CollectionStatus, failure: Option<String>) -> CollectionReport {
    CollectionReport {
        status,
        pages_completed: task.current_index,
        target_pages: task.target_page_count,
        ids: task.collected_ids.clone(),
        added: 0,
        total: 0,
        save_failed: false,
        resumed: false,
        failure,
    }
}
