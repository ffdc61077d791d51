//! Application state management.

use crate::error::CommandError;
use harvest_browser::{host_of, BrowserEngine, PageDriver};
use harvest_collector::{CollectionReport, Collector};
use harvest_core::{AppConfig, SiteId};
use harvest_site::{SiteDefinition, SiteLoader, SiteRegistry};
use harvest_store::{ExportTracker, IdentifierSets, KeyValueStore, SqliteStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One live page attached to a site.
pub struct SiteSession {
    collector: Arc<Collector>,
    run: Mutex<Option<(u64, CancellationToken)>>,
    runs: AtomicU64,
}

impl SiteSession {
    fn new(collector: Collector) -> Self {
        Self {
            collector: Arc::new(collector),
            run: Mutex::new(None),
            runs: AtomicU64::new(0),
        }
    }

    /// The session's collector.
    pub fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    /// Register a new run. The run stays abortable until the returned guard
    /// is dropped, whether the run finished or its future was dropped.
    pub fn begin_run(&self) -> ActiveRun<'_> {
        let id = self.runs.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        *self.run.lock().unwrap_or_else(PoisonError::into_inner) = Some((id, token.clone()));
        ActiveRun {
            session: self,
            id,
            token,
        }
    }

    /// Cancel the current run. Returns false when nothing is running.
    pub fn abort(&self) -> bool {
        match self.run.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Registration of a run on a [`SiteSession`]. Dropping it forgets the run.
pub struct ActiveRun<'a> {
    session: &'a SiteSession,
    id: u64,
    token: CancellationToken,
}

impl ActiveRun<'_> {
    /// Token the run watches for aborts.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        let mut run = self
            .session
            .run
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // A later run may have replaced this one.
        if matches!(run.as_ref(), Some((id, _)) if *id == self.id) {
            run.take();
        }
    }
}

/// State shared by every request handler.
pub struct AppState {
    /// Loaded configuration
    pub config: AppConfig,

    /// Known site definitions
    pub registry: SiteRegistry,

    /// Shared key-value store
    pub store: Arc<dyn KeyValueStore>,

    /// Attached pages: site_id -> session
    sessions: RwLock<HashMap<SiteId, Arc<SiteSession>>>,

    /// Browser used by [`AppState::open_site`].
    ///
    /// Lazily launched on first use so state can be built without Chromium.
    browser_engine: tokio::sync::Mutex<Option<BrowserEngine>>,
}

impl AppState {
    /// Assemble state from already-built parts.
    pub fn new(config: AppConfig, registry: SiteRegistry, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            config,
            registry,
            store,
            sessions: RwLock::new(HashMap::new()),
            browser_engine: tokio::sync::Mutex::new(None),
        }
    }

    /// Load config, site definitions and the SQLite store from their
    /// default locations.
    pub async fn initialize() -> Result<Self, CommandError> {
        let config = AppConfig::load_with_env()?;
        let loader = SiteLoader::with_default_dir()?;
        let registry = SiteRegistry::load_from(&loader)?;

        let db_path = config.database_path()?;
        let store = SqliteStore::open(&db_path).await?;
        info!(
            sites = registry.count(),
            database = %db_path.display(),
            "application state initialized"
        );

        Ok(Self::new(config, registry, Arc::new(store)))
    }

    /// Site definition by ID.
    pub fn site(&self, site_id: &SiteId) -> Result<SiteDefinition, CommandError> {
        Ok(self.registry.get(site_id)?)
    }

    /// Export tracker for a site. Needs no live page.
    pub fn tracker(&self, site_id: &SiteId) -> Result<ExportTracker, CommandError> {
        let site = self.site(site_id)?;
        Ok(ExportTracker::new(IdentifierSets::new(
            self.store.clone(),
            site.storage,
        )))
    }

    /// Session for a site with an attached page.
    pub fn session(&self, site_id: &SiteId) -> Result<Arc<SiteSession>, CommandError> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(site_id)
            .cloned()
            .ok_or_else(|| CommandError::no_page(site_id.as_str()))
    }

    /// Attach a live page to a site, replacing any earlier one, and resume a
    /// run that an earlier session left unfinished.
    pub async fn attach(
        &self,
        site_id: &SiteId,
        page: Arc<dyn PageDriver>,
    ) -> Result<Option<CollectionReport>, CommandError> {
        let site = Arc::new(self.site(site_id)?);
        let collector = Collector::new(site, page, self.store.clone(), &self.config)?;
        let session = Arc::new(SiteSession::new(collector));

        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(site_id.clone(), session.clone());
        info!(site = %site_id, "page attached");

        let run = session.begin_run();
        let resumed = session.collector().resume(run.token()).await;
        drop(run);
        Ok(resumed?)
    }

    /// Detach the page of a site.
    pub fn detach(&self, site_id: &SiteId) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(site_id)
            .is_some()
    }

    /// Open `url` in the shared browser and attach it to the site serving
    /// that host.
    pub async fn open_site(&self, url: &str) -> Result<(SiteId, Option<CollectionReport>), CommandError> {
        let host = host_of(url)?;
        let site = self.registry.find_by_host(&host).ok_or_else(|| {
            CommandError::with_details(
                "SITE_NOT_FOUND",
                format!("No site definition serves {host}"),
                serde_json::json!({ "host": host }),
            )
        })?;

        let page = {
            let mut engine = self.browser_engine.lock().await;
            if engine.is_none() {
                *engine = Some(BrowserEngine::launch(&self.config.browser).await?);
            }
            let Some(engine) = engine.as_ref() else {
                return Err(CommandError::new("BROWSER_ERROR", "Browser is not running"));
            };
            engine
                .open(url, site.extraction.api_url_patterns.clone())
                .await?
        };

        let site_id = site.id().clone();
        let resumed = self.attach(&site_id, Arc::new(page)).await?;
        Ok((site_id, resumed))
    }

    /// Close the shared browser, if it was launched.
    pub async fn shutdown(&self) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        if let Some(engine) = self.browser_engine.lock().await.take() {
            if let Err(e) = engine.close().await {
                warn!(error = %e, "failed to close browser");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_browser::{PageFixture, ScriptedPage};
    use harvest_store::MemoryStore;

    fn state() -> AppState {
        let registry = SiteRegistry::new();
        registry
            .insert(
                toml::from_str(include_str!("../../../site-definitions/1688.toml"))
                    .expect("parse 1688"),
            )
            .expect("insert site");
        AppState::new(AppConfig::default(), registry, Arc::new(MemoryStore::new()))
    }

    fn site_id() -> SiteId {
        SiteId::new("1688").unwrap()
    }

    #[tokio::test]
    async fn test_session_requires_attach() {
        let state = state();
        let err = state.session(&site_id()).err().unwrap();
        assert_eq!(err.code, "NO_PAGE");

        let page = ScriptedPage::new("https://s.1688.com/selloffer/offer_search.htm", "beginPage")
            .unwrap()
            .with_page(1, PageFixture::new("<p></p>"));
        let resumed = state.attach(&site_id(), Arc::new(page)).await.unwrap();
        assert!(resumed.is_none());
        assert!(state.session(&site_id()).is_ok());

        assert!(state.detach(&site_id()));
        assert!(state.session(&site_id()).is_err());
    }

    #[tokio::test]
    async fn test_unknown_site() {
        let state = state();
        let err = state.tracker(&SiteId::new("ebay").unwrap()).err().unwrap();
        assert_eq!(err.code, "SITE_NOT_FOUND");
    }

    #[test]
    fn test_abort_without_run() {
        let state = state();
        let page = ScriptedPage::new("https://s.1688.com/", "beginPage").unwrap();
        let site = Arc::new(state.site(&site_id()).unwrap());
        let collector =
            Collector::new(site, Arc::new(page), state.store.clone(), &state.config).unwrap();
        let session = SiteSession::new(collector);

        assert!(!session.abort());
        let run = session.begin_run();
        assert!(session.abort());
        assert!(run.token().is_cancelled());
        drop(run);
        assert!(!session.abort());
    }

    #[test]
    fn test_stale_guard_keeps_newer_run() {
        let state = state();
        let page = ScriptedPage::new("https://s.1688.com/", "beginPage").unwrap();
        let site = Arc::new(state.site(&site_id()).unwrap());
        let collector =
            Collector::new(site, Arc::new(page), state.store.clone(), &state.config).unwrap();
        let session = SiteSession::new(collector);

        let first = session.begin_run();
        let second = session.begin_run();
        drop(first);
        assert!(session.abort());
        assert!(second.token().is_cancelled());
        drop(second);
        assert!(!session.abort());
    }

    #[tokio::test]
    async fn test_open_site_rejects_unknown_host() {
        let state = state();
        let err = state.open_site("https://www.ebay.com/sch/i.html").await.err().unwrap();
        assert_eq!(err.code, "SITE_NOT_FOUND");
    }
}
