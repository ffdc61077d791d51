use crate::capture::NetworkCapture;
use crate::error::{BrowserError, Result};
use crate::fingerprint::FingerprintConfig;
use crate::page::BrowserPage;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::handler::viewport::Viewport;
use futures::StreamExt;
use harvest_core::BrowserConfig as BrowserSettings;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Spaces out navigations to the same domain
#[derive(Debug)]
pub(crate) struct NavigationThrottle {
    last_access: HashMap<String, Instant>,
    min_delay: Duration,
}

impl NavigationThrottle {
    pub(crate) fn new(min_delay_ms: u64) -> Self {
        Self {
            last_access: HashMap::new(),
            min_delay: Duration::from_millis(min_delay_ms),
        }
    }

    /// How long to wait before `domain` may be hit again; records the visit.
    pub(crate) fn reserve(&mut self, domain: &str) -> Duration {
        let now = Instant::now();
        let wait = self
            .last_access
            .get(domain)
            .map(|last| self.min_delay.saturating_sub(now.duration_since(*last)))
            .unwrap_or_default();
        self.last_access.insert(domain.to_string(), now + wait);
        wait
    }
}

/// Browser automation engine
pub struct BrowserEngine {
    browser: Browser,
    handler: JoinHandle<()>,
    fingerprint: FingerprintConfig,
    navigation_timeout: Duration,
    throttle: Arc<Mutex<NavigationThrottle>>,
}

impl BrowserEngine {
    /// Launch Chromium with a randomized fingerprint
    pub async fn launch(settings: &BrowserSettings) -> Result<Self> {
        Self::with_fingerprint(settings, FingerprintConfig::randomized()).await
    }

    /// Launch Chromium with a specific fingerprint
    pub async fn with_fingerprint(
        settings: &BrowserSettings,
        fingerprint: FingerprintConfig,
    ) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(settings.window_width, settings.window_height)
            .viewport(Viewport {
                width: fingerprint.viewport_width,
                height: fingerprint.viewport_height,
                ..Viewport::default()
            })
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run");
        if !settings.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(BrowserError::ChromiumError)?;

        let (browser, mut handler) = Browser::launch(config).await?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        info!(headless = settings.headless, "browser launched");

        Ok(Self {
            browser,
            handler,
            fingerprint,
            navigation_timeout: Duration::from_secs(settings.navigation_timeout_secs),
            throttle: Arc::new(Mutex::new(NavigationThrottle::new(1000))),
        })
    }

    /// Open a tab at `url`, capturing API responses matching `capture_patterns`
    pub async fn open(&self, url: &str, capture_patterns: Vec<String>) -> Result<BrowserPage> {
        let page = self.browser.new_page("about:blank").await?;
        self.fingerprint.apply(&page).await?;
        let capture = NetworkCapture::start(&page, capture_patterns).await?;

        let page = BrowserPage::new(page, capture, self.navigation_timeout, self.throttle.clone());
        crate::driver::PageDriver::goto(&page, url).await?;

        debug!(%url, "page opened");
        Ok(page)
    }

    /// Close the browser and stop its event loop
    pub async fn close(mut self) -> Result<()> {
        self.browser.close().await?;
        self.handler.abort();
        info!("browser closed");
        Ok(())
    }
}
