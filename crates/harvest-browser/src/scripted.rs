//! In-memory [`PageDriver`] replaying a fixed set of result pages.
//!
//! Pages are keyed by number. Each page has one or more scroll stages; the
//! page grows to the next stage whenever a scroll reaches the bottom, which
//! is how lazy loading looks from the outside.

use crate::driver::{Control, PageDriver, ScrollMetrics};
use crate::error::{BrowserError, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use url::Url;

const VIEWPORT_HEIGHT: u64 = 900;

/// One result page.
#[derive(Debug, Clone)]
pub struct PageFixture {
    html: String,
    payloads: Vec<Value>,
    globals: HashMap<String, Value>,
    /// (document height, marker count) per scroll stage
    stages: Vec<(u64, usize)>,
    loading: bool,
}

impl PageFixture {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            payloads: Vec::new(),
            globals: HashMap::new(),
            stages: vec![(3000, 0)],
            loading: false,
        }
    }

    /// Replace the scroll stages
    pub fn with_stages(mut self, stages: Vec<(u64, usize)>) -> Self {
        if !stages.is_empty() {
            self.stages = stages;
        }
        self
    }

    /// Add an API payload captured on arrival
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payloads.push(payload);
        self
    }

    /// Expose `value` as the window global `name`
    pub fn with_global(mut self, name: &str, value: Value) -> Self {
        self.globals.insert(name.to_string(), value);
        self
    }

    /// Show a loading indicator until the last stage
    pub fn loading(mut self) -> Self {
        self.loading = true;
        self
    }
}

/// What clicking a control does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickAction {
    Next,
    GoTo(u32),
    Noop,
}

enum ControlSource {
    Fixed(Vec<(Control, ClickAction)>),
    /// A single "next" control, disabled on the last page
    Next { disabled_class: String },
    /// One numbered control per page, `data-page` set
    Items,
}

type ArrivalHook = Arc<dyn Fn() + Send + Sync>;

struct State {
    base_url: Url,
    page_param: String,
    pages: BTreeMap<u32, PageFixture>,
    current: u32,
    stage: usize,
    scroll_y: u64,
    payloads_taken: bool,
    controls: HashMap<String, ControlSource>,
    marker_selector: Option<String>,
    indicator_selector: Option<String>,
    loading_selector: Option<String>,
    frozen: HashSet<u32>,
    failing: HashSet<u32>,
    stalled: HashSet<u32>,
    hooks: HashMap<u32, Vec<ArrivalHook>>,
    actions: Vec<String>,
}

impl State {
    fn fixture(&self) -> Option<&PageFixture> {
        self.pages.get(&self.current)
    }

    fn stage(&self) -> (u64, usize) {
        self.fixture()
            .map(|f| f.stages[self.stage.min(f.stages.len() - 1)])
            .unwrap_or((VIEWPORT_HEIGHT, 0))
    }

    fn last_page(&self) -> u32 {
        self.pages.keys().next_back().copied().unwrap_or(1)
    }

    /// Move to `target`; returns the hooks to run once the lock is released.
    fn arrive(&mut self, target: u32) -> Vec<ArrivalHook> {
        if self.frozen.contains(&target) {
            self.actions.push(format!("frozen {target}"));
            return Vec::new();
        }
        if !self.pages.contains_key(&target) {
            self.actions.push(format!("missing {target}"));
            return Vec::new();
        }
        self.actions.push(format!("arrive {target}"));
        self.current = target;
        self.stage = 0;
        self.scroll_y = 0;
        self.payloads_taken = false;
        self.hooks.get(&target).cloned().unwrap_or_default()
    }

    fn controls(&self, selector: &str) -> Vec<(Control, ClickAction)> {
        match self.controls.get(selector) {
            None => Vec::new(),
            Some(ControlSource::Fixed(list)) => list.clone(),
            Some(ControlSource::Next { disabled_class }) => {
                let last = self.current >= self.last_page();
                let control = Control {
                    text: "Next".to_string(),
                    classes: if last {
                        vec![disabled_class.clone()]
                    } else {
                        Vec::new()
                    },
                    visible: true,
                    ..Control::default()
                };
                vec![(control, ClickAction::Next)]
            }
            Some(ControlSource::Items) => self
                .pages
                .keys()
                .map(|&n| {
                    let control = Control {
                        text: n.to_string(),
                        visible: true,
                        attributes: HashMap::from([("data-page".to_string(), n.to_string())]),
                        ..Control::default()
                    };
                    (control, ClickAction::GoTo(n))
                })
                .collect(),
        }
    }
}

/// Scripted page driver for exercising collection without a browser.
pub struct ScriptedPage {
    state: Mutex<State>,
}

impl ScriptedPage {
    /// Start on page 1 of `base_url`, numbering pages with `page_param`
    pub fn new(base_url: &str, page_param: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| BrowserError::NavigationError(format!("Invalid URL: {e}")))?;
        Ok(Self {
            state: Mutex::new(State {
                base_url,
                page_param: page_param.to_string(),
                pages: BTreeMap::new(),
                current: 1,
                stage: 0,
                scroll_y: 0,
                payloads_taken: false,
                controls: HashMap::new(),
                marker_selector: None,
                indicator_selector: None,
                loading_selector: None,
                frozen: HashSet::new(),
                failing: HashSet::new(),
                stalled: HashSet::new(),
                hooks: HashMap::new(),
                actions: Vec::new(),
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_page(self, number: u32, fixture: PageFixture) -> Self {
        self.lock().pages.insert(number, fixture);
        self
    }

    /// Begin on `number` instead of page 1
    pub fn start_at(self, number: u32) -> Self {
        self.lock().current = number;
        self
    }

    /// Elements counted as markers for stability checks
    pub fn with_marker(self, selector: &str) -> Self {
        self.lock().marker_selector = Some(selector.to_string());
        self
    }

    /// Element whose text is the current page number
    pub fn with_indicator(self, selector: &str) -> Self {
        self.lock().indicator_selector = Some(selector.to_string());
        self
    }

    /// Element visible while a page is still loading
    pub fn with_loading_indicator(self, selector: &str) -> Self {
        self.lock().loading_selector = Some(selector.to_string());
        self
    }

    /// A "next page" control under `selector`
    pub fn with_next(self, selector: &str, disabled_class: &str) -> Self {
        self.lock().controls.insert(
            selector.to_string(),
            ControlSource::Next {
                disabled_class: disabled_class.to_string(),
            },
        );
        self
    }

    /// Numbered page controls under `selector`
    pub fn with_page_items(self, selector: &str) -> Self {
        self.lock()
            .controls
            .insert(selector.to_string(), ControlSource::Items);
        self
    }

    pub fn with_controls(self, selector: &str, controls: Vec<(Control, ClickAction)>) -> Self {
        self.lock()
            .controls
            .insert(selector.to_string(), ControlSource::Fixed(controls));
        self
    }

    /// Navigation to `number` silently does nothing
    pub fn freeze(&self, number: u32) {
        self.lock().frozen.insert(number);
    }

    /// The next snapshot of page `number` fails as if the tab crashed
    pub fn fail_once_on(&self, number: u32) {
        self.lock().failing.insert(number);
    }

    /// Reading the DOM of page `number` never completes
    pub fn stall(&self, number: u32) {
        self.lock().stalled.insert(number);
    }

    /// Run `hook` every time page `number` is reached by navigation
    pub fn on_arrival(&self, number: u32, hook: impl Fn() + Send + Sync + 'static) {
        self.lock()
            .hooks
            .entry(number)
            .or_default()
            .push(Arc::new(hook));
    }

    pub fn current_page(&self) -> u32 {
        self.lock().current
    }

    /// Log of navigations and clicks
    pub fn actions(&self) -> Vec<String> {
        self.lock().actions.clone()
    }

    fn navigate(&self, target: u32) {
        let hooks = self.lock().arrive(target);
        for hook in hooks {
            hook();
        }
    }
}

#[async_trait::async_trait]
impl PageDriver for ScriptedPage {
    async fn current_url(&self) -> Result<String> {
        let state = self.lock();
        let mut url = state.base_url.clone();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| *k != state.page_param.as_str())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(pairs)
            .append_pair(&state.page_param, &state.current.to_string());
        Ok(url.to_string())
    }

    async fn goto(&self, url: &str) -> Result<()> {
        let parsed = Url::parse(url)
            .map_err(|e| BrowserError::NavigationError(format!("Invalid URL: {e}")))?;
        let target = {
            let mut state = self.lock();
            state.actions.push(format!("goto {url}"));
            parsed
                .query_pairs()
                .find(|(k, _)| *k == state.page_param.as_str())
                .and_then(|(_, v)| v.parse().ok())
                .unwrap_or(1)
        };
        self.navigate(target);
        Ok(())
    }

    async fn html(&self) -> Result<String> {
        let stalled = {
            let mut state = self.lock();
            let current = state.current;
            if state.failing.remove(&current) {
                return Err(BrowserError::ChromiumError("target crashed".to_string()));
            }
            if !state.stalled.contains(&current) {
                return Ok(state
                    .fixture()
                    .map(|f| f.html.clone())
                    .unwrap_or_else(|| "<html><body></body></html>".to_string()));
            }
            current
        };
        self.lock().actions.push(format!("stalled {stalled}"));
        std::future::pending().await
    }

    async fn scroll_metrics(&self) -> Result<ScrollMetrics> {
        let state = self.lock();
        Ok(ScrollMetrics {
            scroll_height: state.stage().0,
            scroll_y: state.scroll_y,
            viewport_height: VIEWPORT_HEIGHT,
        })
    }

    async fn scroll_to(&self, y: u64) -> Result<()> {
        let mut state = self.lock();
        let height = state.stage().0;
        state.scroll_y = y.min(height.saturating_sub(VIEWPORT_HEIGHT));
        let stages = state.fixture().map_or(1, |f| f.stages.len());
        if y + VIEWPORT_HEIGHT >= height && state.stage + 1 < stages {
            state.stage += 1;
        }
        Ok(())
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        let state = self.lock();
        if state.marker_selector.as_deref() == Some(selector) {
            return Ok(state.stage().1);
        }
        Ok(state.controls(selector).len())
    }

    async fn any_visible(&self, selector: &str) -> Result<bool> {
        let state = self.lock();
        if state.loading_selector.as_deref() != Some(selector) {
            return Ok(false);
        }
        Ok(state
            .fixture()
            .is_some_and(|f| f.loading && state.stage + 1 < f.stages.len()))
    }

    async fn controls(&self, selector: &str) -> Result<Vec<Control>> {
        Ok(self
            .lock()
            .controls(selector)
            .into_iter()
            .map(|(control, _)| control)
            .collect())
    }

    async fn click(&self, selector: &str, index: usize) -> Result<()> {
        let target = {
            let mut state = self.lock();
            let action = state
                .controls(selector)
                .get(index)
                .map(|(_, action)| *action)
                .ok_or_else(|| BrowserError::SelectorNotFound(format!("{selector}[{index}]")))?;
            state.actions.push(format!("click {selector}[{index}]"));
            match action {
                ClickAction::Next => state.current.checked_add(1),
                ClickAction::GoTo(n) => Some(n),
                ClickAction::Noop => None,
            }
        };
        if let Some(target) = target {
            self.navigate(target);
        }
        Ok(())
    }

    async fn text_of(&self, selector: &str) -> Result<Option<String>> {
        let state = self.lock();
        if state.indicator_selector.as_deref() == Some(selector) {
            return Ok(Some(state.current.to_string()));
        }
        Ok(state
            .controls(selector)
            .into_iter()
            .next()
            .map(|(control, _)| control.text))
    }

    async fn globals(&self, names: &[String]) -> Result<Vec<Value>> {
        let state = self.lock();
        Ok(state
            .fixture()
            .map(|f| {
                names
                    .iter()
                    .filter_map(|name| f.globals.get(name).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn take_payloads(&self) -> Result<Vec<Value>> {
        let mut state = self.lock();
        if state.payloads_taken {
            return Ok(Vec::new());
        }
        state.payloads_taken = true;
        Ok(state
            .fixture()
            .map(|f| f.payloads.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pager() -> ScriptedPage {
        ScriptedPage::new("https://s.example.com/search?q=lamp", "page")
            .unwrap()
            .with_page(1, PageFixture::new("<p>one</p>").with_stages(vec![(2000, 10), (4000, 20)]))
            .with_page(
                2,
                PageFixture::new("<p>two</p>")
                    .with_payload(json!({"id": 1}))
                    .with_global("pageData", json!({"offerId": 7})),
            )
            .with_marker(".item")
            .with_indicator(".current")
            .with_next(".next", "disabled")
            .with_page_items(".num")
    }

    #[tokio::test]
    async fn test_scroll_to_bottom_grows_page() {
        let page = pager();
        assert_eq!(page.count(".item").await.unwrap(), 10);

        page.scroll_to(500).await.unwrap();
        assert_eq!(page.scroll_metrics().await.unwrap().scroll_height, 2000);

        page.scroll_to(1100).await.unwrap();
        let metrics = page.scroll_metrics().await.unwrap();
        assert_eq!(metrics.scroll_height, 4000);
        assert_eq!(page.count(".item").await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_next_click_and_url() {
        let page = pager();
        page.click(".next", 0).await.unwrap();
        assert_eq!(page.current_page(), 2);
        assert_eq!(page.text_of(".current").await.unwrap().as_deref(), Some("2"));
        assert_eq!(
            page.current_url().await.unwrap(),
            "https://s.example.com/search?q=lamp&page=2"
        );

        let next = page.controls(".next").await.unwrap();
        assert!(next[0].has_class("disabled"));
    }

    #[tokio::test]
    async fn test_goto_reads_page_param() {
        let page = pager();
        page.goto("https://s.example.com/search?q=lamp&page=2")
            .await
            .unwrap();
        assert_eq!(page.current_page(), 2);
        assert_eq!(page.take_payloads().await.unwrap().len(), 1);
        assert!(page.take_payloads().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_frozen_navigation_is_silent() {
        let page = pager();
        page.freeze(2);
        page.click(".num", 1).await.unwrap();
        assert_eq!(page.current_page(), 1);
        assert!(page.actions().contains(&"frozen 2".to_string()));
    }

    #[tokio::test]
    async fn test_fail_once_and_hooks() {
        let page = pager();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        page.on_arrival(2, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        page.fail_once_on(2);

        page.click(".next", 0).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(page.html().await.is_err());
        assert_eq!(page.html().await.unwrap(), "<p>two</p>");
    }

    #[tokio::test]
    async fn test_globals_follow_current_page() {
        let page = pager();
        let names = vec!["pageData".to_string(), "g_config".to_string()];
        assert!(page.globals(&names).await.unwrap().is_empty());

        page.click(".next", 0).await.unwrap();
        assert_eq!(page.globals(&names).await.unwrap(), vec![json!({"offerId": 7})]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_page_never_yields_html() {
        let page = pager();
        page.stall(1);
        let read = tokio::time::timeout(std::time::Duration::from_secs(5), page.html()).await;
        assert!(read.is_err());
        assert!(page.actions().contains(&"stalled 1".to_string()));
    }

    #[tokio::test]
    async fn test_click_out_of_range() {
        let page = pager();
        assert!(matches!(
            page.click(".num", 5).await,
            Err(BrowserError::SelectorNotFound(_))
        ));
    }
}
