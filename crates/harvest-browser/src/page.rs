use crate::capture::NetworkCapture;
use crate::driver::{host_of, Control, PageDriver, ScrollMetrics};
use crate::engine::NavigationThrottle;
use crate::error::{BrowserError, Result};
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// A live Chromium tab.
pub struct BrowserPage {
    page: Page,
    capture: NetworkCapture,
    navigation_timeout: Duration,
    throttle: Arc<Mutex<NavigationThrottle>>,
}

impl BrowserPage {
    pub(crate) fn new(
        page: Page,
        capture: NetworkCapture,
        navigation_timeout: Duration,
        throttle: Arc<Mutex<NavigationThrottle>>,
    ) -> Self {
        Self {
            page,
            capture,
            navigation_timeout,
            throttle,
        }
    }

    /// Run `body` as a function and decode its JSON-stringified result.
    async fn eval_json<T: DeserializeOwned>(&self, body: &str) -> Result<T> {
        let script = format!("JSON.stringify((() => {{ {body} }})())");
        let raw: String = self
            .page
            .evaluate(script)
            .await?
            .into_value()
            .map_err(|e| BrowserError::ScriptError(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| BrowserError::ScriptError(e.to_string()))
    }
}

/// Quote a selector as a JavaScript string literal.
fn js_str(selector: &str) -> String {
    Value::String(selector.to_string()).to_string()
}

const VISIBLE_FN: &str = "const isVisible = (el) => { \
    const r = el.getBoundingClientRect(); \
    const s = window.getComputedStyle(el); \
    return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none'; };";

#[async_trait::async_trait]
impl PageDriver for BrowserPage {
    async fn current_url(&self) -> Result<String> {
        self.page
            .url()
            .await?
            .ok_or_else(|| BrowserError::NavigationError("page has no URL".to_string()))
    }

    async fn goto(&self, url: &str) -> Result<()> {
        let domain = host_of(url)?;
        let wait = self.throttle.lock().await.reserve(&domain);
        if !wait.is_zero() {
            trace!(%domain, ?wait, "throttling navigation");
            tokio::time::sleep(wait).await;
        }

        debug!(%url, "navigating");
        tokio::time::timeout(self.navigation_timeout, self.page.goto(url))
            .await
            .map_err(|_| BrowserError::Timeout(format!("navigation to {url}")))??;
        Ok(())
    }

    async fn html(&self) -> Result<String> {
        Ok(self.page.content().await?)
    }

    async fn scroll_metrics(&self) -> Result<ScrollMetrics> {
        self.eval_json(
            "return { \
                scrollHeight: Math.max(document.body ? document.body.scrollHeight : 0, \
                    document.documentElement.scrollHeight), \
                scrollY: Math.round(window.scrollY), \
                viewportHeight: window.innerHeight };",
        )
        .await
    }

    async fn scroll_to(&self, y: u64) -> Result<()> {
        let _: Value = self
            .eval_json(&format!("window.scrollTo(0, {y}); return null;"))
            .await?;
        Ok(())
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        self.eval_json(&format!(
            "return document.querySelectorAll({}).length;",
            js_str(selector)
        ))
        .await
    }

    async fn any_visible(&self, selector: &str) -> Result<bool> {
        self.eval_json(&format!(
            "{VISIBLE_FN} return Array.from(document.querySelectorAll({})).some(isVisible);",
            js_str(selector)
        ))
        .await
    }

    async fn controls(&self, selector: &str) -> Result<Vec<Control>> {
        self.eval_json(&format!(
            "{VISIBLE_FN} \
            return Array.from(document.querySelectorAll({})).map((el) => ({{ \
                text: (el.innerText || el.textContent || '').trim(), \
                classes: Array.from(el.classList), \
                visible: isVisible(el), \
                disabled: el.disabled === true || el.getAttribute('aria-disabled') === 'true', \
                attributes: Object.fromEntries(Array.from(el.attributes) \
                    .filter((a) => a.name.startsWith('data-')) \
                    .map((a) => [a.name, a.value])), \
                href: el.getAttribute('href') }}));",
            js_str(selector)
        ))
        .await
    }

    async fn click(&self, selector: &str, index: usize) -> Result<()> {
        let clicked: bool = self
            .eval_json(&format!(
                "const el = document.querySelectorAll({})[{index}]; \
                if (!el) return false; \
                el.scrollIntoView({{ block: 'center' }}); \
                el.click(); \
                return true;",
                js_str(selector)
            ))
            .await?;

        if clicked {
            Ok(())
        } else {
            Err(BrowserError::SelectorNotFound(format!("{selector}[{index}]")))
        }
    }

    async fn text_of(&self, selector: &str) -> Result<Option<String>> {
        self.eval_json(&format!(
            "const el = document.querySelector({}); \
            return el ? (el.innerText || el.textContent || '').trim() : null;",
            js_str(selector)
        ))
        .await
    }

    async fn globals(&self, names: &[String]) -> Result<Vec<Value>> {
        let mut found = Vec::new();
        for name in names {
            let value: Option<Value> = self
                .eval_json(&format!(
                    "const v = {}.split('.').reduce((o, k) => (o == null ? undefined : o[k]), window); \
                    if (v === null || typeof v !== 'object') return null; \
                    try {{ return JSON.parse(JSON.stringify(v)); }} catch (e) {{ return null; }}",
                    js_str(name)
                ))
                .await?;
            match value {
                Some(value) => found.push(value),
                None => trace!(global = %name, "global absent or not serializable"),
            }
        }
        Ok(found)
    }

    async fn take_payloads(&self) -> Result<Vec<Value>> {
        Ok(self.capture.take())
    }
}
