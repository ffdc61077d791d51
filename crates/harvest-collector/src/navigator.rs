//! Pagination with verification.
//!
//! Navigation is attempted through the first mechanism that applies, in
//! order: the "next" control, a numbered page control, a link inside the
//! pagination container, and finally a rewrite of the page query parameter.
//! A triggered navigation only counts once the page visibly changed.

use crate::error::{CollectError, Result};
use crate::poll::poll_until;
use harvest_browser::{BrowserError, Control, PageDriver};
use harvest_core::NavigationConfig;
use harvest_site::{PaginationRules, SiteDefinition};
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

/// How a page change was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NavigationMechanism {
    /// The site's "next page" control
    NextControl,
    /// A control labelled with the page number
    PageLabel,
    /// A link in the pagination container
    ContainerLink,
    /// Rewriting the page query parameter
    UrlRewrite,
}

/// A verified page change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationOutcome {
    /// Page navigated to
    pub target: u32,
    /// How it was reached
    pub mechanism: NavigationMechanism,
}

/// Moves a live page between result pages.
pub struct Navigator {
    rules: PaginationRules,
    marker_selector: String,
    config: NavigationConfig,
}

/// What the page looked like before a navigation was triggered.
struct Baseline {
    url: String,
    markers: usize,
}

impl Navigator {
    /// Navigator for one site.
    #[must_use]
    pub fn new(site: &SiteDefinition, config: NavigationConfig) -> Self {
        Self {
            rules: site.pagination.clone(),
            marker_selector: site.marker_selector(),
            config,
        }
    }

    /// Page number currently shown.
    ///
    /// Read from the page indicator, else the page query parameter, else 1.
    pub async fn current_page(&self, page: &dyn PageDriver) -> Result<u32> {
        if let Some(number) = self.indicator_page(page).await? {
            return Ok(number);
        }

        let url = page.current_url().await?;
        Ok(self.param_page(&url).unwrap_or(1))
    }

    /// Navigate from the current page to `target` and verify the change.
    pub async fn advance(&self, page: &dyn PageDriver, target: u32) -> Result<NavigationOutcome> {
        let current = self.current_page(page).await?;
        self.navigate(page, current, target).await
    }

    /// Jump to `target`; `None` when already there.
    pub async fn go_to(
        &self,
        page: &dyn PageDriver,
        target: u32,
    ) -> Result<Option<NavigationOutcome>> {
        if target == 0 {
            return Err(CollectError::InvalidRequest("pages are numbered from 1".into()));
        }

        let current = self.current_page(page).await?;
        if current == target {
            return Ok(None);
        }
        self.navigate(page, current, target).await.map(Some)
    }

    async fn navigate(
        &self,
        page: &dyn PageDriver,
        current: u32,
        target: u32,
    ) -> Result<NavigationOutcome> {
        let baseline = Baseline {
            url: page.current_url().await?,
            markers: page.count(&self.marker_selector).await?,
        };

        let mechanism = self.trigger(page, current, target, &baseline.url).await?;
        debug!(current, target, ?mechanism, "navigation triggered");

        let baseline = &baseline;
        let changed = poll_until(
            self.config.poll_interval(),
            self.config.verify_timeout(),
            move || self.changed(page, baseline, target),
        )
        .await?;

        if !changed {
            warn!(target, ?mechanism, "navigation not verified");
            return Err(CollectError::Unverified {
                target,
                timeout_ms: self.config.verify_timeout_ms,
            });
        }

        tokio::time::sleep(self.config.settle_delay()).await;
        info!(target, ?mechanism, "navigated");
        Ok(NavigationOutcome { target, mechanism })
    }

    async fn trigger(
        &self,
        page: &dyn PageDriver,
        current: u32,
        target: u32,
        url: &str,
    ) -> Result<NavigationMechanism> {
        let label = target.to_string();

        if current.checked_add(1) == Some(target) {
            for selector in &self.rules.next_selectors {
                if self.click_first(page, selector, |_| true).await? {
                    return Ok(NavigationMechanism::NextControl);
                }
            }
        }

        for selector in &self.rules.page_item_selectors {
            if self
                .click_first(page, selector, |c| c.text.trim() == label)
                .await?
            {
                return Ok(NavigationMechanism::PageLabel);
            }
        }

        for container in &self.rules.container_selectors {
            let selector = format!("{container} a");
            let matches = |c: &Control| {
                c.text.trim() == label
                    || self
                        .rules
                        .page_attributes
                        .iter()
                        .any(|attr| c.attributes.get(attr).is_some_and(|v| v.trim() == label))
            };
            if self.click_first(page, &selector, matches).await? {
                return Ok(NavigationMechanism::ContainerLink);
            }
        }

        if self.rules.allow_url_rewrite {
            if let Some(param) = &self.rules.page_param {
                let next = rewrite_page_param(url, param, target)?;
                page.goto(&next).await?;
                return Ok(NavigationMechanism::UrlRewrite);
            }
        }

        Err(CollectError::NoNavigation { target })
    }

    /// Click the first usable control under `selector` accepted by `accept`.
    async fn click_first(
        &self,
        page: &dyn PageDriver,
        selector: &str,
        accept: impl Fn(&Control) -> bool,
    ) -> Result<bool> {
        let controls = page.controls(selector).await?;
        let Some(index) = controls
            .iter()
            .position(|c| c.is_usable(&self.rules.disabled_classes) && accept(c))
        else {
            return Ok(false);
        };

        match page.click(selector, index).await {
            Ok(()) => Ok(true),
            // The control vanished between listing and clicking
            Err(BrowserError::SelectorNotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn changed(&self, page: &dyn PageDriver, baseline: &Baseline, target: u32) -> Result<bool> {
        if page.current_url().await? != baseline.url {
            return Ok(true);
        }
        if page.count(&self.marker_selector).await? != baseline.markers {
            return Ok(true);
        }
        Ok(self.indicator_page(page).await? == Some(target))
    }

    async fn indicator_page(&self, page: &dyn PageDriver) -> Result<Option<u32>> {
        let Some(selector) = &self.rules.current_page_selector else {
            return Ok(None);
        };
        Ok(page
            .text_of(selector)
            .await?
            .and_then(|text| text.trim().parse().ok()))
    }

    fn param_page(&self, url: &str) -> Option<u32> {
        let param = self.rules.page_param.as_deref()?;
        let url = Url::parse(url).ok()?;
        url.query_pairs()
            .find(|(key, _)| key == param)
            .and_then(|(_, value)| value.parse().ok())
    }
}

/// Set `param` to `page` in `url`, keeping every other query pair.
pub fn rewrite_page_param(url: &str, param: &str, page: u32) -> Result<String> {
    let mut url = Url::parse(url)
        .map_err(|e| BrowserError::NavigationError(format!("Invalid URL: {e}")))?;

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != param)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(pairs)
        .append_pair(param, &page.to_string());

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_browser::{ClickAction, PageFixture, ScriptedPage};
    use std::time::Duration;
    use tokio::time::Instant;

    const BASE: &str = "https://s.1688.com/selloffer/offer_search.htm?keywords=lamp";

    fn site() -> SiteDefinition {
        toml::from_str(include_str!("../../../site-definitions/1688.toml")).expect("parse 1688")
    }

    fn pages(count: u32) -> ScriptedPage {
        let site = site();
        let mut page = ScriptedPage::new(BASE, "beginPage")
            .unwrap()
            .with_marker(&site.marker_selector())
            .with_indicator(".fui-current");
        for n in 1..=count {
            page = page.with_page(n, PageFixture::new(format!("<p>{n}</p>")));
        }
        page
    }

    fn navigator(site: &SiteDefinition) -> Navigator {
        Navigator::new(site, NavigationConfig::default())
    }

    #[test]
    fn test_rewrite_page_param() {
        assert_eq!(
            rewrite_page_param(BASE, "beginPage", 3).unwrap(),
            "https://s.1688.com/selloffer/offer_search.htm?keywords=lamp&beginPage=3"
        );
        assert_eq!(
            rewrite_page_param("https://www.amazon.com/s?page=2&k=desk+lamp", "page", 5).unwrap(),
            "https://www.amazon.com/s?k=desk+lamp&page=5"
        );
        assert!(rewrite_page_param("not a url", "page", 1).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_control_preferred() {
        let page = pages(3).with_next(".fui-next", "fui-disabled").with_page_items(".fui-page-item");
        let outcome = navigator(&site()).advance(&page, 2).await.unwrap();

        assert_eq!(outcome.mechanism, NavigationMechanism::NextControl);
        assert_eq!(page.current_page(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_next_falls_through_to_label() {
        let disabled = Control {
            text: "下一页".into(),
            classes: vec!["fui-disabled".into()],
            visible: true,
            ..Control::default()
        };
        let page = pages(3)
            .with_controls(".fui-next", vec![(disabled, ClickAction::Next)])
            .with_page_items(".fui-page-item");

        let outcome = navigator(&site()).advance(&page, 2).await.unwrap();
        assert_eq!(outcome.mechanism, NavigationMechanism::PageLabel);
        assert_eq!(page.current_page(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_adjacent_uses_label_not_next() {
        let page = pages(5).with_next(".fui-next", "fui-disabled").with_page_items(".fui-paging-num");
        let outcome = navigator(&site()).go_to(&page, 4).await.unwrap();

        assert_eq!(outcome.map(|o| o.mechanism), Some(NavigationMechanism::PageLabel));
        assert_eq!(page.current_page(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_container_link_by_attribute() {
        let link = Control {
            text: "›".into(),
            visible: true,
            attributes: [("data-index".to_string(), "3".to_string())].into(),
            ..Control::default()
        };
        let page = pages(3).with_controls(".fui-paging a", vec![(link, ClickAction::GoTo(3))]);

        let outcome = navigator(&site()).go_to(&page, 3).await.unwrap().unwrap();
        assert_eq!(outcome.mechanism, NavigationMechanism::ContainerLink);
    }

    #[tokio::test(start_paused = true)]
    async fn test_url_rewrite_fallback() {
        let page = pages(3);
        let outcome = navigator(&site()).advance(&page, 2).await.unwrap();

        assert_eq!(outcome.mechanism, NavigationMechanism::UrlRewrite);
        assert_eq!(page.current_page(), 2);
        assert!(page
            .actions()
            .iter()
            .any(|a| a.starts_with("goto ") && a.ends_with("beginPage=2")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_mechanism() {
        let mut site = site();
        site.pagination.allow_url_rewrite = false;
        let page = pages(3);

        let err = navigator(&site).advance(&page, 2).await.unwrap_err();
        assert!(matches!(err, CollectError::NoNavigation { target: 2 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unverified_after_timeout() {
        let page = pages(3).with_next(".fui-next", "fui-disabled");
        page.freeze(2);

        let start = Instant::now();
        let err = navigator(&site()).advance(&page, 2).await.unwrap_err();
        assert!(matches!(err, CollectError::Unverified { target: 2, .. }));
        assert_eq!(start.elapsed(), Duration::from_millis(10_000));
        assert_eq!(page.current_page(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_current_page_sources() {
        let site = site();
        let nav = navigator(&site);

        let page = pages(3).start_at(2);
        assert_eq!(nav.current_page(&page).await.unwrap(), 2);

        // No indicator: fall back to the query parameter
        let bare = ScriptedPage::new(BASE, "beginPage")
            .unwrap()
            .with_page(3, PageFixture::new(""))
            .start_at(3);
        assert_eq!(nav.current_page(&bare).await.unwrap(), 3);

        // Neither: page 1
        let mut no_param = site.clone();
        no_param.pagination.page_param = None;
        no_param.pagination.current_page_selector = None;
        assert_eq!(navigator(&no_param).current_page(&bare).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_go_to_current_is_noop() {
        let page = pages(2);
        assert_eq!(navigator(&site()).go_to(&page, 1).await.unwrap(), None);
        assert!(page.actions().is_empty());
    }
}
