//! Lazy-load scrolling.

use crate::error::Result;
use crate::poll::{poll_until_stable, StabilitySettings};
use harvest_browser::PageDriver;
use harvest_core::ScrollConfig;
use harvest_site::SiteDefinition;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, trace};

/// How scrolling a page went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollReport {
    /// Scroll attempts made
    pub attempts: u32,
    /// Whether height and marker count settled before the budget ran out
    pub stabilized: bool,
    /// Document height after the last attempt
    pub final_height: u64,
    /// Marker elements after the last attempt
    pub final_marker_count: usize,
}

/// Scrolls a page until lazy-loaded listings stop appearing.
pub struct PageLoader {
    config: ScrollConfig,
    marker_selector: String,
    loading_selector: Option<String>,
}

impl PageLoader {
    /// Loader for one site's pages.
    #[must_use]
    pub fn new(config: ScrollConfig, site: &SiteDefinition) -> Self {
        Self {
            config,
            marker_selector: site.marker_selector(),
            loading_selector: site.loading.indicator_selector(),
        }
    }

    /// Scroll toward the bottom until the page stabilizes or the attempt
    /// budget is spent.
    pub async fn stabilize(&self, page: &dyn PageDriver) -> Result<ScrollReport> {
        let settings = StabilitySettings {
            interval: Duration::ZERO,
            stability_threshold: self.config.stability_threshold,
            max_attempts: self.config.max_attempts,
        };

        let outcome = poll_until_stable(settings, move || self.attempt(page)).await?;
        let (final_height, final_marker_count) = *outcome.value();

        if self.config.return_to_top {
            page.scroll_to(0).await?;
        }

        let report = ScrollReport {
            attempts: outcome.attempts(),
            stabilized: outcome.is_stable(),
            final_height,
            final_marker_count,
        };
        debug!(
            attempts = report.attempts,
            stabilized = report.stabilized,
            height = report.final_height,
            markers = report.final_marker_count,
            "page scrolled"
        );
        Ok(report)
    }

    /// One attempt: stepped scroll, settle, measure.
    async fn attempt(&self, page: &dyn PageDriver) -> Result<(u64, usize)> {
        let metrics = page.scroll_metrics().await?;
        let steps = self.config.steps_per_attempt.max(1);
        let step = metrics
            .remaining()
            .div_ceil(u64::from(steps))
            .max(self.config.min_step_px);

        let mut y = metrics.scroll_y;
        for _ in 0..steps {
            y = (y + step).min(metrics.scroll_height);
            page.scroll_to(y).await?;
            tokio::time::sleep(self.config.step_pause()).await;
        }

        let loading = self.is_loading(page).await?;
        tokio::time::sleep(self.config.settle_pause(loading)).await;

        let height = page.scroll_metrics().await?.scroll_height;
        let markers = page.count(&self.marker_selector).await?;
        trace!(height, markers, loading, "scroll attempt");
        Ok((height, markers))
    }

    async fn is_loading(&self, page: &dyn PageDriver) -> Result<bool> {
        match &self.loading_selector {
            Some(selector) => Ok(page.any_visible(selector).await?),
            None => Ok(false),
        }
    }
}
