use chromiumoxide::cdp::browser_protocol::emulation::SetTimezoneOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::Page;
use rand::seq::SliceRandom;

use crate::error::Result;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
];

/// Desktop sizes only: narrower windows switch listing grids to a mobile
/// layout with different markup.
const VIEWPORTS: &[(u32, u32)] = &[(1920, 1080), (1680, 1050), (1536, 864), (1440, 900)];

/// Browser identity presented to the site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintConfig {
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub timezone: String,
    /// `Accept-Language` header value
    pub accept_language: String,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            user_agent: USER_AGENTS[0].to_string(),
            viewport_width: VIEWPORTS[0].0,
            viewport_height: VIEWPORTS[0].1,
            timezone: "Asia/Shanghai".to_string(),
            accept_language: "zh-CN,zh;q=0.9,en;q=0.8".to_string(),
        }
    }
}

impl FingerprintConfig {
    /// Pick a user agent and viewport at random
    pub fn randomized() -> Self {
        let mut rng = rand::thread_rng();
        let defaults = Self::default();

        let user_agent = USER_AGENTS
            .choose(&mut rng)
            .map_or(defaults.user_agent.clone(), |ua| (*ua).to_string());
        let (viewport_width, viewport_height) = VIEWPORTS
            .choose(&mut rng)
            .copied()
            .unwrap_or((defaults.viewport_width, defaults.viewport_height));

        Self {
            user_agent,
            viewport_width,
            viewport_height,
            ..defaults
        }
    }

    /// Apply user agent, language and timezone to a freshly opened page
    pub async fn apply(&self, page: &Page) -> Result<()> {
        let mut user_agent = SetUserAgentOverrideParams::new(self.user_agent.clone());
        user_agent.accept_language = Some(self.accept_language.clone());
        page.execute(user_agent).await?;
        page.execute(SetTimezoneOverrideParams::new(self.timezone.clone()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_randomized_stays_in_pool() {
        for _ in 0..20 {
            let config = FingerprintConfig::randomized();
            assert!(USER_AGENTS.contains(&config.user_agent.as_str()));
            assert!(VIEWPORTS.contains(&(config.viewport_width, config.viewport_height)));
            assert_eq!(config.timezone, "Asia/Shanghai");
        }
    }

    #[test]
    fn test_viewports_are_desktop() {
        assert!(VIEWPORTS.iter().all(|(w, h)| *w >= 1280 && *h >= 720));
    }

    #[test]
    fn test_randomized_varies() {
        let first = FingerprintConfig::randomized();
        let varied = (0..50).any(|_| FingerprintConfig::randomized() != first);
        assert!(varied);
    }
}
