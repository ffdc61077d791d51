//! Configuration management for Harvest.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound for `collection.max_pages`
pub const MAX_PAGES: u32 = 1000;

/// Upper bound for scroll round and step counts
const MAX_SCROLL_ROUNDS: u32 = 100;

/// Upper bound for any single pause or timeout, ten minutes
const MAX_PAUSE_MS: u64 = 600_000;

/// Main application configuration.
///
/// This is loaded from `~/.config/harvest/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Browser automation settings
    pub browser: BrowserConfig,
    /// Lazy-load scrolling settings
    pub scroll: ScrollConfig,
    /// Pagination verification settings
    pub navigation: NavigationConfig,
    /// Multi-page collection settings
    pub collection: CollectionConfig,
    /// Persistent store settings
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    /// - A value is out of range
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;

        let config: Self = if config_path.exists() {
            tracing::debug!("Loading config from {}", config_path.display());
            let contents = fs::read_to_string(&config_path)?;
            toml::from_str(&contents)?
        } else {
            tracing::debug!("Config file not found, using defaults");
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `HARVEST_HEADLESS`: Override browser headless mode (true/false)
    /// - `HARVEST_MAX_PAGES`: Override the page cap for a single run
    /// - `HARVEST_VERIFY_TIMEOUT_MS`: Override navigation verification timeout
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("HARVEST_HEADLESS") {
            if let Ok(headless) = val.parse() {
                self.browser.headless = headless;
                tracing::debug!("Override browser.headless from env: {}", headless);
            }
        }

        if let Ok(val) = std::env::var("HARVEST_MAX_PAGES") {
            if let Ok(pages) = val.parse() {
                self.collection.max_pages = pages;
                tracing::debug!("Override collection.max_pages from env: {}", pages);
            }
        }

        if let Ok(val) = std::env::var("HARVEST_VERIFY_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                self.navigation.verify_timeout_ms = ms;
                tracing::debug!("Override navigation.verify_timeout_ms from env: {}", ms);
            }
        }
    }

    /// Check that every bounded loop has a usable budget.
    pub fn validate(&self) -> ConfigResult<()> {
        fn invalid(field: &str, reason: &str) -> ConfigError {
            ConfigError::InvalidValue {
                field: field.to_string(),
                reason: reason.to_string(),
            }
        }

        fn at_most<T: PartialOrd + std::fmt::Display>(
            field: &str,
            value: T,
            limit: T,
        ) -> ConfigResult<()> {
            if value > limit {
                return Err(invalid(field, &format!("must be at most {limit}")));
            }
            Ok(())
        }

        if self.scroll.max_attempts == 0 {
            return Err(invalid("scroll.max_attempts", "must be at least 1"));
        }
        if self.scroll.stability_threshold == 0 {
            return Err(invalid("scroll.stability_threshold", "must be at least 1"));
        }
        if self.scroll.steps_per_attempt == 0 {
            return Err(invalid("scroll.steps_per_attempt", "must be at least 1"));
        }
        if self.navigation.poll_interval_ms == 0 {
            return Err(invalid("navigation.poll_interval_ms", "must be positive"));
        }
        if self.navigation.verify_timeout_ms < self.navigation.poll_interval_ms {
            return Err(invalid(
                "navigation.verify_timeout_ms",
                "must not be shorter than the poll interval",
            ));
        }
        if self.collection.max_pages == 0 {
            return Err(invalid("collection.max_pages", "must be at least 1"));
        }
        if self.collection.max_extract_depth == 0 {
            return Err(invalid("collection.max_extract_depth", "must be at least 1"));
        }

        at_most("scroll.max_attempts", self.scroll.max_attempts, MAX_SCROLL_ROUNDS)?;
        at_most("scroll.steps_per_attempt", self.scroll.steps_per_attempt, MAX_SCROLL_ROUNDS)?;
        at_most("scroll.slow_load_multiplier", self.scroll.slow_load_multiplier, 10)?;
        at_most("scroll.step_pause_ms", self.scroll.step_pause_ms, MAX_PAUSE_MS)?;
        at_most("scroll.settle_pause_ms", self.scroll.settle_pause_ms, MAX_PAUSE_MS)?;
        at_most("navigation.verify_timeout_ms", self.navigation.verify_timeout_ms, MAX_PAUSE_MS)?;
        at_most("navigation.settle_delay_ms", self.navigation.settle_delay_ms, MAX_PAUSE_MS)?;
        at_most("collection.max_pages", self.collection.max_pages, MAX_PAGES)?;
        at_most("collection.max_extract_depth", self.collection.max_extract_depth, 64)?;
        Ok(())
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "config_path".to_string(),
                reason: "no parent directory".to_string(),
            })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/harvest/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        Ok(project_dirs()?.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/harvest`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        Ok(project_dirs()?.data_dir().to_path_buf())
    }

    /// Full path of the identifier database.
    pub fn database_path(&self) -> ConfigResult<PathBuf> {
        Ok(Self::data_dir()?.join(&self.storage.database_file))
    }
}

fn project_dirs() -> ConfigResult<ProjectDirs> {
    ProjectDirs::from("com", "harvest", "harvest").ok_or(ConfigError::NoConfigDir)
}

/// Browser automation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    pub headless: bool,
    /// Browser window width
    pub window_width: u32,
    /// Browser window height
    pub window_height: u32,
    /// Navigation timeout in seconds
    pub navigation_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1920,
            window_height: 1080,
            navigation_timeout_secs: 30,
        }
    }
}

/// Lazy-load scrolling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollConfig {
    /// Hard cap on scroll-and-measure rounds
    pub max_attempts: u32,
    /// Consecutive unchanged rounds that count as "stable"
    pub stability_threshold: u32,
    /// Scroll increments per round
    pub steps_per_attempt: u32,
    /// Smallest increment in pixels
    pub min_step_px: u64,
    /// Pause after each increment
    pub step_pause_ms: u64,
    /// Pause after each round before measuring
    pub settle_pause_ms: u64,
    /// Pause multiplier while a loading indicator is visible
    pub slow_load_multiplier: u32,
    /// Scroll back to the top once done
    pub return_to_top: bool,
}

impl ScrollConfig {
    /// Pause between increments.
    #[must_use]
    pub fn step_pause(&self) -> Duration {
        Duration::from_millis(self.step_pause_ms)
    }

    /// Pause at the end of a round, stretched when the page is still loading.
    #[must_use]
    pub fn settle_pause(&self, loading: bool) -> Duration {
        let base = Duration::from_millis(self.settle_pause_ms);
        if loading {
            base.saturating_mul(self.slow_load_multiplier.max(1))
        } else {
            base
        }
    }
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            stability_threshold: 2,
            steps_per_attempt: 3,
            min_step_px: 500,
            step_pause_ms: 300,
            settle_pause_ms: 2000,
            slow_load_multiplier: 2,
            return_to_top: true,
        }
    }
}

/// Pagination verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    /// How long to wait for evidence that a page change happened
    pub verify_timeout_ms: u64,
    /// Interval between verification checks
    pub poll_interval_ms: u64,
    /// Extra wait after a verified page change before extraction
    pub settle_delay_ms: u64,
}

impl NavigationConfig {
    /// Verification timeout as a `Duration`.
    #[must_use]
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }

    /// Poll interval as a `Duration`.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Settle delay as a `Duration`.
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            verify_timeout_ms: 10_000,
            poll_interval_ms: 500,
            settle_delay_ms: 1000,
        }
    }
}

/// Multi-page collection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Largest page count a single request may ask for
    pub max_pages: u32,
    /// Recursion bound for walking API payloads
    pub max_extract_depth: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            max_pages: 50,
            max_extract_depth: 10,
        }
    }
}

/// Persistent store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file name inside the data directory
    pub database_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: "harvest.db".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.browser.headless);
        assert_eq!(config.scroll.max_attempts, 8);
        assert_eq!(config.scroll.stability_threshold, 2);
        assert_eq!(config.navigation.verify_timeout_ms, 10_000);
        assert_eq!(config.navigation.poll_interval_ms, 500);
        assert_eq!(config.collection.max_pages, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("[scroll]"));
        assert!(toml_str.contains("[navigation]"));
        assert!(toml_str.contains("[collection]"));

        let parsed: AppConfig = toml::from_str(&toml_str).expect("parse serialized config");
        assert_eq!(parsed.scroll.min_step_px, config.scroll.min_step_px);
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().expect("create temp dir");
        let config_path = tmp.path().join("config.toml");

        let mut config = AppConfig::default();
        config.scroll.max_attempts = 12;
        config.storage.database_file = "custom.db".to_string();

        let contents = toml::to_string_pretty(&config).expect("serialize config");
        fs::write(&config_path, contents).expect("write config file");

        let loaded_contents = fs::read_to_string(&config_path).expect("read config file");
        let loaded: AppConfig = toml::from_str(&loaded_contents).expect("parse loaded config");

        assert_eq!(loaded.scroll.max_attempts, 12);
        assert_eq!(loaded.storage.database_file, "custom.db");
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("HARVEST_MAX_PAGES", "7");
        std::env::set_var("HARVEST_HEADLESS", "false");
        std::env::set_var("HARVEST_VERIFY_TIMEOUT_MS", "not-a-number");

        let mut config = AppConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.collection.max_pages, 7);
        assert!(!config.browser.headless);
        // Unparseable values are ignored
        assert_eq!(config.navigation.verify_timeout_ms, 10_000);

        std::env::remove_var("HARVEST_MAX_PAGES");
        std::env::remove_var("HARVEST_HEADLESS");
        std::env::remove_var("HARVEST_VERIFY_TIMEOUT_MS");
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r"
[scroll]
max_attempts = 4

[navigation]
verify_timeout_ms = 3000
";

        let config: AppConfig = toml::from_str(toml_str).expect("parse partial config");
        assert_eq!(config.scroll.max_attempts, 4);
        assert_eq!(config.navigation.verify_timeout_ms, 3000);
        // These should be defaults
        assert_eq!(config.scroll.stability_threshold, 2);
        assert!(config.browser.headless);
    }

    #[test]
    fn test_validate_rejects_zero_budgets() {
        let mut config = AppConfig::default();
        config.scroll.max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "scroll.max_attempts"
        ));

        let mut config = AppConfig::default();
        config.navigation.verify_timeout_ms = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_budgets() {
        let mut config = AppConfig::default();
        config.collection.max_pages = MAX_PAGES;
        assert!(config.validate().is_ok());

        config.collection.max_pages = MAX_PAGES + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "collection.max_pages"
        ));

        let mut config = AppConfig::default();
        config.scroll.slow_load_multiplier = u32::MAX;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.navigation.verify_timeout_ms = u64::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "navigation.verify_timeout_ms"
        ));
    }

    #[test]
    fn test_settle_pause_saturates() {
        let scroll = ScrollConfig {
            settle_pause_ms: u64::MAX,
            slow_load_multiplier: u32::MAX,
            ..ScrollConfig::default()
        };
        assert_eq!(scroll.settle_pause(true), Duration::MAX);
    }

    #[test]
    fn test_settle_pause_stretches_while_loading() {
        let scroll = ScrollConfig::default();
        assert_eq!(scroll.settle_pause(false), Duration::from_millis(2000));
        assert_eq!(scroll.settle_pause(true), Duration::from_millis(4000));
    }
}
