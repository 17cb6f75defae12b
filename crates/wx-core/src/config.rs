use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// All tuning knobs for the automation core. Defaults match the live site's
/// observed behavior; override individual fields from a JSON config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WxConfig {
    /// Target site root, without a trailing slash.
    pub base_url: String,
    pub headless: bool,
    /// Artificial per-action delay in milliseconds, for debugging with a
    /// headed browser.
    pub slow_motion_ms: u64,
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub locale: String,

    /// Full page navigation budget.
    pub navigation_timeout_ms: u64,
    /// Budget for a selector that is expected to appear.
    pub selector_timeout_ms: u64,
    /// Short probe for optional elements (consent banner, login form
    /// presence, empty favorites bar).
    pub probe_timeout_ms: u64,
    /// Budget for the post-submit error-vs-success race during login.
    pub login_result_timeout_ms: u64,
    /// Bounded wait for favorite cards before concluding the empty state.
    pub card_timeout_ms: u64,
    /// Fixed wait after a UI mutation with no completion signal.
    pub settle_delay_ms: u64,
    /// Submit-enable polling: attempts x interval.
    pub submit_poll_attempts: u32,
    pub submit_poll_interval_ms: u64,
    /// Per-keystroke delay when typing into the search box; bulk-setting the
    /// value does not trigger the site's autocomplete.
    pub type_delay_ms: u64,

    /// Absolute session lifetime in minutes.
    pub session_timeout_minutes: u64,
    /// Idle lifetime in minutes; refreshed on every touch.
    pub idle_timeout_minutes: u64,
    /// Eviction sweep cadence in seconds.
    pub sweep_interval_secs: u64,

    /// The site rejects an 11th favorite; enforced proactively.
    pub favorite_limit: usize,
    /// Weather reading cache lifetime in minutes.
    pub weather_cache_ttl_minutes: u64,
}

impl Default for WxConfig {
    fn default() -> Self {
        Self {
            base_url: "https://weather.com".into(),
            headless: true,
            slow_motion_ms: 0,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .into(),
            viewport_width: 1920,
            viewport_height: 1080,
            locale: "en-US".into(),
            navigation_timeout_ms: 20_000,
            selector_timeout_ms: 10_000,
            probe_timeout_ms: 2_000,
            login_result_timeout_ms: 15_000,
            card_timeout_ms: 5_000,
            settle_delay_ms: 2_000,
            submit_poll_attempts: 50,
            submit_poll_interval_ms: 100,
            type_delay_ms: 50,
            session_timeout_minutes: 30,
            idle_timeout_minutes: 15,
            sweep_interval_secs: 60,
            favorite_limit: 10,
            weather_cache_ttl_minutes: 10,
        }
    }
}

impl WxConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn login_url(&self) -> String {
        format!("{}/login", self.base_url)
    }

    pub fn home_url(&self) -> String {
        format!("{}/", self.base_url)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_millis(self.selector_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn login_result_timeout(&self) -> Duration {
        Duration::from_millis(self.login_result_timeout_ms)
    }

    pub fn card_timeout(&self) -> Duration {
        Duration::from_millis(self.card_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_minutes * 60)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_minutes * 60)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn weather_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.weather_cache_ttl_minutes * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_site_behavior() {
        let cfg = WxConfig::default();
        assert_eq!(cfg.favorite_limit, 10);
        assert_eq!(cfg.session_timeout_minutes, 30);
        assert_eq!(cfg.idle_timeout_minutes, 15);
        assert_eq!(cfg.weather_cache_ttl_minutes, 10);
        assert_eq!(cfg.login_url(), "https://weather.com/login");
    }

    #[test]
    fn partial_file_overrides_keep_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "headless": false, "favoriteLimit": 5 }}"#).unwrap();

        let cfg = WxConfig::from_file(file.path()).unwrap();
        assert!(!cfg.headless);
        assert_eq!(cfg.favorite_limit, 5);
        // Untouched fields fall back to defaults.
        assert_eq!(cfg.navigation_timeout_ms, 20_000);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(WxConfig::from_file(file.path()).is_err());
    }
}
