//! Weather lookups: search-driven scraping of the site's observation page,
//! fronted by a short-lived per-city cache.
//!
//! Lookups work for anonymous callers (the browser's default context) and
//! for sessions (their isolated context, so a signed-in user's units and
//! locale apply). A page that never renders a temperature reads as "no data"
//! rather than an error; transient site failures stay errors.

use std::collections::HashMap;
use std::sync::Arc;

use chromiumoxide::Page;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::browser;
use crate::config::WxConfig;
use crate::error::{Result, WxError};
use crate::markup::{RawWeather, SiteMarkup, first_number, wind_direction};
use crate::runtime::BrowserRuntime;
use crate::session::SessionHandle;

const MPH_TO_MS: f64 = 0.44704;

/// One structured observation. Fields the page did not render are `None`;
/// a reading without a temperature is never constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherReading {
    pub city: String,
    /// Degrees in the page's display unit (Fahrenheit for en-US).
    pub temperature: f64,
    pub condition: Option<String>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub feels_like: Option<f64>,
    pub humidity_percent: Option<f64>,
    pub wind_direction: Option<String>,
    /// Meters per second, converted from the page's mph.
    pub wind_speed_ms: Option<f64>,
    pub uv_index: Option<f64>,
    /// Verbatim pressure with trend, e.g. "29.84 in (rising)".
    pub pressure: Option<String>,
    pub visibility_miles: Option<f64>,
    pub fetched_at: DateTime<Utc>,
}

/// Typed conversion of a scraped page. `None` when no temperature was found,
/// the signal that the page is not an observation page.
pub(crate) fn reading_from_raw(city: &str, raw: &RawWeather) -> Option<WeatherReading> {
    let temperature = raw.temperature.as_deref().and_then(first_number)?;

    let (direction, speed_ms) = match raw.wind.as_deref() {
        Some(wind) => (
            wind_direction(wind),
            first_number(wind).map(|mph| round1(mph * MPH_TO_MS)),
        ),
        None => (None, None),
    };

    let pressure = raw.pressure.as_ref().map(|value| match raw.pressure_rising {
        Some(true) => format!("{value} (rising)"),
        Some(false) => format!("{value} (falling)"),
        None => value.clone(),
    });

    Some(WeatherReading {
        city: city.to_string(),
        temperature,
        condition: raw.condition.clone(),
        high: raw.high.as_deref().and_then(first_number),
        low: raw.low.as_deref().and_then(first_number),
        feels_like: raw.feels_like.as_deref().and_then(first_number),
        humidity_percent: raw.humidity.as_deref().and_then(first_number),
        wind_direction: direction,
        wind_speed_ms: speed_ms,
        uv_index: raw.uv_index.as_deref().and_then(first_number),
        pressure,
        visibility_miles: raw.visibility.as_deref().and_then(first_number),
        fetched_at: Utc::now(),
    })
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

struct CacheEntry {
    reading: WeatherReading,
    at: Instant,
}

/// City-keyed cache with a fixed TTL. Keys are normalized so "Paris" and
/// " paris " share an entry.
struct WeatherCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl WeatherCache {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, city: &str, ttl: std::time::Duration) -> Option<WeatherReading> {
        let key = cache_key(city);
        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some(entry) if entry.at.elapsed() <= ttl => Some(entry.reading.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    fn put(&self, city: &str, reading: WeatherReading) {
        self.entries.lock().insert(
            cache_key(city),
            CacheEntry {
                reading,
                at: Instant::now(),
            },
        );
    }
}

fn cache_key(city: &str) -> String {
    city.trim().to_lowercase()
}

/// An expired suggestion wait means the site has no match for the query;
/// anything else is a real failure and must propagate.
fn suggestion_miss_is_recoverable(err: &WxError) -> bool {
    matches!(err, WxError::Timeout { .. })
}

pub struct WeatherEngine {
    runtime: Arc<BrowserRuntime>,
    config: Arc<WxConfig>,
    markup: SiteMarkup,
    cache: WeatherCache,
}

impl WeatherEngine {
    pub fn new(runtime: Arc<BrowserRuntime>, config: Arc<WxConfig>) -> Self {
        Self {
            runtime,
            config,
            markup: SiteMarkup::default(),
            cache: WeatherCache::new(),
        }
    }

    /// Current conditions for `city`. `Ok(None)` means the site rendered no
    /// observation for the query (bad city name, maintenance page); errors
    /// are reserved for infrastructure and navigation failures.
    ///
    /// With an authenticated session the lookup runs in that session's
    /// isolated context (so account-level units and locale apply) and holds
    /// its automation permit; otherwise it uses the anonymous default
    /// context.
    pub async fn get_weather(
        &self,
        city: &str,
        session: Option<&SessionHandle>,
    ) -> Result<Option<WeatherReading>> {
        if let Some(reading) = self.cache.get(city, self.config.weather_cache_ttl()) {
            debug!(target = "wx.weather", city, "cache hit");
            return Ok(Some(reading));
        }

        // Unauthenticated sessions gain nothing from their own context;
        // route those through the shared anonymous one.
        let session = session.filter(|s| s.is_authenticated());

        let _permit = match session {
            Some(session) => {
                session.touch();
                Some(session.acquire_automation().await)
            }
            None => None,
        };

        let page = match session {
            Some(session) => self.runtime.open_page(session.context_id()).await?,
            None => self.runtime.open_default_page().await?,
        };
        let result = self.scrape(&page, city).await;
        browser::close_page(page).await;

        let reading = result?;
        match &reading {
            Some(reading) => {
                info!(
                    target = "wx.weather",
                    city,
                    temperature = reading.temperature,
                    "scraped weather"
                );
                self.cache.put(city, reading.clone());
            }
            None => info!(target = "wx.weather", city, "no observation rendered"),
        }
        Ok(reading)
    }

    async fn scrape(&self, page: &Page, city: &str) -> Result<Option<WeatherReading>> {
        browser::goto(page, &self.config.home_url(), self.config.navigation_timeout()).await?;
        browser::dismiss_consent(page, &self.config, &self.markup).await;

        browser::type_into_search(page, &self.config, &self.markup, city).await?;
        match browser::first_suggestion(page, &self.config, &self.markup).await {
            Ok(suggestion) => {
                suggestion
                    .click()
                    .await
                    .map_err(|e| WxError::ElementNotFound {
                        selector: format!("{} (click: {e})", self.markup.suggestion),
                    })?;
            }
            // No autocomplete match is the city-not-found shape, not a site
            // failure; submit the raw query and let the temperature signal
            // decide.
            Err(err) if suggestion_miss_is_recoverable(&err) => {
                debug!(target = "wx.weather", city, "no suggestions, submitting search");
                browser::submit_search(page, &self.markup).await?;
            }
            Err(err) => return Err(err),
        }

        // The observation page is client-rendered; the headline temperature
        // is the readiness signal. Its absence is the no-data case.
        if browser::wait_for_element(page, &self.markup.current_conditions, self.config.selector_timeout())
            .await
            .is_err()
        {
            return Ok(None);
        }

        let html = page
            .content()
            .await
            .map_err(|e| WxError::Infrastructure(format!("page content: {e}")))?;
        let raw = self.markup.parse_weather(&html);
        Ok(reading_from_raw(city, &raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn raw_full() -> RawWeather {
        RawWeather {
            temperature: Some("72°".into()),
            condition: Some("Partly Cloudy".into()),
            high: Some("78°".into()),
            low: Some("61°".into()),
            feels_like: Some("74°".into()),
            humidity: Some("58%".into()),
            wind: Some("WSW 12 mph".into()),
            uv_index: Some("6 of 11".into()),
            pressure: Some("29.84 in".into()),
            pressure_rising: Some(true),
            visibility: Some("10 mi".into()),
        }
    }

    fn reading(city: &str) -> WeatherReading {
        reading_from_raw(city, &raw_full()).unwrap()
    }

    #[test]
    fn conversion_extracts_numbers_and_converts_wind() {
        let r = reading("New York");
        assert_eq!(r.temperature, 72.0);
        assert_eq!(r.high, Some(78.0));
        assert_eq!(r.low, Some(61.0));
        assert_eq!(r.feels_like, Some(74.0));
        assert_eq!(r.humidity_percent, Some(58.0));
        assert_eq!(r.wind_direction.as_deref(), Some("WSW"));
        // 12 mph -> 5.4 m/s after rounding.
        assert_eq!(r.wind_speed_ms, Some(5.4));
        assert_eq!(r.uv_index, Some(6.0));
        assert_eq!(r.pressure.as_deref(), Some("29.84 in (rising)"));
        assert_eq!(r.visibility_miles, Some(10.0));
    }

    #[test]
    fn missing_temperature_yields_no_reading() {
        let raw = RawWeather {
            temperature: None,
            ..raw_full()
        };
        assert!(reading_from_raw("Nowhere", &raw).is_none());
    }

    #[test]
    fn partial_raw_degrades_to_none_fields() {
        let raw = RawWeather {
            temperature: Some("40°".into()),
            ..RawWeather::default()
        };
        let r = reading_from_raw("Oslo", &raw).unwrap();
        assert_eq!(r.temperature, 40.0);
        assert!(r.condition.is_none());
        assert!(r.wind_direction.is_none());
        assert!(r.pressure.is_none());
    }

    #[test]
    fn falling_pressure_is_labeled() {
        let raw = RawWeather {
            pressure_rising: Some(false),
            ..raw_full()
        };
        let r = reading_from_raw("X", &raw).unwrap();
        assert_eq!(r.pressure.as_deref(), Some("29.84 in (falling)"));
    }

    #[test]
    fn reading_serializes_camel_case() {
        let json = serde_json::to_string(&reading("Paris")).unwrap();
        assert!(json.contains("windSpeedMs"));
        assert!(json.contains("fetchedAt"));
        assert!(!json.contains("wind_speed_ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn cache_hits_within_ttl_and_expires_after() {
        let cache = WeatherCache::new();
        let ttl = Duration::from_secs(600);
        cache.put("Paris", reading("Paris"));

        tokio::time::advance(Duration::from_secs(599)).await;
        assert!(cache.get("  PARIS ", ttl).is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("Paris", ttl).is_none());
    }

    #[test]
    fn cache_keys_are_normalized() {
        assert_eq!(cache_key(" New  York "), "new  york");
        assert_eq!(cache_key("PARIS"), "paris");
    }

    #[test]
    fn only_a_suggestion_timeout_falls_back_to_raw_search() {
        let timeout = WxError::Timeout {
            ms: 10_000,
            condition: "selector".into(),
        };
        assert!(suggestion_miss_is_recoverable(&timeout));

        assert!(!suggestion_miss_is_recoverable(&WxError::Infrastructure(
            "browser gone".into()
        )));
        assert!(!suggestion_miss_is_recoverable(&WxError::ElementNotFound {
            selector: "#headerSearch_LocationSearch_input".into(),
        }));
    }
}
