//! The single extraction adapter for the external site's rendered markup.
//!
//! Every selector the automation relies on lives in [`SiteMarkup`], and every
//! scrape of rendered HTML goes through the parsing methods here. The site is
//! unversioned and changes without notice; when it does, this module is the
//! only one that needs updating.
//!
//! Parsing prefers stable structural markers (`data-testid` attributes) over
//! cosmetic class names, and degrades to partial data (fields left `None`)
//! rather than failing when a marker is absent.

use regex_lite::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

/// CSS selectors for the site's current rendered structure.
#[derive(Debug, Clone)]
pub struct SiteMarkup {
    pub login_email: String,
    pub login_password: String,
    pub login_submit: String,
    pub login_error: String,
    /// Consent overlay host frame; dismissal is opportunistic.
    pub consent_iframe: String,
    pub consent_accept: String,
    pub search_open: String,
    pub search_input: String,
    pub suggestion: String,
    pub suggestion_star: String,
    pub saved_locations_bar: String,
    pub location_card: String,
    /// Marker class carried by a card's star only when truly favorited.
    pub favorited_star: String,
    pub location_name: String,
    pub signed_in_indicators: Vec<String>,
    pub current_conditions: String,
    pub temperature_value: String,
    pub condition_phrase: String,
    pub hi_lo_block: String,
    pub details_module: String,
    pub feels_like_section: String,
    pub details_item: String,
    pub details_label: String,
    pub details_value: String,
    pub pressure_value: String,
    pub trend_arrow: String,
}

impl Default for SiteMarkup {
    fn default() -> Self {
        Self {
            login_email: "#loginEmail".into(),
            login_password: "#loginPassword".into(),
            login_submit: r#"button[type="submit"]"#.into(),
            login_error: r#"div[class*="MemberLoginForm--serverError"]"#.into(),
            consent_iframe: r#"iframe[id^="sp_message_iframe"]"#.into(),
            consent_accept: r#"button[title="Accept"]"#.into(),
            search_open: r#"button[aria-label="Search"], span[class*="searchIcon"]"#.into(),
            search_input: "#headerSearch_LocationSearch_input".into(),
            suggestion: r#"button[id^="headerSearch_LocationSearch_listbox"]"#.into(),
            suggestion_star: r#"button[class*="FavoriteStar--favoriteIcon"]"#.into(),
            saved_locations_bar: r#"div[aria-label="Saved Locations"]"#.into(),
            location_card: r#"div[class*="styles--card"]"#.into(),
            favorited_star: r#"button[class*="FavoriteStar--isFavorite"]"#.into(),
            location_name: r#"span[class*="styles--locationName"]"#.into(),
            signed_in_indicators: vec![
                r#"div[class*="AccountLinks--userMenu"]"#.into(),
                r#"div[class*="AccountLinks--userName"]"#.into(),
                r#"button[aria-label*="Account"]"#.into(),
            ],
            current_conditions: r#"div[data-testid="CurrentConditionsContainer"]"#.into(),
            temperature_value: r#"[data-testid="TemperatureValue"]"#.into(),
            condition_phrase: r#"[data-testid="wxPhrase"]"#.into(),
            hi_lo_block: r#"[class*="CurrentConditions--tempHiLoValue"]"#.into(),
            details_module: r#"section[data-testid="TodaysDetailsModule"]"#.into(),
            feels_like_section: r#"[data-testid="FeelsLikeSection"]"#.into(),
            details_item: r#"[data-testid="WeatherDetailsListItem"]"#.into(),
            details_label: r#"[data-testid="WeatherDetailsLabel"]"#.into(),
            details_value: r#"[data-testid="wxData"]"#.into(),
            pressure_value: r#"[data-testid="PressureValue"]"#.into(),
            trend_arrow: r#"svg[aria-label*="arrow"]"#.into(),
        }
    }
}

/// Raw text fields scraped off a rendered weather page. Conversion into a
/// typed reading happens in the weather engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawWeather {
    pub temperature: Option<String>,
    pub condition: Option<String>,
    pub high: Option<String>,
    pub low: Option<String>,
    pub feels_like: Option<String>,
    pub humidity: Option<String>,
    pub wind: Option<String>,
    pub uv_index: Option<String>,
    pub pressure: Option<String>,
    pub pressure_rising: Option<bool>,
    pub visibility: Option<String>,
}

impl SiteMarkup {
    /// Parse a rendered home page into the ordered list of truly favorited
    /// city names, scoped to the saved-locations bar. Cards without the
    /// is-favorite star marker are unfavorited suggestions and are skipped.
    pub fn parse_favorites(&self, page_html: &str) -> Vec<String> {
        let doc = Html::parse_document(page_html);
        let (Some(bar), Some(card), Some(star), Some(name)) = (
            sel(&self.saved_locations_bar),
            sel(&self.location_card),
            sel(&self.favorited_star),
            sel(&self.location_name),
        ) else {
            return Vec::new();
        };
        let Some(scope) = doc.select(&bar).next() else {
            return Vec::new();
        };

        scope
            .select(&card)
            .filter(|c| c.select(&star).next().is_some())
            .filter_map(|c| c.select(&name).next())
            .map(|n| normalize_ws(&text_of(n)))
            .filter(|n| !n.is_empty())
            .collect()
    }

    /// Parse a rendered weather page. Missing markers leave fields `None`;
    /// this never fails outright.
    pub fn parse_weather(&self, page_html: &str) -> RawWeather {
        let doc = Html::parse_document(page_html);
        let mut raw = RawWeather::default();

        if let (Some(section), Some(temp)) = (sel(&self.current_conditions), sel(&self.temperature_value)) {
            if let Some(current) = doc.select(&section).next() {
                raw.temperature = current.select(&temp).next().map(|e| text_of(e));
                raw.condition = sel(&self.condition_phrase)
                    .and_then(|s| current.select(&s).next())
                    .map(|e| text_of(e));

                // High/low live inside the hi/lo block; if its cosmetic class
                // has churned, fall back to proximity: the first two
                // temperature values after the headline read high then low.
                let hi_lo: Vec<String> = sel(&self.hi_lo_block)
                    .and_then(|block_sel| current.select(&block_sel).next())
                    .map(|block| block.select(&temp).map(|e| text_of(e)).collect())
                    .unwrap_or_default();
                let hi_lo = if hi_lo.len() >= 2 {
                    hi_lo
                } else {
                    current.select(&temp).skip(1).map(|e| text_of(e)).collect()
                };
                if hi_lo.len() >= 2 {
                    raw.high = Some(hi_lo[0].clone());
                    raw.low = Some(hi_lo[1].clone());
                }
            }
        }

        if let Some(module) = sel(&self.details_module).and_then(|s| doc.select(&s).next()) {
            raw.feels_like = sel(&self.feels_like_section)
                .and_then(|s| module.select(&s).next())
                .and_then(|section| {
                    sel(&self.temperature_value).and_then(|t| section.select(&t).next())
                })
                .map(|e| text_of(e));

            if let (Some(item), Some(label), Some(value)) = (
                sel(&self.details_item),
                sel(&self.details_label),
                sel(&self.details_value),
            ) {
                for entry in module.select(&item) {
                    let Some(label_text) = entry.select(&label).next().map(|e| text_of(e)) else {
                        continue;
                    };
                    let label_text = label_text.to_lowercase();
                    let value_text = entry.select(&value).next().map(|e| normalize_ws(&text_of(e)));

                    if label_text.contains("wind") {
                        raw.wind = value_text;
                    } else if label_text.contains("humidity") {
                        raw.humidity = value_text;
                    } else if label_text.contains("uv index") {
                        raw.uv_index = value_text;
                    } else if label_text.contains("pressure") {
                        raw.pressure = sel(&self.pressure_value)
                            .and_then(|s| entry.select(&s).next())
                            .map(|e| normalize_ws(&text_of(e)))
                            .or(value_text);
                        raw.pressure_rising = sel(&self.trend_arrow)
                            .and_then(|s| entry.select(&s).next())
                            .and_then(|arrow| arrow.value().attr("aria-label"))
                            .map(|label| label.to_lowercase().contains("up"));
                    } else if label_text.contains("visibility") {
                        raw.visibility = value_text;
                    }
                }
            }
        }

        raw
    }
}

fn sel(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Collapse runs of whitespace to single spaces and trim.
pub fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract the first signed integer or decimal substring, tolerating unit
/// suffixes and formatting noise ("72°", "10 mi", "29.84 in").
pub fn first_number(text: &str) -> Option<f64> {
    let re = Regex::new(r"-?\d+(\.\d+)?").ok()?;
    re.find(text)?.as_str().parse().ok()
}

/// Leading compass direction of a wind string like "WSW 12 mph".
pub fn wind_direction(text: &str) -> Option<String> {
    let re = Regex::new(r"^[A-Z]{1,3}").ok()?;
    re.find(text.trim()).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAVED_BAR: &str = r#"
        <div aria-label="Saved Locations">
          <div class="styles--card--R1sP3">
            <button class="FavoriteStar--favoriteIcon--x FavoriteStar--isFavorite--ytnei"></button>
            <span class="styles--locationName--zoGXR">  New   York, NY </span>
          </div>
          <div class="styles--card--R1sP3">
            <button class="FavoriteStar--favoriteIcon--x"></button>
            <span class="styles--locationName--zoGXR">Suggested City</span>
          </div>
          <div class="styles--card--R1sP3">
            <button class="FavoriteStar--isFavorite--ytnei"></button>
            <span class="styles--locationName--zoGXR">Paris, France</span>
          </div>
        </div>"#;

    #[test]
    fn favorites_require_the_star_marker() {
        let markup = SiteMarkup::default();
        let cities = markup.parse_favorites(SAVED_BAR);
        assert_eq!(cities, vec!["New York, NY", "Paris, France"]);
    }

    #[test]
    fn favorites_of_empty_bar_is_empty() {
        let markup = SiteMarkup::default();
        assert!(markup.parse_favorites(r#"<div aria-label="Saved Locations"></div>"#).is_empty());
    }

    const WEATHER_PAGE: &str = r#"
        <html><body>
        <div data-testid="CurrentConditionsContainer">
          <span data-testid="TemperatureValue">72°</span>
          <div data-testid="wxPhrase">Partly Cloudy</div>
          <div class="CurrentConditions--tempHiLoValue--Og9IG">
            <span data-testid="TemperatureValue">78°</span>
            <span data-testid="TemperatureValue">61°</span>
          </div>
        </div>
        <section data-testid="TodaysDetailsModule">
          <div data-testid="FeelsLikeSection">
            <span data-testid="TemperatureValue">74°</span>
          </div>
          <div data-testid="WeatherDetailsListItem">
            <div data-testid="WeatherDetailsLabel">Wind</div>
            <div data-testid="wxData">WSW 12 mph</div>
          </div>
          <div data-testid="WeatherDetailsListItem">
            <div data-testid="WeatherDetailsLabel">Humidity</div>
            <div data-testid="wxData">58%</div>
          </div>
          <div data-testid="WeatherDetailsListItem">
            <div data-testid="WeatherDetailsLabel">Pressure</div>
            <div data-testid="wxData"><span data-testid="PressureValue">29.84 in</span>
              <svg aria-label="arrow up"></svg></div>
          </div>
          <div data-testid="WeatherDetailsListItem">
            <div data-testid="WeatherDetailsLabel">UV Index</div>
            <div data-testid="wxData">6 of 11</div>
          </div>
          <div data-testid="WeatherDetailsListItem">
            <div data-testid="WeatherDetailsLabel">Visibility</div>
            <div data-testid="wxData">10 mi</div>
          </div>
        </section>
        </body></html>"#;

    #[test]
    fn weather_page_parses_all_fields() {
        let raw = SiteMarkup::default().parse_weather(WEATHER_PAGE);
        assert_eq!(raw.temperature.as_deref(), Some("72°"));
        assert_eq!(raw.condition.as_deref(), Some("Partly Cloudy"));
        assert_eq!(raw.high.as_deref(), Some("78°"));
        assert_eq!(raw.low.as_deref(), Some("61°"));
        assert_eq!(raw.feels_like.as_deref(), Some("74°"));
        assert_eq!(raw.humidity.as_deref(), Some("58%"));
        assert_eq!(raw.wind.as_deref(), Some("WSW 12 mph"));
        assert_eq!(raw.uv_index.as_deref(), Some("6 of 11"));
        assert_eq!(raw.pressure.as_deref(), Some("29.84 in"));
        assert_eq!(raw.pressure_rising, Some(true));
        assert_eq!(raw.visibility.as_deref(), Some("10 mi"));
    }

    #[test]
    fn hi_lo_falls_back_to_proximity_when_class_churns() {
        let page = WEATHER_PAGE.replace("CurrentConditions--tempHiLoValue--Og9IG", "renamed");
        let raw = SiteMarkup::default().parse_weather(&page);
        assert_eq!(raw.high.as_deref(), Some("78°"));
        assert_eq!(raw.low.as_deref(), Some("61°"));
    }

    #[test]
    fn missing_markers_degrade_to_none() {
        let raw = SiteMarkup::default().parse_weather("<html><body><p>maintenance</p></body></html>");
        assert_eq!(raw, RawWeather::default());
    }

    #[test]
    fn first_number_is_permissive() {
        assert_eq!(first_number("72°"), Some(72.0));
        assert_eq!(first_number("-4° F"), Some(-4.0));
        assert_eq!(first_number("29.84 in"), Some(29.84));
        assert_eq!(first_number("calm"), None);
    }

    #[test]
    fn wind_direction_is_the_leading_compass_token() {
        assert_eq!(wind_direction("WSW 12 mph").as_deref(), Some("WSW"));
        assert_eq!(wind_direction("N 3 mph").as_deref(), Some("N"));
        assert_eq!(wind_direction("12 mph"), None);
    }
}
