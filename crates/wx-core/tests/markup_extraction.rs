//! End-to-end extraction over a realistic rendered home page: favorites are
//! scoped to the saved-locations bar, and observation fields survive the
//! page's surrounding chrome.

use wx::markup::SiteMarkup;

const HOME_PAGE: &str = r#"
<html><body>
  <header>
    <button aria-label="Search"></button>
    <div class="AccountLinks--userMenu--abc12">user@example.com</div>
  </header>
  <div aria-label="Saved Locations">
    <div class="styles--card--R1sP3">
      <button class="FavoriteStar--favoriteIcon--q FavoriteStar--isFavorite--ytnei"></button>
      <span class="styles--locationName--zoGXR">Seattle, WA</span>
    </div>
    <div class="styles--card--R1sP3">
      <button class="FavoriteStar--favoriteIcon--q"></button>
      <span class="styles--locationName--zoGXR">Recently Viewed City</span>
    </div>
  </div>
  <main>
    <!-- A promo card outside the bar that reuses the card classes. -->
    <div class="styles--card--R1sP3">
      <button class="FavoriteStar--isFavorite--ytnei"></button>
      <span class="styles--locationName--zoGXR">Sponsored Place</span>
    </div>
    <div data-testid="CurrentConditionsContainer">
      <span data-testid="TemperatureValue">55°</span>
      <div data-testid="wxPhrase">Light Rain</div>
      <div class="CurrentConditions--tempHiLoValue--Og9IG">
        <span data-testid="TemperatureValue">58°</span>
        <span data-testid="TemperatureValue">48°</span>
      </div>
    </div>
    <section data-testid="TodaysDetailsModule">
      <div data-testid="FeelsLikeSection">
        <span data-testid="TemperatureValue">52°</span>
      </div>
      <div data-testid="WeatherDetailsListItem">
        <div data-testid="WeatherDetailsLabel">Wind</div>
        <div data-testid="wxData">SSW 9 mph</div>
      </div>
      <div data-testid="WeatherDetailsListItem">
        <div data-testid="WeatherDetailsLabel">Humidity</div>
        <div data-testid="wxData">87%</div>
      </div>
    </section>
  </main>
</body></html>"#;

#[test]
fn favorites_ignore_cards_outside_the_saved_bar() {
    let markup = SiteMarkup::default();
    let favorites = markup.parse_favorites(HOME_PAGE);
    assert_eq!(favorites, vec!["Seattle, WA"]);
}

#[test]
fn weather_extraction_tolerates_page_chrome() {
    let markup = SiteMarkup::default();
    let raw = markup.parse_weather(HOME_PAGE);
    assert_eq!(raw.temperature.as_deref(), Some("55°"));
    assert_eq!(raw.condition.as_deref(), Some("Light Rain"));
    assert_eq!(raw.high.as_deref(), Some("58°"));
    assert_eq!(raw.low.as_deref(), Some("48°"));
    assert_eq!(raw.feels_like.as_deref(), Some("52°"));
    assert_eq!(raw.wind.as_deref(), Some("SSW 9 mph"));
    assert_eq!(raw.humidity.as_deref(), Some("87%"));
    assert!(raw.pressure.is_none());
}

#[test]
fn missing_bar_reads_as_no_favorites() {
    let markup = SiteMarkup::default();
    assert!(markup.parse_favorites("<html><body><main></main></body></html>").is_empty());
}
