//! Authenticated account automation: login, favorites listing, and the
//! idempotent favorite toggle.
//!
//! Every public entry point holds the session's automation permit for the
//! whole operation and closes its page on every exit path. Decisions about
//! whether to act (`plan_toggle`) and whether an action took effect
//! (`verify_toggle`) are pure functions over scraped state, kept separate
//! from the page driving so they are testable without a browser.

use std::sync::Arc;

use chromiumoxide::Page;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::browser;
use crate::config::WxConfig;
use crate::error::{Result, WxError};
use crate::markup::SiteMarkup;
use crate::runtime::BrowserRuntime;
use crate::session::SessionHandle;

/// Where the login state machine ended up. Terminal states only; the engine
/// never returns mid-flow states to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    /// A signed-in indicator was already present; no credentials were sent.
    AlreadyAuthenticated,
    Success,
    /// The site surfaced a server-side error message.
    Failed,
    /// The form disappeared but the URL never left the login path; never
    /// treated as authenticated.
    Ambiguous,
    TimedOut,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub success: bool,
    pub state: LoginState,
    /// Conversational, suitable for relaying to the end user verbatim.
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleAction {
    Add,
    Remove,
}

impl ToggleAction {
    fn verb(self) -> &'static str {
        match self {
            ToggleAction::Add => "added",
            ToggleAction::Remove => "removed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToggleOutcome {
    pub success: bool,
    /// False when the desired state already held or the cap blocked the add.
    pub action_taken: bool,
    /// Favorites as re-scraped after the operation.
    pub favorites: Vec<String>,
    pub message: String,
}

#[derive(Debug, PartialEq, Eq)]
enum TogglePlan {
    AlreadySatisfied,
    AtCapacity,
    Proceed,
}

pub struct AccountEngine {
    runtime: Arc<BrowserRuntime>,
    config: Arc<WxConfig>,
    markup: SiteMarkup,
}

impl AccountEngine {
    pub fn new(runtime: Arc<BrowserRuntime>, config: Arc<WxConfig>) -> Self {
        Self {
            runtime,
            config,
            markup: SiteMarkup::default(),
        }
    }

    /// Run the login flow inside the session's isolated context. Never
    /// panics on site weirdness: unclassifiable end states come back as
    /// `Ambiguous` or `TimedOut` outcomes, and the session's authenticated
    /// flag is set only on a verified success signal.
    pub async fn login(
        &self,
        session: &SessionHandle,
        email: &str,
        password: &str,
    ) -> Result<LoginOutcome> {
        let _permit = session.acquire_automation().await;
        session.touch();

        let page = self.runtime.open_page(session.context_id()).await?;
        let outcome = self.login_inner(&page, session, email, password).await;
        browser::close_page(page).await;

        if let Ok(outcome) = &outcome {
            info!(
                target = "wx.account",
                session = %session.id(),
                state = ?outcome.state,
                success = outcome.success,
                "login finished"
            );
        }
        outcome
    }

    async fn login_inner(
        &self,
        page: &Page,
        session: &SessionHandle,
        email: &str,
        password: &str,
    ) -> Result<LoginOutcome> {
        browser::goto(page, &self.config.login_url(), self.config.navigation_timeout()).await?;
        browser::dismiss_consent(page, &self.config, &self.markup).await;

        // Short probe: an existing authenticated context redirects away from
        // the login path or renders the account menu instead of the form.
        if !browser::element_exists(page, &self.markup.login_email).await {
            let url = browser::current_path(page).await;
            if (!url.is_empty() && !url.contains("/login")) || self.signed_in(page).await {
                session.mark_authenticated(email);
                return Ok(LoginOutcome {
                    success: true,
                    state: LoginState::AlreadyAuthenticated,
                    message: "You're already logged in.".into(),
                });
            }
        }

        let email_field =
            browser::wait_for_element(page, &self.markup.login_email, self.config.selector_timeout())
                .await?;
        email_field
            .click()
            .await
            .map_err(|e| field_err(&self.markup.login_email, "focus", e))?;
        email_field
            .type_str(email)
            .await
            .map_err(|e| field_err(&self.markup.login_email, "type", e))?;

        let password_field = page
            .find_element(self.markup.login_password.as_str())
            .await
            .map_err(|_| WxError::ElementNotFound {
                selector: self.markup.login_password.clone(),
            })?;
        password_field
            .click()
            .await
            .map_err(|e| field_err(&self.markup.login_password, "focus", e))?;
        password_field
            .type_str(password)
            .await
            .map_err(|e| field_err(&self.markup.login_password, "type", e))?;

        // The site enables the submit button asynchronously after client-side
        // validation; clicking while disabled is silently dropped.
        if !self.wait_submit_enabled(page).await {
            return Ok(LoginOutcome {
                success: false,
                state: LoginState::TimedOut,
                message: "The login form never became submittable. Please try again.".into(),
            });
        }

        let submit = page
            .find_element(self.markup.login_submit.as_str())
            .await
            .map_err(|_| WxError::ElementNotFound {
                selector: self.markup.login_submit.clone(),
            })?;
        submit
            .click()
            .await
            .map_err(|e| field_err(&self.markup.login_submit, "click", e))?;

        let outcome = self.await_login_result(page, session, email).await;
        Ok(outcome)
    }

    /// Poll the submit button's disabled attribute until it enables or the
    /// attempt budget runs out.
    async fn wait_submit_enabled(&self, page: &Page) -> bool {
        let expr = format!(
            "(() => {{ const el = document.querySelector({}); return !!el && !el.disabled; }})()",
            browser::js_string(&self.markup.login_submit)
        );
        let interval = std::time::Duration::from_millis(self.config.submit_poll_interval_ms);
        for _ in 0..self.config.submit_poll_attempts {
            if let Ok(result) = page.evaluate(expr.as_str()).await {
                if result.into_value::<bool>().unwrap_or(false) {
                    return true;
                }
            }
            sleep(interval).await;
        }
        false
    }

    /// Race the post-submit signals: a server error box against the login
    /// form disappearing. One observation per tick (error text, form
    /// presence, URL) feeds the pure `classify_login_poll` /
    /// `classify_login_deadline` pair, so the terminal states are testable
    /// without a browser.
    async fn await_login_result(
        &self,
        page: &Page,
        session: &SessionHandle,
        email: &str,
    ) -> LoginOutcome {
        let deadline = tokio::time::Instant::now() + self.config.login_result_timeout();
        let poll = std::time::Duration::from_millis(100);

        loop {
            let error_text = match page.find_element(self.markup.login_error.as_str()).await {
                Ok(error_box) => {
                    Some(error_box.inner_text().await.ok().flatten().unwrap_or_default())
                }
                Err(_) => None,
            };
            let form_present = browser::element_exists(page, &self.markup.login_email).await;
            let url = browser::current_path(page).await;

            if let Some((state, message)) =
                classify_login_poll(error_text.as_deref(), form_present, &url)
            {
                if state == LoginState::Success {
                    session.mark_authenticated(email);
                } else {
                    warn!(target = "wx.account", session = %session.id(), state = ?state, "login rejected");
                }
                return LoginOutcome {
                    success: state == LoginState::Success,
                    state,
                    message,
                };
            }

            if tokio::time::Instant::now() >= deadline {
                let (state, message) = classify_login_deadline(form_present, &url);
                warn!(target = "wx.account", session = %session.id(), state = ?state, "login not confirmed");
                return LoginOutcome {
                    success: false,
                    state,
                    message,
                };
            }
            sleep(poll).await;
        }
    }

    /// Live authentication probe against the site, bypassing the session's
    /// cached flag. Reconciles the flag with what the site actually shows,
    /// which is how a heuristic snapshot-restore claim gets confirmed or
    /// revoked.
    pub async fn check_auth(&self, session: &SessionHandle) -> Result<bool> {
        let _permit = session.acquire_automation().await;
        session.touch();

        let page = self.runtime.open_page(session.context_id()).await?;
        let result = async {
            browser::goto(&page, &self.config.home_url(), self.config.navigation_timeout()).await?;
            browser::dismiss_consent(&page, &self.config, &self.markup).await;
            Ok::<bool, WxError>(self.signed_in(&page).await)
        }
        .await;
        browser::close_page(page).await;

        let live = result?;
        if live {
            session.confirm_authenticated();
        } else if session.is_authenticated() {
            debug!(
                target = "wx.account",
                session = %session.id(),
                "cached authentication no longer holds, clearing"
            );
            session.clear_authenticated();
        }
        Ok(live)
    }

    /// The ordered list of favorited city names, scraped from the home page.
    pub async fn list_favorites(&self, session: &SessionHandle) -> Result<Vec<String>> {
        if !session.is_authenticated() {
            return Err(WxError::NotAuthenticated);
        }
        let _permit = session.acquire_automation().await;
        session.touch();

        let page = self.runtime.open_page(session.context_id()).await?;
        let result = self.list_favorites_inner(&page).await;
        browser::close_page(page).await;
        result
    }

    /// Shared with `toggle_favorite`, which already holds the permit and its
    /// own page.
    async fn list_favorites_inner(&self, page: &Page) -> Result<Vec<String>> {
        browser::goto(page, &self.config.home_url(), self.config.navigation_timeout()).await?;
        browser::dismiss_consent(page, &self.config, &self.markup).await;

        // A bounded wait for the bar; a signed-in user with zero favorites
        // may legitimately render nothing, which is the empty state rather
        // than a failure.
        if browser::wait_for_element(page, &self.markup.saved_locations_bar, self.config.card_timeout())
            .await
            .is_err()
        {
            debug!(target = "wx.account", "no saved-locations bar, treating as empty");
            return Ok(Vec::new());
        }

        let html = page
            .content()
            .await
            .map_err(|e| WxError::Infrastructure(format!("page content: {e}")))?;
        Ok(self.markup.parse_favorites(&html))
    }

    /// Idempotent favorite toggle with post-action verification. Requesting
    /// an already-satisfied state is a success without touching the page;
    /// adding past the cap is a refused outcome, not an error.
    pub async fn toggle_favorite(
        &self,
        session: &SessionHandle,
        city: &str,
        action: ToggleAction,
    ) -> Result<ToggleOutcome> {
        if !session.is_authenticated() {
            return Err(WxError::NotAuthenticated);
        }
        let _permit = session.acquire_automation().await;
        session.touch();

        let page = self.runtime.open_page(session.context_id()).await?;
        let outcome = self.toggle_inner(&page, session, city, action).await;
        browser::close_page(page).await;
        outcome
    }

    async fn toggle_inner(
        &self,
        page: &Page,
        session: &SessionHandle,
        city: &str,
        action: ToggleAction,
    ) -> Result<ToggleOutcome> {
        let before = self.list_favorites_inner(page).await?;

        match plan_toggle(&before, city, action, self.config.favorite_limit) {
            TogglePlan::AlreadySatisfied => {
                let message = match action {
                    ToggleAction::Add => format!("'{city}' is already in your favorites."),
                    ToggleAction::Remove => format!("'{city}' isn't in your favorites."),
                };
                return Ok(ToggleOutcome {
                    success: true,
                    action_taken: false,
                    favorites: before,
                    message,
                });
            }
            TogglePlan::AtCapacity => {
                let limit = self.config.favorite_limit;
                info!(
                    target = "wx.account",
                    session = %session.id(),
                    limit,
                    "favorite add refused at capacity"
                );
                return Ok(ToggleOutcome {
                    success: false,
                    action_taken: false,
                    favorites: before,
                    message: WxError::CapacityExceeded { limit }.user_message(),
                });
            }
            TogglePlan::Proceed => {}
        }

        // The star on the search suggestion toggles in both directions. The
        // click is scoped to the first suggestion: saved-location cards carry
        // the same star class, and a document-global match could land on one
        // of those instead.
        browser::type_into_search(page, &self.config, &self.markup, city).await?;
        browser::first_suggestion(page, &self.config, &self.markup).await?;
        browser::click_within(
            page,
            &self.markup.suggestion,
            &self.markup.suggestion_star,
            self.config.selector_timeout(),
        )
        .await?;

        // No completion signal exists for the toggle; settle, then verify by
        // re-scraping the home page.
        sleep(self.config.settle_delay()).await;
        let after = self.list_favorites_inner(page).await?;

        if verify_toggle(&after, city, action) {
            Ok(ToggleOutcome {
                success: true,
                action_taken: true,
                message: format!("'{city}' has been {} your favorites.", preposition(action)),
                favorites: after,
            })
        } else {
            error!(
                target = "wx.account",
                session = %session.id(),
                city,
                action = action.verb(),
                "toggle verification mismatch"
            );
            let err = WxError::VerificationMismatch {
                city: city.to_string(),
                wanted: action == ToggleAction::Add,
            };
            Ok(ToggleOutcome {
                success: false,
                action_taken: true,
                message: err.user_message(),
                favorites: after,
            })
        }
    }

    async fn signed_in(&self, page: &Page) -> bool {
        for selector in &self.markup.signed_in_indicators {
            if browser::element_exists(page, selector).await {
                return true;
            }
        }
        false
    }
}

fn field_err(selector: &str, action: &str, err: impl std::fmt::Display) -> WxError {
    WxError::ElementNotFound {
        selector: format!("{selector} ({action}: {err})"),
    }
}

fn preposition(action: ToggleAction) -> &'static str {
    match action {
        ToggleAction::Add => "added to",
        ToggleAction::Remove => "removed from",
    }
}

/// Case-insensitive substring match in either direction, so "Paris" matches
/// the site's "Paris, France" card and vice versa.
fn city_matches(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a))
}

fn plan_toggle(favorites: &[String], city: &str, action: ToggleAction, limit: usize) -> TogglePlan {
    let present = favorites.iter().any(|f| city_matches(f, city));
    match action {
        ToggleAction::Add if present => TogglePlan::AlreadySatisfied,
        ToggleAction::Add if favorites.len() >= limit => TogglePlan::AtCapacity,
        ToggleAction::Remove if !present => TogglePlan::AlreadySatisfied,
        _ => TogglePlan::Proceed,
    }
}

/// Classify one post-submit observation. A visible error box fails the
/// attempt with the site's own text (generic fallback when the box is
/// empty); the form gone with the URL off the login path is the success
/// signal. `None` means keep polling.
fn classify_login_poll(
    error_text: Option<&str>,
    form_present: bool,
    url: &str,
) -> Option<(LoginState, String)> {
    if let Some(text) = error_text {
        let text = text.trim();
        let message = if text.is_empty() {
            "The site rejected the credentials.".to_string()
        } else {
            text.to_string()
        };
        return Some((LoginState::Failed, message));
    }
    if !form_present && !url.is_empty() && !url.contains("/login") {
        return Some((LoginState::Success, "You're logged in.".into()));
    }
    None
}

/// Deadline classification from the final observation: a form that vanished
/// while the URL stayed on the login path is ambiguous, never a success;
/// anything else is a plain timeout.
fn classify_login_deadline(form_present: bool, url: &str) -> (LoginState, String) {
    if !form_present && url.contains("/login") {
        (
            LoginState::Ambiguous,
            "The site did not confirm the login. Please try again.".into(),
        )
    } else {
        (
            LoginState::TimedOut,
            "The login attempt timed out. Please try again.".into(),
        )
    }
}

fn verify_toggle(after: &[String], city: &str, action: ToggleAction) -> bool {
    let present = after.iter().any(|f| city_matches(f, city));
    match action {
        ToggleAction::Add => present,
        ToggleAction::Remove => !present,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn favs(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn city_matching_is_substring_both_ways() {
        assert!(city_matches("Paris, France", "paris"));
        assert!(city_matches("NYC", "New York City NYC Area"));
        assert!(!city_matches("Paris, France", "London"));
        assert!(!city_matches("", "Paris"));
    }

    #[test]
    fn adding_a_present_city_is_already_satisfied() {
        let current = favs(&["Paris, France", "Tokyo, Japan"]);
        assert_eq!(
            plan_toggle(&current, "paris", ToggleAction::Add, 10),
            TogglePlan::AlreadySatisfied
        );
    }

    #[test]
    fn removing_an_absent_city_is_already_satisfied() {
        let current = favs(&["Paris, France"]);
        assert_eq!(
            plan_toggle(&current, "London", ToggleAction::Remove, 10),
            TogglePlan::AlreadySatisfied
        );
    }

    #[test]
    fn add_at_the_cap_is_refused() {
        let current: Vec<String> = (0..10).map(|i| format!("City {i}")).collect();
        assert_eq!(
            plan_toggle(&current, "Lisbon", ToggleAction::Add, 10),
            TogglePlan::AtCapacity
        );
        // Removal is always allowed at the cap.
        assert_eq!(
            plan_toggle(&current, "City 3", ToggleAction::Remove, 10),
            TogglePlan::Proceed
        );
    }

    #[test]
    fn add_below_the_cap_proceeds() {
        let current = favs(&["Paris, France"]);
        assert_eq!(
            plan_toggle(&current, "Tokyo", ToggleAction::Add, 10),
            TogglePlan::Proceed
        );
    }

    #[test]
    fn rejected_login_returns_the_site_error_text_verbatim() {
        let (state, message) = classify_login_poll(
            Some("Invalid credentials"),
            true,
            "https://weather.com/login",
        )
        .unwrap();
        assert_eq!(state, LoginState::Failed);
        assert_eq!(message, "Invalid credentials");
    }

    #[test]
    fn empty_error_box_falls_back_to_a_generic_message() {
        let (state, message) =
            classify_login_poll(Some("  \n "), true, "https://weather.com/login").unwrap();
        assert_eq!(state, LoginState::Failed);
        assert_eq!(message, "The site rejected the credentials.");
    }

    #[test]
    fn success_requires_the_form_gone_and_the_url_off_the_login_path() {
        // Form still rendered, or gone but still on /login: keep polling.
        assert!(classify_login_poll(None, true, "https://weather.com/login").is_none());
        assert!(classify_login_poll(None, false, "https://weather.com/login").is_none());
        assert!(classify_login_poll(None, false, "").is_none());

        let (state, _) = classify_login_poll(None, false, "https://weather.com/").unwrap();
        assert_eq!(state, LoginState::Success);
    }

    #[test]
    fn deadline_distinguishes_ambiguous_from_timed_out() {
        let (state, _) = classify_login_deadline(false, "https://weather.com/login");
        assert_eq!(state, LoginState::Ambiguous);

        let (state, _) = classify_login_deadline(true, "https://weather.com/login");
        assert_eq!(state, LoginState::TimedOut);
    }

    #[test]
    fn star_click_is_scoped_to_the_suggestion_element() {
        let markup = SiteMarkup::default();
        let expr = crate::browser::scoped_click_expr(&markup.suggestion, &markup.suggestion_star);
        let star = crate::browser::js_string(&markup.suggestion_star);
        // A saved-location card carries the same star class; the click
        // expression must resolve the star inside the suggestion only.
        assert!(expr.contains(&format!("scope.querySelector({star})")));
        assert!(!expr.contains(&format!("document.querySelector({star})")));
    }

    #[test]
    fn verification_checks_the_desired_direction() {
        let after = favs(&["Paris, France", "Tokyo, Japan"]);
        assert!(verify_toggle(&after, "Tokyo", ToggleAction::Add));
        assert!(!verify_toggle(&after, "Tokyo", ToggleAction::Remove));
        assert!(verify_toggle(&after, "London", ToggleAction::Remove));
        assert!(!verify_toggle(&after, "London", ToggleAction::Add));
    }
}
