//! Shared page-driving helpers used by the account and weather engines.
//!
//! Selector waits are polled: the CDP query either resolves immediately or
//! not at all, so appearance is detected by re-querying on a short interval
//! under an overall deadline.

use std::time::Duration;

use chromiumoxide::{Element, Page};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::WxConfig;
use crate::error::{Result, WxError};
use crate::markup::SiteMarkup;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Navigate with the configured budget. A slow site surfaces as a retryable
/// timeout, not a hang.
pub(crate) async fn goto(page: &Page, url: &str, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, page.goto(url)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(err)) => Err(WxError::Navigation {
            url: url.to_string(),
            source: anyhow::Error::new(err),
        }),
        Err(_) => Err(WxError::Timeout {
            ms: timeout.as_millis() as u64,
            condition: format!("navigation to {url}"),
        }),
    }
}

/// Re-query `selector` until it resolves or the deadline passes.
pub(crate) async fn wait_for_element(
    page: &Page,
    selector: &str,
    timeout: Duration,
) -> Result<Element> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(element) = page.find_element(selector).await {
            return Ok(element);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(WxError::Timeout {
                ms: timeout.as_millis() as u64,
                condition: format!("selector {selector}"),
            });
        }
        sleep(POLL_INTERVAL).await;
    }
}

pub(crate) async fn element_exists(page: &Page, selector: &str) -> bool {
    page.find_element(selector).await.is_ok()
}

pub(crate) async fn current_path(page: &Page) -> String {
    match page.url().await {
        Ok(Some(url)) => url,
        _ => String::new(),
    }
}

/// Best-effort consent banner dismissal. The overlay appears for fresh
/// contexts only; absence is the common case and never an error.
pub(crate) async fn dismiss_consent(page: &Page, config: &WxConfig, markup: &SiteMarkup) {
    match wait_for_element(page, &markup.consent_iframe, config.probe_timeout()).await {
        Ok(_) => {
            if let Ok(accept) = page.find_element(markup.consent_accept.as_str()).await {
                match accept.click().await {
                    Ok(_) => debug!(target = "wx.browser", "dismissed consent banner"),
                    Err(err) => {
                        warn!(target = "wx.browser", error = %err, "consent accept click failed")
                    }
                }
            }
        }
        Err(_) => debug!(target = "wx.browser", "no consent banner"),
    }
}

/// Open the site's search control and type `city` character-paced so the
/// autocomplete fires. Whether a suggestion is required afterwards is the
/// caller's decision; see [`first_suggestion`].
pub(crate) async fn type_into_search(
    page: &Page,
    config: &WxConfig,
    markup: &SiteMarkup,
    city: &str,
) -> Result<()> {
    if !element_exists(page, &markup.search_input).await {
        let opener = wait_for_element(page, &markup.search_open, config.probe_timeout()).await?;
        opener.click().await.map_err(|e| WxError::ElementNotFound {
            selector: format!("{} (click: {e})", markup.search_open),
        })?;
    }

    let input = wait_for_element(page, &markup.search_input, config.card_timeout()).await?;

    // Clear any residue, then type paced; bulk-setting the value does not
    // trigger the suggestion list.
    let clear = format!(
        "(() => {{ const el = document.querySelector({}); if (el) el.value = ''; }})()",
        js_string(&markup.search_input)
    );
    let _ = page.evaluate(clear.as_str()).await;

    input.click().await.map_err(|e| WxError::ElementNotFound {
        selector: format!("{} (focus: {e})", markup.search_input),
    })?;

    let delay = Duration::from_millis(config.type_delay_ms);
    let mut buffer = [0u8; 4];
    for ch in city.chars() {
        input
            .type_str(ch.encode_utf8(&mut buffer))
            .await
            .map_err(|e| WxError::ElementNotFound {
                selector: format!("{} (type: {e})", markup.search_input),
            })?;
        sleep(delay).await;
    }
    Ok(())
}

/// Wait for the first autocomplete suggestion. Times out when the site has
/// no match for the typed query.
pub(crate) async fn first_suggestion(
    page: &Page,
    config: &WxConfig,
    markup: &SiteMarkup,
) -> Result<Element> {
    wait_for_element(page, &markup.suggestion, config.selector_timeout()).await
}

/// Submit the search input directly, for when no suggestion appears.
pub(crate) async fn submit_search(page: &Page, markup: &SiteMarkup) -> Result<()> {
    let input = page
        .find_element(markup.search_input.as_str())
        .await
        .map_err(|_| WxError::ElementNotFound {
            selector: markup.search_input.clone(),
        })?;
    input
        .press_key("Enter")
        .await
        .map_err(|e| WxError::ElementNotFound {
            selector: format!("{} (submit: {e})", markup.search_input),
        })?;
    Ok(())
}

/// JS that resolves `target_selector` INSIDE the first `scope_selector`
/// element and clicks it, reporting whether a click happened. Scoping in the
/// page avoids ever matching a same-class element elsewhere in the document.
pub(crate) fn scoped_click_expr(scope_selector: &str, target_selector: &str) -> String {
    format!(
        "(() => {{ const scope = document.querySelector({}); \
         const target = scope && scope.querySelector({}); \
         if (target) {{ target.click(); return true; }} return false; }})()",
        js_string(scope_selector),
        js_string(target_selector)
    )
}

/// Click `target_selector` within the first `scope_selector` element,
/// re-trying until the deadline in case the target renders late.
pub(crate) async fn click_within(
    page: &Page,
    scope_selector: &str,
    target_selector: &str,
    timeout: Duration,
) -> Result<()> {
    let expr = scoped_click_expr(scope_selector, target_selector);
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(result) = page.evaluate(expr.as_str()).await {
            if result.into_value::<bool>().unwrap_or(false) {
                return Ok(());
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(WxError::ElementNotFound {
                selector: format!("{target_selector} within {scope_selector}"),
            });
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Close a page, logging rather than raising: teardown runs on every exit
/// path and must not mask the operation's own result.
pub(crate) async fn close_page(page: Page) {
    if let Err(err) = page.close().await {
        warn!(target = "wx.browser", error = %err, "error closing page");
    }
}

/// Quote a string for safe embedding in an evaluated JS expression.
pub(crate) fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_string_escapes_quotes() {
        assert_eq!(js_string(r#"button[type="submit"]"#), r#""button[type=\"submit\"]""#);
        assert_eq!(js_string("#plain"), "\"#plain\"");
    }

    #[test]
    fn scoped_click_queries_the_target_inside_the_scope() {
        let expr = scoped_click_expr("#list", ".star");
        // The scope is resolved against the document, the target only
        // against the scope element, never against the whole document.
        assert!(expr.contains(r##"document.querySelector("#list")"##));
        assert!(expr.contains(r#"scope.querySelector(".star")"#));
        assert!(!expr.contains(r#"document.querySelector(".star")"#));
    }
}
