//! Browser process lifecycle and browsing-context management.
//!
//! One [`BrowserRuntime`] is constructed at process startup and handed to the
//! registry and engines by reference. It owns the Chromium process, the
//! anonymous default context used for unauthenticated lookups, and hands out
//! isolated contexts (independent cookie/storage sandboxes) for sessions.

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, TimeSinceEpoch};
use chromiumoxide::cdp::browser_protocol::storage::{GetCookiesParams, SetCookiesParams};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::WxConfig;
use crate::error::{Result, WxError, cdp_err};

/// Persisted cookie/storage state of an isolated context. Opaque to callers;
/// associated one-to-one with a session identifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub cookies: Vec<SnapshotCookie>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

struct RuntimeState {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

/// Process-wide browser manager. `start` is idempotent under concurrent
/// callers; exactly one performs the launch, the rest observe the started
/// state once the lock is released.
pub struct BrowserRuntime {
    config: Arc<WxConfig>,
    state: Mutex<Option<RuntimeState>>,
}

impl BrowserRuntime {
    pub fn new(config: Arc<WxConfig>) -> Self {
        Self {
            config,
            state: Mutex::new(None),
        }
    }

    /// Launch the browser process if it is not already running. A launch
    /// failure propagates as a retryable infrastructure error.
    pub async fn start(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        if let Some(state) = guard.as_ref() {
            if state.browser.version().await.is_ok() {
                return Ok(());
            }
            // Process died silently; tear down and relaunch below.
            warn!(target = "wx.runtime", "browser process lost, relaunching");
            if let Some(dead) = guard.take() {
                dead.handler_task.abort();
            }
        }

        info!(
            target = "wx.runtime",
            headless = self.config.headless,
            "launching browser"
        );

        let launch_config = build_browser_config(&self.config)?;
        let (browser, mut handler) = Browser::launch(launch_config)
            .await
            .map_err(|e| WxError::Infrastructure(format!("browser launch failed: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(target = "wx.runtime", error = %err, "cdp handler event error");
                }
            }
        });

        *guard = Some(RuntimeState {
            browser,
            handler_task,
        });

        info!(target = "wx.runtime", "browser started");
        Ok(())
    }

    /// Close the browser process. Safe to call when never started.
    pub async fn stop(&self) {
        let mut guard = self.state.lock().await;
        if let Some(mut state) = guard.take() {
            if let Err(err) = state.browser.close().await {
                warn!(target = "wx.runtime", error = %err, "error closing browser");
            }
            state.handler_task.abort();
            info!(target = "wx.runtime", "browser stopped");
        }
    }

    /// True only while a browser handle exists and still answers over CDP,
    /// so a silently crashed process reads as not running.
    pub async fn is_running(&self) -> bool {
        let guard = self.state.lock().await;
        match guard.as_ref() {
            Some(state) => state.browser.version().await.is_ok(),
            None => false,
        }
    }

    /// Create a new isolated browsing context, optionally seeded from a
    /// previously persisted snapshot. Auto-starts the runtime.
    pub async fn acquire_context(
        &self,
        snapshot: Option<&ContextSnapshot>,
    ) -> Result<BrowserContextId> {
        self.start().await?;

        let mut guard = self.state.lock().await;
        let state = guard
            .as_mut()
            .ok_or_else(|| WxError::Infrastructure("browser not running".into()))?;

        let context_id = state
            .browser
            .create_browser_context(CreateBrowserContextParams::default())
            .await
            .map_err(cdp_err)?;

        if let Some(snapshot) = snapshot {
            let cookies = snapshot
                .cookies
                .iter()
                .map(cookie_param)
                .collect::<Result<Vec<_>>>()?;
            state
                .browser
                .execute(SetCookiesParams {
                    cookies,
                    browser_context_id: Some(context_id.clone()),
                })
                .await
                .map_err(cdp_err)?;
            debug!(
                target = "wx.runtime",
                cookies = snapshot.cookies.len(),
                "seeded isolated context from snapshot"
            );
        }

        Ok(context_id)
    }

    /// Dispose of an isolated context and everything stored in it.
    pub async fn close_context(&self, context_id: &BrowserContextId) -> Result<()> {
        let mut guard = self.state.lock().await;
        let state = guard
            .as_mut()
            .ok_or_else(|| WxError::Infrastructure("browser not running".into()))?;

        state
            .browser
            .dispose_browser_context(context_id.clone())
            .await
            .map_err(cdp_err)?;
        Ok(())
    }

    /// Open a page inside an isolated context.
    pub async fn open_page(&self, context_id: &BrowserContextId) -> Result<Page> {
        self.new_page(Some(context_id)).await
    }

    /// Open a page in the anonymous default context (unauthenticated
    /// weather lookups).
    pub async fn open_default_page(&self) -> Result<Page> {
        self.new_page(None).await
    }

    async fn new_page(&self, context_id: Option<&BrowserContextId>) -> Result<Page> {
        self.start().await?;

        let guard = self.state.lock().await;
        let state = guard
            .as_ref()
            .ok_or_else(|| WxError::Infrastructure("browser not running".into()))?;

        let mut params = CreateTargetParams::builder().url("about:blank");
        if let Some(id) = context_id {
            params = params.browser_context_id(id.clone());
        }
        let params = params
            .build()
            .map_err(|e| WxError::Infrastructure(format!("target params: {e}")))?;

        let page = state.browser.new_page(params).await.map_err(cdp_err)?;
        drop(guard);

        page.set_user_agent(self.config.user_agent.as_str())
            .await
            .map_err(cdp_err)?;
        Ok(page)
    }

    /// Read the cookie state of an isolated context into a persistable blob.
    pub async fn snapshot_context(&self, context_id: &BrowserContextId) -> Result<ContextSnapshot> {
        let guard = self.state.lock().await;
        let state = guard
            .as_ref()
            .ok_or_else(|| WxError::Infrastructure("browser not running".into()))?;

        let response = state
            .browser
            .execute(GetCookiesParams {
                browser_context_id: Some(context_id.clone()),
            })
            .await
            .map_err(cdp_err)?;

        let cookies = response
            .result
            .cookies
            .iter()
            .map(|c| SnapshotCookie {
                name: c.name.clone(),
                value: c.value.clone(),
                domain: c.domain.clone(),
                path: c.path.clone(),
                expires: if c.session { None } else { Some(c.expires) },
                http_only: c.http_only,
                secure: c.secure,
            })
            .collect();

        Ok(ContextSnapshot { cookies })
    }
}

fn build_browser_config(config: &WxConfig) -> Result<BrowserConfig> {
    let viewport = Viewport {
        width: config.viewport_width,
        height: config.viewport_height,
        device_scale_factor: None,
        emulating_mobile: false,
        is_landscape: config.viewport_width >= config.viewport_height,
        has_touch: false,
    };

    let mut builder = BrowserConfig::builder()
        .viewport(viewport)
        .args(launch_args(&config.locale));

    if !config.headless {
        builder = builder.with_head();
    }

    builder
        .build()
        .map_err(|e| WxError::Infrastructure(format!("browser config: {e}")))
}

/// Launch flags: resist automation detection, survive containers without a
/// usable sandbox or GPU, and suppress permission prompts that would hang
/// unattended navigation.
fn launch_args(locale: &str) -> Vec<String> {
    vec![
        "--disable-blink-features=AutomationControlled".into(),
        "--no-sandbox".into(),
        "--disable-setuid-sandbox".into(),
        "--disable-dev-shm-usage".into(),
        "--disable-gpu".into(),
        "--disable-accelerated-2d-canvas".into(),
        "--disable-geolocation".into(),
        "--deny-permission-prompts".into(),
        format!("--lang={locale}"),
    ]
}

fn cookie_param(cookie: &SnapshotCookie) -> Result<CookieParam> {
    let mut builder = CookieParam::builder()
        .name(cookie.name.clone())
        .value(cookie.value.clone())
        .domain(cookie.domain.clone())
        .path(cookie.path.clone())
        .secure(cookie.secure)
        .http_only(cookie.http_only);
    if let Some(expires) = cookie.expires {
        builder = builder.expires(TimeSinceEpoch::new(expires));
    }
    builder
        .build()
        .map_err(|e| WxError::Snapshot(format!("cookie rebuild: {e}")))
}
