//! Per-user sessions and the registry that owns them.
//!
//! A session owns exactly one isolated browsing context; contexts are never
//! shared between sessions or with the anonymous default context. The
//! registry is the only component that creates or destroys sessions, and a
//! background sweep evicts sessions past their absolute or idle lifetime.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WxConfig;
use crate::error::{Result, WxError};
use crate::intent::Intent;
use crate::runtime::{BrowserRuntime, ContextSnapshot};

/// Bounded chat memory per session.
const MAX_CHAT_TURNS: usize = 10;

/// Cookie names that typically indicate an authenticated session on the
/// target site. Matching against these is a heuristic, not a guarantee;
/// privileged actions require a live check through the account engine.
const AUTH_COOKIE_NAMES: [&str; 4] = ["auth", "session", "token", "user"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
    pub at: DateTime<Utc>,
}

struct SessionMeta {
    created_wall: DateTime<Utc>,
    created: Instant,
    last_access: Instant,
    authenticated: bool,
    user_data: HashMap<String, String>,
    pending_action: Option<Intent>,
    chat_history: VecDeque<ChatTurn>,
}

/// One logical user conversation bound to one isolated browsing context.
pub struct Session {
    id: String,
    context_id: BrowserContextId,
    meta: SyncMutex<SessionMeta>,
    /// One in-flight automation operation per session. Concurrent automation
    /// against a shared context would interleave navigation state, so every
    /// engine entry point holds this for the duration of the operation.
    automation_permit: Mutex<()>,
}

pub type SessionHandle = Arc<Session>;

impl Session {
    fn new(id: String, context_id: BrowserContextId) -> Self {
        let now = Instant::now();
        Self {
            id,
            context_id,
            meta: SyncMutex::new(SessionMeta {
                created_wall: Utc::now(),
                created: now,
                last_access: now,
                authenticated: false,
                user_data: HashMap::new(),
                pending_action: None,
                chat_history: VecDeque::new(),
            }),
            automation_permit: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context_id(&self) -> &BrowserContextId {
        &self.context_id
    }

    /// Refresh the idle timer. Absolute age is unaffected.
    pub fn touch(&self) {
        self.meta.lock().last_access = Instant::now();
    }

    pub fn age(&self) -> Duration {
        self.meta.lock().created.elapsed()
    }

    pub fn idle(&self) -> Duration {
        self.meta.lock().last_access.elapsed()
    }

    pub fn is_authenticated(&self) -> bool {
        self.meta.lock().authenticated
    }

    /// Only the account engine calls this, and only after a verified
    /// success signal; never set speculatively.
    pub fn mark_authenticated(&self, email: &str) {
        let mut meta = self.meta.lock();
        meta.authenticated = true;
        meta.user_data.insert("email".into(), email.into());
        meta.user_data
            .insert("login_time".into(), Utc::now().to_rfc3339());
    }

    /// Upgrade a heuristic authentication claim (snapshot restore) after a
    /// live probe confirms it, preserving any existing user metadata.
    pub fn confirm_authenticated(&self) {
        self.meta.lock().authenticated = true;
    }

    pub fn clear_authenticated(&self) {
        self.meta.lock().authenticated = false;
    }

    pub fn user_data(&self, key: &str) -> Option<String> {
        self.meta.lock().user_data.get(key).cloned()
    }

    pub fn set_user_data(&self, key: &str, value: &str) {
        self.meta.lock().user_data.insert(key.into(), value.into());
    }

    /// Park a structured intent until the user finishes authenticating.
    pub fn set_pending_action(&self, intent: Intent) {
        self.meta.lock().pending_action = Some(intent);
    }

    pub fn take_pending_action(&self) -> Option<Intent> {
        self.meta.lock().pending_action.take()
    }

    pub fn push_chat_turn(&self, role: ChatRole, content: &str) {
        let mut meta = self.meta.lock();
        if meta.chat_history.len() == MAX_CHAT_TURNS {
            meta.chat_history.pop_front();
        }
        meta.chat_history.push_back(ChatTurn {
            role,
            content: content.into(),
            at: Utc::now(),
        });
    }

    pub fn chat_history(&self) -> Vec<ChatTurn> {
        self.meta.lock().chat_history.iter().cloned().collect()
    }

    /// Serialize automation against this session's context. Held across the
    /// whole login / favorites / weather operation.
    pub async fn acquire_automation(&self) -> MutexGuard<'_, ()> {
        self.automation_permit.lock().await
    }

    fn created_wall(&self) -> DateTime<Utc> {
        self.meta.lock().created_wall
    }
}

/// Operational snapshot of the registry, for diagnostics.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub active_sessions: usize,
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub age_minutes: f64,
    pub idle_minutes: f64,
    pub authenticated: bool,
    pub created_at: DateTime<Utc>,
}

struct Sweeper {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Maps opaque session identifiers to sessions. Create, destroy, restore and
/// eviction are all serialized behind one lock.
pub struct SessionRegistry {
    runtime: Arc<BrowserRuntime>,
    config: Arc<WxConfig>,
    sessions: Mutex<HashMap<String, SessionHandle>>,
    sweeper: SyncMutex<Option<Sweeper>>,
}

impl SessionRegistry {
    pub fn new(runtime: Arc<BrowserRuntime>, config: Arc<WxConfig>) -> Self {
        Self {
            runtime,
            config,
            sessions: Mutex::new(HashMap::new()),
            sweeper: SyncMutex::new(None),
        }
    }

    /// Spawn the periodic eviction sweep. Idempotent.
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut slot = self.sweeper.lock();
        if slot.is_some() {
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let registry = Arc::downgrade(self);
        let interval = self.config.sweep_interval();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick would sweep an empty registry.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(registry) = Weak::upgrade(&registry) else {
                            break;
                        };
                        registry.evict_expired().await;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!(target = "wx.session", "eviction sweep stopped");
        });

        *slot = Some(Sweeper { shutdown, task });
        info!(target = "wx.session", "eviction sweep started");
    }

    /// Stop the sweep (awaiting its termination) and close every session.
    pub async fn stop(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.shutdown.send(true);
            if let Err(err) = sweeper.task.await {
                warn!(target = "wx.session", error = %err, "sweeper join failed");
            }
        }

        let mut sessions = self.sessions.lock().await;
        for (id, session) in sessions.drain() {
            if let Err(err) = self.runtime.close_context(session.context_id()).await {
                error!(target = "wx.session", session = %id, error = %err, "error closing context at shutdown");
            }
        }
        info!(target = "wx.session", "session registry stopped");
    }

    /// Return the session for `identifier`, creating it (and its isolated
    /// context) if unknown. A missing identifier gets a generated one.
    pub async fn resolve_or_create(&self, identifier: Option<&str>) -> Result<SessionHandle> {
        let mut sessions = self.sessions.lock().await;

        let id = match identifier {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };

        if let Some(session) = sessions.get(&id) {
            session.touch();
            debug!(target = "wx.session", session = %id, "reusing session");
            return Ok(session.clone());
        }

        info!(target = "wx.session", session = %id, "creating session");
        let context_id = self.runtime.acquire_context(None).await?;
        let session: SessionHandle = Arc::new(Session::new(id.clone(), context_id));
        sessions.insert(id, session.clone());
        Ok(session)
    }

    /// Look up an existing session, refreshing its idle timer on hit.
    pub async fn get(&self, identifier: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.lock().await;
        let session = sessions.get(identifier).cloned();
        if let Some(session) = &session {
            session.touch();
        }
        session
    }

    /// Close a session's context and drop it. No-op for unknown identifiers.
    pub async fn destroy(&self, identifier: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.remove(identifier) {
            if let Err(err) = self.runtime.close_context(session.context_id()).await {
                error!(target = "wx.session", session = %identifier, error = %err, "error closing context");
            }
            info!(target = "wx.session", session = %identifier, "destroyed session");
        }
    }

    /// Persist a session's cookie state.
    pub async fn snapshot(&self, identifier: &str) -> Result<ContextSnapshot> {
        let session = self
            .get(identifier)
            .await
            .ok_or_else(|| WxError::SessionNotFound(identifier.into()))?;
        self.runtime.snapshot_context(session.context_id()).await
    }

    /// Rebuild a session from a persisted snapshot, replacing any live
    /// session under the same identifier. Authentication is classified from
    /// the snapshot's cookies; that classification is heuristic-only and
    /// callers must live-verify before trusting it for privileged actions.
    pub async fn restore(&self, identifier: &str, snapshot: &ContextSnapshot) -> Result<SessionHandle> {
        let mut sessions = self.sessions.lock().await;

        if let Some(existing) = sessions.remove(identifier) {
            if let Err(err) = self.runtime.close_context(existing.context_id()).await {
                warn!(target = "wx.session", session = %identifier, error = %err, "error closing replaced context");
            }
        }

        let context_id = self.runtime.acquire_context(Some(snapshot)).await?;
        let session: SessionHandle = Arc::new(Session::new(identifier.to_string(), context_id));

        if snapshot_looks_authenticated(snapshot, &site_domain(&self.config.base_url)) {
            session.meta.lock().authenticated = true;
            session.set_user_data("auth_source", "snapshot");
        }

        sessions.insert(identifier.to_string(), session.clone());
        info!(
            target = "wx.session",
            session = %identifier,
            authenticated = session.is_authenticated(),
            "restored session"
        );
        Ok(session)
    }

    pub async fn report(&self) -> SessionReport {
        let sessions = self.sessions.lock().await;
        let mut infos: Vec<SessionInfo> = sessions
            .values()
            .map(|s| SessionInfo {
                session_id: s.id().to_string(),
                age_minutes: s.age().as_secs_f64() / 60.0,
                idle_minutes: s.idle().as_secs_f64() / 60.0,
                authenticated: s.is_authenticated(),
                created_at: s.created_wall(),
            })
            .collect();
        infos.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        SessionReport {
            active_sessions: infos.len(),
            sessions: infos,
        }
    }

    /// One sweep pass: destroy every session past either lifetime limit.
    /// Close failures are logged and never abort the pass.
    pub async fn evict_expired(&self) {
        let mut sessions = self.sessions.lock().await;
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| {
                is_expired(
                    s.age(),
                    s.idle(),
                    self.config.session_timeout(),
                    self.config.idle_timeout(),
                )
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            if let Some(session) = sessions.remove(&id) {
                info!(target = "wx.session", session = %id, "evicting expired session");
                if let Err(err) = self.runtime.close_context(session.context_id()).await {
                    error!(target = "wx.session", session = %id, error = %err, "error closing expired context");
                }
            }
        }
    }
}

fn is_expired(age: Duration, idle: Duration, max_age: Duration, max_idle: Duration) -> bool {
    age > max_age || idle > max_idle
}

/// Host part of the configured base URL, for cookie domain matching.
fn site_domain(base_url: &str) -> String {
    base_url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("www.")
        .trim_end_matches('/')
        .to_string()
}

/// Cookie-name heuristic over a snapshot: an auth-looking cookie scoped to
/// the site's domain. Best effort only.
fn snapshot_looks_authenticated(snapshot: &ContextSnapshot, domain: &str) -> bool {
    snapshot.cookies.iter().any(|cookie| {
        cookie.domain.ends_with(domain)
            && AUTH_COOKIE_NAMES
                .iter()
                .any(|name| cookie.name.to_lowercase() == *name)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::SnapshotCookie;

    fn test_session() -> Session {
        Session::new("s1".into(), BrowserContextId::new("ctx-test"))
    }

    fn cookie(name: &str, domain: &str) -> SnapshotCookie {
        SnapshotCookie {
            name: name.into(),
            value: "v".into(),
            domain: domain.into(),
            path: "/".into(),
            expires: None,
            http_only: false,
            secure: false,
        }
    }

    #[test]
    fn chat_history_is_bounded_to_ten_turns() {
        let session = test_session();
        for i in 0..13 {
            session.push_chat_turn(ChatRole::User, &format!("turn {i}"));
        }
        let history = session.chat_history();
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].content, "turn 3");
        assert_eq!(history[9].content, "turn 12");
    }

    #[test]
    fn authentication_starts_false_and_records_metadata() {
        let session = test_session();
        assert!(!session.is_authenticated());

        session.mark_authenticated("user@example.com");
        assert!(session.is_authenticated());
        assert_eq!(session.user_data("email").as_deref(), Some("user@example.com"));
        assert!(session.user_data("login_time").is_some());

        session.clear_authenticated();
        assert!(!session.is_authenticated());
    }

    #[test]
    fn pending_action_is_taken_once() {
        let session = test_session();
        session.set_pending_action(Intent::general_conversation("later"));
        assert!(session.take_pending_action().is_some());
        assert!(session.take_pending_action().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_expiry_fires_before_absolute_expiry() {
        let session = test_session();
        let max_age = Duration::from_secs(30 * 60);
        let max_idle = Duration::from_secs(15 * 60);

        tokio::time::advance(Duration::from_secs(16 * 60)).await;
        // Idle for 16 minutes, aged 16 minutes: idle limit trips first.
        assert!(is_expired(session.age(), session.idle(), max_age, max_idle));

        session.touch();
        assert!(!is_expired(session.age(), session.idle(), max_age, max_idle));
    }

    #[tokio::test(start_paused = true)]
    async fn touch_does_not_reset_absolute_age() {
        let session = test_session();
        let max_age = Duration::from_secs(30 * 60);
        let max_idle = Duration::from_secs(15 * 60);

        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(10 * 60)).await;
            session.touch();
        }
        // Idle is fresh, but the session is 40 minutes old.
        assert!(is_expired(session.age(), session.idle(), max_age, max_idle));
    }

    #[test]
    fn auth_heuristic_requires_domain_and_known_name() {
        let domain = "weather.com";

        let hit = ContextSnapshot {
            cookies: vec![cookie("Session", ".weather.com")],
        };
        assert!(snapshot_looks_authenticated(&hit, domain));

        let wrong_domain = ContextSnapshot {
            cookies: vec![cookie("session", ".other.com")],
        };
        assert!(!snapshot_looks_authenticated(&wrong_domain, domain));

        let wrong_name = ContextSnapshot {
            cookies: vec![cookie("preferences", ".weather.com")],
        };
        assert!(!snapshot_looks_authenticated(&wrong_name, domain));

        assert!(!snapshot_looks_authenticated(&ContextSnapshot::default(), domain));
    }

    #[test]
    fn site_domain_strips_scheme_and_www() {
        assert_eq!(site_domain("https://weather.com"), "weather.com");
        assert_eq!(site_domain("http://www.weather.com/"), "weather.com");
    }

    #[tokio::test]
    async fn automation_permit_serializes_holders() {
        let session = Arc::new(test_session());
        let guard = session.acquire_automation().await;
        // A second acquisition must not complete while the first is held.
        let second = {
            let session = session.clone();
            tokio::spawn(async move {
                let _guard = session.acquire_automation().await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!second.is_finished());
        drop(guard);
        second.await.unwrap();
    }
}
