//! Session-scoped browser automation for a conversational weather assistant.
//!
//! The crate drives a real Chromium instance over CDP to perform the account
//! and weather operations the assistant needs: logging in to the weather
//! site, managing favorite locations, and scraping current conditions. Each
//! user conversation is bound to an isolated browsing context so cookies and
//! login state never leak between users.
//!
//! Entry points:
//! - [`BrowserRuntime`]: process-wide browser lifecycle and context handout.
//! - [`SessionRegistry`]: session resolution, expiry sweep, snapshot/restore.
//! - [`AccountEngine`]: login, favorites listing, idempotent favorite toggle.
//! - [`WeatherEngine`]: cached current-conditions lookups.

pub mod account;
mod browser;
pub mod config;
pub mod error;
pub mod intent;
pub mod markup;
pub mod runtime;
pub mod session;
pub mod weather;

pub use account::{AccountEngine, LoginOutcome, LoginState, ToggleAction, ToggleOutcome};
pub use config::WxConfig;
pub use error::{Result, WxError};
pub use intent::{FavoriteAction, Intent, IntentClassifier, IntentKind, ResponseWriter};
pub use runtime::{BrowserRuntime, ContextSnapshot, SnapshotCookie};
pub use session::{
    ChatRole, ChatTurn, Session, SessionHandle, SessionInfo, SessionRegistry, SessionReport,
};
pub use weather::{WeatherEngine, WeatherReading};
