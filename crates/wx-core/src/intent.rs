//! Contracts for the external conversational collaborators.
//!
//! Intent classification and response generation are black boxes to this
//! crate; they are consumed through these traits and wired in at process
//! startup. The automation core only stores and routes [`Intent`] values.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::weather::WeatherReading;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    WeatherQuery,
    FavoritesManagement,
    CalendarQuery,
    GeneralConversation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FavoriteAction {
    Add,
    Remove,
    List,
    Check,
}

/// Structured understanding of one user utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub kind: IntentKind,
    /// Present only when `kind` is `FavoritesManagement`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<FavoriteAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    pub summary: String,
}

impl Intent {
    /// The safe default when classification fails; implementations of
    /// [`IntentClassifier`] must degrade to this rather than erroring.
    pub fn general_conversation(summary: impl Into<String>) -> Self {
        Self {
            kind: IntentKind::GeneralConversation,
            action: None,
            city: None,
            summary: summary.into(),
        }
    }
}

/// Turns free text into a structured intent. Infallible by contract:
/// classification failure degrades to general conversation.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Intent;
}

/// Renders a conversational reply, optionally grounded in a structured
/// weather reading.
#[async_trait]
pub trait ResponseWriter: Send + Sync {
    async fn compose(&self, query: &str, reading: Option<&WeatherReading>) -> String;
}
