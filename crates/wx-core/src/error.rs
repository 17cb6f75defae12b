use thiserror::Error;

pub type Result<T> = std::result::Result<T, WxError>;

#[derive(Debug, Error)]
pub enum WxError {
    /// The browser process could not be launched or has gone away.
    /// Fatal to the triggering call; retryable once the environment recovers.
    #[error("browser unavailable: {0}")]
    Infrastructure(String),

    #[error("navigation failed: {url}")]
    Navigation {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("timeout after {ms}ms waiting for: {condition}")]
    Timeout { ms: u64, condition: String },

    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    /// The site reached a state the automation cannot classify
    /// (e.g. login neither redirected nor surfaced an error).
    #[error("ambiguous site state: {0}")]
    AmbiguousState(String),

    /// A UI action was performed but the re-scraped state contradicts the
    /// intent. Distinct from ElementNotFound so operators can tell "UI
    /// changed" apart from "action didn't take".
    #[error("verification mismatch: '{city}' expected favorited={wanted}")]
    VerificationMismatch { city: String, wanted: bool },

    /// Expected business-rule rejection, not an automation failure.
    #[error("favorite limit of {limit} reached")]
    CapacityExceeded { limit: usize },

    #[error("unknown session: {0}")]
    SessionNotFound(String),

    /// A privileged operation was requested on an unauthenticated session.
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl WxError {
    /// Conversational rendering for the chat layer. Callers surface this
    /// string to end users; the Display impl is for logs and operators.
    pub fn user_message(&self) -> String {
        match self {
            WxError::Infrastructure(_) => {
                "Sorry, the weather service is unavailable right now. Please try again in a moment."
                    .into()
            }
            WxError::Navigation { .. } | WxError::Timeout { .. } => {
                "Sorry, the weather site is responding slowly. Please try again.".into()
            }
            WxError::ElementNotFound { .. } | WxError::AmbiguousState(_) => {
                "Sorry, something went wrong while talking to the weather site.".into()
            }
            WxError::VerificationMismatch { city, wanted } => {
                if *wanted {
                    format!("I tried to add '{city}' to your favorites, but it didn't stick. Please try again.")
                } else {
                    format!("I tried to remove '{city}' from your favorites, but it didn't stick. Please try again.")
                }
            }
            WxError::CapacityExceeded { limit } => {
                format!("You already have the maximum of {limit} favorite locations. Remove one first.")
            }
            WxError::SessionNotFound(_) => {
                "Your session has expired. Please start over.".into()
            }
            WxError::NotAuthenticated => {
                "You need to log in to your weather.com account first.".into()
            }
            WxError::Snapshot(_) | WxError::Io(_) | WxError::Json(_) => {
                "Sorry, an internal error occurred.".into()
            }
        }
    }

    /// True for errors worth retrying without operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WxError::Infrastructure(_) | WxError::Navigation { .. } | WxError::Timeout { .. }
        )
    }
}

pub(crate) fn cdp_err(err: impl std::fmt::Display) -> WxError {
    WxError::Infrastructure(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_messages_never_leak_internals() {
        let err = WxError::Navigation {
            url: "https://weather.com/login".into(),
            source: anyhow::anyhow!("net::ERR_CONNECTION_RESET at 10.0.0.3"),
        };
        let msg = err.user_message();
        assert!(!msg.contains("ERR_CONNECTION_RESET"));
        assert!(!msg.contains("10.0.0.3"));
    }

    #[test]
    fn capacity_is_not_retryable() {
        assert!(!WxError::CapacityExceeded { limit: 10 }.is_retryable());
        assert!(WxError::Infrastructure("gone".into()).is_retryable());
    }

    #[test]
    fn mismatch_message_names_the_city_and_direction() {
        let add = WxError::VerificationMismatch {
            city: "Paris".into(),
            wanted: true,
        };
        assert!(add.user_message().contains("add 'Paris'"));
        let remove = WxError::VerificationMismatch {
            city: "Paris".into(),
            wanted: false,
        };
        assert!(remove.user_message().contains("remove 'Paris'"));
    }
}
