//! Result and error types for hoverprobe.

use thiserror::Error;

/// Result type for hoverprobe operations
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Errors that can occur while driving the browser
///
/// Only launch and navigation failures are meant to reach the caller of a
/// probe batch. Everything raised inside the hover protocol is folded into an
/// [`InteractionResult`](crate::InteractionResult) with
/// [`BehaviorCategory::Unreachable`](crate::BehaviorCategory::Unreachable).
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Browser process could not be started
    #[error("Failed to launch browser: {message}")]
    BrowserLaunch {
        /// Error message
        message: String,
    },

    /// Navigation error
    #[error("Navigation to {url} failed: {message}")]
    Navigation {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// Operation timed out
    #[error("Operation timed out after {ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Page-level CDP failure
    #[error("Page error: {message}")]
    Page {
        /// Error message
        message: String,
    },

    /// In-page script evaluation failed or returned an unexpected shape
    #[error("Script evaluation failed: {message}")]
    Script {
        /// Error message
        message: String,
    },

    /// Input simulation error
    #[error("Input simulation failed: {message}")]
    Input {
        /// Error message
        message: String,
    },

    /// Screenshot error
    #[error("Screenshot failed: {message}")]
    Screenshot {
        /// Error message
        message: String,
    },

    /// Target locator is empty or cannot be parsed
    #[error("Invalid selector {selector:?}: {message}")]
    InvalidSelector {
        /// Selector as supplied
        selector: String,
        /// Error message
        message: String,
    },

    /// No element matched the selector
    #[error("No element matches {selector}")]
    ElementNotFound {
        /// Selector as supplied
        selector: String,
    },

    /// Element exists but cannot receive the pointer
    #[error("Element {selector} is not actionable: {message}")]
    NotActionable {
        /// Selector as supplied
        selector: String,
        /// Error message
        message: String,
    },

    /// Operation requires a live session
    #[error("No live browser session")]
    NoSession,

    /// The serialized browser worker failed or is gone
    #[error("Browser worker failure: {message}")]
    Bridge {
        /// Error message
        message: String,
    },

    /// Artifact persistence failed
    #[error("Artifact sink failed: {message}")]
    Artifact {
        /// Error message
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProbeError {
    /// Create a browser launch error
    #[must_use]
    pub fn launch(message: impl Into<String>) -> Self {
        Self::BrowserLaunch {
            message: message.into(),
        }
    }

    /// Create a navigation error
    #[must_use]
    pub fn navigation(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Navigation {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a page error
    #[must_use]
    pub fn page(message: impl Into<String>) -> Self {
        Self::Page {
            message: message.into(),
        }
    }

    /// Create a script evaluation error
    #[must_use]
    pub fn script(message: impl Into<String>) -> Self {
        Self::Script {
            message: message.into(),
        }
    }

    /// Create an input simulation error
    #[must_use]
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
        }
    }

    /// Create a bridge error
    #[must_use]
    pub fn bridge(message: impl Into<String>) -> Self {
        Self::Bridge {
            message: message.into(),
        }
    }

    /// Create an artifact error
    #[must_use]
    pub fn artifact(message: impl Into<String>) -> Self {
        Self::Artifact {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Timeout from a [`std::time::Duration`]
    #[must_use]
    pub fn timeout(after: std::time::Duration) -> Self {
        Self::Timeout {
            ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Whether this error must abort a probe batch
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::BrowserLaunch { .. } | Self::Bridge { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_launch_error_message() {
        let err = ProbeError::launch("chrome not found");
        assert!(err.to_string().contains("launch browser"));
        assert!(err.to_string().contains("chrome not found"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_navigation_error_carries_url() {
        let err = ProbeError::navigation("https://example.com", "net::ERR_NAME_NOT_RESOLVED");
        let text = err.to_string();
        assert!(text.contains("https://example.com"));
        assert!(text.contains("ERR_NAME_NOT_RESOLVED"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_timeout_from_duration() {
        let err = ProbeError::timeout(Duration::from_millis(8000));
        assert!(matches!(err, ProbeError::Timeout { ms: 8000 }));
        assert_eq!(err.to_string(), "Operation timed out after 8000ms");
    }

    #[test]
    fn test_invalid_selector_quotes_input() {
        let err = ProbeError::InvalidSelector {
            selector: String::new(),
            message: "empty selector".into(),
        };
        assert!(err.to_string().contains("\"\""));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ProbeError = io.into();
        assert!(matches!(err, ProbeError::Io(_)));
    }
}
