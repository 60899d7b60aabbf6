//! Error types for the end-to-end harness

use thiserror::Error;

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving the browser or preparing a run.
///
/// Referrer mismatches are not errors; they are collected as
/// [`crate::page::Mismatch`] values so every case of a suite still runs.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to launch the browser or open a tab
    #[error("Browser launch failed: {0}")]
    LaunchError(String),

    /// Failed to load a URL or follow a link
    #[error("Navigation failed: {0}")]
    NavigationError(String),

    /// Failed to execute JavaScript in the page
    #[error("Script execution failed: {0}")]
    ScriptError(String),

    /// A bounded wait expired
    #[error("Timed out after {ms}ms waiting for {what}")]
    Timeout { what: String, ms: u64 },

    /// Invalid harness configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Unreadable or incomplete extension manifest
    #[error("Invalid manifest: {0}")]
    ManifestError(String),

    /// Unreadable or invalid rule file
    #[error("Invalid rule file: {0}")]
    RulesError(String),

    /// Test server failure
    #[error("Test server error: {0}")]
    ServerError(String),

    /// An element the harness needs to interact with is missing
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// WebDriver-specific error
    #[cfg(feature = "webdriver")]
    #[error("WebDriver error: {0}")]
    WebDriverError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(feature = "webdriver")]
impl From<thirtyfour::error::WebDriverError> for Error {
    fn from(err: thirtyfour::error::WebDriverError) -> Self {
        Error::WebDriverError(err.to_string())
    }
}
