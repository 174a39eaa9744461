//! Error types for template E2E testing

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    /// Stale template registrations or a broken package build; aborts the run
    #[error("Setup failed: {0}")]
    Setup(String),

    #[error(transparent)]
    Process(#[from] harness_common::Error),

    #[error("Driver failed to start: {0}")]
    DriverStartup(String),

    #[error("Driver health check failed after {0} attempts")]
    DriverHealthCheck(u32),

    #[error("Application failed to start: {0}")]
    AppStartup(String),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Generated files differ from baseline (missing: {missing:?}, unexpected: {unexpected:?})")]
    BaselineMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("WebDriver error: {0}")]
    WebDriver(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;

/// Fail with [`E2eError::AssertionFailed`] unless `condition` holds
pub(crate) fn ensure(condition: bool, message: impl FnOnce() -> String) -> E2eResult<()> {
    if condition {
        Ok(())
    } else {
        Err(E2eError::AssertionFailed(message()))
    }
}
