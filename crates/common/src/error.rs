//! Error types for harness orchestration

use thiserror::Error;

/// Result type alias using the harness Error
pub type Result<T> = std::result::Result<T, Error>;

/// Orchestration error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with code {exit_code}\n{output}")]
    ToolFailed {
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("{what} did not succeed after {attempts} attempt(s)")]
    Exhausted { what: String, attempts: u32 },
}
