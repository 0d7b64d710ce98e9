//! Error taxonomy for the scan engine.
//!
//! Configuration and run-fatal errors abort a run before dispatch; transport,
//! evaluation, and script errors are recovered per task.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    /// Invalid input that makes a request or rule unusable. Fails the run
    /// when raised during validation, otherwise fails only the current task.
    #[error("configuration error: {0}")]
    Config(String),

    /// Network-level failure after the retry policy has been exhausted.
    #[error("transport error: {0}")]
    Transport(String),

    /// A rule could not be evaluated against a response.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// A script plugin failed to load or raised during its check.
    #[error("script error: {0}")]
    Script(String),

    /// Aborts the whole run before any task starts.
    #[error("{0}")]
    RunFatal(String),
}

impl From<crate::http::executor::TransportError> for ScanError {
    fn from(e: crate::http::executor::TransportError) -> Self {
        Self::Transport(e.0)
    }
}
