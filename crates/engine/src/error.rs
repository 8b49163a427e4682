//! Task-level errors. Everything else is absorbed into the step log.

use taskpilot_core::error::{ConnectionError, StepError};
use thiserror::Error;

use crate::emitter::EmitterError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Connection failed: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Aborted after {count} consecutive failed steps; last error: {last_error}")]
    ConsecutiveFailures { count: usize, last_error: String },

    #[error("Progress stream out of order: {0}")]
    Emitter(#[from] EmitterError),

    #[error(transparent)]
    State(#[from] taskpilot_core::Error),
}

/// Outcome of executing one plan.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The step failed; record it and keep going.
    #[error(transparent)]
    Step(#[from] StepError),

    /// No connection to the service could be obtained; the task ends.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Emitter(#[from] EmitterError),
}
