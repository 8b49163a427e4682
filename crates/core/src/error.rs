//! Error types for the TaskPilot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the engine decides which
//! of them are absorbed into the step log and which end a task.

use thiserror::Error;

/// The top-level error type for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Step error: {0}")]
    Step(#[from] StepError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures talking to the reasoning oracle.
#[derive(Debug, Clone, Error)]
pub enum OracleError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by oracle, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Oracle not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures reported by a capability service or its transport.
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("Capability transport error: {0}")]
    Transport(String),

    #[error("Capability protocol error {code}: {message}")]
    Protocol { code: i64, message: String },

    #[error("Tool {tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("Malformed capability response: {0}")]
    Malformed(String),
}

/// A service connection could not be obtained. Ends the task.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("No credentials stored for user {user} on service {service}")]
    CredentialsMissing { user: String, service: String },

    #[error("Credentials for user {user} on service {service} are not verified")]
    CredentialsUnverified { user: String, service: String },

    #[error("Unknown capability service: {0}")]
    UnknownService(String),

    #[error("Failed to connect to {service}: {reason}")]
    EstablishFailed { service: String, reason: String },
}

/// A single step failed. Recorded in the step log; the loop continues.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    #[error("No tool in the {service} catalog matches '{requested}'")]
    ToolResolution { service: String, requested: String },

    #[error("Unknown capability service: {0}")]
    UnknownService(String),

    #[error("Tool invocation failed: {0}")]
    Invocation(String),

    #[error("Reasoning failed: {0}")]
    Reasoning(#[from] OracleError),
}

impl From<CapabilityError> for StepError {
    fn from(err: CapabilityError) -> Self {
        StepError::Invocation(err.to_string())
    }
}

/// Oracle output that could not be decoded. Always recovered locally.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("Could not parse plan: {0}")]
    Plan(String),

    #[error("Could not parse task decomposition: {0}")]
    Decomposition(String),

    #[error("Could not parse observation: {0}")]
    Observation(String),
}

/// Persistence or progress sinks rejected a write.
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    #[error("Progress consumer disconnected")]
    Disconnected,

    #[error("Persistence failed: {0}")]
    Persistence(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oracle_error_displays_correctly() {
        let err = Error::Oracle(OracleError::ApiError {
            status_code: 503,
            message: "Service unavailable".into(),
        });
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("Service unavailable"));
    }

    #[test]
    fn resolution_error_names_service_and_tool() {
        let err = StepError::ToolResolution {
            service: "slack".into(),
            requested: "sendMessage".into(),
        };
        assert!(err.to_string().contains("slack"));
        assert!(err.to_string().contains("sendMessage"));
    }

    #[test]
    fn capability_error_becomes_invocation_error() {
        let err: StepError = CapabilityError::ToolFailed {
            tool: "post".into(),
            message: "401 Unauthorized".into(),
        }
        .into();
        assert!(matches!(err, StepError::Invocation(ref m) if m.contains("401")));
    }
}
