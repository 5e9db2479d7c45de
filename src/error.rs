use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors surfaced by agent construction and lifecycle calls.
///
/// Recording (`enter`, `exit`, `track`) never produces one of these; failures
/// on that path are logged and swallowed.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Configuration error for {parameter}: {message}")]
    Configuration {
        message: String,
        parameter: String,
    },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Monitoring is disabled in the agent configuration")]
    MonitoringDisabled,

    #[error("Agent already started")]
    AlreadyStarted,

    #[error("Agent must be started from within a tokio runtime")]
    NoRuntime,

    #[error("Final report cycle failed")]
    FinalReport(#[source] anyhow::Error),
}

impl AgentError {
    pub(crate) fn config(parameter: &str, message: impl Into<String>) -> Self {
        AgentError::Configuration {
            message: message.into(),
            parameter: parameter.to_string(),
        }
    }

    /// Whether retrying the same call later can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AgentError::NoRuntime | AgentError::Io { .. })
    }
}
