use std::path::PathBuf;

use thiserror::Error;

use crate::provider::ProviderError;

/// The only failure that crosses the `run_turn` boundary.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("model provider failed during round {round}: {source}")]
    Provider {
        round: usize,
        #[source]
        source: ProviderError,
    },
}

impl TurnError {
    #[must_use]
    pub fn provider(round: usize, source: ProviderError) -> Self {
        Self::Provider { round, source }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config JSON at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for environment variable {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

/// Tool failure recovered into a failed execution record.
#[derive(Debug, Error)]
pub enum ToolExecutionError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("{0}")]
    Failed(String),

    #[error("tool executor panicked while running {0}")]
    Panicked(String),
}

impl ToolExecutionError {
    #[must_use]
    pub fn invalid_arguments(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Failure reported by a telemetry client or model-IO logger. Always swallowed.
#[derive(Debug, Error)]
#[error("telemetry sink failure: {0}")]
pub struct TelemetryError(pub String);

impl From<std::io::Error> for TelemetryError {
    fn from(error: std::io::Error) -> Self {
        Self(error.to_string())
    }
}

impl From<serde_json::Error> for TelemetryError {
    fn from(error: serde_json::Error) -> Self {
        Self(error.to_string())
    }
}
