//! Error types for health-check runs.
//!
//! Fatal errors (`ConfigError`, `ConnectionError`) abort a run and surface
//! through [`HealthError`]. `CommandError` and `PersistenceError` are never
//! propagated out of a sweep; they are recorded as data instead.

use std::path::PathBuf;

use thiserror::Error;

/// Missing or malformed configuration. Raised before any connection attempt.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config field '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("Failed to read {label} from terminal: {source}")]
    Prompt {
        label: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Failure to establish (or elevate) the device session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Timeout connecting to {host}")]
    Timeout { host: String },

    #[error("Authentication failed for {host}")]
    AuthFailure { host: String },

    #[error("Error connecting to {host}: {reason}")]
    Other { host: String, reason: String },
}

impl ConnectionError {
    pub fn host(&self) -> &str {
        match self {
            ConnectionError::Timeout { host }
            | ConnectionError::AuthFailure { host }
            | ConnectionError::Other { host, .. } => host,
        }
    }
}

/// Failure of a single command on an open session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Timed out after {timeout_ms}ms waiting for output of '{command}'")]
    Timeout { command: String, timeout_ms: u64 },

    #[error("Session closed while executing '{command}'")]
    SessionClosed { command: String },

    #[error("Transport error executing '{command}': {reason}")]
    Transport { command: String, reason: String },
}

/// Failure to persist a run result.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize run result: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Result file already exists: {0}")]
    AlreadyExists(PathBuf),
}

/// Errors that end a run early.
#[derive(Error, Debug)]
pub enum HealthError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Result type for run-level operations.
pub type Result<T> = std::result::Result<T, HealthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_host() {
        let err = ConnectionError::AuthFailure {
            host: "10.0.0.1".to_string(),
        };
        assert_eq!(err.host(), "10.0.0.1");
        assert_eq!(err.to_string(), "Authentication failed for 10.0.0.1");
    }

    #[test]
    fn test_health_error_wraps_connection() {
        let err: HealthError = ConnectionError::Timeout {
            host: "sw1".to_string(),
        }
        .into();
        assert!(matches!(err, HealthError::Connection(ConnectionError::Timeout { .. })));
        assert_eq!(err.to_string(), "Timeout connecting to sw1");
    }

    #[test]
    fn test_command_error_message_names_command() {
        let err = CommandError::Timeout {
            command: "show version".to_string(),
            timeout_ms: 30_000,
        };
        assert!(err.to_string().contains("show version"));
        assert!(err.to_string().contains("30000ms"));
    }
}
