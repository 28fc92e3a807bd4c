//! Error types for Hive
//!
//! One enum for every layer. Pre-spawn failures, spawn failures, timeouts and
//! non-zero exits are distinct variants so callers can tell an enforced kill
//! apart from a normal completion.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Hive error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Pre-spawn validation
    // ========================================================================
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Working directory does not exist or is not a directory: {}", .0.display())]
    InvalidWorkingDir(PathBuf),

    #[error("No usable shell found: {0}")]
    ShellNotFound(String),

    // ========================================================================
    // Execution
    // ========================================================================
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{command}' (pid {pid}) timed out after {timeout_ms}ms and was killed")]
    Timeout {
        command: String,
        pid: u32,
        timeout_ms: u64,
    },

    #[error("Command '{command}' exited with code {exit_code}")]
    NonZeroExit {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Process not found: {0}")]
    ProcessNotFound(u32),

    #[error("Failed to signal process {pid}: {message}")]
    Signal { pid: u32, message: String },

    // ========================================================================
    // Sessions
    // ========================================================================
    #[error("Session error: {0}")]
    Session(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    // ========================================================================
    // Engine lifecycle
    // ========================================================================
    #[error("Engine has been destroyed")]
    Destroyed,

    // ========================================================================
    // External conversions
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Environment file error: {0}")]
    Env(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Rejected before anything was spawned (no registry entry exists)
    pub fn is_pre_spawn(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_) | Error::InvalidWorkingDir(_) | Error::ShellNotFound(_)
        )
    }

    /// The command was killed because it ran past its timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Spawn error helper
    pub fn spawn(command: impl Into<String>, source: std::io::Error) -> Self {
        Error::Spawn {
            command: command.into(),
            source,
        }
    }

    /// Signal error helper
    pub fn signal(pid: u32, message: impl Into<String>) -> Self {
        Error::Signal {
            pid,
            message: message.into(),
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::ShellNotFound("bash".into()).is_pre_spawn());
        assert!(Error::InvalidWorkingDir(PathBuf::from("/nope")).is_pre_spawn());
        assert!(!Error::Destroyed.is_pre_spawn());

        let timeout = Error::Timeout {
            command: "sleep 10".into(),
            pid: 42,
            timeout_ms: 200,
        };
        assert!(timeout.is_timeout());
        assert!(timeout.to_string().contains("200ms"));

        let exit = Error::NonZeroExit {
            command: "false".into(),
            exit_code: 1,
            stderr: String::new(),
        };
        assert!(!exit.is_timeout());
    }
}
