//! Error type definitions

use crate::utils::describe_duration;
use std::time::Duration;
use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Scratch directory and lock file errors
    #[error("File store error: {0}")]
    FileStore(#[from] atomic_file_store::FileStoreError),
}

impl AppError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Why a single rabbit run failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RabbitError {
    /// The worker process could not be started or waited on
    #[error("Rabbit could not be run: {detail}")]
    Execution { detail: String },

    /// The worker ran to completion but reported failure
    #[error("{}", describe_exit(.code, .stderr))]
    NonZeroExit { code: Option<i32>, stderr: String },

    /// The worker was still running when its time limit expired
    #[error("Rabbit timed out after {}", describe_duration(.limit))]
    TimedOut { limit: Duration },
}

impl RabbitError {
    pub fn execution<S: Into<String>>(detail: S) -> Self {
        Self::Execution {
            detail: detail.into(),
        }
    }
}

fn describe_exit(code: &Option<i32>, stderr: &str) -> String {
    let status = match code {
        Some(code) => format!("Rabbit exited with status {code}"),
        None => "Rabbit was terminated by a signal".to_string(),
    };

    if stderr.trim().is_empty() {
        status
    } else {
        format!("{status}\n{}", stderr.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        let err = RabbitError::TimedOut {
            limit: Duration::from_secs(300),
        };
        assert_eq!(err.to_string(), "Rabbit timed out after 5 minutes");
    }

    #[test]
    fn test_exit_message_includes_stderr_lines() {
        let err = RabbitError::NonZeroExit {
            code: Some(2),
            stderr: "Error: upstream returned 503\n    at fetch (wind.js:12)\n".to_string(),
        };
        let lines: Vec<String> = err.to_string().lines().map(str::to_string).collect();
        assert_eq!(
            lines,
            vec![
                "Rabbit exited with status 2",
                "Error: upstream returned 503",
                "    at fetch (wind.js:12)",
            ]
        );
    }

    #[test]
    fn test_signal_exit_without_stderr() {
        let err = RabbitError::NonZeroExit {
            code: None,
            stderr: "  \n".to_string(),
        };
        assert_eq!(err.to_string(), "Rabbit was terminated by a signal");
        assert!(matches!(err, RabbitError::NonZeroExit { .. }));
    }
}
