// src/errors.rs

//! Crate-wide error types.
//!
//! - [`AspawnError`] is raised synchronously (bad arguments, a dead worker,
//!   config problems, failure to launch the worker program).
//! - [`CommandError`] is what a submitted command's continuation receives
//!   when the command did not succeed.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::RequestId;

#[derive(Error, Debug)]
pub enum AspawnError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("worker process is not running")]
    NotRunning,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("failed to launch worker program {program:?}: {source}")]
    WorkerSpawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("worker protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, AspawnError>;

/// Captured output of a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}

/// Terminal failure of a single submitted command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("child exited with status {code}")]
    Exited { code: i32, output: Output },

    #[error("child killed by signal {signal}")]
    Signaled { signal: String, output: Output },

    #[error("failed to launch command: {message}")]
    Launch { message: String, output: Output },

    #[error("unknown error")]
    Unknown { output: Output },

    #[error("worker process exited unexpectedly")]
    WorkerExited,

    #[error("worker process was destroyed")]
    WorkerDestroyed,

    #[error("worker process is not running")]
    NotRunning,

    #[error("worker supervisor has shut down")]
    SupervisorClosed,

    /// Another pending command already uses this id.
    #[error("duplicate request id {0}")]
    DuplicateId(RequestId),
}

impl CommandError {
    /// Whatever the command printed before failing, if it ran at all.
    pub fn output(&self) -> Option<&Output> {
        match self {
            Self::Exited { output, .. }
            | Self::Signaled { output, .. }
            | Self::Launch { output, .. }
            | Self::Unknown { output } => Some(output),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Exited { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn signal(&self) -> Option<&str> {
        match self {
            Self::Signaled { signal, .. } => Some(signal),
            _ => None,
        }
    }

    /// True for failures caused by the worker process going away rather
    /// than by the command itself.
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            Self::WorkerExited | Self::WorkerDestroyed | Self::NotRunning | Self::SupervisorClosed
        )
    }
}
