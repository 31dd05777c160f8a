// src/protocol.rs

//! Wire protocol between the supervisor and the worker process.
//!
//! Messages are JSON-serialized, tagged with a `type` field and
//! newline-delimited. Requests flow over the worker's stdin, messages come
//! back over its stdout.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::{CommandError, Output};
use crate::types::RequestId;

/// A single external-program invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub id: RequestId,
    /// Program followed by its arguments. Never empty.
    pub argv: Vec<String>,
    /// Complete environment for the program.
    pub env: BTreeMap<String, String>,
}

/// Request from supervisor to worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Run a command and report its result.
    #[serde(rename = "exec")]
    Exec(Command),
}

/// Result of one command, as reported by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: RequestId,
    pub stdout: String,
    pub stderr: String,
    /// Exit code, when the command exited normally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    /// Terminating signal name, when the command was killed by one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    /// Why the command could not be launched at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Message from worker to supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerMessage {
    /// Worker started and is reading requests.
    #[serde(rename = "ready")]
    Ready { pid: u32 },

    /// A command finished.
    #[serde(rename = "result")]
    Completed(Response),
}

/// A line from the worker that does not match the message schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed worker message ({reason}): {line}")]
pub struct MalformedMessage {
    pub line: String,
    pub reason: String,
}

impl Request {
    pub fn exec(command: Command) -> Self {
        Self::Exec(command)
    }

    pub fn id(&self) -> RequestId {
        match self {
            Self::Exec(command) => command.id,
        }
    }

    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from JSON line.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

impl Response {
    /// Response for a command that could not be launched.
    pub fn launch_failed(id: RequestId, message: impl Into<String>) -> Self {
        Self {
            id,
            stdout: String::new(),
            stderr: String::new(),
            code: None,
            signal: None,
            error: Some(message.into()),
        }
    }

    /// Classify the response into the outcome delivered to the caller.
    ///
    /// Exactly one of: success (code 0), non-zero exit code, signal,
    /// launch failure, or an unclassified error.
    pub fn into_outcome(self) -> Result<Output, CommandError> {
        let output = Output::new(self.stdout, self.stderr);
        match (self.code, self.signal, self.error) {
            (Some(0), _, _) => Ok(output),
            (Some(code), _, _) => Err(CommandError::Exited { code, output }),
            (None, Some(signal), _) => Err(CommandError::Signaled { signal, output }),
            (None, None, Some(message)) => Err(CommandError::Launch { message, output }),
            (None, None, None) => Err(CommandError::Unknown { output }),
        }
    }
}

impl WorkerMessage {
    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Parse a line read from the worker.
    pub fn from_line(line: &str) -> Result<Self, MalformedMessage> {
        serde_json::from_str(line.trim()).map_err(|e| MalformedMessage {
            line: line.trim_end().to_string(),
            reason: e.to_string(),
        })
    }
}
