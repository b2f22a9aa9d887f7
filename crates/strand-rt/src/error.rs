// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Error taxonomy.
//!
//! `UsageError` is a caller bug (invalid state transition). `ResourceError`
//! is an underlying completion source failing. `TaskError` is what a task
//! terminates with; `Error` is what scheduler operations themselves return.

use std::os::unix::io::RawFd;
use std::time::Duration;

use thiserror::Error;

use crate::task::{TaskId, TaskState};

/// Invalid state transition or misuse of the task API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("task {id} cannot be resumed while {state}: only suspended tasks resume")]
    NotSuspended { id: TaskId, state: TaskState },
    #[error("task {id} cannot be started while {state}")]
    AlreadyStarted { id: TaskId, state: TaskState },
    #[error("task {id} cannot be failed while {state}")]
    CannotFail { id: TaskId, state: TaskState },
    #[error("task {id} has not finished yet ({state})")]
    NotTerminal { id: TaskId, state: TaskState },
    #[error("task {id} failed and has no result")]
    NoResult { id: TaskId },
    #[error("task {id} completed and has no error")]
    NoError { id: TaskId },
    #[error("task {id} suspended without registering a completion source")]
    SuspendedWithoutSource { id: TaskId },
    #[error("task {id} tried to await a second source while awaiting {awaiting}")]
    AlreadyAwaiting { id: TaskId, awaiting: String },
}

/// A completion source reported failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("failed to launch `{command}`: {message}")]
    Spawn { command: String, message: String },
    #[error("`{command}` {}", exit_detail(.code))]
    ProcessExit { command: String, code: Option<i32> },
    #[error("failed to query `{command}`: {message}")]
    ProcessQuery { command: String, message: String },
    #[error("descriptor {fd}: {message}")]
    Socket { fd: RawFd, message: String },
    #[error("{0}")]
    Other(String),
}

fn exit_detail(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exited with status {}", c),
        None => "was terminated by a signal".to_string(),
    }
}

/// Terminal error of a task. Cloneable so it can be read any number of times.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("timed out after {waited:?} waiting on {awaiting}")]
    Timeout { waited: Duration, awaiting: String },
    #[error("task was cancelled")]
    Cancelled,
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Failed(String),
}

impl TaskError {
    /// Application-level failure returned from a task body.
    pub fn failed(msg: impl Into<String>) -> Self {
        TaskError::Failed(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }

    pub fn resource(&self) -> Option<&ResourceError> {
        match self {
            TaskError::Resource(e) => Some(e),
            _ => None,
        }
    }
}

/// Error returned by scheduler operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error("readiness multiplexer failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid {var}={value:?}: {reason}")]
    Config {
        var: String,
        value: String,
        reason: String,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
