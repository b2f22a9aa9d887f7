// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task handle returned by `Scheduler::submit`.
//!
//! The scheduler drops a task's bookkeeping once it is terminal; the handle
//! keeps the outcome alive so callers can read it after `run_until_idle`.

use std::fmt;
use std::rc::Rc;

use crate::cancel::CancelToken;
use crate::error::{TaskError, UsageError};
use crate::task::{Shared, TaskId, TaskState};

/// Shared, read-mostly view of a submitted task.
pub struct TaskHandle<T> {
    shared: Rc<Shared<T>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(shared: Rc<Shared<T>>) -> Self {
        Self { shared }
    }

    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current state. Mid-run this is the only way to observe progress.
    pub fn state(&self) -> TaskState {
        self.shared.state.get()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// The task's result. Usage error before the task finished, or when it
    /// failed.
    pub fn result(&self) -> Result<&T, UsageError> {
        self.shared.result()
    }

    /// The task's terminal error. Usage error before the task finished, or
    /// when it completed.
    pub fn error(&self) -> Result<&TaskError, UsageError> {
        self.shared.error()
    }

    pub fn outcome(&self) -> Result<&Result<T, TaskError>, UsageError> {
        self.shared.outcome()
    }

    /// Request cooperative cancellation. A suspended task is failed with
    /// `TaskError::Cancelled` on the next poll cycle; a queued task never
    /// starts.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.shared.cancel.clone()
    }
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("state", &self.shared.state.get())
            .finish()
    }
}
