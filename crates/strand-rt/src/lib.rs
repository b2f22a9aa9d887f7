// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Strand runtime: a single-threaded cooperative task scheduler.
//!
//! Tasks are stackless coroutines that suspend on a completion source
//! (child process, socket descriptor, timer). The scheduler multiplexes
//! every outstanding source in one bounded `poll(2)` call per cycle and
//! resumes exactly the task that registered interest in each ready source.
//!
//! Components:
//! - `task`      Task state machine, `TaskCx` suspend points
//! - `handle`    `TaskHandle` for reading results and cancelling
//! - `source`    `CompletionSource` trait + Process/Socket/Timer sources
//! - `reactor`   readiness multiplexer
//! - `scheduler` submit, admission control, the poll/resume loop
//! - `cancel`    cooperative cancellation flag
//! - `config`    scheduler tuning, env overlay
//! - `error`     usage/resource/timeout error taxonomy

pub mod cancel;
pub mod config;
pub mod error;
pub mod handle;
pub mod reactor;
pub mod scheduler;
pub mod source;
pub mod task;

pub use cancel::CancelToken;
pub use config::SchedulerConfig;
pub use error::{Error, ResourceError, TaskError, UsageError};
pub use handle::TaskHandle;
pub use scheduler::{Finished, RunReport, Scheduler, SubmitOptions};
pub use source::{
    Completion, CompletionSource, Interest, IoReadiness, ProcessSource, ReadySource, Readiness,
    SocketSource, SourceKind, TimerSource, Wakeup,
};
pub use task::{Task, TaskCx, TaskId, TaskState};
