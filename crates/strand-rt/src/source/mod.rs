// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Completion sources: the external things a suspended task waits on.
//!
//! Every source answers the same non-blocking readiness question and tells
//! the reactor how to wait for it (`Wakeup`). Sources are owned by the task
//! that awaits them and are only polled from the scheduler's poll step.

mod process;
mod socket;
mod timer;

pub use process::ProcessSource;
pub use socket::SocketSource;
pub(crate) use timer::deadline_after;
pub use timer::TimerSource;

use std::fmt;
use std::os::unix::io::RawFd;
use std::time::Instant;

use crate::error::ResourceError;

/// What kind of resource backs a source. Used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Process,
    Socket,
    Timer,
    Other,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceKind::Process => "process",
            SourceKind::Socket => "socket",
            SourceKind::Timer => "timer",
            SourceKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// I/O interest for descriptor-backed sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
    ReadWrite,
}

impl Interest {
    pub(crate) fn to_poll_events(self) -> libc::c_short {
        match self {
            Interest::Readable => libc::POLLIN,
            Interest::Writable => libc::POLLOUT,
            Interest::ReadWrite => libc::POLLIN | libc::POLLOUT,
        }
    }

    pub fn wants_read(self) -> bool {
        matches!(self, Interest::Readable | Interest::ReadWrite)
    }

    pub fn wants_write(self) -> bool {
        matches!(self, Interest::Writable | Interest::ReadWrite)
    }
}

/// Readiness flags reported by the multiplexer for one descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoReadiness {
    pub readable: bool,
    pub writable: bool,
    pub hangup: bool,
    pub error: bool,
    /// The descriptor was not open (`POLLNVAL`).
    pub invalid: bool,
}

impl IoReadiness {
    pub(crate) fn from_revents(revents: libc::c_short) -> Self {
        Self {
            readable: revents & libc::POLLIN != 0,
            writable: revents & libc::POLLOUT != 0,
            hangup: revents & libc::POLLHUP != 0,
            error: revents & libc::POLLERR != 0,
            invalid: revents & libc::POLLNVAL != 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// How the reactor should wait for a source before re-polling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// Wait for descriptor readiness.
    Fd { fd: RawFd, interest: Interest },
    /// Nothing can change before this instant.
    Deadline(Instant),
    /// No readiness signal available; re-query every tick.
    Tick,
    /// Already ready; do not sleep.
    Immediate,
}

/// Value delivered to a task when its source becomes ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Child process exited successfully.
    Exited { code: i32 },
    /// Descriptor became ready.
    Io(IoReadiness),
    /// Timer deadline passed.
    Elapsed,
    /// Generic readiness with no payload.
    Done,
}

/// Outcome of one non-blocking readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready(Completion),
    Errored(ResourceError),
}

impl Readiness {
    pub fn is_pending(&self) -> bool {
        matches!(self, Readiness::Pending)
    }
}

/// A resource whose readiness a task can suspend on.
///
/// `poll` must never block. `event` carries the multiplexer's report for
/// `Wakeup::Fd` sources and is `None` for every other wakeup kind (or when
/// the descriptor was not reported this cycle).
pub trait CompletionSource {
    fn kind(&self) -> SourceKind;

    /// Human-readable identity for logs and error messages.
    fn describe(&self) -> String;

    fn wakeup(&self) -> Wakeup;

    fn poll(&mut self, event: Option<IoReadiness>) -> Readiness;

    /// Give up on the underlying resource (cancellation, timeout).
    fn abandon(&mut self) {}
}

impl<S: CompletionSource + ?Sized> CompletionSource for Box<S> {
    fn kind(&self) -> SourceKind {
        (**self).kind()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn wakeup(&self) -> Wakeup {
        (**self).wakeup()
    }

    fn poll(&mut self, event: Option<IoReadiness>) -> Readiness {
        (**self).poll(event)
    }

    fn abandon(&mut self) {
        (**self).abandon()
    }
}

/// Source that is ready as soon as it is polled. Backs `TaskCx::yield_now`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadySource;

impl CompletionSource for ReadySource {
    fn kind(&self) -> SourceKind {
        SourceKind::Other
    }

    fn describe(&self) -> String {
        "yield".to_string()
    }

    fn wakeup(&self) -> Wakeup {
        Wakeup::Immediate
    }

    fn poll(&mut self, _event: Option<IoReadiness>) -> Readiness {
        Readiness::Ready(Completion::Done)
    }
}
