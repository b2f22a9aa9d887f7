// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task representation and suspend points.
//!
//! A task is a stackless coroutine: its execution point and locals live in
//! a boxed future. The task body receives an explicit `TaskCx` and suspends
//! by awaiting `cx.suspend(source)`, which parks the source in the task's
//! mailbox and returns `Pending`. The driver (`start`/`resume`) moves the
//! parked source into the task and marks it Suspended. Resuming delivers
//! the source's outcome as the value of that same await.
//!
//! Every poll that returns `Pending` must have parked exactly one source;
//! anything else fails the task immediately.

use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::cancel::CancelToken;
use crate::error::{TaskError, UsageError};
use crate::source::{deadline_after, Completion, CompletionSource, ReadySource, TimerSource};

/// Opaque task identity. Ids increase in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Submitted, not yet started (possibly queued for admission).
    Created,
    /// Currently executing its body.
    Running,
    /// Parked on exactly one completion source.
    Suspended,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Created => "created",
            TaskState::Running => "running",
            TaskState::Suspended => "suspended",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        };
        f.write_str(s)
    }
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, TaskError>>>>;
type BoxBody<T> = Box<dyn FnOnce(TaskCx) -> BoxFuture<T>>;

/// An outstanding await: the source and its optional per-await deadline.
pub(crate) struct Wait {
    pub source: Box<dyn CompletionSource>,
    pub deadline: Option<Instant>,
    pub since: Instant,
}

impl fmt::Debug for Wait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wait")
            .field("source", &self.source.describe())
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// State shared between a task and its handles.
pub(crate) struct Shared<T> {
    pub id: TaskId,
    pub name: String,
    pub state: Cell<TaskState>,
    pub outcome: OnceCell<Result<T, TaskError>>,
    pub cancel: CancelToken,
}

impl<T> Shared<T> {
    pub fn outcome(&self) -> Result<&Result<T, TaskError>, UsageError> {
        self.outcome.get().ok_or(UsageError::NotTerminal {
            id: self.id,
            state: self.state.get(),
        })
    }

    pub fn result(&self) -> Result<&T, UsageError> {
        match self.outcome()? {
            Ok(value) => Ok(value),
            Err(_) => Err(UsageError::NoResult { id: self.id }),
        }
    }

    pub fn error(&self) -> Result<&TaskError, UsageError> {
        match self.outcome()? {
            Err(e) => Ok(e),
            Ok(_) => Err(UsageError::NoError { id: self.id }),
        }
    }
}

/// Hand-off slot between suspend points and the task driver.
#[derive(Default)]
struct Mailbox {
    registered: Option<Wait>,
    delivered: Option<Result<Completion, TaskError>>,
    violation: Option<UsageError>,
}

/// Explicit handle to the running task, passed into the task body.
#[derive(Clone)]
pub struct TaskCx {
    id: TaskId,
    mailbox: Rc<RefCell<Mailbox>>,
    cancel: CancelToken,
}

impl TaskCx {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Suspend until `source` is ready. Resolves to the source's completion,
    /// or to the error it reported.
    pub fn suspend<S>(&self, source: S) -> Suspend<'_>
    where
        S: CompletionSource + 'static,
    {
        Suspend::new(self, Box::new(source), None)
    }

    /// Like `suspend`, failing the task with a timeout if `source` is not
    /// ready by `deadline`.
    pub fn suspend_until<S>(&self, source: S, deadline: Instant) -> Suspend<'_>
    where
        S: CompletionSource + 'static,
    {
        Suspend::new(self, Box::new(source), Some(deadline))
    }

    pub fn suspend_for<S>(&self, source: S, timeout: Duration) -> Suspend<'_>
    where
        S: CompletionSource + 'static,
    {
        self.suspend_until(source, deadline_after(Instant::now(), timeout))
    }

    pub async fn sleep(&self, duration: Duration) -> Result<(), TaskError> {
        self.suspend(TimerSource::after(duration)).await.map(|_| ())
    }

    /// Hand control back to the scheduler for one cycle.
    pub async fn yield_now(&self) -> Result<(), TaskError> {
        self.suspend(ReadySource).await.map(|_| ())
    }
}

impl fmt::Debug for TaskCx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCx").field("id", &self.id).finish()
    }
}

enum SuspendState {
    Start(Box<dyn CompletionSource>, Option<Instant>),
    Waiting,
    Done,
}

/// Future returned by [`TaskCx::suspend`].
#[must_use = "a suspend point does nothing unless awaited"]
pub struct Suspend<'a> {
    cx: &'a TaskCx,
    state: SuspendState,
}

impl<'a> Suspend<'a> {
    fn new(cx: &'a TaskCx, source: Box<dyn CompletionSource>, deadline: Option<Instant>) -> Self {
        Self {
            cx,
            state: SuspendState::Start(source, deadline),
        }
    }
}

impl Future for Suspend<'_> {
    type Output = Result<Completion, TaskError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match std::mem::replace(&mut this.state, SuspendState::Done) {
            SuspendState::Start(mut source, deadline) => {
                if this.cx.is_cancelled() {
                    source.abandon();
                    return Poll::Ready(Err(TaskError::Cancelled));
                }
                let mut mailbox = this.cx.mailbox.borrow_mut();
                let existing = mailbox.registered.as_ref().map(|w| w.source.describe());
                if let Some(awaiting) = existing {
                    mailbox.violation = Some(UsageError::AlreadyAwaiting {
                        id: this.cx.id,
                        awaiting,
                    });
                    source.abandon();
                    return Poll::Pending;
                }
                mailbox.registered = Some(Wait {
                    source,
                    deadline,
                    since: Instant::now(),
                });
                this.state = SuspendState::Waiting;
                Poll::Pending
            }
            SuspendState::Waiting => match this.cx.mailbox.borrow_mut().delivered.take() {
                Some(outcome) => Poll::Ready(outcome),
                None => {
                    // Polled without a resume; the driver fails the task.
                    this.state = SuspendState::Waiting;
                    Poll::Pending
                }
            },
            SuspendState::Done => panic!("suspend point polled after completion"),
        }
    }
}

enum Body<T> {
    NotStarted(BoxBody<T>),
    Running(BoxFuture<T>),
    Finished,
}

/// A suspendable unit of work.
///
/// Normally owned by a [`Scheduler`](crate::Scheduler); it can also be
/// driven by hand with `start`/`resume`/`fail`.
pub struct Task<T> {
    shared: Rc<Shared<T>>,
    mailbox: Rc<RefCell<Mailbox>>,
    body: Body<T>,
    wait: Option<Wait>,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl<T: 'static> Task<T> {
    pub fn new<F, Fut>(id: TaskId, name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(TaskCx) -> Fut + 'static,
        Fut: Future<Output = Result<T, TaskError>> + 'static,
    {
        let body: BoxBody<T> = Box::new(move |cx| -> BoxFuture<T> { Box::pin(body(cx)) });
        Self {
            shared: Rc::new(Shared {
                id,
                name: name.into(),
                state: Cell::new(TaskState::Created),
                outcome: OnceCell::new(),
                cancel: CancelToken::new(),
            }),
            mailbox: Rc::new(RefCell::new(Mailbox::default())),
            body: Body::NotStarted(body),
            wait: None,
            timeout: None,
            deadline: None,
        }
    }

    /// Per-task deadline, measured from `start()`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> TaskState {
        self.shared.state.get()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.shared.cancel.clone()
    }

    pub fn result(&self) -> Result<&T, UsageError> {
        self.shared.result()
    }

    pub fn error(&self) -> Result<&TaskError, UsageError> {
        self.shared.error()
    }

    pub fn outcome(&self) -> Result<&Result<T, TaskError>, UsageError> {
        self.shared.outcome()
    }

    /// The source this task is suspended on, if any.
    pub fn waiting_on(&self) -> Option<&dyn CompletionSource> {
        self.wait.as_ref().map(|w| &*w.source)
    }

    /// Earliest of the per-await and per-task deadlines.
    pub fn deadline(&self) -> Option<Instant> {
        let await_deadline = self.wait.as_ref().and_then(|w| w.deadline);
        match (await_deadline, self.deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub(crate) fn shared(&self) -> &Rc<Shared<T>> {
        &self.shared
    }

    pub(crate) fn wait_mut(&mut self) -> Option<&mut Wait> {
        self.wait.as_mut()
    }

    /// Created → Running, then run the body to its first suspend point or
    /// to the end.
    pub fn start(&mut self) -> Result<TaskState, UsageError> {
        let state = self.state();
        if state != TaskState::Created {
            return Err(UsageError::AlreadyStarted {
                id: self.id(),
                state,
            });
        }
        let Body::NotStarted(body) = std::mem::replace(&mut self.body, Body::Finished) else {
            return Err(UsageError::AlreadyStarted {
                id: self.id(),
                state,
            });
        };

        self.deadline = self.timeout.map(|t| deadline_after(Instant::now(), t));
        self.set_state(TaskState::Running);
        debug!(task = %self.id(), name = %self.name(), "task started");

        let cx = TaskCx {
            id: self.id(),
            mailbox: self.mailbox.clone(),
            cancel: self.shared.cancel.clone(),
        };
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || body(cx))) {
            Ok(future) => self.body = Body::Running(future),
            Err(payload) => {
                self.finish(Err(TaskError::Panicked(panic_message(payload))));
                return Ok(self.state());
            }
        }

        Ok(self.step())
    }

    /// Suspended → Running, delivering `outcome` to the pending suspend
    /// point and continuing from there.
    pub fn resume(
        &mut self,
        outcome: Result<Completion, TaskError>,
    ) -> Result<TaskState, UsageError> {
        let state = self.state();
        if state != TaskState::Suspended {
            return Err(UsageError::NotSuspended {
                id: self.id(),
                state,
            });
        }

        self.wait = None;
        self.mailbox.borrow_mut().delivered = Some(outcome);
        self.set_state(TaskState::Running);
        trace!(task = %self.id(), "task resumed");

        Ok(self.step())
    }

    /// Force the task into Failed (timeout, cancellation). Abandons the
    /// awaited source and drops the body.
    pub fn fail(&mut self, error: TaskError) -> Result<TaskState, UsageError> {
        let state = self.state();
        if !matches!(state, TaskState::Created | TaskState::Suspended) {
            return Err(UsageError::CannotFail {
                id: self.id(),
                state,
            });
        }
        if let Some(mut wait) = self.wait.take() {
            wait.source.abandon();
        }
        self.body = Body::Finished;
        self.finish(Err(error));
        Ok(self.state())
    }

    /// Poll the body once and classify the result.
    fn step(&mut self) -> TaskState {
        let Body::Running(future) = &mut self.body else {
            return self.state();
        };

        // Resumption is driven by source readiness, never by wakeups.
        let mut cx = Context::from_waker(Waker::noop());
        let polled =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));

        match polled {
            Ok(Poll::Ready(outcome)) => {
                self.body = Body::Finished;
                self.finish(outcome);
            }
            Ok(Poll::Pending) => {
                let (registered, violation) = {
                    let mut mailbox = self.mailbox.borrow_mut();
                    (mailbox.registered.take(), mailbox.violation.take())
                };
                match (registered, violation) {
                    (registered, Some(violation)) => {
                        if let Some(mut wait) = registered {
                            wait.source.abandon();
                        }
                        self.body = Body::Finished;
                        self.finish(Err(violation.into()));
                    }
                    (Some(wait), None) => {
                        debug!(
                            task = %self.id(),
                            kind = %wait.source.kind(),
                            source = %wait.source.describe(),
                            "task suspended"
                        );
                        self.wait = Some(wait);
                        self.set_state(TaskState::Suspended);
                    }
                    (None, None) => {
                        self.body = Body::Finished;
                        self.finish(Err(UsageError::SuspendedWithoutSource { id: self.id() }.into()));
                    }
                }
            }
            Err(payload) => {
                self.body = Body::Finished;
                self.finish(Err(TaskError::Panicked(panic_message(payload))));
            }
        }

        self.state()
    }

    fn finish(&mut self, outcome: Result<T, TaskError>) {
        let state = if outcome.is_ok() {
            TaskState::Completed
        } else {
            TaskState::Failed
        };
        if let Err(e) = &outcome {
            debug!(task = %self.id(), error = %e, "task failed");
        } else {
            debug!(task = %self.id(), "task completed");
        }
        self.mailbox.borrow_mut().delivered = None;
        // First terminal outcome wins; results are immutable afterwards.
        let _ = self.shared.outcome.set(outcome);
        self.set_state(state);
    }

    fn set_state(&self, state: TaskState) {
        self.shared.state.set(state);
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("state", &self.shared.state.get())
            .field("wait", &self.wait)
            .finish()
    }
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
