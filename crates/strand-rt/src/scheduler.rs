// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Single-threaded cooperative scheduler.
//!
//! Owns every submitted task. Tasks start eagerly on submit (subject to
//! the admission cap); `run_until_idle` then loops:
//!
//! 1. fail suspended tasks whose cancellation was requested
//! 2. collect the wakeup of every suspended task's source
//! 3. one bounded multiplexed wait over all of them
//! 4. in submission order: poll each source, resume ready tasks, fail
//!    tasks whose deadline passed
//! 5. retire terminal tasks and admit queued ones into the freed slots
//!
//! Exactly one task runs at any instant. A failing task never stops the
//! loop; its error is recorded in the run report and on its handle.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::config::SchedulerConfig;
use crate::error::{Error, TaskError};
use crate::handle::TaskHandle;
use crate::reactor::{bounded_timeout, Reactor};
use crate::source::{Readiness, Wakeup};
use crate::task::{Task, TaskCx, TaskId, TaskState};

/// Per-submission overrides.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub name: String,
    /// Overrides `SchedulerConfig::task_timeout` when set.
    pub timeout: Option<Duration>,
}

impl SubmitOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A task that reached a terminal state during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub id: TaskId,
    pub name: String,
    pub state: TaskState,
    pub error: Option<TaskError>,
}

/// Aggregate outcome of a run, in terminal order.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Multiplexed waits performed.
    pub poll_cycles: u64,
    /// Most tasks simultaneously running or suspended.
    pub peak_concurrency: usize,
    pub finished: Vec<Finished>,
}

impl RunReport {
    pub fn completed(&self) -> impl Iterator<Item = &Finished> {
        self.finished
            .iter()
            .filter(|f| f.state == TaskState::Completed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &Finished> {
        self.finished.iter().filter(|f| f.state == TaskState::Failed)
    }

    /// Task ids in the order they reached a terminal state.
    pub fn terminal_order(&self) -> Vec<TaskId> {
        self.finished.iter().map(|f| f.id).collect()
    }

    pub fn all_completed(&self) -> bool {
        self.failed().next().is_none()
    }
}

pub struct Scheduler<T> {
    config: SchedulerConfig,
    reactor: Reactor,
    next_id: u64,
    /// Started, non-terminal tasks. Always Suspended between cycles.
    live: BTreeMap<TaskId, Task<T>>,
    /// Submitted tasks waiting for an admission slot, in submission order.
    queue: VecDeque<Task<T>>,
    report: RunReport,
}

impl<T: 'static> Scheduler<T> {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            reactor: Reactor::new(),
            next_id: 1,
            live: BTreeMap::new(),
            queue: VecDeque::new(),
            report: RunReport::default(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Started tasks that have not finished.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Submitted tasks still waiting for admission.
    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.live.is_empty() && self.queue.is_empty()
    }

    /// Submit a task and start it immediately if an admission slot is free.
    pub fn submit<F, Fut>(&mut self, name: impl Into<String>, body: F) -> TaskHandle<T>
    where
        F: FnOnce(TaskCx) -> Fut + 'static,
        Fut: Future<Output = Result<T, TaskError>> + 'static,
    {
        self.submit_with(SubmitOptions::new(name), body)
    }

    pub fn submit_with<F, Fut>(&mut self, options: SubmitOptions, body: F) -> TaskHandle<T>
    where
        F: FnOnce(TaskCx) -> Fut + 'static,
        Fut: Future<Output = Result<T, TaskError>> + 'static,
    {
        let id = TaskId::new(self.next_id);
        self.next_id += 1;

        let timeout = options.timeout.or(self.config.task_timeout);
        let task = Task::new(id, options.name, body).with_timeout(timeout);
        let handle = TaskHandle::new(task.shared().clone());
        debug!(task = %id, name = %task.name(), "task submitted");

        if self.queue.is_empty() && self.has_capacity() {
            self.admit(task);
        } else {
            debug!(task = %id, queued = self.queue.len() + 1, "at capacity, task queued");
            self.queue.push_back(task);
        }
        handle
    }

    /// Drive every task to a terminal state.
    pub fn run_until_idle(&mut self) -> Result<RunReport, Error> {
        self.run(None)
    }

    /// Run until at least `n` tasks have finished since the last report was
    /// returned, or until idle. Lets callers top up a batch as slots free.
    pub fn run_until_completions(&mut self, n: usize) -> Result<RunReport, Error> {
        self.run(Some(n))
    }

    fn run(&mut self, target: Option<usize>) -> Result<RunReport, Error> {
        loop {
            self.fill_slots();
            if self.live.is_empty() {
                break;
            }
            if target.is_some_and(|n| self.report.finished.len() >= n) {
                break;
            }
            self.poll_cycle()?;
        }
        let report = std::mem::take(&mut self.report);
        debug!(
            cycles = report.poll_cycles,
            finished = report.finished.len(),
            failed = report.failed().count(),
            "run finished"
        );
        Ok(report)
    }

    fn poll_cycle(&mut self) -> Result<(), Error> {
        self.sweep_cancelled();
        self.fill_slots();
        if self.live.is_empty() {
            return Ok(());
        }

        self.report.poll_cycles += 1;
        let now = Instant::now();

        let mut ids = Vec::with_capacity(self.live.len());
        let mut wakeups = Vec::with_capacity(self.live.len());
        let mut deadlines = Vec::new();
        for (id, task) in &self.live {
            ids.push(*id);
            wakeups.push(
                task.waiting_on()
                    .map(|source| source.wakeup())
                    .unwrap_or(Wakeup::Immediate),
            );
            deadlines.extend(task.deadline());
        }

        let timeout = bounded_timeout(
            &wakeups,
            deadlines,
            now,
            self.config.max_poll_wait,
            self.config.tick,
        );
        trace!(
            cycle = self.report.poll_cycles,
            tasks = ids.len(),
            ?timeout,
            "waiting on completion sources"
        );
        let events = self.reactor.wait(&wakeups, timeout)?;

        for (id, event) in ids.into_iter().zip(events) {
            let Some(task) = self.live.get_mut(&id) else {
                continue;
            };
            let Some(wait) = task.wait_mut() else {
                continue;
            };

            let state = match wait.source.poll(event) {
                Readiness::Ready(completion) => {
                    trace!(task = %id, ?completion, "source ready");
                    task.resume(Ok(completion))?
                }
                Readiness::Errored(e) => {
                    debug!(task = %id, error = %e, "source failed");
                    task.resume(Err(e.into()))?
                }
                Readiness::Pending => {
                    let waited = wait.since.elapsed();
                    let awaiting = wait.source.describe();
                    if task.cancel_token().is_cancelled() {
                        task.fail(TaskError::Cancelled)?
                    } else if task.deadline().is_some_and(|at| Instant::now() >= at) {
                        task.fail(TaskError::Timeout { waited, awaiting })?
                    } else {
                        continue;
                    }
                }
            };

            if state.is_terminal() {
                if let Some(task) = self.live.remove(&id) {
                    self.retire(task);
                }
                self.fill_slots();
            }
        }

        Ok(())
    }

    /// Fail suspended tasks whose cancel flag is set.
    fn sweep_cancelled(&mut self) {
        let cancelled: Vec<TaskId> = self
            .live
            .iter()
            .filter(|(_, task)| task.cancel_token().is_cancelled())
            .map(|(id, _)| *id)
            .collect();
        for id in cancelled {
            if let Some(mut task) = self.live.remove(&id) {
                if let Err(e) = task.fail(TaskError::Cancelled) {
                    warn!(task = %id, error = %e, "could not cancel task");
                }
                self.retire(task);
            }
        }
    }

    fn has_capacity(&self) -> bool {
        match self.config.max_concurrent {
            Some(cap) => self.live.len() < cap.get(),
            None => true,
        }
    }

    fn fill_slots(&mut self) {
        while self.has_capacity() {
            let Some(task) = self.queue.pop_front() else {
                break;
            };
            self.admit(task);
        }
    }

    /// Start a Created task in a free slot.
    fn admit(&mut self, mut task: Task<T>) {
        let id = task.id();
        if task.cancel_token().is_cancelled() {
            if let Err(e) = task.fail(TaskError::Cancelled) {
                warn!(task = %id, error = %e, "could not cancel queued task");
            }
            self.retire(task);
            return;
        }

        self.report.peak_concurrency = self.report.peak_concurrency.max(self.live.len() + 1);
        if let Err(e) = task.start() {
            warn!(task = %id, error = %e, "task could not be started");
        }

        if task.state() == TaskState::Suspended {
            self.live.insert(id, task);
        } else {
            self.retire(task);
        }
    }

    fn retire(&mut self, task: Task<T>) {
        let error = task.error().ok().cloned();
        if let Some(e) = &error {
            warn!(task = %task.id(), name = %task.name(), error = %e, "task failed");
        }
        self.report.finished.push(Finished {
            id: task.id(),
            name: task.name().to_string(),
            state: task.state(),
            error,
        });
    }
}

impl<T: 'static> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}
