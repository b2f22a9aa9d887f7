// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Deadline source. Backs `TaskCx::sleep`.

use std::time::{Duration, Instant};

use super::{Completion, CompletionSource, IoReadiness, Readiness, SourceKind, Wakeup};

#[derive(Debug, Clone, Copy)]
pub struct TimerSource {
    deadline: Instant,
}

impl TimerSource {
    pub fn at(deadline: Instant) -> Self {
        Self { deadline }
    }

    /// Ready `duration` from now. Durations past the clock's range clamp
    /// to the farthest representable instant.
    pub fn after(duration: Duration) -> Self {
        Self::at(deadline_after(Instant::now(), duration))
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl CompletionSource for TimerSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Timer
    }

    fn describe(&self) -> String {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        format!("timer ({:?} remaining)", remaining)
    }

    fn wakeup(&self) -> Wakeup {
        Wakeup::Deadline(self.deadline)
    }

    fn poll(&mut self, _event: Option<IoReadiness>) -> Readiness {
        if Instant::now() >= self.deadline {
            Readiness::Ready(Completion::Elapsed)
        } else {
            Readiness::Pending
        }
    }
}

/// `now + duration`, clamped to the latest instant the clock can represent.
pub(crate) fn deadline_after(now: Instant, duration: Duration) -> Instant {
    let mut step = duration;
    loop {
        if let Some(at) = now.checked_add(step) {
            return at;
        }
        step /= 2;
    }
}
