// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Reactor: readiness multiplexer over `poll(2)`.
//!
//! The poll set is rebuilt every cycle from the wakeups of the currently
//! suspended tasks, so there is no registration state to keep in sync.
//! One call covers every descriptor-backed source; the timeout is always
//! bounded.

use std::io;
use std::time::{Duration, Instant};

use crate::source::{IoReadiness, Wakeup};

/// Reusable poll buffers. Owned by the scheduler and only used from its
/// poll step.
#[derive(Debug, Default)]
pub struct Reactor {
    pollfds: Vec<libc::pollfd>,
    /// pollfds[i] belongs to wakeups[slots[i]].
    slots: Vec<usize>,
}

impl Reactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block up to `timeout` until any descriptor in `wakeups` is ready.
    ///
    /// Returns one entry per wakeup: `Some` for descriptor wakeups that
    /// reported events, `None` otherwise. Non-descriptor wakeups only shape
    /// the timeout (see [`bounded_timeout`]).
    pub fn wait(
        &mut self,
        wakeups: &[Wakeup],
        timeout: Duration,
    ) -> io::Result<Vec<Option<IoReadiness>>> {
        self.pollfds.clear();
        self.slots.clear();

        for (i, wakeup) in wakeups.iter().enumerate() {
            if let Wakeup::Fd { fd, interest } = *wakeup {
                self.pollfds.push(libc::pollfd {
                    fd,
                    events: interest.to_poll_events(),
                    revents: 0,
                });
                self.slots.push(i);
            }
        }

        let mut ready = vec![None; wakeups.len()];

        let n = unsafe {
            libc::poll(
                self.pollfds.as_mut_ptr(),
                self.pollfds.len() as libc::nfds_t,
                poll_timeout_ms(timeout),
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(ready); // EINTR: sources are re-polled anyway.
            }
            return Err(err);
        }

        for (pfd, &slot) in self.pollfds.iter().zip(&self.slots) {
            if pfd.revents != 0 {
                ready[slot] = Some(IoReadiness::from_revents(pfd.revents));
            }
        }

        Ok(ready)
    }
}

/// Timeout for one multiplexed wait: `max_wait`, shortened to the nearest
/// deadline, to `tick` when a source can only be re-queried, and to zero
/// when a source is already ready.
pub fn bounded_timeout(
    wakeups: &[Wakeup],
    deadlines: impl IntoIterator<Item = Instant>,
    now: Instant,
    max_wait: Duration,
    tick: Duration,
) -> Duration {
    let mut timeout = max_wait;
    for wakeup in wakeups {
        match *wakeup {
            Wakeup::Immediate => return Duration::ZERO,
            Wakeup::Tick => timeout = timeout.min(tick),
            Wakeup::Deadline(at) => timeout = timeout.min(at.saturating_duration_since(now)),
            Wakeup::Fd { .. } => {}
        }
    }
    for at in deadlines {
        timeout = timeout.min(at.saturating_duration_since(now));
    }
    timeout
}

/// Milliseconds for `poll(2)`, rounded up so sub-millisecond waits do not
/// become busy spins.
fn poll_timeout_ms(timeout: Duration) -> libc::c_int {
    let ms = timeout.as_micros().div_ceil(1000);
    ms.min(libc::c_int::MAX as u128) as libc::c_int
}
