// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Scheduler behaviour end to end: liveness, ordering, failure isolation,
//! admission control.

use std::cell::RefCell;
use std::rc::Rc;

use strand_rt::{
    Completion, CompletionSource, IoReadiness, Readiness, ResourceError, Scheduler,
    SchedulerConfig, SourceKind, TaskError, TaskState, Wakeup,
};

/// Ready on its `n`th poll; optionally fails instead.
struct Countdown {
    left: u32,
    fail_with: Option<i32>,
}

impl Countdown {
    fn ready_after(polls: u32) -> Self {
        Self {
            left: polls,
            fail_with: None,
        }
    }

    fn fail_after(polls: u32, code: i32) -> Self {
        Self {
            left: polls,
            fail_with: Some(code),
        }
    }
}

impl CompletionSource for Countdown {
    fn kind(&self) -> SourceKind {
        SourceKind::Other
    }

    fn describe(&self) -> String {
        format!("countdown({})", self.left)
    }

    fn wakeup(&self) -> Wakeup {
        Wakeup::Tick
    }

    fn poll(&mut self, _event: Option<IoReadiness>) -> Readiness {
        self.left = self.left.saturating_sub(1);
        if self.left > 0 {
            return Readiness::Pending;
        }
        match self.fail_with {
            Some(code) => Readiness::Errored(ResourceError::ProcessExit {
                command: "convert".to_string(),
                code: Some(code),
            }),
            None => Readiness::Ready(Completion::Done),
        }
    }
}

#[test]
fn staggered_sources_finish_in_order() {
    let mut sched = Scheduler::new(SchedulerConfig::default());
    let handles: Vec<_> = (1..=3u32)
        .map(|n| {
            sched.submit(format!("task{}", n), move |cx| async move {
                cx.suspend(Countdown::ready_after(n)).await?;
                Ok(n)
            })
        })
        .collect();

    let report = sched.run_until_idle().unwrap();

    let ids: Vec<_> = handles.iter().map(|h| h.id()).collect();
    assert_eq!(report.terminal_order(), ids);
    assert_eq!(report.poll_cycles, 3);
    for (h, n) in handles.iter().zip(1..=3u32) {
        assert_eq!(h.result(), Ok(&n));
    }
}

#[test]
fn many_tasks_all_reach_terminal_state() {
    let mut sched = Scheduler::new(SchedulerConfig::default());
    let handles: Vec<_> = (0..50u32)
        .map(|i| {
            sched.submit(format!("t{}", i), move |cx| async move {
                // Several suspend points per task.
                for step in 0..(i % 4) {
                    cx.suspend(Countdown::ready_after(step + 1)).await?;
                }
                Ok(i)
            })
        })
        .collect();

    let report = sched.run_until_idle().unwrap();
    assert_eq!(report.finished.len(), 50);
    assert!(report.all_completed());
    assert!(handles.iter().all(|h| h.state() == TaskState::Completed));
    assert!(sched.is_idle());
}

#[test]
fn simultaneous_readiness_resumes_in_submission_order() {
    let order = Rc::new(RefCell::new(Vec::new()));
    let mut sched: Scheduler<()> = Scheduler::new(SchedulerConfig::default());

    // All become ready in the same (second) cycle.
    for name in ["first", "second", "third", "fourth"] {
        let order = order.clone();
        sched.submit(name, move |cx| async move {
            cx.suspend(Countdown::ready_after(2)).await?;
            order.borrow_mut().push(name);
            Ok(())
        });
    }

    sched.run_until_idle().unwrap();
    assert_eq!(*order.borrow(), vec!["first", "second", "third", "fourth"]);
}

#[test]
fn completed_result_is_stable() {
    let mut sched = Scheduler::new(SchedulerConfig::default());
    let h = sched.submit("stable", |cx| async move {
        cx.suspend(Countdown::ready_after(1)).await?;
        Ok(vec![1, 2, 3])
    });
    sched.run_until_idle().unwrap();

    let first = h.result().unwrap().clone();
    for _ in 0..3 {
        assert_eq!(h.result(), Ok(&first));
    }
    assert_eq!(h.clone().result(), Ok(&first));
}

#[test]
fn failing_source_fails_only_its_task() {
    let mut sched: Scheduler<&'static str> = Scheduler::new(SchedulerConfig::default());
    let ok_before = sched.submit("before", |cx| async move {
        cx.suspend(Countdown::ready_after(3)).await?;
        Ok("before")
    });
    let broken = sched.submit("broken", |cx| async move {
        cx.suspend(Countdown::fail_after(1, 2)).await?;
        Ok("unreachable")
    });
    let ok_after = sched.submit("after", |cx| async move {
        cx.suspend(Countdown::ready_after(2)).await?;
        Ok("after")
    });

    let report = sched.run_until_idle().unwrap();

    assert_eq!(broken.state(), TaskState::Failed);
    match broken.error() {
        Ok(TaskError::Resource(ResourceError::ProcessExit { code, .. })) => {
            assert_eq!(*code, Some(2))
        }
        other => panic!("expected ProcessExit, got {:?}", other),
    }
    assert_eq!(ok_before.result(), Ok(&"before"));
    assert_eq!(ok_after.result(), Ok(&"after"));

    let failed: Vec<_> = report.failed().map(|f| f.id).collect();
    assert_eq!(failed, vec![broken.id()]);
    assert_eq!(report.completed().count(), 2);
}

#[test]
fn concurrency_cap_bounds_live_tasks() {
    let live = Rc::new(RefCell::new(0usize));
    let peak = Rc::new(RefCell::new(0usize));
    let starts = Rc::new(RefCell::new(Vec::new()));

    let mut sched: Scheduler<()> =
        Scheduler::new(SchedulerConfig::default().with_max_concurrent(2));

    let handles: Vec<_> = (0..5u32)
        .map(|i| {
            let (live, peak, starts) = (live.clone(), peak.clone(), starts.clone());
            sched.submit(format!("job{}", i), move |cx| async move {
                *live.borrow_mut() += 1;
                let now = *live.borrow();
                let mut p = peak.borrow_mut();
                *p = (*p).max(now);
                drop(p);
                starts.borrow_mut().push(i);

                let result = cx.suspend(Countdown::ready_after(i % 2 + 1)).await;
                *live.borrow_mut() -= 1;
                result.map(|_| ())
            })
        })
        .collect();

    // Third through fifth wait for slots.
    assert_eq!(*starts.borrow(), vec![0, 1]);
    assert_eq!(handles[2].state(), TaskState::Created);
    assert_eq!(sched.queued_count(), 3);

    let report = sched.run_until_idle().unwrap();

    assert_eq!(*peak.borrow(), 2);
    assert_eq!(report.peak_concurrency, 2);
    assert_eq!(*starts.borrow(), vec![0, 1, 2, 3, 4]);
    assert!(handles.iter().all(|h| h.state() == TaskState::Completed));
}

#[test]
fn batch_top_up_with_run_until_completions() {
    // Submit in waves: whenever one finishes, submit the next.
    let mut sched: Scheduler<u32> = Scheduler::new(SchedulerConfig::default());
    let mut pending: Vec<u32> = (0..6).collect();
    let mut finished = Vec::new();
    let concurrency = 3;

    while !pending.is_empty() || !sched.is_idle() {
        while sched.live_count() < concurrency {
            let Some(n) = pending.pop() else { break };
            sched.submit(format!("clip{}", n), move |cx| async move {
                cx.suspend(Countdown::ready_after(n % 3 + 1)).await?;
                Ok(n)
            });
        }
        let report = sched.run_until_completions(1).unwrap();
        finished.extend(report.finished.into_iter().map(|f| f.name));
        assert!(sched.live_count() <= concurrency);
    }

    finished.sort();
    assert_eq!(
        finished,
        vec!["clip0", "clip1", "clip2", "clip3", "clip4", "clip5"]
    );
}
