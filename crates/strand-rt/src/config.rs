// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scheduler configuration.
//!
//! Defaults suit interactive batch work. `from_env` overlays `STRAND_*`
//! variables on top of the defaults.

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_MAX_POLL_WAIT: Duration = Duration::from_millis(50);
pub const DEFAULT_TICK: Duration = Duration::from_millis(1);

/// Tuning knobs for a [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Cap on started-but-unfinished tasks. `None` admits everything.
    pub max_concurrent: Option<NonZeroUsize>,
    /// Upper bound on a single multiplexed wait.
    pub max_poll_wait: Duration,
    /// Wait used while some source can only be re-queried (no descriptor,
    /// no deadline), e.g. a child process.
    pub tick: Duration,
    /// Per-task deadline, measured from `start()`.
    pub task_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: None,
            max_poll_wait: DEFAULT_MAX_POLL_WAIT,
            tick: DEFAULT_TICK,
            task_timeout: None,
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `STRAND_MAX_CONCURRENT`, `STRAND_MAX_POLL_WAIT_MS`,
    /// `STRAND_TICK_MS` and `STRAND_TASK_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("STRAND_MAX_CONCURRENT") {
            // 0 means unbounded.
            let n: usize = parse_var("STRAND_MAX_CONCURRENT", &raw)?;
            config.max_concurrent = NonZeroUsize::new(n);
        }
        if let Some(raw) = lookup("STRAND_MAX_POLL_WAIT_MS") {
            let ms: u64 = parse_var("STRAND_MAX_POLL_WAIT_MS", &raw)?;
            config.max_poll_wait = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup("STRAND_TICK_MS") {
            let ms: u64 = parse_var("STRAND_TICK_MS", &raw)?;
            if ms == 0 {
                return Err(config_error("STRAND_TICK_MS", &raw, "must be at least 1"));
            }
            config.tick = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup("STRAND_TASK_TIMEOUT_MS") {
            let ms: u64 = parse_var("STRAND_TASK_TIMEOUT_MS", &raw)?;
            config.task_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }

        Ok(config)
    }

    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = NonZeroUsize::new(n);
        self
    }

    pub fn with_max_poll_wait(mut self, wait: Duration) -> Self {
        self.max_poll_wait = wait;
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }
}

fn parse_var<T>(var: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| config_error(var, raw, &e.to_string()))
}

fn config_error(var: &str, value: &str, reason: &str) -> Error {
    Error::Config {
        var: var.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = SchedulerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SchedulerConfig::default());
        assert_eq!(config.max_poll_wait, DEFAULT_MAX_POLL_WAIT);
        assert!(config.max_concurrent.is_none());
    }

    #[test]
    fn overlays_all_variables() {
        let config = SchedulerConfig::from_lookup(lookup(&[
            ("STRAND_MAX_CONCURRENT", "4"),
            ("STRAND_MAX_POLL_WAIT_MS", "20"),
            ("STRAND_TICK_MS", "2"),
            ("STRAND_TASK_TIMEOUT_MS", "1500"),
        ]))
        .unwrap();
        assert_eq!(config.max_concurrent, NonZeroUsize::new(4));
        assert_eq!(config.max_poll_wait, Duration::from_millis(20));
        assert_eq!(config.tick, Duration::from_millis(2));
        assert_eq!(config.task_timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn zero_means_unbounded() {
        let config = SchedulerConfig::from_lookup(lookup(&[
            ("STRAND_MAX_CONCURRENT", "0"),
            ("STRAND_TASK_TIMEOUT_MS", "0"),
        ]))
        .unwrap();
        assert!(config.max_concurrent.is_none());
        assert!(config.task_timeout.is_none());
    }

    #[test]
    fn rejects_garbage() {
        let err = SchedulerConfig::from_lookup(lookup(&[("STRAND_MAX_CONCURRENT", "lots")]))
            .unwrap_err();
        match err {
            Error::Config { var, value, .. } => {
                assert_eq!(var, "STRAND_MAX_CONCURRENT");
                assert_eq!(value, "lots");
            }
            other => panic!("expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn rejects_zero_tick() {
        assert!(SchedulerConfig::from_lookup(lookup(&[("STRAND_TICK_MS", "0")])).is_err());
    }

    #[test]
    fn builder_methods() {
        let config = SchedulerConfig::new()
            .with_max_concurrent(2)
            .with_task_timeout(Duration::from_secs(3))
            .with_tick(Duration::from_millis(5));
        assert_eq!(config.max_concurrent, NonZeroUsize::new(2));
        assert_eq!(config.task_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.tick, Duration::from_millis(5));
    }
}
