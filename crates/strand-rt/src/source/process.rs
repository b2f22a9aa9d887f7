// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Child process completion source.
//!
//! Readiness is a non-blocking `try_wait`. A child has no descriptor to
//! multiplex on, so the reactor re-queries it every tick.
//!
//! Each child leads its own process group, so abandoning it also kills
//! whatever it started (the real command behind `sh -c`, pipelines).

use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};

use tracing::debug;

use super::{Completion, CompletionSource, IoReadiness, Readiness, SourceKind, Wakeup};
use crate::error::ResourceError;

/// A launched child process. Ready when it exits with status 0; a non-zero
/// exit or a signal is reported as `ResourceError::ProcessExit`.
///
/// Abandoning or dropping a source whose child is still running kills the
/// child's process group and reaps the child.
#[derive(Debug)]
pub struct ProcessSource {
    command: String,
    child: Option<Child>,
    exit: Option<ExitStatus>,
}

impl ProcessSource {
    /// Launch `cmd` as the leader of a new process group. Standard stream
    /// redirections are whatever the caller configured on the `Command`.
    pub fn spawn(mut cmd: Command) -> Result<Self, ResourceError> {
        let command = describe_command(&cmd);
        let child = cmd.process_group(0).spawn().map_err(|e| ResourceError::Spawn {
            command: command.clone(),
            message: e.to_string(),
        })?;
        debug!(pid = child.id(), command = %command, "spawned child process");
        Ok(Self {
            command,
            child: Some(child),
            exit: None,
        })
    }

    /// Launch `line` through `sh -c` with stdin closed.
    pub fn shell(line: &str) -> Result<Self, ResourceError> {
        Self::shell_with(line, Stdio::inherit(), Stdio::inherit())
    }

    /// Launch `line` through `sh -c` with explicit stdout/stderr targets.
    pub fn shell_with(line: &str, stdout: Stdio, stderr: Stdio) -> Result<Self, ResourceError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(line)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        let mut source = Self::spawn(cmd)?;
        source.command = line.to_string();
        Ok(source)
    }

    /// OS process id while the child has not been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Exit code once the child has been observed to exit. `None` before
    /// that, or when it was killed by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit.and_then(|status| status.code())
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn classify(&self, status: ExitStatus) -> Readiness {
        match status.code() {
            Some(0) => Readiness::Ready(Completion::Exited { code: 0 }),
            code => Readiness::Errored(ResourceError::ProcessExit {
                command: self.command.clone(),
                code,
            }),
        }
    }
}

impl CompletionSource for ProcessSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Process
    }

    fn describe(&self) -> String {
        match self.pid() {
            Some(pid) => format!("process {} (`{}`)", pid, self.command),
            None => format!("process `{}`", self.command),
        }
    }

    fn wakeup(&self) -> Wakeup {
        if self.exit.is_some() {
            Wakeup::Immediate
        } else {
            Wakeup::Tick
        }
    }

    fn poll(&mut self, _event: Option<IoReadiness>) -> Readiness {
        if let Some(status) = self.exit {
            return self.classify(status);
        }
        let Some(child) = self.child.as_mut() else {
            return Readiness::Errored(ResourceError::ProcessQuery {
                command: self.command.clone(),
                message: "child was abandoned".to_string(),
            });
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid = child.id(), ?status, "child process exited");
                self.exit = Some(status);
                self.child = None;
                self.classify(status)
            }
            Ok(None) => Readiness::Pending,
            Err(e) => Readiness::Errored(ResourceError::ProcessQuery {
                command: self.command.clone(),
                message: e.to_string(),
            }),
        }
    }

    fn abandon(&mut self) {
        if let Some(mut child) = self.child.take() {
            debug!(pid = child.id(), command = %self.command, "killing abandoned process group");
            match libc::pid_t::try_from(child.id()) {
                Ok(pgid) => unsafe {
                    libc::killpg(pgid, libc::SIGKILL);
                },
                Err(_) => {
                    let _ = child.kill();
                }
            }
            // Reap so the child does not linger as a zombie.
            if let Ok(status) = child.wait() {
                self.exit = Some(status);
            }
        }
    }
}

impl Drop for ProcessSource {
    fn drop(&mut self) {
        self.abandon();
    }
}

fn describe_command(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn poll_until_done(source: &mut ProcessSource) -> Readiness {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let r = source.poll(None);
            if !r.is_pending() {
                return r;
            }
            assert!(Instant::now() < deadline, "child never exited");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn successful_exit_is_ready() {
        let mut source = ProcessSource::shell("exit 0").unwrap();
        assert_eq!(source.wakeup(), Wakeup::Tick);
        assert_eq!(
            poll_until_done(&mut source),
            Readiness::Ready(Completion::Exited { code: 0 })
        );
        assert_eq!(source.exit_code(), Some(0));
        assert!(source.pid().is_none());
        // Repeated polls keep reporting the same outcome.
        assert_eq!(source.poll(None), Readiness::Ready(Completion::Exited { code: 0 }));
    }

    #[test]
    fn nonzero_exit_is_resource_error() {
        let mut source = ProcessSource::shell("exit 3").unwrap();
        match poll_until_done(&mut source) {
            Readiness::Errored(ResourceError::ProcessExit { command, code }) => {
                assert_eq!(command, "exit 3");
                assert_eq!(code, Some(3));
            }
            other => panic!("expected ProcessExit, got {:?}", other),
        }
    }

    #[test]
    fn spawn_failure_is_reported() {
        let err = ProcessSource::spawn(Command::new("/definitely/not/a/binary")).unwrap_err();
        assert!(matches!(err, ResourceError::Spawn { .. }));
    }

    #[test]
    fn abandon_kills_running_child() {
        let mut source = ProcessSource::shell("sleep 30").unwrap();
        assert!(source.poll(None).is_pending());
        let start = Instant::now();
        source.abandon();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(source.pid().is_none());
        assert!(source.exit_status().is_some());
        assert_eq!(source.exit_code(), None);
    }

    /// Live (non-zombie) processes whose process group is `pgid`.
    fn live_group_members(pgid: u32) -> Vec<u32> {
        let mut members = Vec::new();
        for entry in std::fs::read_dir("/proc").unwrap().flatten() {
            let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
                continue;
            };
            let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
                continue;
            };
            // Fields after "pid (comm)": state ppid pgrp ...
            let Some(rest) = stat.rfind(')').map(|i| &stat[i + 1..]) else {
                continue;
            };
            let fields: Vec<&str> = rest.split_whitespace().collect();
            if fields.len() > 2 && fields[0] != "Z" && fields[2] == pgid.to_string() {
                members.push(pid);
            }
        }
        members
    }

    #[test]
    fn abandon_kills_whole_process_group() {
        // `sh` stays alive as the parent of `sleep`.
        let mut source = ProcessSource::shell_with("sleep 30 && true", Stdio::null(), Stdio::null()).unwrap();
        let pgid = source.pid().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while live_group_members(pgid).len() < 2 {
            assert!(Instant::now() < deadline, "sleep never started");
            std::thread::sleep(Duration::from_millis(5));
        }

        source.abandon();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !live_group_members(pgid).is_empty() {
            assert!(Instant::now() < deadline, "group still alive: {:?}", live_group_members(pgid));
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn describe_includes_command() {
        let source = ProcessSource::shell("true").unwrap();
        assert!(source.describe().contains("`true`"));
        assert_eq!(source.kind(), SourceKind::Process);
    }
}
