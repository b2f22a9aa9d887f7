// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Descriptor readiness source (sockets, pipes).
//!
//! The source waits on a raw descriptor; the caller keeps the owning
//! stream alive and performs the actual I/O once the task resumes.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use super::{Completion, CompletionSource, Interest, IoReadiness, Readiness, SourceKind, Wakeup};
use crate::error::ResourceError;

#[derive(Debug, Clone)]
pub struct SocketSource {
    fd: RawFd,
    interest: Interest,
    label: Option<String>,
}

impl SocketSource {
    pub fn new(io: &impl AsRawFd, interest: Interest) -> Self {
        Self::from_raw_fd(io.as_raw_fd(), interest)
    }

    pub fn from_raw_fd(fd: RawFd, interest: Interest) -> Self {
        Self {
            fd,
            interest,
            label: None,
        }
    }

    pub fn readable(io: &impl AsRawFd) -> Self {
        Self::new(io, Interest::Readable)
    }

    pub fn writable(io: &impl AsRawFd) -> Self {
        Self::new(io, Interest::Writable)
    }

    /// Name shown in logs and timeout errors instead of the bare descriptor.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    fn error(&self, message: String) -> Readiness {
        Readiness::Errored(ResourceError::Socket {
            fd: self.fd,
            message,
        })
    }
}

impl CompletionSource for SocketSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Socket
    }

    fn describe(&self) -> String {
        match &self.label {
            Some(label) => format!("socket {} (fd {})", label, self.fd),
            None => format!("fd {}", self.fd),
        }
    }

    fn wakeup(&self) -> Wakeup {
        Wakeup::Fd {
            fd: self.fd,
            interest: self.interest,
        }
    }

    fn poll(&mut self, event: Option<IoReadiness>) -> Readiness {
        let Some(ev) = event else {
            return Readiness::Pending;
        };
        if ev.invalid {
            return self.error("descriptor is not open".to_string());
        }
        if ev.error {
            let message = match pending_socket_error(self.fd) {
                Some(e) => e.to_string(),
                None => "error condition on descriptor".to_string(),
            };
            return self.error(message);
        }
        // Hangup counts as readable: the next read observes EOF.
        let read_ready = self.interest.wants_read() && (ev.readable || ev.hangup);
        let write_ready = self.interest.wants_write() && ev.writable;
        if read_ready || write_ready {
            Readiness::Ready(Completion::Io(ev))
        } else {
            Readiness::Pending
        }
    }
}

/// Fetch and clear `SO_ERROR`. `None` for non-sockets or no pending error.
fn pending_socket_error(fd: RawFd) -> Option<io::Error> {
    let mut err: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    };
    if ret < 0 || err == 0 {
        return None;
    }
    Some(io::Error::from_raw_os_error(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn pending_without_event() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut source = SocketSource::readable(&a);
        assert_eq!(
            source.wakeup(),
            Wakeup::Fd {
                fd: a.as_raw_fd(),
                interest: Interest::Readable
            }
        );
        assert!(source.poll(None).is_pending());
    }

    #[test]
    fn readable_event_completes() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut source = SocketSource::readable(&a);
        let ev = IoReadiness {
            readable: true,
            ..Default::default()
        };
        assert_eq!(source.poll(Some(ev)), Readiness::Ready(Completion::Io(ev)));
    }

    #[test]
    fn writable_event_ignored_for_read_interest() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut source = SocketSource::readable(&a);
        let ev = IoReadiness {
            writable: true,
            ..Default::default()
        };
        assert!(source.poll(Some(ev)).is_pending());
    }

    #[test]
    fn invalid_descriptor_errors() {
        let mut source = SocketSource::from_raw_fd(-1, Interest::Readable).with_label("gone");
        let ev = IoReadiness {
            invalid: true,
            ..Default::default()
        };
        match source.poll(Some(ev)) {
            Readiness::Errored(ResourceError::Socket { fd, .. }) => assert_eq!(fd, -1),
            other => panic!("expected socket error, got {:?}", other),
        }
        assert_eq!(source.describe(), "socket gone (fd -1)");
    }
}
