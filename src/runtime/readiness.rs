//! Idle-time readiness waiting.
//!
//! The worker only blocks when accept has nothing to hand out. At that
//! point it waits on every tracked descriptor (normally just the listener)
//! with a bounded timeout, so housekeeping keeps running on a quiet worker.

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// A descriptor the worker may wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor(RawFd);

impl Descriptor {
    pub fn new(fd: RawFd) -> Self {
        Self(fd)
    }

    pub fn raw(self) -> RawFd {
        self.0
    }

    fn token(self) -> io::Result<Token> {
        usize::try_from(self.0).map(Token).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid descriptor {}", self.0),
            )
        })
    }
}

/// Insertion-ordered set of descriptors.
#[derive(Debug, Default)]
pub struct TrackedDescriptorSet {
    fds: Vec<Descriptor>,
}

impl TrackedDescriptorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor. Returns `false` if it was already tracked.
    pub fn insert(&mut self, fd: Descriptor) -> bool {
        if self.contains(fd) {
            return false;
        }
        self.fds.push(fd);
        true
    }

    /// Remove a descriptor. Returns `false` if it was not tracked.
    pub fn remove(&mut self, fd: Descriptor) -> bool {
        match self.fds.iter().position(|&d| d == fd) {
            Some(idx) => {
                self.fds.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, fd: Descriptor) -> bool {
        self.fds.contains(&fd)
    }

    pub fn iter(&self) -> impl Iterator<Item = Descriptor> + '_ {
        self.fds.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }
}

/// Blocking wait-with-timeout over a [`TrackedDescriptorSet`].
pub struct ReadinessWaiter {
    poll: Poll,
    events: Events,
    tracked: TrackedDescriptorSet,
}

impl ReadinessWaiter {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(64),
            tracked: TrackedDescriptorSet::new(),
        })
    }

    /// Start watching `fd` for readability.
    pub fn track(&mut self, fd: Descriptor) -> io::Result<()> {
        if self.tracked.contains(fd) {
            return Ok(());
        }
        self.poll
            .registry()
            .register(&mut SourceFd(&fd.raw()), fd.token()?, Interest::READABLE)?;
        self.tracked.insert(fd);
        Ok(())
    }

    /// Stop watching `fd`.
    pub fn untrack(&mut self, fd: Descriptor) -> io::Result<()> {
        if !self.tracked.remove(fd) {
            return Ok(());
        }
        self.poll.registry().deregister(&mut SourceFd(&fd.raw()))
    }

    pub fn tracked(&self) -> &TrackedDescriptorSet {
        &self.tracked
    }

    /// Block until a tracked descriptor is readable or `timeout` elapses.
    ///
    /// Returns the number of ready descriptors; 0 means the timeout expired.
    pub fn wait(&mut self, timeout: Duration) -> io::Result<usize> {
        self.poll.poll(&mut self.events, Some(timeout))?;
        Ok(self.events.iter().count())
    }
}

/// Wait on a single descriptor with `poll(2)`.
///
/// Returns `Ok(false)` on timeout or interruption.
pub(crate) fn poll_fd(fd: RawFd, events: libc::c_short, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

    // SAFETY: `pfd` is a valid, exclusively borrowed pollfd for the call.
    let ret = unsafe { libc::poll(&mut pfd, 1, millis) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(ret > 0)
}
