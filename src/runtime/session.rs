//! Client session: one accepted connection, driven to completion.
//!
//! A session moves through RECEIVE → PARSE → DISPATCH, looping back to
//! PARSE while pipelined bytes remain and to RECEIVE while the parser needs
//! more input. Every exit path lands in the caller, which closes the
//! session; a session never outlives one dispatch-loop iteration.

use crate::runtime::buffer::RequestBuffer;
use crate::runtime::protocol::{DispatchError, Disposition, ParseOutcome, ProtocolAdapter, Reply};
use crate::runtime::readiness::poll_fd;
use crate::runtime::stats::WorkerStats;
use socket2::Socket;
use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// A connected byte stream the session can read from and reply on.
pub trait Transport: Read + Write {
    /// Block until readable or `timeout` elapses.
    fn wait_readable(&self, timeout: Duration) -> io::Result<bool>;

    /// Block until writable or `timeout` elapses.
    fn wait_writable(&self, timeout: Duration) -> io::Result<bool>;
}

impl Transport for Socket {
    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        poll_fd(self.as_raw_fd(), libc::POLLIN, timeout)
    }

    fn wait_writable(&self, timeout: Duration) -> io::Result<bool> {
        poll_fd(self.as_raw_fd(), libc::POLLOUT, timeout)
    }
}

/// Per-session limits taken from the worker configuration.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    /// Bytes held for one message above this invalidate the session.
    pub max_buffer_size: usize,
    /// Size hint for each tail slice offered to a read.
    pub read_chunk: usize,
    /// Upper bound for a single readiness wait inside the session.
    pub io_wait: Duration,
}

/// Why a session ended early.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("buffer size {size} exceeds limit {limit}")]
    BufferOverflow { size: usize, limit: usize },
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    #[error("peer closed before the message was complete")]
    PeerClosed,
    #[error("parse failed: {0}")]
    Parse(String),
    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("session is no longer valid")]
    Invalid,
}

/// One accepted connection.
pub struct ClientSession<'a, T, A: ProtocolAdapter> {
    transport: T,
    peer: Option<SocketAddr>,
    buffer: RequestBuffer,
    valid: bool,
    /// End of stream seen; no more bytes will arrive.
    peer_closed: bool,
    /// Partial parse state from the last `NeedMore`.
    pending: Option<A::Pending>,
    /// Bytes of the message in progress already moved into `pending`.
    carried: usize,
    adapter: &'a mut A,
    limits: SessionLimits,
    read_calls: u64,
    dispatched: u64,
}

impl<'a, T: Transport, A: ProtocolAdapter> ClientSession<'a, T, A> {
    pub fn new(
        transport: T,
        peer: Option<SocketAddr>,
        adapter: &'a mut A,
        limits: SessionLimits,
    ) -> Self {
        Self {
            transport,
            peer,
            buffer: RequestBuffer::with_capacity(limits.read_chunk),
            valid: true,
            peer_closed: false,
            pending: None,
            carried: 0,
            adapter,
            limits,
            read_calls: 0,
            dispatched: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn buffer(&self) -> &RequestBuffer {
        &self.buffer
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Bytes held for the message in progress: those already handed to the
    /// parser as pending state plus those still unread in the buffer.
    pub fn held(&self) -> usize {
        self.carried + self.buffer.unread().len()
    }

    /// Number of read calls issued on the transport.
    pub fn read_calls(&self) -> u64 {
        self.read_calls
    }

    /// Messages dispatched successfully.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Greedy non-blocking burst read.
    ///
    /// Keeps reading while each read fills the offered slice exactly. A
    /// short read, would-block or end of stream ends the burst. Returns the
    /// bytes read by this burst. The session is invalidated once the bytes
    /// held for the current message exceed `max_buffer_size`, however many
    /// bursts they arrived in.
    pub fn fill(&mut self) -> Result<usize, SessionError> {
        if !self.valid {
            return Err(SessionError::Invalid);
        }

        let limit = self.limits.max_buffer_size;
        let mut total = 0;
        loop {
            let offered = self.buffer.reserve_tail(self.limits.read_chunk);
            let offered_len = offered.len();
            self.read_calls += 1;
            match self.transport.read(offered) {
                Ok(0) => {
                    self.peer_closed = true;
                    break;
                }
                Ok(n) => {
                    self.buffer.advance_write(n);
                    total += n;
                    if n < offered_len || self.held() > limit {
                        break;
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.valid = false;
                    return Err(SessionError::Read(e));
                }
            }
        }

        let size = self.held();
        if size > limit {
            debug!(peer = ?self.peer, size, limit, "Client buffer larger than limit");
            self.valid = false;
            return Err(SessionError::BufferOverflow { size, limit });
        }

        Ok(total)
    }

    /// Drive the connection until every buffered message is handled or an
    /// error occurs. The session is invalid after any error.
    pub fn run(&mut self, stats: &mut WorkerStats) -> Result<(), SessionError> {
        let result = self.drive(stats);
        if result.is_err() {
            self.valid = false;
        }
        result
    }

    fn drive(&mut self, stats: &mut WorkerStats) -> Result<(), SessionError> {
        loop {
            self.receive()?;
            stats.buffer_observed(self.held());

            loop {
                let parsed = self.adapter.parse(self.pending.take(), self.buffer.unread());
                self.buffer.advance_read(parsed.consumed);

                let message = match parsed.outcome {
                    ParseOutcome::Complete(message) => {
                        self.carried = 0;
                        message
                    }
                    ParseOutcome::NeedMore(pending) => {
                        self.carried += parsed.consumed;
                        self.pending = Some(pending);
                        if self.peer_closed {
                            debug!(peer = ?self.peer, "Peer closed mid-message");
                            return Err(SessionError::PeerClosed);
                        }
                        break;
                    }
                    ParseOutcome::Error(reason) => {
                        self.carried = 0;
                        stats.request_failed();
                        warn!(
                            peer = ?self.peer,
                            protocol = self.adapter.name(),
                            %reason,
                            "Parse failed"
                        );
                        return Err(SessionError::Parse(reason));
                    }
                };

                let mut reply = Reply::new(&mut self.transport, &mut self.valid, self.limits.io_wait);
                let disposition = match self.adapter.dispatch(message, &mut reply) {
                    Ok(disposition) => disposition,
                    Err(e) => {
                        stats.request_failed();
                        warn!(
                            peer = ?self.peer,
                            protocol = self.adapter.name(),
                            error = %e,
                            "Dispatch failed"
                        );
                        return Err(e.into());
                    }
                };
                stats.request_ok();
                self.dispatched += 1;

                if !self.valid {
                    return Err(SessionError::Invalid);
                }
                if disposition == Disposition::Close || !self.buffer.has_unread() {
                    return Ok(());
                }
            }
        }
    }

    /// Burst-read until at least one byte arrives or the peer closes.
    fn receive(&mut self) -> Result<usize, SessionError> {
        loop {
            let n = self.fill()?;
            if n > 0 || self.peer_closed {
                return Ok(n);
            }
            if let Err(e) = self.transport.wait_readable(self.limits.io_wait) {
                self.valid = false;
                return Err(SessionError::Read(e));
            }
        }
    }

    /// Tear the session down, releasing its buffer and descriptor.
    pub fn close(self) {
        debug!(
            peer = ?self.peer,
            valid = self.valid,
            dispatched = self.dispatched,
            "Session closed"
        );
    }
}
