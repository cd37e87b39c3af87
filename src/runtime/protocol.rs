//! Protocol seam between the worker runtime and wire-protocol handlers.
//!
//! The runtime never looks inside messages. It hands unread bytes to
//! [`ProtocolAdapter::parse`], keeps whatever partial state the adapter
//! returns, and passes complete messages to [`ProtocolAdapter::dispatch`]
//! together with a [`Reply`] for sending the response.

use crate::runtime::session::Transport;
use std::io::{self, ErrorKind};
use std::time::Duration;
use thiserror::Error;

/// Outcome of a single parse attempt.
#[derive(Debug)]
pub enum ParseOutcome<P, M> {
    /// Malformed input; the connection should be dropped.
    Error(String),
    /// A full message was parsed.
    Complete(M),
    /// More bytes are required. The state must be passed back to the next
    /// parse call for this connection.
    NeedMore(P),
}

/// Result of [`ProtocolAdapter::parse`]: how many bytes were consumed and
/// what was found.
#[derive(Debug)]
pub struct Parsed<P, M> {
    /// Bytes of the input slice the parser has taken ownership of. The
    /// caller advances its read cursor by this amount on every outcome.
    pub consumed: usize,
    pub outcome: ParseOutcome<P, M>,
}

impl<P, M> Parsed<P, M> {
    pub fn complete(consumed: usize, message: M) -> Self {
        Self {
            consumed,
            outcome: ParseOutcome::Complete(message),
        }
    }

    pub fn need_more(consumed: usize, pending: P) -> Self {
        Self {
            consumed,
            outcome: ParseOutcome::NeedMore(pending),
        }
    }

    pub fn error(consumed: usize, reason: impl Into<String>) -> Self {
        Self {
            consumed,
            outcome: ParseOutcome::Error(reason.into()),
        }
    }
}

/// What the session should do after a successful dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Keep going with any pipelined bytes.
    Continue,
    /// The client asked to end the connection.
    Close,
}

/// Application-level dispatch failure.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to send response: {0}")]
    Send(#[from] io::Error),
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// A wire protocol plugged into the worker.
pub trait ProtocolAdapter {
    /// Partial-parse state carried between reads on one connection.
    type Pending;
    /// A fully parsed request.
    type Message;

    /// Short protocol name for logs.
    fn name(&self) -> &'static str;

    /// Parse the next message from `input`.
    ///
    /// `pending` is the state returned by the previous `NeedMore` on this
    /// connection, or `None` at a message boundary. `consumed` must depend
    /// only on `pending` and `input`.
    fn parse(&self, pending: Option<Self::Pending>, input: &[u8]) -> Parsed<Self::Pending, Self::Message>;

    /// Handle a complete message and transmit any response.
    fn dispatch<T: Transport>(
        &mut self,
        message: Self::Message,
        reply: &mut Reply<'_, T>,
    ) -> Result<Disposition, DispatchError>;
}

/// Response path of one session.
///
/// Writes go straight to the connection. A write that would block waits
/// for writability and retries; a hard write error invalidates the session.
pub struct Reply<'s, T> {
    transport: &'s mut T,
    valid: &'s mut bool,
    io_wait: Duration,
}

impl<'s, T: Transport> Reply<'s, T> {
    pub(crate) fn new(transport: &'s mut T, valid: &'s mut bool, io_wait: Duration) -> Self {
        Self {
            transport,
            valid,
            io_wait,
        }
    }

    /// Send all of `data`.
    pub fn send(&mut self, data: &[u8]) -> io::Result<()> {
        if !*self.valid {
            return Err(io::Error::new(
                ErrorKind::NotConnected,
                "session already invalid",
            ));
        }

        let mut written = 0;
        while written < data.len() {
            match self.transport.write(&data[written..]) {
                Ok(0) => {
                    *self.valid = false;
                    return Err(io::Error::new(ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => written += n,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    if let Err(e) = self.transport.wait_writable(self.io_wait) {
                        *self.valid = false;
                        return Err(e);
                    }
                }
                Err(e) => {
                    *self.valid = false;
                    return Err(e);
                }
            }
        }

        Ok(())
    }
}
