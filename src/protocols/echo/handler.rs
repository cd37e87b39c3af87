//! Echo protocol adapter for the worker runtime.

use super::parser::{self, Message, Pending};
use crate::runtime::{DispatchError, Disposition, Parsed, ProtocolAdapter, Reply, Transport};

/// Echoes length-prefixed payloads back to the client.
#[derive(Debug, Default)]
pub struct EchoAdapter {
    echoed_bytes: u64,
}

impl EchoAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload bytes echoed so far by this worker.
    pub fn echoed_bytes(&self) -> u64 {
        self.echoed_bytes
    }
}

impl ProtocolAdapter for EchoAdapter {
    type Pending = Pending;
    type Message = Message;

    fn name(&self) -> &'static str {
        "echo"
    }

    fn parse(&self, pending: Option<Pending>, input: &[u8]) -> Parsed<Pending, Message> {
        parser::parse(pending, input)
    }

    fn dispatch<T: Transport>(
        &mut self,
        message: Message,
        reply: &mut Reply<'_, T>,
    ) -> Result<Disposition, DispatchError> {
        match message {
            Message::Echo(data) => {
                reply.send(&parser::response_header(data.len()))?;
                reply.send(&data)?;
                self.echoed_bytes += data.len() as u64;
                Ok(Disposition::Continue)
            }
            Message::Quit => {
                reply.send(b"OK\r\n")?;
                Ok(Disposition::Close)
            }
            Message::Invalid(reason) => {
                reply.send(&parser::response_error(reason))?;
                Ok(Disposition::Continue)
            }
        }
    }
}
