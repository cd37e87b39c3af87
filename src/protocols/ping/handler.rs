//! Ping protocol adapter for the worker runtime.

use super::parser::{self, Command};
use crate::protocols::line::PartialLine;
use crate::runtime::{DispatchError, Disposition, Parsed, ProtocolAdapter, Reply, Transport};

/// Answers PING lines. No application state.
#[derive(Debug, Default)]
pub struct PingAdapter;

impl PingAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl ProtocolAdapter for PingAdapter {
    type Pending = PartialLine;
    type Message = Command;

    fn name(&self) -> &'static str {
        "ping"
    }

    fn parse(&self, pending: Option<PartialLine>, input: &[u8]) -> Parsed<PartialLine, Command> {
        parser::parse(pending, input)
    }

    fn dispatch<T: Transport>(
        &mut self,
        message: Command,
        reply: &mut Reply<'_, T>,
    ) -> Result<Disposition, DispatchError> {
        match message {
            Command::Ping => reply.send(parser::response_pong())?,
            Command::PingMsg(msg) => reply.send(&parser::response_pong_msg(&msg))?,
            Command::Quit => {
                reply.send(parser::response_ok())?;
                return Ok(Disposition::Close);
            }
            Command::Unknown => reply.send(parser::response_error())?,
        }
        Ok(Disposition::Continue)
    }
}
