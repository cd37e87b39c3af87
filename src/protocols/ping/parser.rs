//! Ping protocol parser.

use crate::protocols::line::{scan_line, LineScan, PartialLine, MAX_LINE_LENGTH};
use crate::runtime::Parsed;

/// Parsed ping command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Simple ping (no message).
    Ping,
    /// Ping with a message to echo back.
    PingMsg(Vec<u8>),
    /// Quit command.
    Quit,
    /// Anything else; answered with an error line.
    Unknown,
}

/// Parse a ping protocol command, resuming a partially received line.
pub fn parse(pending: Option<PartialLine>, input: &[u8]) -> Parsed<PartialLine, Command> {
    match scan_line(pending, input, MAX_LINE_LENGTH) {
        LineScan::Complete { line, consumed } => Parsed::complete(consumed, parse_line(&line)),
        LineScan::Partial { partial, consumed } => Parsed::need_more(consumed, partial),
        LineScan::TooLong { consumed } => Parsed::error(consumed, "command line too long"),
    }
}

/// Interpret a complete command line (case-insensitive).
pub fn parse_line(line: &[u8]) -> Command {
    if line.eq_ignore_ascii_case(b"PING") {
        Command::Ping
    } else if line.eq_ignore_ascii_case(b"QUIT") {
        Command::Quit
    } else if line.len() > 5 && line[..5].eq_ignore_ascii_case(b"PING ") {
        Command::PingMsg(line[5..].to_vec())
    } else {
        Command::Unknown
    }
}

/// Format a PONG response.
pub fn response_pong() -> &'static [u8] {
    b"PONG\r\n"
}

/// Format a PONG response with message.
pub fn response_pong_msg(msg: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + msg.len() + 2);
    out.extend_from_slice(b"PONG ");
    out.extend_from_slice(msg);
    out.extend_from_slice(b"\r\n");
    out
}

pub fn response_ok() -> &'static [u8] {
    b"OK\r\n"
}

/// Format an error response.
pub fn response_error() -> &'static [u8] {
    b"ERROR unknown command\r\n"
}
