//! Echo protocol parser.

use crate::protocols::line::{scan_line, LineScan, PartialLine, MAX_LINE_LENGTH};
use crate::runtime::Parsed;
use bytes::{Bytes, BytesMut};

/// Largest payload a client may ask to echo.
pub const MAX_ECHO_SIZE: usize = 16 * 1024 * 1024; // 16MB max echo size

/// Parsed echo header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Echo `length` bytes of data that follow the header.
    Echo { length: usize },
    /// Quit command.
    Quit,
    /// Header could not be used; answered with an error line.
    Invalid(&'static str),
}

/// A complete echo request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Echo(Bytes),
    Quit,
    Invalid(&'static str),
}

/// Parse state carried between reads.
#[derive(Debug)]
pub enum Pending {
    /// Still reading the length line.
    Header(PartialLine),
    /// Header done, collecting the payload.
    Payload { length: usize, data: BytesMut },
}

/// Parse an echo request, resuming from `pending`.
///
/// Payload bytes are copied into the pending state as they arrive, so every
/// byte offered is consumed exactly once.
pub fn parse(pending: Option<Pending>, input: &[u8]) -> Parsed<Pending, Message> {
    let (mut consumed, length, mut data) = match pending {
        Some(Pending::Payload { length, data }) => (0, length, data),
        Some(Pending::Header(partial)) => match parse_header(Some(partial), input) {
            HeaderScan::Payload { consumed, length } => (consumed, length, BytesMut::new()),
            HeaderScan::Done(parsed) => return parsed,
        },
        None => match parse_header(None, input) {
            HeaderScan::Payload { consumed, length } => (consumed, length, BytesMut::new()),
            HeaderScan::Done(parsed) => return parsed,
        },
    };

    let rest = &input[consumed..];
    let take = (length - data.len()).min(rest.len());
    data.extend_from_slice(&rest[..take]);
    consumed += take;

    if data.len() == length {
        Parsed::complete(consumed, Message::Echo(data.freeze()))
    } else {
        Parsed::need_more(consumed, Pending::Payload { length, data })
    }
}

enum HeaderScan {
    Payload { consumed: usize, length: usize },
    Done(Parsed<Pending, Message>),
}

fn parse_header(partial: Option<PartialLine>, input: &[u8]) -> HeaderScan {
    let (line, consumed) = match scan_line(partial, input, MAX_LINE_LENGTH) {
        LineScan::Complete { line, consumed } => (line, consumed),
        LineScan::Partial { partial, consumed } => {
            return HeaderScan::Done(Parsed::need_more(consumed, Pending::Header(partial)))
        }
        LineScan::TooLong { consumed } => {
            return HeaderScan::Done(Parsed::error(consumed, "header line too long"))
        }
    };

    match parse_header_line(&line) {
        Ok(Command::Echo { length }) => HeaderScan::Payload { consumed, length },
        Ok(Command::Quit) => HeaderScan::Done(Parsed::complete(consumed, Message::Quit)),
        Ok(Command::Invalid(reason)) => {
            HeaderScan::Done(Parsed::complete(consumed, Message::Invalid(reason)))
        }
        Err(reason) => HeaderScan::Done(Parsed::error(consumed, reason)),
    }
}

/// Interpret a complete header line.
///
/// Non-UTF-8 headers are protocol errors; bad or oversized lengths are
/// answered in-band and the connection carries on.
pub fn parse_header_line(line: &[u8]) -> Result<Command, &'static str> {
    if line.eq_ignore_ascii_case(b"QUIT") {
        return Ok(Command::Quit);
    }

    let length_str = std::str::from_utf8(line).map_err(|_| "header is not valid UTF-8")?;

    match length_str.parse::<usize>() {
        Ok(length) if length <= MAX_ECHO_SIZE => Ok(Command::Echo { length }),
        Ok(_) => Ok(Command::Invalid("value too large")),
        Err(_) => Ok(Command::Invalid("invalid length")),
    }
}

/// Format an echo response header.
pub fn response_header(length: usize) -> Vec<u8> {
    format!("{length}\r\n").into_bytes()
}

/// Format an error response.
pub fn response_error(msg: &str) -> Vec<u8> {
    format!("ERROR {msg}\r\n").into_bytes()
}
