//! CRLF line scanning shared by the text protocols.
//!
//! The scanner takes ownership of every byte it looks at. When no line
//! ending is found, the bytes move into a [`PartialLine`] that is handed
//! back on the next call, so a slow client's line is never rescanned from
//! the start.

use bytes::BytesMut;

/// Maximum accepted line length, excluding the `\r\n`.
pub const MAX_LINE_LENGTH: usize = 1024;

/// Bytes of an unterminated line carried between reads.
#[derive(Debug, Default)]
pub struct PartialLine {
    bytes: BytesMut,
}

/// Result of scanning for a line.
#[derive(Debug)]
pub enum LineScan {
    /// A full line, without its `\r\n`.
    Complete { line: BytesMut, consumed: usize },
    /// No line ending yet.
    Partial { partial: PartialLine, consumed: usize },
    /// The line exceeds the length limit.
    TooLong { consumed: usize },
}

/// Scan `input` for the end of the line started in `pending`.
pub fn scan_line(pending: Option<PartialLine>, input: &[u8], max_len: usize) -> LineScan {
    let mut partial = pending.unwrap_or_default();

    // A CR that ended the previous read pairs with an LF starting this one.
    if partial.bytes.last() == Some(&b'\r') && input.first() == Some(&b'\n') {
        let len = partial.bytes.len() - 1;
        partial.bytes.truncate(len);
        return LineScan::Complete {
            line: partial.bytes,
            consumed: 1,
        };
    }

    match find_crlf(input) {
        Some(pos) => {
            let consumed = pos + 2;
            if partial.bytes.len() + pos > max_len {
                return LineScan::TooLong { consumed };
            }
            partial.bytes.extend_from_slice(&input[..pos]);
            LineScan::Complete {
                line: partial.bytes,
                consumed,
            }
        }
        None => {
            let consumed = input.len();
            // Allow one extra byte for a trailing CR.
            if partial.bytes.len() + consumed > max_len + 1 {
                return LineScan::TooLong { consumed };
            }
            partial.bytes.extend_from_slice(input);
            LineScan::Partial { partial, consumed }
        }
    }
}

/// Find \r\n in buffer, returning the position of \r.
pub fn find_crlf(buffer: &[u8]) -> Option<usize> {
    (0..buffer.len().saturating_sub(1)).find(|&i| buffer[i] == b'\r' && buffer[i + 1] == b'\n')
}
