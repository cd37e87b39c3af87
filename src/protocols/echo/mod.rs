//! Echo protocol implementation.
//!
//! A simple echo service for throughput and I/O testing:
//! - Client sends: `<length>\r\n<data>`
//! - Server echoes: `<length>\r\n<data>`
//!
//! ## Use Cases
//!
//! 1. **Throughput testing**: Measure raw I/O throughput of a worker
//!    without any application overhead.
//!
//! 2. **Partial reads**: Large payloads arrive over many reads, exercising
//!    the parse state carried between reads on one connection.
//!
//! 3. **Buffer limits**: Payloads near the worker's buffer cap show how
//!    oversized clients are dropped.
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  <length>\r\n<data of exactly length bytes>
//! Response: <length>\r\n<data of exactly length bytes>
//!
//! Example:
//! Request:  5\r\nhello
//! Response: 5\r\nhello
//! ```
//!
//! Special commands (line-based):
//! - `QUIT\r\n` - Close connection gracefully

pub mod handler;
pub mod parser;

pub use handler::EchoAdapter;
