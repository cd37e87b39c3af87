//! Protocol implementations.
//!
//! Each protocol provides a parser and a [`ProtocolAdapter`] used by the
//! worker's dispatch loop.
//!
//! - `ping`: Minimal ping/pong for health checks and latency testing
//! - `echo`: Length-prefixed echo for throughput and partial-read testing
//!
//! [`ProtocolAdapter`]: crate::runtime::ProtocolAdapter

pub mod echo;
pub mod line;
pub mod ping;
