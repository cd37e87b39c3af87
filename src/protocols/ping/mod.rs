//! Ping protocol implementation.
//!
//! A minimal protocol for health checks and latency measurement:
//! - Client sends: `PING\r\n` or `PING <message>\r\n`
//! - Server responds: `PONG\r\n` or `PONG <message>\r\n`
//!
//! ## Use Cases
//!
//! 1. **Health checks**: Supervisors and load balancers can verify a worker
//!    is accepting and answering without any application work.
//!
//! 2. **Latency measurement**: Measures pure network + worker overhead,
//!    useful for establishing a baseline per accepted connection.
//!
//! 3. **Pipelining checks**: Several `PING` lines sent in one write are
//!    answered in order from a single read.
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  PING\r\n
//! Response: PONG\r\n
//!
//! Request:  PING hello\r\n
//! Response: PONG hello\r\n
//!
//! Request:  QUIT\r\n
//! Response: OK\r\n   (connection closed)
//! ```
//!
//! Unknown commands are answered with `ERROR unknown command\r\n`.

pub mod handler;
pub mod parser;

pub use handler::PingAdapter;
