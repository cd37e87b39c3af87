//! sync-worker: a synchronous one-connection-at-a-time network worker
//!
//! Each worker process accepts on a shared SO_REUSEPORT listener and serves
//! one client at a time:
//! - Burst reads into a bounded per-connection buffer
//! - Pipelined parse/dispatch through a pluggable protocol (ping, echo)
//! - Per-worker counters reported on a fixed refresh interval
//! - Bounded idle waits with periodic housekeeping
//! - Configuration via CLI arguments or TOML file
//!
//! The `runtime` module is usable on its own: plug in any
//! [`runtime::ProtocolAdapter`], [`runtime::Listener`] and
//! [`runtime::Supervisor`] and drive a [`runtime::DispatchLoop`].

pub mod config;
pub mod protocols;
pub mod runtime;
