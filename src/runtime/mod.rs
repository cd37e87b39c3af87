//! Synchronous worker runtime.
//!
//! One worker serves one connection at a time; concurrency comes from
//! running several worker processes on the same listening socket.
//!
//! Building blocks:
//! - `RequestBuffer`: per-session byte accumulator with fill/drain cursors
//! - `ClientSession`: burst reads and the parse/dispatch state machine
//! - `ProtocolAdapter`: the pluggable wire protocol
//! - `WorkerStats`: named counters resolved once at setup
//! - `ReadinessWaiter`: bounded idle wait over tracked descriptors
//! - `DispatchLoop`: accept → session → stats → housekeeping

mod buffer;
mod dispatch;
mod protocol;
mod readiness;
mod session;
mod stats;

pub use buffer::RequestBuffer;
pub use dispatch::{
    DispatchLoop, Listener, Liveness, LogSupervisor, LoopError, LoopSettings, Supervisor,
};
pub use protocol::{DispatchError, Disposition, ParseOutcome, Parsed, ProtocolAdapter, Reply};
pub use readiness::{Descriptor, ReadinessWaiter, TrackedDescriptorSet};
pub use session::{ClientSession, SessionError, SessionLimits, Transport};
pub use stats::{
    StatHandle, StatItem, StatsError, StatsRegistry, StatsSnapshot, WorkerStats, FAILED_REQUESTS,
    MAX_BUFFER_SIZE, RUN_TIME_US, TOTAL_CLIENTS, TOTAL_REQUESTS, WORKER_ITEMS,
};

use crate::config::{Config, ProtocolType};
use crate::protocols::echo::EchoAdapter;
use crate::protocols::ping::PingAdapter;
use socket2::Socket;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

/// Run a single worker with the configured protocol until it stops.
pub fn run(config: Config) -> Result<(), LoopError> {
    let addr: SocketAddr = config
        .listen
        .parse()
        .map_err(|e| LoopError::Setup(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

    let listener = create_listener(addr).map_err(LoopError::Setup)?;
    info!(addr = %addr, protocol = ?config.protocol, "Listening");

    match config.protocol {
        ProtocolType::Ping => run_worker(listener, PingAdapter::new(), &config),
        ProtocolType::Echo => run_worker(listener, EchoAdapter::new(), &config),
    }
}

fn run_worker<A: ProtocolAdapter>(
    listener: Socket,
    adapter: A,
    config: &Config,
) -> Result<(), LoopError> {
    let settings = LoopSettings {
        worker_name: format!("worker-{}", std::process::id()),
        limits: SessionLimits {
            max_buffer_size: config.max_buffer_size,
            read_chunk: config.read_chunk,
            io_wait: Duration::from_millis(config.io_wait_ms),
        },
        stat_refresh: Duration::from_secs(config.stat_refresh_seconds),
        cron_interval: Duration::from_millis(config.cron_interval_ms),
    };

    let mut worker = DispatchLoop::new(
        listener,
        adapter,
        LogSupervisor,
        StatsRegistry::with_worker_items(),
        settings,
    )?;
    worker.run()
}

/// Create a non-blocking TCP listener with SO_REUSEPORT so several worker
/// processes can share the port.
pub fn create_listener(addr: SocketAddr) -> io::Result<Socket> {
    let socket = Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_port(true)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.set_cloexec(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket)
}
