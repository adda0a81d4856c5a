//! Transport layer: the minimal send/receive contract the session engines
//! depend on, with a TCP implementation for production and an in-memory
//! pipe for tests.

mod memory;
mod tcp;

pub use memory::MemoryTransport;
pub use tcp::{TcpAcceptor, TcpTransport};

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// The transport contract. The core never blocks on anything else.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes. Returns the number of bytes written.
    async fn send(&self, data: &[u8]) -> Result<usize>;

    /// Receive raw bytes into `buf`, waiting at most `timeout`.
    ///
    /// Fails with `Timeout` when nothing arrives in time and `Closed`
    /// when the peer hung up.
    async fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport.
    async fn close(&self) -> Result<()>;

    /// Check whether the transport is still usable.
    fn is_connected(&self) -> bool;

    /// The remote address, when the transport has one.
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Transport type name for logs.
    fn transport_type(&self) -> &'static str;
}
