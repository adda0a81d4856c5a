//! In-memory transport over a tokio duplex pipe, for tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::Transport;
use crate::error::{Result, TransportError};

/// Transport backed by an in-memory duplex pipe.
pub struct MemoryTransport {
    reader: Mutex<ReadHalf<DuplexStream>>,
    writer: Mutex<WriteHalf<DuplexStream>>,
    connected: AtomicBool,
}

impl MemoryTransport {
    /// Create a connected pair of transports.
    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (Self::new(a), Self::new(b))
    }

    fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            connected: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, data: &[u8]) -> Result<usize> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected.into());
        }
        let mut writer = self.writer.lock().await;
        writer
            .write_all(data)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        Ok(data.len())
    }

    async fn recv(&self, buf: &mut [u8], recv_timeout: Duration) -> Result<usize> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected.into());
        }
        let mut reader = self.reader.lock().await;
        let n = timeout(recv_timeout, reader.read(buf))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
        if n == 0 {
            self.connected.store(false, Ordering::SeqCst);
            return Err(TransportError::Closed.into());
        }
        Ok(n)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn transport_type(&self) -> &'static str {
        "memory"
    }
}
