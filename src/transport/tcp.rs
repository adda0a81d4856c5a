//! TCP transport over tokio streams.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::Transport;
use crate::error::{Result, TransportError};

/// TCP transport for one connection.
pub struct TcpTransport {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    peer: SocketAddr,
    connected: AtomicBool,
}

impl TcpTransport {
    /// Connect to a remote platform or terminal.
    pub async fn connect(addr: SocketAddr, connect_timeout: Duration) -> Result<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectFailed {
                addr,
                reason: e.to_string(),
            })?;
        Self::from_stream(stream)
    }

    /// Wrap an accepted stream.
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream
            .set_nodelay(true)
            .map_err(|e| TransportError::ConnectFailed {
                addr: stream
                    .peer_addr()
                    .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0))),
                reason: e.to_string(),
            })?;
        let peer = stream
            .peer_addr()
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            peer,
            connected: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, data: &[u8]) -> Result<usize> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected.into());
        }
        let mut writer = self.writer.lock().await;
        writer
            .write_all(data)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        writer
            .flush()
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
        Some(self.peer)
    }

    fn transport_type(&self) -> &'static str {
        "tcp"
    }
}

/// Listening socket that accepts connections as [`TcpTransport`]s.
pub struct TcpAcceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpAcceptor {
    /// Bind to a local address.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed {
                addr,
                reason: e.to_string(),
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::BindFailed {
                addr,
                reason: e.to_string(),
            })?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept the next connection.
    pub async fn accept(&self) -> Result<(TcpTransport, SocketAddr)> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
        Ok((TcpTransport::from_stream(stream)?, addr))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
