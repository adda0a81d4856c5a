//! Error types for the JT808 stack.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Result type alias for JT808 operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the JT808 stack.
#[derive(Error, Debug)]
pub enum Error {
    // Framing and body codec errors
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    // Dispatch and session errors
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // Transport errors
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // General errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Frame and message body codec errors.
///
/// These are local to a single frame and never tear down a session.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("frame too short or missing 0x7E sentinels")]
    BadFrame,

    #[error("illegal escape sequence or unescaped sentinel")]
    BadEscape,

    #[error("checksum mismatch: expected {expected:#04x}, got {got:#04x}")]
    BadChecksum { expected: u8, got: u8 },

    #[error("frame too short or impossible head fields")]
    BadHeader,

    #[error("body length disagrees with declared msg_len: expected {expected}, got {got}")]
    BadLength { expected: usize, got: usize },

    #[error("message body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: usize, max: usize },

    #[error("non-decimal digit {0:?} in BCD field")]
    BadDigit(char),

    #[error("BCD field overflows {max} digits: {got}")]
    TooManyDigits { max: usize, got: usize },
}

/// Dispatch and session state errors.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("no handler registered for message {0:#06x}")]
    NoHandler(u16),

    #[error("operation invalid in state {state}: {operation}")]
    BadState {
        state: &'static str,
        operation: &'static str,
    },

    #[error("registration rejected by platform: result {0}")]
    RegisterRejected(u8),

    #[error("authentication rejected by platform: result {0}")]
    AuthRejected(u8),

    #[error("peer acknowledged {msg_id:#06x} with result {result}")]
    AckFailed { msg_id: u16, result: u8 },

    #[error("polygon area {0} not found")]
    AreaNotFound(u32),

    #[error("polygon area {0} already exists")]
    AreaExists(u32),

    #[error("session for terminal {0} not found")]
    SessionNotFound(String),
}

/// Transport layer errors. These always propagate to the caller.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed to {addr}: {reason}")]
    ConnectFailed { addr: SocketAddr, reason: String },

    #[error("bind failed on {addr}: {reason}")]
    BindFailed { addr: SocketAddr, reason: String },

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed by peer")]
    Closed,

    #[error("operation timed out")]
    Timeout,
}

impl Error {
    /// Check whether the error is local to a single frame.
    ///
    /// Frame-local errors are logged and answered on the protocol level
    /// (or silently dropped for checksum failures); they never close the
    /// session.
    pub fn is_frame_local(&self) -> bool {
        matches!(self, Error::Codec(_) | Error::Protocol(ProtocolError::NoHandler(_)))
    }

    /// Check whether the error indicates the peer is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Error::Transport(TransportError::Closed | TransportError::ConnectFailed { .. })
                | Error::Io(_)
        )
    }
}
