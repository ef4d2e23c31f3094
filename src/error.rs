use thiserror::Error;

/// Crate-wide error type.
///
/// Codec failures are surfaced verbatim; nothing in this crate retries.
/// Read-loop failures on the WebSocket client are latched and returned
/// from the next send.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(String),

    /// The input ended before a complete MessagePack value was read.
    #[error("incomplete value: need more bytes")]
    Incomplete,

    #[error("chunk not found")]
    ChunkNotFound,

    #[error("ack mismatch: expected {expected:?}, got {got:?}")]
    AckMismatch { expected: String, got: String },

    /// Peer sent a close frame. Normal Closure (1000) is swallowed by
    /// `Connection::listen`; every other code propagates.
    #[error("connection closed by peer: code {code}: {reason}")]
    Close { code: u16, reason: String },

    #[cfg(feature = "ws")]
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    /// Copy of an asynchronous failure stored on the client.
    #[error("async error: {0}")]
    Latched(String),

    #[error("a session is already active")]
    SessionAlreadyActive,

    #[error("no active session")]
    NoSession,

    #[error("already listening on this connection")]
    AlreadyListening,

    #[error("multiple close calls")]
    MultipleCloseCalls,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("close sent")]
    CloseSent,

    #[error("operation timed out")]
    Timeout,
}

impl From<rmp::encode::ValueWriteError> for Error {
    fn from(value: rmp::encode::ValueWriteError) -> Self {
        Error::Codec(value.to_string())
    }
}

impl From<rmp::decode::ValueReadError> for Error {
    fn from(value: rmp::decode::ValueReadError) -> Self {
        Error::Codec(value.to_string())
    }
}

impl From<rmp::decode::NumValueReadError> for Error {
    fn from(value: rmp::decode::NumValueReadError) -> Self {
        Error::Codec(value.to_string())
    }
}

// `rmpv::encode::Error` is a re-export of
// `rmp::encode::ValueWriteError`; the `ValueWriteError` impl above
// covers it.

impl From<rmpv::decode::Error> for Error {
    fn from(value: rmpv::decode::Error) -> Self {
        Error::Codec(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
