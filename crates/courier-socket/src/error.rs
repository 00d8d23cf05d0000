use thiserror::Error;

use courier_channels::ChannelError;

/// Why a gateway session ended. Every variant is transient: the adapter
/// reconnects after the fixed delay.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("no hello within {ms}ms")]
    HandshakeTimeout { ms: u64 },

    #[error("heartbeat not acknowledged, connection is a zombie")]
    HeartbeatTimeout,

    #[error("server requested reconnect")]
    ReconnectRequested,

    #[error("server invalidated the session")]
    InvalidSession,

    #[error("connection closed by peer")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<SessionError> for ChannelError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Connect(msg) => ChannelError::ConnectionFailed(msg),
            SessionError::HandshakeTimeout { ms } => ChannelError::Timeout { ms },
            SessionError::Protocol(msg) => ChannelError::Protocol(msg),
            other => ChannelError::ConnectionFailed(other.to_string()),
        }
    }
}
