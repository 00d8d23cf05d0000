use thiserror::Error;

use courier_channels::ChannelError;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{method} timed out after {ms}ms")]
    Timeout { method: String, ms: u64 },

    /// The process exited, or its stdin was closed.
    #[error("rpc process closed")]
    Closed,

    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<RpcError> for ChannelError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Timeout { ms, .. } => ChannelError::Timeout { ms },
            RpcError::Remote { code, message } => {
                ChannelError::SendFailed(format!("remote error {code}: {message}"))
            }
            RpcError::Io(e) => ChannelError::Io(e),
            RpcError::Serialization(e) => ChannelError::Serialization(e),
            other => ChannelError::ConnectionFailed(other.to_string()),
        }
    }
}
