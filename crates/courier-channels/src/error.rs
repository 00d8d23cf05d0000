use thiserror::Error;

use courier_core::CourierError;

/// Errors that can occur within any adapter or the registry.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The underlying transport could not be established.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A message could not be delivered to the remote endpoint.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The platform rejected the supplied credentials or token.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// An operation exceeded its allowed time budget.
    #[error("Operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The adapter-specific configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An adapter with the same id is already in the registry.
    #[error("adapter already registered: {id}")]
    DuplicateId { id: String },

    /// No adapter with this id is registered.
    #[error("adapter not found: {id}")]
    NotFound { id: String },

    /// Outbound routing found nothing for the destination.
    #[error("no adapter found for channel type {channel_type}")]
    NoAdapter { channel_type: String },

    /// The operation needs a started adapter.
    #[error("adapter is not running")]
    NotRunning,

    /// The platform or this transport does not offer the operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// A frame, envelope or reply did not match the wire format.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<CourierError> for ChannelError {
    fn from(err: CourierError) -> Self {
        ChannelError::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
