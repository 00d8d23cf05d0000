use thiserror::Error;

use courier_channels::ChannelError;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid encoding key: {0}")]
    InvalidKey(String),

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("ciphertext of {len} bytes is not block aligned")]
    Unaligned { len: usize },

    #[error("malformed envelope: {0}")]
    Envelope(String),
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid XML: {0}")]
    Xml(String),

    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("body is neither JSON nor XML")]
    UnknownFormat,
}

impl From<CryptoError> for ChannelError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidKey(msg) => ChannelError::ConfigError(msg),
            other => ChannelError::Protocol(other.to_string()),
        }
    }
}

impl From<PayloadError> for ChannelError {
    fn from(err: PayloadError) -> Self {
        ChannelError::Protocol(err.to_string())
    }
}
