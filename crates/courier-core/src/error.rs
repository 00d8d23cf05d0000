use thiserror::Error;

#[derive(Debug, Error)]
pub enum CourierError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing credential for adapter {adapter}: {reason}")]
    MissingCredential { adapter: String, reason: String },

    #[error("Invalid option {key} for adapter {adapter}: {reason}")]
    InvalidOption {
        adapter: String,
        key: String,
        reason: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CourierError {
    /// Short error code string used in status output and logs.
    pub fn code(&self) -> &'static str {
        match self {
            CourierError::Config(_) => "CONFIG_ERROR",
            CourierError::MissingCredential { .. } => "MISSING_CREDENTIAL",
            CourierError::InvalidOption { .. } => "INVALID_OPTION",
            CourierError::Serialization(_) => "SERIALIZATION_ERROR",
            CourierError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CourierError>;
