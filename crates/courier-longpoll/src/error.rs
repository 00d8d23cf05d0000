use thiserror::Error;

use courier_channels::ChannelError;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {description}")]
    Api { description: String },

    #[error("invalid {field}: {value}")]
    InvalidId { field: &'static str, value: String },

    #[error("cursor I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PollError> for ChannelError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::Http(e) => ChannelError::ConnectionFailed(e.to_string()),
            PollError::Api { description } if description.contains("Unauthorized") => {
                ChannelError::AuthFailed(description)
            }
            PollError::Api { description } => ChannelError::SendFailed(description),
            PollError::InvalidId { field, value } => {
                ChannelError::SendFailed(format!("invalid {field}: {value}"))
            }
            PollError::Io(e) => ChannelError::Io(e),
        }
    }
}
