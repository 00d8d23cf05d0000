pub mod adapter;
pub mod base;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod retry;
pub mod types;

pub use adapter::{Adapter, MessageHandler};
pub use base::BaseAdapter;
pub use dispatch::spawn_dispatcher;
pub use courier_core::config::AdapterConfig;
pub use error::{ChannelError, Result};
pub use lifecycle::{Lifecycle, Running};
pub use registry::Registry;
pub use types::{
    Attachment, Capabilities, ChannelType, ChatType, Destination, IncomingMessage, MessageType,
    ProbeResult, ReactionRequest, RuntimeState, SendRequest, SendResult, TransportStyle,
};
