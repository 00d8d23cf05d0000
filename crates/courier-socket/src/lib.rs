//! A persistent gateway socket with handshake, heartbeat and
//! sequenced dispatch, reconnecting after a fixed delay whenever the session
//! drops.

pub mod adapter;
pub mod error;
pub mod frames;
pub mod message;
pub mod rest;
pub mod session;
pub mod transport;

pub use adapter::{SocketAdapter, SocketSettings};
pub use error::SessionError;
pub use frames::GatewayFrame;
pub use session::SequenceTracker;
pub use transport::{Connector, FrameTransport, MemoryTransport, WsConnector};
