//! A long-lived child process spoken to over line-delimited
//! JSON-RPC 2.0 on stdin/stdout.

pub mod adapter;
pub mod bridge;
pub mod envelope;
pub mod error;
pub mod protocol;

pub use adapter::{RpcAdapter, RpcSettings};
pub use bridge::RpcBridge;
pub use error::RpcError;
pub use protocol::{Inbound, RpcErrorObject, RpcNotification, RpcRequest};
