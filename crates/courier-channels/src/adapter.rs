use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::ChannelError,
    types::{
        Capabilities, ChannelType, IncomingMessage, ProbeResult, ReactionRequest, RuntimeState,
        SendRequest, SendResult,
    },
};

/// Receives every inbound message from every adapter.
///
/// Implemented by the agent layer. It may be invoked concurrently from
/// different adapters, and from the same webhook adapter. The returned error
/// is logged by the adapter and never retried.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_incoming(&self, msg: &IncomingMessage) -> anyhow::Result<()>;
}

/// Common interface implemented by every platform integration.
///
/// All methods take `&self` so a registry can hold `Arc<dyn Adapter>` and call
/// into adapters without holding its own lock. Implementations keep their
/// mutable transport state behind private locks.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Unique registry id (e.g. `"discord-main"`).
    fn id(&self) -> &str;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// Platform family used for outbound routing.
    fn channel_type(&self) -> ChannelType;

    fn capabilities(&self) -> &Capabilities;

    /// Begin receiving. Calling it on a running adapter is a no-op success.
    ///
    /// On error the adapter stays not-running and no transport handle is left behind.
    async fn start(&self) -> Result<(), ChannelError>;

    /// Stop receiving and release the transport. No-op when already stopped.
    async fn stop(&self) -> Result<(), ChannelError>;

    fn is_running(&self) -> bool;

    /// Alias of [`start`](Adapter::start); there is no separate auth phase.
    async fn connect(&self) -> Result<(), ChannelError> {
        self.start().await
    }

    /// Alias of [`stop`](Adapter::stop).
    async fn disconnect(&self) -> Result<(), ChannelError> {
        self.stop().await
    }

    fn is_connected(&self) -> bool {
        self.is_running()
    }

    /// Cheap reachability / credential check. Never mutates runtime state.
    async fn probe(&self) -> Result<ProbeResult, ChannelError>;

    /// Deliver one outbound message.
    async fn send(&self, req: &SendRequest) -> Result<SendResult, ChannelError>;

    async fn send_reaction(&self, req: &ReactionRequest) -> Result<(), ChannelError>;

    /// Copy of the current runtime state.
    fn state(&self) -> RuntimeState;

    /// Install the handler that inbound messages are dispatched to.
    fn set_handler(&self, handler: Arc<dyn MessageHandler>);
}
