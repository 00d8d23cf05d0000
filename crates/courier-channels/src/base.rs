use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    adapter::MessageHandler,
    types::{Capabilities, ChannelType, IncomingMessage, RuntimeState},
};

/// Shared lifecycle skeleton embedded by every transport adapter.
///
/// Holds identity, capabilities, the runtime state (behind the adapter's
/// private lock) and the injected message handler. Transport-specific handles
/// live next to it in the concrete adapter.
pub struct BaseAdapter {
    id: String,
    name: String,
    channel_type: ChannelType,
    capabilities: Capabilities,
    state: Mutex<RuntimeState>,
    handler: RwLock<Option<Arc<dyn MessageHandler>>>,
}

impl BaseAdapter {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        channel_type: ChannelType,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            channel_type,
            capabilities,
            state: Mutex::new(RuntimeState::default()),
            handler: RwLock::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().running
    }

    /// Copy-out read of the runtime state.
    pub fn state(&self) -> RuntimeState {
        self.lock_state().clone()
    }

    pub fn mark_started(&self, mode: &str) {
        let mut state = self.lock_state();
        state.running = true;
        state.mode = mode.to_string();
        state.last_start_at = Some(Utc::now());
        state.last_error = None;
    }

    /// Flip `running` off, then stamp `last_stop_at`.
    pub fn mark_stopped(&self) {
        let mut state = self.lock_state();
        state.running = false;
        state.last_stop_at = Some(Utc::now());
    }

    pub fn record_inbound(&self) {
        let mut state = self.lock_state();
        state.last_inbound_at = Some(Utc::now());
        state.message_count += 1;
    }

    pub fn record_outbound(&self) {
        self.lock_state().last_outbound_at = Some(Utc::now());
    }

    pub fn record_error(&self, err: impl Display) {
        self.lock_state().last_error = Some(err.to_string());
    }

    pub fn set_handler(&self, handler: Arc<dyn MessageHandler>) {
        *self
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn handler(&self) -> Option<Arc<dyn MessageHandler>> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Count the message and hand it to the handler.
    ///
    /// Handler errors are logged and swallowed; they never reach the transport.
    pub async fn dispatch(&self, msg: &IncomingMessage) {
        self.record_inbound();

        let Some(handler) = self.handler() else {
            warn!(adapter = %self.id, msg_id = %msg.id, "no handler installed, dropping message");
            return;
        };

        debug!(
            adapter = %self.id,
            msg_id = %msg.id,
            chat_id = %msg.chat_id,
            sender = %msg.sender_id,
            "dispatching inbound message"
        );

        if let Err(e) = handler.handle_incoming(msg).await {
            warn!(adapter = %self.id, msg_id = %msg.id, error = %e, "message handler failed");
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
