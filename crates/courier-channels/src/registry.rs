use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use courier_core::config::UNREGISTER_STOP_TIMEOUT_SECS;
use tracing::{error, info, warn};

use crate::{
    adapter::{Adapter, MessageHandler},
    error::{ChannelError, Result},
    types::{ChannelType, ReactionRequest, RuntimeState, SendRequest, SendResult},
};

/// Owns every adapter instance and routes outbound traffic between them.
///
/// The map lock is held only for map operations. Adapter methods are always
/// called on a snapshot taken under the lock and released before the call, so
/// an adapter may call back into the registry from `start`/`stop`.
pub struct Registry {
    handler: Arc<dyn MessageHandler>,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    adapters: HashMap<String, Arc<dyn Adapter>>,
    /// Registration order, used for the "first adapter of this type" fallback.
    order: Vec<String>,
}

impl Inner {
    fn ordered(&self) -> Vec<Arc<dyn Adapter>> {
        self.order
            .iter()
            .filter_map(|id| self.adapters.get(id).cloned())
            .collect()
    }
}

impl Registry {
    /// Create an empty registry whose adapters all dispatch to `handler`.
    pub fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            handler,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Add an adapter and inject the shared handler into it.
    ///
    /// Fails with [`ChannelError::DuplicateId`] when the id is taken; the
    /// rejected adapter is not stored and will never be started.
    pub fn register(&self, adapter: Arc<dyn Adapter>) -> Result<()> {
        let id = adapter.id().to_string();
        if self.read().adapters.contains_key(&id) {
            return Err(ChannelError::DuplicateId { id });
        }

        adapter.set_handler(Arc::clone(&self.handler));

        {
            let mut inner = self.write();
            if inner.adapters.contains_key(&id) {
                return Err(ChannelError::DuplicateId { id });
            }
            inner.adapters.insert(id.clone(), adapter);
            inner.order.push(id.clone());
        }

        info!(adapter = %id, "registered adapter");
        Ok(())
    }

    /// Stop (bounded by a short timeout) and remove an adapter.
    pub async fn unregister(&self, id: &str) -> Result<()> {
        let adapter = self.get(id).ok_or_else(|| ChannelError::NotFound { id: id.into() })?;

        let limit = Duration::from_secs(UNREGISTER_STOP_TIMEOUT_SECS);
        match tokio::time::timeout(limit, adapter.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(adapter = %id, error = %e, "error while stopping adapter"),
            Err(_) => warn!(adapter = %id, "adapter stop timed out during unregister"),
        }

        let mut inner = self.write();
        inner.adapters.remove(id);
        inner.order.retain(|existing| existing != id);
        info!(adapter = %id, "unregistered adapter");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Adapter>> {
        self.read().adapters.get(id).cloned()
    }

    /// Every adapter of `channel_type`, in registration order.
    pub fn get_by_type(&self, channel_type: ChannelType) -> Vec<Arc<dyn Adapter>> {
        self.all()
            .into_iter()
            .filter(|a| a.channel_type() == channel_type)
            .collect()
    }

    /// Every adapter, in registration order.
    pub fn all(&self) -> Vec<Arc<dyn Adapter>> {
        self.read().ordered()
    }

    /// Start every adapter. A failure is logged and does not stop the others.
    pub async fn start_all(&self) {
        for adapter in self.all() {
            info!(adapter = %adapter.id(), "starting adapter");
            if let Err(e) = adapter.start().await {
                error!(adapter = %adapter.id(), error = %e, "failed to start adapter");
            }
        }
    }

    /// Stop every adapter. Errors are logged and do not abort the rest.
    pub async fn stop_all(&self) {
        for adapter in self.all() {
            info!(adapter = %adapter.id(), "stopping adapter");
            if let Err(e) = adapter.stop().await {
                warn!(adapter = %adapter.id(), error = %e, "error while stopping adapter");
            }
        }
    }

    /// Route a message: an adapter whose id equals the channel type string
    /// wins, otherwise the first registered adapter of that type.
    pub async fn send(&self, req: &SendRequest) -> Result<SendResult> {
        let adapter = self.resolve(req.to.channel_type)?;
        adapter.send(req).await
    }

    /// Route a reaction the same way as [`send`](Registry::send).
    pub async fn send_reaction(&self, req: &ReactionRequest) -> Result<()> {
        let adapter = self.resolve(req.to.channel_type)?;
        adapter.send_reaction(req).await
    }

    /// Snapshot of every adapter's runtime state, sorted by id.
    pub fn status(&self) -> Vec<(String, RuntimeState)> {
        let mut result: Vec<(String, RuntimeState)> = self
            .all()
            .into_iter()
            .map(|a| (a.id().to_string(), a.state()))
            .collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    fn resolve(&self, channel_type: ChannelType) -> Result<Arc<dyn Adapter>> {
        let (exact, ordered) = {
            let inner = self.read();
            (
                inner.adapters.get(channel_type.as_str()).cloned(),
                inner.ordered(),
            )
        };
        if let Some(adapter) = exact {
            return Ok(adapter);
        }
        ordered
            .into_iter()
            .find(|a| a.channel_type() == channel_type)
            .ok_or_else(|| ChannelError::NoAdapter {
                channel_type: channel_type.to_string(),
            })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
