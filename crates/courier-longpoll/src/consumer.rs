use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use courier_channels::{
    retry::{sleep_or_cancel, RECONNECT_DELAY},
    BaseAdapter,
};

use crate::cursor::CursorStore;
use crate::source::PollSource;

/// Long-poll loop for one adapter.
///
/// Each item advances the cursor to `seq + 1`, which is persisted before the
/// item is dispatched. Dispatch is inline, so items reach the handler in
/// delivery order.
pub struct Consumer {
    source: Arc<dyn PollSource>,
    store: CursorStore,
    base: Arc<BaseAdapter>,
    wait: Duration,
}

impl Consumer {
    pub fn new(
        source: Arc<dyn PollSource>,
        store: CursorStore,
        base: Arc<BaseAdapter>,
        wait: Duration,
    ) -> Self {
        Self {
            source,
            store,
            base,
            wait,
        }
    }

    /// Poll until `cancel` fires. Poll errors are retried after [`RECONNECT_DELAY`].
    pub async fn run(self, cancel: CancellationToken) {
        let mut cursor = self.store.load().await;
        info!(adapter = %self.base.id(), cursor, "long-poll consumer started");

        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = self.source.poll(cursor, self.wait) => polled,
            };

            let items = match polled {
                Ok(items) => items,
                Err(e) => {
                    self.base.record_error(&e);
                    warn!(
                        adapter = %self.base.id(),
                        error = %e,
                        delay_secs = RECONNECT_DELAY.as_secs(),
                        "poll failed, retrying"
                    );
                    if !sleep_or_cancel(&cancel, RECONNECT_DELAY).await {
                        break;
                    }
                    continue;
                }
            };

            for item in items {
                let next = item.seq.saturating_add(1);
                if next > cursor {
                    cursor = next;
                    if let Err(e) = self.store.store(cursor).await {
                        self.base.record_error(&e);
                        warn!(adapter = %self.base.id(), cursor, error = %e, "failed to persist cursor");
                    }
                }

                let Some(msg) = item.message else {
                    debug!(adapter = %self.base.id(), seq = item.seq, "skipping update without message");
                    continue;
                };
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.base.dispatch(&msg) => {}
                }
            }

            if cancel.is_cancelled() {
                break;
            }
        }

        debug!(adapter = %self.base.id(), cursor, "long-poll consumer stopped");
    }
}
