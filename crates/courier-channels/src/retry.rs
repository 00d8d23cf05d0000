use std::time::Duration;

use courier_core::config::RECONNECT_DELAY_SECS;
use tokio_util::sync::CancellationToken;

/// Fixed delay before reconnecting a socket, re-polling, or respawning a bridge.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(RECONNECT_DELAY_SECS);

/// Sleep for `delay` unless `cancel` fires first.
///
/// Returns `true` when the full delay elapsed, `false` on cancellation.
pub async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
