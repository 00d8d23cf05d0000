//! Start/stop guard shared by every transport adapter.
//!
//! A `Lifecycle<T>` owns the live transport handle `T` together with the
//! cancellation token and background tasks created at `start`. Concurrent
//! `start`/`stop` calls serialize on a tokio mutex that is held across `init`
//! and shutdown. The slot holding the handle sits behind a separate std mutex
//! taken only for the swap, so `transport()` never waits on a transition in
//! flight. The handle only becomes reachable once `init` has fully succeeded.

use std::future::Future;
use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{base::BaseAdapter, error::Result};

/// How long `stop` waits for background tasks before aborting them.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything created by a successful start.
pub struct Running<T> {
    pub cancel: CancellationToken,
    pub tasks: Vec<JoinHandle<()>>,
    pub transport: T,
}

pub struct Lifecycle<T> {
    transition: Mutex<()>,
    slot: StdMutex<Option<Running<T>>>,
}

impl<T> Default for Lifecycle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Lifecycle<T> {
    pub fn new() -> Self {
        Self {
            transition: Mutex::new(()),
            slot: StdMutex::new(None),
        }
    }

    /// Run `init` with a fresh cancellation token unless already running.
    ///
    /// `init` returns the transport handle and the tasks it spawned. On error
    /// the token is cancelled (stopping anything `init` already spawned), the
    /// error is recorded and the adapter stays not-running.
    pub async fn start<F, Fut>(&self, base: &BaseAdapter, mode: &str, init: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(T, Vec<JoinHandle<()>>)>>,
    {
        let _transition = self.transition.lock().await;
        if self.slot().is_some() {
            debug!(adapter = %base.id(), "start ignored, already running");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        match init(cancel.clone()).await {
            Ok((transport, tasks)) => {
                *self.slot() = Some(Running {
                    cancel,
                    tasks,
                    transport,
                });
                base.mark_started(mode);
                info!(adapter = %base.id(), mode, "adapter started");
                Ok(())
            }
            Err(e) => {
                cancel.cancel();
                base.record_error(&e);
                warn!(adapter = %base.id(), error = %e, "adapter failed to start");
                Err(e)
            }
        }
    }

    /// Cancel, run `shutdown` on the transport, and join the background tasks.
    ///
    /// The handle is unpublished before shutdown begins. No-op when not running.
    pub async fn stop<F, Fut>(&self, base: &BaseAdapter, shutdown: F) -> Result<()>
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = ()>,
    {
        let _transition = self.transition.lock().await;
        let Some(running) = self.slot().take() else {
            debug!(adapter = %base.id(), "stop ignored, not running");
            return Ok(());
        };

        base.mark_stopped();
        running.cancel.cancel();
        shutdown(running.transport).await;

        for mut task in running.tasks {
            match tokio::time::timeout(TASK_JOIN_TIMEOUT, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_panic() => {
                    warn!(adapter = %base.id(), "background task panicked");
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!(adapter = %base.id(), "background task did not exit in time, aborting");
                    task.abort();
                }
            }
        }

        info!(adapter = %base.id(), "adapter stopped");
        Ok(())
    }

    /// Clone of the live transport handle, if running.
    pub fn transport(&self) -> Option<T>
    where
        T: Clone,
    {
        self.slot().as_ref().map(|r| r.transport.clone())
    }

    fn slot(&self) -> MutexGuard<'_, Option<Running<T>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;
    use crate::types::{Capabilities, ChannelType, TransportStyle};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn base() -> BaseAdapter {
        BaseAdapter::new(
            "l",
            "L",
            ChannelType::Webchat,
            Capabilities::builder(TransportStyle::Socket).build(),
        )
    }

    #[tokio::test]
    async fn second_start_does_not_reinitialize() {
        let base = base();
        let lifecycle: Lifecycle<u32> = Lifecycle::new();
        let inits = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let inits = inits.clone();
            lifecycle
                .start(&base, "test", |_cancel| async move {
                    inits.fetch_add(1, Ordering::SeqCst);
                    Ok((7, Vec::new()))
                })
                .await
                .unwrap();
        }

        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.transport(), Some(7));
        assert!(base.is_running());
    }

    #[tokio::test]
    async fn failed_start_leaves_nothing_behind() {
        let base = base();
        let lifecycle: Lifecycle<u32> = Lifecycle::new();

        let err = lifecycle
            .start(&base, "test", |_cancel| async {
                Err(ChannelError::ConfigError("no token".into()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ChannelError::ConfigError(_)));
        assert!(!base.is_running());
        assert!(lifecycle.transport().is_none());
        assert!(base.state().last_error.unwrap().contains("no token"));
    }

    #[tokio::test]
    async fn stop_cancels_tasks_and_is_idempotent() {
        let base = base();
        let lifecycle: Lifecycle<()> = Lifecycle::new();
        let exited = Arc::new(AtomicUsize::new(0));

        let flag = exited.clone();
        lifecycle
            .start(&base, "test", |cancel| async move {
                let task = tokio::spawn(async move {
                    cancel.cancelled().await;
                    flag.fetch_add(1, Ordering::SeqCst);
                });
                Ok(((), vec![task]))
            })
            .await
            .unwrap();

        lifecycle.stop(&base, |_| async {}).await.unwrap();
        lifecycle.stop(&base, |_| async {}).await.unwrap();

        assert_eq!(exited.load(Ordering::SeqCst), 1);
        let state = base.state();
        assert!(!state.running);
        assert!(state.last_stop_at.unwrap() >= state.last_start_at.unwrap());
    }

    #[tokio::test]
    async fn stop_before_start_is_noop() {
        let base = base();
        let lifecycle: Lifecycle<()> = Lifecycle::new();
        lifecycle.stop(&base, |_| async {}).await.unwrap();
        assert!(base.state().last_stop_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn transport_does_not_wait_for_slow_start() {
        let base = Arc::new(base());
        let lifecycle: Arc<Lifecycle<u32>> = Arc::new(Lifecycle::new());

        let starting = {
            let (base, lifecycle) = (base.clone(), lifecycle.clone());
            tokio::spawn(async move {
                lifecycle
                    .start(&base, "test", |_cancel| async {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        Ok((7, Vec::new()))
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let before = tokio::time::Instant::now();
        assert!(lifecycle.transport().is_none());
        assert_eq!(before.elapsed(), Duration::ZERO);

        starting.await.unwrap().unwrap();
        assert_eq!(lifecycle.transport(), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_is_gone_while_shutdown_runs() {
        let base = Arc::new(base());
        let lifecycle: Arc<Lifecycle<u32>> = Arc::new(Lifecycle::new());
        lifecycle
            .start(&base, "test", |_cancel| async { Ok((7, Vec::new())) })
            .await
            .unwrap();

        let stopping = {
            let (base, lifecycle) = (base.clone(), lifecycle.clone());
            tokio::spawn(async move {
                lifecycle
                    .stop(&base, |_| async {
                        tokio::time::sleep(Duration::from_secs(3)).await;
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        assert!(lifecycle.transport().is_none());
        assert!(!base.is_running());
        stopping.await.unwrap().unwrap();
    }
}
