//! Child process bridge: request/response correlation by id, notification
//! demultiplexing, stderr drain and exit supervision.

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use courier_core::config::RPC_KILL_GRACE_MS;

use crate::error::RpcError;
use crate::protocol::{classify, Inbound, RpcNotification, RpcRequest};

/// How long to wait for exit after closing stdin before killing.
pub const KILL_GRACE: Duration = Duration::from_millis(RPC_KILL_GRACE_MS);

/// Upper bound on waiting for the kill to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

type Reply = Result<Value, RpcError>;

/// In-flight requests keyed by id. Guarded by its own lock, never held
/// across an await.
#[derive(Default)]
struct Pending(Mutex<HashMap<u64, oneshot::Sender<Reply>>>);

impl Pending {
    fn insert(&self, id: u64, tx: oneshot::Sender<Reply>) {
        self.lock().insert(id, tx);
    }

    fn take(&self, id: u64) -> Option<oneshot::Sender<Reply>> {
        self.lock().remove(&id)
    }

    /// Drop every waiter; their receivers observe the closed channel.
    fn fail_all(&self) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        drained.len()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Reply>>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes the pending entry on every exit path of a request, including the
/// caller dropping the future.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.take(self.id);
    }
}

/// A spawned JSON-RPC child process.
///
/// Dropping the bridge kills the child.
pub struct RpcBridge {
    label: String,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    pending: Arc<Pending>,
    next_id: AtomicU64,
    /// Fires once the process has exited.
    closed: CancellationToken,
    kill: CancellationToken,
    exit_status: Arc<Mutex<Option<ExitStatus>>>,
}

impl std::fmt::Debug for RpcBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcBridge")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl RpcBridge {
    /// Spawn `command` and start the reader, stderr drain and exit watcher.
    ///
    /// Notifications are delivered in stdout order on the returned receiver,
    /// which ends when stdout closes. Must be called inside a tokio runtime.
    pub fn spawn(
        label: &str,
        command: &str,
        args: &[String],
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<RpcNotification>), RpcError> {
        info!(bridge = %label, command, ?args, "spawning rpc process");

        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RpcError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(RpcError::Spawn {
                command: command.to_string(),
                source: std::io::Error::other("stdio pipes not captured"),
            });
        };

        let bridge = Arc::new(Self {
            label: label.to_string(),
            stdin: tokio::sync::Mutex::new(Some(stdin)),
            pending: Arc::new(Pending::default()),
            next_id: AtomicU64::new(1),
            closed: CancellationToken::new(),
            kill: CancellationToken::new(),
            exit_status: Arc::new(Mutex::new(None)),
        });

        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        tokio::spawn(read_stdout(
            label.to_string(),
            stdout,
            Arc::clone(&bridge.pending),
            notify_tx,
        ));
        tokio::spawn(drain_stderr(label.to_string(), stderr));
        tokio::spawn(watch_exit(
            label.to_string(),
            child,
            bridge.kill.clone(),
            bridge.closed.clone(),
            Arc::clone(&bridge.pending),
            Arc::clone(&bridge.exit_status),
        ));

        Ok((bridge, notify_rx))
    }

    /// Call `method` and wait for its reply.
    ///
    /// Resolves with the reply, [`RpcError::Timeout`] after `timeout`, or
    /// [`RpcError::Closed`] as soon as the process is gone. The pending
    /// entry is always removed.
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        if self.closed.is_cancelled() {
            return Err(RpcError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = RpcRequest::new(id, method, &params).to_line()?;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        debug!(bridge = %self.label, id, method, "rpc request");
        let exchange = async {
            self.write_line(&line).await?;
            tokio::select! {
                biased;
                reply = rx => reply.unwrap_or(Err(RpcError::Closed)),
                _ = self.closed.cancelled() => Err(RpcError::Closed),
            }
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(reply) => reply,
            Err(_) => {
                debug!(bridge = %self.label, id, method, "rpc request timed out");
                Err(RpcError::Timeout {
                    method: method.to_string(),
                    ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn write_line(&self, line: &str) -> Result<(), RpcError> {
        let mut stdin = self.stdin.lock().await;
        let Some(pipe) = stdin.as_mut() else {
            return Err(RpcError::Closed);
        };
        let written = async {
            pipe.write_all(line.as_bytes()).await?;
            pipe.flush().await
        };
        match written.await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Err(RpcError::Closed),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the process has exited.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        *self
            .exit_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Close stdin, give the process [`KILL_GRACE`] to exit, then kill it.
    pub async fn shutdown(&self) {
        self.stdin.lock().await.take();

        if tokio::time::timeout(KILL_GRACE, self.closed.cancelled())
            .await
            .is_ok()
        {
            debug!(bridge = %self.label, "rpc process exited after stdin closed");
            return;
        }

        warn!(
            bridge = %self.label,
            grace_ms = KILL_GRACE.as_millis() as u64,
            "rpc process still running after stdin closed, killing"
        );
        self.kill.cancel();
        if tokio::time::timeout(REAP_TIMEOUT, self.closed.cancelled())
            .await
            .is_err()
        {
            warn!(bridge = %self.label, "rpc process not reaped after kill");
        }
    }
}

impl Drop for RpcBridge {
    fn drop(&mut self) {
        self.kill.cancel();
    }
}

async fn read_stdout(
    label: String,
    stdout: ChildStdout,
    pending: Arc<Pending>,
    notifications: mpsc::UnboundedSender<RpcNotification>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(bridge = %label, "rpc stdout closed");
                break;
            }
            Err(e) => {
                warn!(bridge = %label, error = %e, "error reading rpc stdout");
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match classify(trimmed) {
            Ok(Inbound::Response { id, outcome }) => match pending.take(id) {
                Some(tx) => {
                    let reply = outcome.map_err(|e| RpcError::Remote {
                        code: e.code,
                        message: e.message,
                    });
                    let _ = tx.send(reply);
                }
                None => debug!(bridge = %label, id, "response for unknown or expired request"),
            },
            Ok(Inbound::Notification(notification)) => {
                // Receiver gone means the owner stopped listening; keep draining.
                let _ = notifications.send(notification);
            }
            Ok(Inbound::Other) => debug!(bridge = %label, line = %trimmed, "ignoring rpc message"),
            Err(e) => warn!(bridge = %label, error = %e, line = %trimmed, "unparsable rpc line"),
        }
    }
}

async fn drain_stderr(label: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            warn!(bridge = %label, stderr = %trimmed, "rpc process stderr");
        }
    }
}

async fn watch_exit(
    label: String,
    mut child: Child,
    kill: CancellationToken,
    closed: CancellationToken,
    pending: Arc<Pending>,
    exit_status: Arc<Mutex<Option<ExitStatus>>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill.cancelled() => {
            if let Err(e) = child.start_kill() {
                warn!(bridge = %label, error = %e, "failed to kill rpc process");
            }
            child.wait().await
        }
    };

    match status {
        Ok(status) => {
            info!(bridge = %label, %status, "rpc process exited");
            *exit_status.lock().unwrap_or_else(PoisonError::into_inner) = Some(status);
        }
        Err(e) => warn!(bridge = %label, error = %e, "failed to wait for rpc process"),
    }

    closed.cancel();
    let failed = pending.fail_all();
    if failed > 0 {
        debug!(bridge = %label, failed, "failed pending requests after exit");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;

    fn sh(script: &str) -> (Arc<RpcBridge>, mpsc::UnboundedReceiver<RpcNotification>) {
        RpcBridge::spawn("test", "sh", &["-c".to_string(), script.to_string()]).unwrap()
    }

    #[tokio::test]
    async fn unanswered_request_times_out_without_leaking() {
        let (bridge, _rx) = sh("cat > /dev/null");

        let err = bridge
            .request("ping", json!({}), Duration::from_millis(50))
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Timeout { ms: 50, .. }), "{err}");
        assert_eq!(bridge.pending_count(), 0);
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn response_is_matched_by_id() {
        let (bridge, _rx) = sh(
            r#"read line; echo '{"jsonrpc":"2.0","id":1,"result":{"version":"0.13.4"}}'; cat > /dev/null"#,
        );

        let result = bridge
            .request("version", json!({}), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(result, json!({ "version": "0.13.4" }));
        assert_eq!(bridge.pending_count(), 0);
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn remote_error_is_surfaced() {
        let (bridge, _rx) = sh(
            r#"read line; echo '{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"Method not implemented"}}'; cat > /dev/null"#,
        );

        let err = bridge
            .request("bogus", json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Remote { code: -32601, .. }), "{err}");
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn notifications_arrive_in_order_and_junk_is_skipped() {
        let (bridge, mut rx) = sh(
            r#"echo '{"jsonrpc":"2.0","method":"receive","params":{"n":1}}'
echo 'not json'
echo '{"jsonrpc":"2.0","method":"receive","params":{"n":2}}'
cat > /dev/null"#,
        );

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.method, "receive");
        assert_eq!(first.params, json!({ "n": 1 }));
        assert_eq!(second.params, json!({ "n": 2 }));
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn process_exit_fails_requests_fast() {
        let (bridge, _rx) = sh("read line; exit 3");

        let started = Instant::now();
        let err = bridge
            .request("send", json!({}), Duration::from_secs(30))
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Closed), "{err}");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(bridge.pending_count(), 0);

        bridge.closed().await;
        assert_eq!(bridge.exit_status().and_then(|s| s.code()), Some(3));
        let err = bridge
            .request("send", json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Closed));
    }

    #[tokio::test]
    async fn shutdown_closes_stdin_first() {
        let (bridge, _rx) = sh("cat > /dev/null");

        let started = Instant::now();
        bridge.shutdown().await;

        assert!(bridge.is_closed());
        assert!(started.elapsed() < KILL_GRACE);
        assert!(bridge.exit_status().unwrap().success());
    }

    #[tokio::test]
    async fn shutdown_kills_a_process_that_ignores_stdin() {
        let (bridge, _rx) = sh("exec sleep 30");

        let started = Instant::now();
        bridge.shutdown().await;

        assert!(bridge.is_closed());
        assert!(started.elapsed() >= KILL_GRACE);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn dropped_request_future_removes_pending_entry() {
        let (bridge, _rx) = sh("cat > /dev/null");

        let request = bridge.request("ping", json!({}), Duration::from_secs(30));
        let _ = tokio::time::timeout(Duration::from_millis(20), request).await;

        assert_eq!(bridge.pending_count(), 0);
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn spawning_a_missing_binary_fails() {
        let err = RpcBridge::spawn("test", "courier-no-such-binary-42", &[]).unwrap_err();
        assert!(matches!(err, RpcError::Spawn { .. }));
    }
}
