//! One gateway session: hello → identify → READY → (heartbeat ∥ read/dispatch).
//!
//! A session never reconnects by itself. It returns `Ok(())` only when the
//! adapter's token was cancelled; every other exit is a [`SessionError`] the
//! supervisor treats as transient.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use courier_channels::{ChannelType, IncomingMessage};
use courier_core::config::HANDSHAKE_TIMEOUT_MS;

use crate::error::SessionError;
use crate::frames::{
    GatewayFrame, OP_DISPATCH, OP_HEARTBEAT, OP_HEARTBEAT_ACK, OP_HELLO, OP_INVALID_SESSION,
    OP_RECONNECT,
};
use crate::message;
use crate::transport::{Connector, FrameTransport};

/// Highest dispatch sequence number seen in this session.
///
/// Stored as `seq + 1` so zero means "none yet". Only ever moves forward.
#[derive(Debug, Default)]
pub struct SequenceTracker(AtomicU64);

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, seq: u64) {
        self.0.fetch_max(seq.saturating_add(1), Ordering::SeqCst);
    }

    pub fn last(&self) -> Option<u64> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            n => Some(n - 1),
        }
    }
}

/// Who this session identifies as and how inbound messages are labelled.
#[derive(Debug, Clone)]
pub struct Identity {
    pub adapter: String,
    pub channel_type: ChannelType,
    pub token: String,
    pub intents: u64,
}

/// A gateway connection that has completed hello, identify and READY.
pub struct Established {
    transport: Box<dyn FrameTransport>,
    period: Duration,
    bot_id: Option<String>,
    seq: Option<u64>,
}

/// Connect and complete hello, identify and READY within the handshake timeout.
///
/// An invalid-session or close before READY means the credentials were
/// rejected. `Ok(None)` means the adapter was cancelled first.
pub async fn open(
    connector: &dyn Connector,
    identity: &Identity,
    cancel: &CancellationToken,
) -> Result<Option<Established>, SessionError> {
    let limit = Duration::from_millis(HANDSHAKE_TIMEOUT_MS);
    tokio::select! {
        _ = cancel.cancelled() => Ok(None),
        opened = tokio::time::timeout(limit, connect_and_identify(connector, identity)) => match opened {
            Ok(result) => result.map(Some),
            Err(_) => Err(SessionError::HandshakeTimeout { ms: HANDSHAKE_TIMEOUT_MS }),
        },
    }
}

async fn connect_and_identify(
    connector: &dyn Connector,
    identity: &Identity,
) -> Result<Established, SessionError> {
    let mut transport = connector.connect().await?;

    let period = await_hello(transport.as_mut()).await?;
    debug!(adapter = %identity.adapter, interval_ms = period.as_millis() as u64, "gateway hello");

    transport
        .send(GatewayFrame::identify(&identity.token, identity.intents).to_text())
        .await?;

    let (bot_id, seq) = await_ready(transport.as_mut(), identity).await?;
    info!(adapter = %identity.adapter, bot_id = ?bot_id, "gateway ready");

    Ok(Established {
        transport,
        period,
        bot_id,
        seq,
    })
}

/// Run an established session until it ends.
///
/// Mapped messages go to `events` in transport order.
pub async fn drive(
    established: Established,
    identity: &Identity,
    events: &mpsc::UnboundedSender<IncomingMessage>,
    cancel: &CancellationToken,
) -> Result<(), SessionError> {
    let Established {
        mut transport,
        period,
        bot_id,
        seq: ready_seq,
    } = established;

    let seq = Arc::new(SequenceTracker::new());
    if let Some(s) = ready_seq {
        seq.observe(s);
    }
    let acked = Arc::new(AtomicBool::new(true));
    let session = cancel.child_token();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let heartbeat = tokio::spawn(heartbeat_loop(
        identity.adapter.clone(),
        period,
        Arc::clone(&seq),
        Arc::clone(&acked),
        out_tx,
        session.clone(),
    ));

    let mut reader = Reader {
        identity,
        events,
        seq: &seq,
        acked: &acked,
        bot_id,
    };

    let result = loop {
        tokio::select! {
            biased;
            _ = session.cancelled() => {
                if cancel.is_cancelled() {
                    break Ok(());
                }
                break Err(SessionError::HeartbeatTimeout);
            }
            Some(text) = out_rx.recv() => {
                if let Err(e) = transport.send(text).await {
                    break Err(e);
                }
            }
            frame = transport.recv() => {
                let text = match frame {
                    None => break Err(SessionError::Closed),
                    Some(Err(e)) => break Err(e),
                    Some(Ok(text)) => text,
                };
                if let Err(e) = reader.handle(transport.as_mut(), &text).await {
                    break Err(e);
                }
            }
        }
    };

    // The heartbeat task belongs to this session and must not outlive it.
    session.cancel();
    let _ = heartbeat.await;
    transport.close().await;
    result
}

/// Wait for the hello frame and return its heartbeat interval.
async fn await_hello(transport: &mut dyn FrameTransport) -> Result<Duration, SessionError> {
    loop {
        let text = match transport.recv().await {
            None => return Err(SessionError::Closed),
            Some(frame) => frame?,
        };

        match serde_json::from_str::<GatewayFrame>(&text) {
            Ok(frame) if frame.op == OP_HELLO => {
                return match frame.heartbeat_interval() {
                    Some(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
                    _ => Err(SessionError::Protocol(
                        "hello without a usable heartbeat_interval".into(),
                    )),
                };
            }
            Ok(frame) => debug!(op = frame.op, "frame before hello ignored"),
            Err(e) => warn!(error = %e, "undecodable frame before hello"),
        }
    }
}

/// Wait for the READY dispatch and return the bot's user id and its sequence.
async fn await_ready(
    transport: &mut dyn FrameTransport,
    identity: &Identity,
) -> Result<(Option<String>, Option<u64>), SessionError> {
    loop {
        let text = match transport.recv().await {
            None => return Err(SessionError::Closed),
            Some(frame) => frame?,
        };
        let frame = match serde_json::from_str::<GatewayFrame>(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(adapter = %identity.adapter, error = %e, "undecodable frame before ready");
                continue;
            }
        };

        match frame.op {
            OP_DISPATCH if frame.t.as_deref() == Some("READY") => {
                return Ok((ready_user_id(&frame), frame.s));
            }
            OP_INVALID_SESSION => return Err(SessionError::InvalidSession),
            OP_RECONNECT => return Err(SessionError::ReconnectRequested),
            op => debug!(adapter = %identity.adapter, op, "frame before ready ignored"),
        }
    }
}

fn ready_user_id(frame: &GatewayFrame) -> Option<String> {
    frame
        .d
        .pointer("/user/id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

async fn heartbeat_loop(
    adapter: String,
    period: Duration,
    seq: Arc<SequenceTracker>,
    acked: Arc<AtomicBool>,
    out: mpsc::UnboundedSender<String>,
    session: CancellationToken,
) {
    let mut tick = tokio::time::interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = session.cancelled() => return,
            _ = tick.tick() => {
                if !acked.swap(false, Ordering::SeqCst) {
                    warn!(adapter = %adapter, "heartbeat not acknowledged, dropping session");
                    session.cancel();
                    return;
                }
                let last = seq.last();
                debug!(adapter = %adapter, seq = ?last, "heartbeat");
                if out.send(GatewayFrame::heartbeat(last).to_text()).is_err() {
                    return;
                }
            }
        }
    }
}

struct Reader<'a> {
    identity: &'a Identity,
    events: &'a mpsc::UnboundedSender<IncomingMessage>,
    seq: &'a SequenceTracker,
    acked: &'a AtomicBool,
    bot_id: Option<String>,
}

impl Reader<'_> {
    /// Handle one inbound frame. An `Err` ends the session.
    async fn handle(
        &mut self,
        transport: &mut dyn FrameTransport,
        text: &str,
    ) -> Result<(), SessionError> {
        let frame: GatewayFrame = match serde_json::from_str(text) {
            Ok(f) => f,
            Err(e) => {
                warn!(adapter = %self.identity.adapter, error = %e, "dropping undecodable frame");
                return Ok(());
            }
        };

        if let Some(s) = frame.s {
            self.seq.observe(s);
        }

        match frame.op {
            OP_DISPATCH => self.dispatch(&frame),
            OP_HEARTBEAT => {
                transport
                    .send(GatewayFrame::heartbeat(self.seq.last()).to_text())
                    .await?;
            }
            OP_HEARTBEAT_ACK => self.acked.store(true, Ordering::SeqCst),
            OP_RECONNECT => return Err(SessionError::ReconnectRequested),
            OP_INVALID_SESSION => return Err(SessionError::InvalidSession),
            op => debug!(adapter = %self.identity.adapter, op, "ignoring opcode"),
        }
        Ok(())
    }

    fn dispatch(&mut self, frame: &GatewayFrame) {
        match frame.t.as_deref() {
            Some("READY") => {
                self.bot_id = ready_user_id(frame);
                info!(adapter = %self.identity.adapter, bot_id = ?self.bot_id, "gateway ready");
            }
            Some("MESSAGE_CREATE") => {
                let Some(msg) = message::from_message_create(
                    self.identity.channel_type,
                    &frame.d,
                    self.bot_id.as_deref(),
                ) else {
                    return;
                };
                if self.events.send(msg).is_err() {
                    debug!(adapter = %self.identity.adapter, "dispatcher gone, message dropped");
                }
            }
            other => debug!(adapter = %self.identity.adapter, event = ?other, "ignoring dispatch"),
        }
    }
}
