use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::SessionError;

/// Text-frame transport underneath a gateway session.
///
/// `recv` must be cancel-safe: the session polls it inside `select!`.
#[async_trait]
pub trait FrameTransport: Send {
    /// Next text frame. `None` once the peer has closed.
    async fn recv(&mut self) -> Option<Result<String, SessionError>>;

    async fn send(&mut self, text: String) -> Result<(), SessionError>;

    async fn close(&mut self) {}
}

/// Opens a fresh transport for every session attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn FrameTransport>, SessionError>;
}

/// Real gateway connection over `tokio-tungstenite`.
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameTransport for WsTransport {
    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "gateway sent close");
                    return None;
                }
                // Pings are answered by tungstenite itself; binary frames are
                // only used with compression, which identify never requests.
                Ok(_) => continue,
                Err(e) => return Some(Err(SessionError::Transport(e.to_string()))),
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), SessionError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

/// Dials the configured gateway URL.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn FrameTransport>, SessionError> {
        let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;
        debug!(url = %self.url, "gateway socket connected");
        Ok(Box::new(WsTransport { stream }))
    }
}

/// In-process transport: two linked ends, each seeing what the other sends.
///
/// Dropping one end closes the other.
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryTransport {
    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            MemoryTransport { tx: a_tx, rx: b_rx },
            MemoryTransport { tx: b_tx, rx: a_rx },
        )
    }
}

#[async_trait]
impl FrameTransport for MemoryTransport {
    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn send(&mut self, text: String) -> Result<(), SessionError> {
        self.tx.send(text).map_err(|_| SessionError::Closed)
    }
}
