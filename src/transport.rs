//! Framed text channel to the gateway.
//!
//! One connection per transport; framing never leaks upward. I/O failures
//! surface as [`TransportEvent::Failed`] and it is the session layer that
//! decides whether to reconnect.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;
use tracing::{debug, trace, warn};

use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Closed,
    Failed { code: u16, reason: String },
    Message(String),
}

/// Bidirectional text channel. Implementations own a single connection;
/// [`Transport::subscribe`] fans events out to every subscriber in arrival
/// order.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<(), ClientError>;

    async fn disconnect(&self);

    fn send_text(&self, payload: String) -> Result<(), ClientError>;

    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent>;
}

struct Conn {
    out_tx: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    pinger: JoinHandle<()>,
}

struct Shared {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>,
    conn: Mutex<Option<Conn>>,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn drop_conn(&self) {
        if let Some(conn) = self.conn.lock().take() {
            conn.pinger.abort();
            conn.reader.abort();
        }
    }
}

/// WebSocket transport speaking the configured subprotocol.
pub struct WebSocketTransport {
    subprotocol: String,
    ping_interval: Duration,
    shared: Arc<Shared>,
}

impl WebSocketTransport {
    pub fn new(subprotocol: impl Into<String>, ping_interval: Duration) -> Self {
        Self {
            subprotocol: subprotocol.into(),
            ping_interval,
            shared: Arc::new(Shared {
                subscribers: Mutex::new(Vec::new()),
                conn: Mutex::new(None),
            }),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<(), ClientError> {
        self.shared.drop_conn();

        let parsed = url::Url::parse(url).map_err(|err| ClientError::Transport {
            code: 0,
            reason: format!("invalid url {url}: {err}"),
        })?;
        let mut request = parsed
            .as_str()
            .into_client_request()
            .map_err(|err| ClientError::Transport { code: 0, reason: err.to_string() })?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_str(&self.subprotocol)
                .map_err(|err| ClientError::Transport { code: 0, reason: err.to_string() })?,
        );

        let (stream, _) = connect_async(request)
            .await
            .map_err(|err| ClientError::Transport { code: 0, reason: err.to_string() })?;
        debug!(target: "transport", url, "websocket connected");
        let (mut ws_write, mut ws_read) = stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

        let writer_shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if let Err(err) = ws_write.send(message).await {
                    warn!(target: "transport", error = %err, "websocket write failed");
                    writer_shared.drop_conn();
                    writer_shared.emit(TransportEvent::Failed {
                        code: 1006,
                        reason: err.to_string(),
                    });
                    break;
                }
            }
        });

        let reader_shared = Arc::clone(&self.shared);
        let reader_out = out_tx.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        trace!(target: "transport", len = text.len(), "text frame");
                        reader_shared.emit(TransportEvent::Message(text));
                    }
                    Ok(Message::Ping(payload)) => {
                        let _ = reader_out.send(Message::Pong(payload));
                    }
                    Ok(Message::Close(_)) => {
                        reader_shared.drop_conn();
                        reader_shared.emit(TransportEvent::Closed);
                        return;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(target: "transport", error = %err, "websocket read failed");
                        reader_shared.drop_conn();
                        reader_shared.emit(TransportEvent::Failed {
                            code: 1006,
                            reason: err.to_string(),
                        });
                        return;
                    }
                }
            }
            reader_shared.drop_conn();
            reader_shared.emit(TransportEvent::Closed);
        });

        let ping_out = out_tx.clone();
        let ping_interval = self.ping_interval;
        let pinger = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ping_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if ping_out.send(Message::Ping(Vec::new())).is_err() {
                    break;
                }
            }
        });

        *self.shared.conn.lock() = Some(Conn { out_tx, reader, pinger });
        self.shared.emit(TransportEvent::Opened);
        Ok(())
    }

    async fn disconnect(&self) {
        let conn = self.shared.conn.lock().take();
        if let Some(conn) = conn {
            let _ = conn.out_tx.send(Message::Close(None));
            conn.pinger.abort();
            conn.reader.abort();
            self.shared.emit(TransportEvent::Closed);
        }
    }

    fn send_text(&self, payload: String) -> Result<(), ClientError> {
        let conn = self.shared.conn.lock();
        match conn.as_ref() {
            Some(conn) => conn
                .out_tx
                .send(Message::Text(payload))
                .map_err(|_| ClientError::Transport { code: 0, reason: "connection closed".into() }),
            None => Err(ClientError::Transport { code: 0, reason: "not connected".into() }),
        }
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.subscribers.lock().push(tx);
        rx
    }
}
