//! Request/response correlation over a [`Transport`].
//!
//! Every outbound envelope carries a fresh transaction id. Inbound frames
//! that answer a pending transaction resolve it according to the request
//! kind; everything else with a `sender` is forwarded as an unsolicited
//! event for the session layer to route.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::ClientError;
use crate::protocol::{
    Envelope, HandleId, Jsep, Request, SessionId, TransactionId, TrickleCandidate,
};
use crate::transport::{Transport, TransportEvent};

/// How a pending transaction is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    /// Done on the first reply, ack included (keepalive, trickle, detach,
    /// hangup, destroy).
    Ack,
    /// Acks mean "queued"; done on the first non-ack reply (create, claim,
    /// attach).
    Final,
    /// Plugin message: acks keep it pending, a `success` is delivered but
    /// a later `event` sharing the transaction is delivered too.
    Plugin,
}

struct Pending {
    kind: RequestKind,
    handle_id: Option<HandleId>,
    tx: mpsc::UnboundedSender<Result<Envelope, ClientError>>,
}

/// Replies correlated to one plugin message. The first item is the
/// synchronous `success` or the plugin `event`; when the gateway answers
/// with both, both arrive here in order.
pub struct PluginReplies {
    rx: mpsc::UnboundedReceiver<Result<Envelope, ClientError>>,
}

impl PluginReplies {
    pub async fn recv(&mut self) -> Result<Envelope, ClientError> {
        match self.rx.recv().await {
            Some(reply) => reply,
            None => Err(ClientError::Cancelled),
        }
    }
}

/// Events surfaced to the session layer.
#[derive(Debug)]
pub enum ClientEvent {
    Opened,
    Closed,
    Failed { code: u16, reason: String },
    Unsolicited(Envelope),
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    request_timeout: Duration,
    pending: Mutex<HashMap<String, Pending>>,
}

impl ClientInner {
    fn fail_all(&self, err: ClientError) {
        let drained: Vec<Pending> = self.pending.lock().drain().map(|(_, p)| p).collect();
        for pending in drained {
            let _ = pending.tx.send(Err(err.clone()));
        }
    }

    fn dispatch_text(&self, text: &str, events: &mpsc::UnboundedSender<ClientEvent>) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(target: "client", error = %err, "dropping malformed envelope");
                return;
            }
        };

        let is_event = envelope.janus == "event";
        if let Some(transaction) = envelope.transaction.clone() {
            let mut pending = self.pending.lock();
            if let Some(entry) = pending.get(&transaction.0) {
                let deliver = match entry.kind {
                    RequestKind::Ack => true,
                    RequestKind::Final | RequestKind::Plugin => !envelope.is_ack(),
                };
                let mut receiver_gone = false;
                if deliver {
                    receiver_gone = entry.tx.send(Ok(envelope.clone())).is_err();
                }
                let done = match entry.kind {
                    RequestKind::Ack => true,
                    RequestKind::Final => !envelope.is_ack(),
                    // A caller that dropped the reply stream is no longer
                    // waiting for the follow-up event.
                    RequestKind::Plugin => {
                        is_event || envelope.janus == "error" || receiver_gone
                    }
                };
                if done {
                    pending.remove(&transaction.0);
                }
                // Plugin events also reach the handle's message hook; every
                // other correlated reply stops here.
                if !is_event {
                    return;
                }
            }
        }

        if envelope.sender.is_some() {
            let _ = events.send(ClientEvent::Unsolicited(envelope));
        } else {
            trace!(target: "client", janus = %envelope.janus, "dropping event without sender");
        }
    }
}

/// Encodes Janus control messages and correlates the replies.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    /// Builds a client over `transport` and spawns the demultiplex task.
    /// The returned receiver carries transport state changes and
    /// unsolicited events, in arrival order.
    pub fn new(
        transport: Arc<dyn Transport>,
        request_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let inner = Arc::new(ClientInner {
            transport,
            request_timeout,
            pending: Mutex::new(HashMap::new()),
        });

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut transport_rx = inner.transport.subscribe();
        let pump = Arc::clone(&inner);
        let pump_tx = events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = transport_rx.recv().await {
                match event {
                    TransportEvent::Message(text) => pump.dispatch_text(&text, &pump_tx),
                    TransportEvent::Opened => {
                        let _ = pump_tx.send(ClientEvent::Opened);
                    }
                    TransportEvent::Closed => {
                        pump.fail_all(ClientError::SessionDown);
                        let _ = pump_tx.send(ClientEvent::Closed);
                    }
                    TransportEvent::Failed { code, reason } => {
                        pump.fail_all(ClientError::SessionDown);
                        let _ = pump_tx.send(ClientEvent::Failed { code, reason });
                    }
                }
            }
        });

        (Self { inner }, events_rx)
    }

    pub async fn connect(&self, url: &str) -> Result<(), ClientError> {
        self.inner.transport.connect(url).await
    }

    pub async fn disconnect(&self) {
        self.inner.transport.disconnect().await;
    }

    /// Fails every outstanding request, e.g. on session destroy.
    pub fn cancel_all(&self) {
        self.inner.fail_all(ClientError::Cancelled);
    }

    /// Fails the requests still pending for one handle; used when the
    /// handle is detached.
    pub fn cancel_for_handle(&self, handle_id: HandleId) {
        let mut cancelled = Vec::new();
        self.inner.pending.lock().retain(|_, pending| {
            if pending.handle_id == Some(handle_id) {
                cancelled.push(pending.tx.clone());
                false
            } else {
                true
            }
        });
        for tx in cancelled {
            let _ = tx.send(Err(ClientError::Cancelled));
        }
    }

    fn submit(
        &self,
        request: Request,
        kind: RequestKind,
    ) -> Result<(TransactionId, mpsc::UnboundedReceiver<Result<Envelope, ClientError>>), ClientError>
    {
        let transaction = request.transaction().clone();
        let handle_id = request.handle_id();
        let payload = serde_json::to_string(&request)
            .map_err(|err| ClientError::ProtocolParse(err.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .pending
            .lock()
            .insert(transaction.0.clone(), Pending { kind, handle_id, tx });

        if let Err(err) = self.inner.transport.send_text(payload) {
            self.inner.pending.lock().remove(&transaction.0);
            return Err(err);
        }
        trace!(target: "client", transaction = %transaction, "request sent");
        Ok((transaction, rx))
    }

    async fn execute(&self, request: Request, kind: RequestKind) -> Result<Envelope, ClientError> {
        let (transaction, mut rx) = self.submit(request, kind)?;
        match tokio::time::timeout(self.inner.request_timeout, rx.recv()).await {
            Ok(Some(reply)) => into_result(reply?),
            Ok(None) => Err(ClientError::Cancelled),
            Err(_) => {
                self.inner.pending.lock().remove(&transaction.0);
                Err(ClientError::Timeout)
            }
        }
    }

    pub async fn create_session(&self) -> Result<SessionId, ClientError> {
        let reply = self
            .execute(
                Request::Create { transaction: TransactionId::generate() },
                RequestKind::Final,
            )
            .await?;
        reply
            .created_session_id()
            .ok_or_else(|| ClientError::ProtocolParse("create reply without session id".into()))
    }

    /// Re-binds `session_id` on a fresh connection. Janus calls this
    /// `claim`; the original session id is kept.
    pub async fn reconnect_session(&self, session_id: SessionId) -> Result<SessionId, ClientError> {
        let reply = self
            .execute(
                Request::Claim { session_id, transaction: TransactionId::generate() },
                RequestKind::Final,
            )
            .await?;
        Ok(reply.created_session_id().unwrap_or(session_id))
    }

    pub async fn destroy_session(&self, session_id: SessionId) -> Result<(), ClientError> {
        self.execute(
            Request::Destroy { session_id, transaction: TransactionId::generate() },
            RequestKind::Ack,
        )
        .await
        .map(|_| ())
    }

    pub async fn keepalive(&self, session_id: SessionId) -> Result<(), ClientError> {
        self.execute(
            Request::Keepalive { session_id, transaction: TransactionId::generate() },
            RequestKind::Ack,
        )
        .await
        .map(|_| ())
    }

    pub async fn attach(
        &self,
        session_id: SessionId,
        plugin: &str,
        opaque_id: &str,
    ) -> Result<HandleId, ClientError> {
        let reply = self
            .execute(
                Request::Attach {
                    session_id,
                    plugin: plugin.to_owned(),
                    opaque_id: opaque_id.to_owned(),
                    transaction: TransactionId::generate(),
                },
                RequestKind::Final,
            )
            .await?;
        reply
            .data
            .map(|data| data.id)
            .ok_or_else(|| ClientError::ProtocolParse("attach reply without handle id".into()))
    }

    pub async fn detach(
        &self,
        session_id: SessionId,
        handle_id: HandleId,
    ) -> Result<(), ClientError> {
        self.execute(
            Request::Detach { session_id, handle_id, transaction: TransactionId::generate() },
            RequestKind::Ack,
        )
        .await
        .map(|_| ())
    }

    pub async fn hangup(
        &self,
        session_id: SessionId,
        handle_id: HandleId,
    ) -> Result<(), ClientError> {
        self.execute(
            Request::Hangup { session_id, handle_id, transaction: TransactionId::generate() },
            RequestKind::Ack,
        )
        .await
        .map(|_| ())
    }

    /// Sends a plugin message and returns the correlated reply stream
    /// without waiting for it.
    pub fn send_message(
        &self,
        session_id: SessionId,
        handle_id: HandleId,
        body: Value,
        jsep: Option<Jsep>,
    ) -> Result<PluginReplies, ClientError> {
        let (_, rx) = self.submit(
            Request::Message {
                session_id,
                handle_id,
                body,
                jsep,
                transaction: TransactionId::generate(),
            },
            RequestKind::Plugin,
        )?;
        Ok(PluginReplies { rx })
    }

    pub async fn send_trickle(
        &self,
        session_id: SessionId,
        handle_id: HandleId,
        candidate: TrickleCandidate,
    ) -> Result<(), ClientError> {
        self.execute(
            Request::Trickle {
                session_id,
                handle_id,
                candidate,
                transaction: TransactionId::generate(),
            },
            RequestKind::Ack,
        )
        .await
        .map(|_| ())
    }

    pub fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }
}

fn into_result(envelope: Envelope) -> Result<Envelope, ClientError> {
    if envelope.janus == "error" {
        let (code, reason) = envelope
            .error
            .map(|err| (err.code, err.reason))
            .unwrap_or((0, "unknown server error".into()));
        debug!(target: "client", code, reason = %reason, "server error reply");
        return Err(ClientError::Server { code, reason });
    }
    Ok(envelope)
}
