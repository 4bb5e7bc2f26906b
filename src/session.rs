//! Session management: one server session multiplexing many plugin
//! handles over a single transport.
//!
//! ```text
//! Connecting --open--> CreatingSession --create ok--> Up
//! Up --transport closed / destroy ok--> Down
//! Down --reconnect--> CreatingSession
//! ```
//!
//! Unsolicited events are dispatched to the owning handle from a single
//! task, so no two hook invocations for the same handle ever overlap.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::client::{ApiClient, ClientEvent};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::event_loop::EventLoop;
use crate::handle::{HandleClient, HandleObserver};
use crate::peer::{MediaSource, PeerConnectionFactory, RtcConfiguration};
use crate::protocol::{Envelope, HandleId, SessionId};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    CreatingSession,
    Up,
    Down,
}

#[allow(unused_variables)]
pub trait SessionObserver: Send + Sync {
    fn on_status(&self, status: SessionStatus) {}
    fn on_destroyed(&self) {}
}

struct SessionInner {
    config: ClientConfig,
    api: ApiClient,
    factory: Arc<dyn PeerConnectionFactory>,
    media_source: Arc<dyn MediaSource>,
    events: EventLoop,
    observer: Arc<dyn SessionObserver>,
    status: Mutex<SessionStatus>,
    session_id: Mutex<Option<SessionId>>,
    handles: Mutex<HashMap<HandleId, Arc<HandleClient>>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

/// Owns the server session id, the heartbeat ticker and the handle
/// registry; created by [`Session::connect`].
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Opens the transport, creates the server session and starts the
    /// heartbeat and dispatch workers.
    pub async fn connect(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        factory: Arc<dyn PeerConnectionFactory>,
        media_source: Arc<dyn MediaSource>,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Self, ClientError> {
        let (api, events_rx) = ApiClient::new(transport, config.request_timeout);
        let (events, _worker) = EventLoop::spawn();
        let inner = Arc::new(SessionInner {
            config,
            api,
            factory,
            media_source,
            events,
            observer,
            status: Mutex::new(SessionStatus::Connecting),
            session_id: Mutex::new(None),
            handles: Mutex::new(HashMap::new()),
            heartbeat: Mutex::new(None),
        });
        inner.notify_status(SessionStatus::Connecting);

        inner.api.connect(&inner.config.url).await?;
        inner.set_status(SessionStatus::CreatingSession);
        let session_id = inner.api.create_session().await?;
        info!(target: "session", session_id, "session created");
        *inner.session_id.lock() = Some(session_id);
        inner.set_status(SessionStatus::Up);
        inner.start_heartbeat();

        let pump = Arc::clone(&inner);
        tokio::spawn(async move { pump.run(events_rx).await });

        Ok(Self { inner })
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.status()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.session_id()
    }

    pub fn handle(&self, handle_id: HandleId) -> Option<Arc<HandleClient>> {
        self.inner.handles.lock().get(&handle_id).cloned()
    }

    pub fn handle_count(&self) -> usize {
        self.inner.handles.lock().len()
    }

    /// Attaches a plugin handle; `observer` receives every event the
    /// gateway routes to it from now on.
    pub async fn attach(
        &self,
        plugin: &str,
        opaque_id: &str,
        observer: Arc<dyn HandleObserver>,
    ) -> Result<Arc<HandleClient>, ClientError> {
        let inner = &self.inner;
        if inner.status() != SessionStatus::Up {
            return Err(ClientError::SessionDown);
        }
        let session_id = inner.session_id().ok_or(ClientError::SessionDown)?;

        match inner.api.attach(session_id, plugin, opaque_id).await {
            Ok(handle_id) => {
                info!(target: "session", session_id, handle_id, plugin, "handle attached");
                let rtc_config = RtcConfiguration {
                    ice_servers: inner.config.ice_servers.clone(),
                    unified_plan: inner.config.unified_plan,
                };
                let handle = HandleClient::new(
                    handle_id,
                    session_id,
                    plugin.to_owned(),
                    opaque_id.to_owned(),
                    inner.api.clone(),
                    inner.events.clone(),
                    Arc::clone(&observer),
                    Arc::clone(&inner.factory),
                    Arc::clone(&inner.media_source),
                    rtc_config,
                    inner.config.trickle,
                );
                inner.handles.lock().insert(handle_id, Arc::clone(&handle));
                handle.post_attached(true);
                Ok(handle)
            }
            Err(err) => {
                warn!(target: "session", plugin, error = %err, "attach failed");
                let observer = Arc::clone(&observer);
                inner.events.post(move || observer.on_attached(false));
                Err(err)
            }
        }
    }

    /// Tears the handle down locally and, unless `no_request` is set or
    /// the session is down, tells the gateway to detach it too. Fires
    /// `on_cleanup` then `on_detached`.
    pub async fn detach(&self, handle_id: HandleId, no_request: bool) -> Result<(), ClientError> {
        let inner = &self.inner;
        let handle = inner
            .handles
            .lock()
            .get(&handle_id)
            .cloned()
            .ok_or(ClientError::UnknownHandle(handle_id))?;

        handle.hangup_local().await;

        if !no_request {
            if inner.status() == SessionStatus::Up {
                if let Some(session_id) = inner.session_id() {
                    if let Err(err) = inner.api.detach(session_id, handle_id).await {
                        debug!(target: "session", handle_id, error = %err, "detach request failed");
                    }
                }
            } else {
                debug!(target: "session", handle_id, "server down, detaching locally only");
            }
        }

        inner.handles.lock().remove(&handle_id);
        inner.api.cancel_for_handle(handle_id);
        handle.fire_detached();
        Ok(())
    }

    /// Destroys the session. With `cleanup_handles` every attached handle
    /// is detached locally first; a destroy while down short-circuits to
    /// local cleanup.
    pub async fn destroy(
        &self,
        notify_destroyed: bool,
        cleanup_handles: bool,
    ) -> Result<(), ClientError> {
        let inner = &self.inner;
        debug!(target: "session", session_id = ?inner.session_id(), "destroying session");

        if cleanup_handles {
            let ids: Vec<HandleId> = inner.handles.lock().keys().copied().collect();
            for handle_id in ids {
                let _ = self.detach(handle_id, true).await;
            }
        }

        inner.stop_heartbeat();
        let was_up = inner.status() == SessionStatus::Up;
        if was_up {
            if let Some(session_id) = inner.session_id() {
                if let Err(err) = inner.api.destroy_session(session_id).await {
                    debug!(target: "session", error = %err, "destroy request failed");
                }
            }
        } else {
            debug!(target: "session", "server down, destroying locally only");
        }
        inner.set_status(SessionStatus::Down);
        inner.api.cancel_all();
        inner.api.disconnect().await;

        if notify_destroyed {
            let observer = Arc::clone(&inner.observer);
            inner.events.post(move || observer.on_destroyed());
        }
        Ok(())
    }

    /// Re-opens the transport and claims the same session id. Handles
    /// stay registered; their peer sessions were already torn down when
    /// the transport was lost.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        if inner.status() != SessionStatus::Down {
            warn!(target: "session", status = ?inner.status(), "reconnect ignored, session not down");
            return Ok(());
        }
        let session_id = inner.session_id().ok_or(ClientError::SessionDown)?;
        inner.set_status(SessionStatus::CreatingSession);

        let result = async {
            inner.api.connect(&inner.config.url).await?;
            inner.api.reconnect_session(session_id).await
        }
        .await;
        match result {
            Ok(session_id) => {
                info!(target: "session", session_id, "session reclaimed");
                *inner.session_id.lock() = Some(session_id);
                inner.set_status(SessionStatus::Up);
                inner.start_heartbeat();
                Ok(())
            }
            Err(err) => {
                inner.set_status(SessionStatus::Down);
                Err(err)
            }
        }
    }
}

impl SessionInner {
    fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    fn session_id(&self) -> Option<SessionId> {
        *self.session_id.lock()
    }

    fn set_status(&self, status: SessionStatus) {
        {
            let mut current = self.status.lock();
            if *current == status {
                return;
            }
            *current = status;
        }
        self.notify_status(status);
    }

    fn notify_status(&self, status: SessionStatus) {
        let observer = Arc::clone(&self.observer);
        self.events.post(move || observer.on_status(status));
    }

    fn start_heartbeat(self: &Arc<Self>) {
        let mut slot = self.heartbeat.lock();
        if slot.is_some() {
            return;
        }
        let inner = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.heartbeat_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if inner.status() != SessionStatus::Up {
                    break;
                }
                let Some(session_id) = inner.session_id() else { break };
                trace!(target: "session", session_id, "heartbeat");
                if let Err(err) = inner.api.keepalive(session_id).await {
                    debug!(target: "session", session_id, error = %err, "keepalive failed");
                }
            }
        }));
    }

    fn stop_heartbeat(&self) {
        if let Some(task) = self.heartbeat.lock().take() {
            task.abort();
        }
    }

    async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<ClientEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::Unsolicited(envelope) => self.dispatch(envelope).await,
                ClientEvent::Closed => self.on_transport_down(1000, "transport closed").await,
                ClientEvent::Failed { code, reason } => {
                    self.on_transport_down(code, &reason).await
                }
                ClientEvent::Opened => {}
            }
        }
    }

    /// The transport is gone: the session goes down, the heartbeat stops
    /// and every peer session becomes invalid and is torn down. Handles
    /// stay registered for a later reconnect.
    async fn on_transport_down(&self, code: u16, reason: &str) {
        if self.status() == SessionStatus::Down {
            return;
        }
        warn!(target: "session", code, reason, "transport lost, session down");
        self.stop_heartbeat();
        self.set_status(SessionStatus::Down);
        let handles: Vec<Arc<HandleClient>> = self.handles.lock().values().cloned().collect();
        for handle in handles {
            handle.hangup_local().await;
        }
    }

    async fn dispatch(&self, envelope: Envelope) {
        let Some(sender) = envelope.sender else {
            warn!(target: "session", janus = %envelope.janus, "missing sender, dropping event");
            return;
        };
        let Some(handle) = self.handles.lock().get(&sender).cloned() else {
            warn!(target: "session", sender, janus = %envelope.janus,
                "handle not attached to this session, dropping event");
            return;
        };

        let kind = envelope.janus.clone();
        match kind.as_str() {
            "keepalive" => {
                trace!(target: "session", sender, "keepalive event");
            }
            "server_info" => {
                debug!(target: "session", sender, "server info event");
            }
            "trickle" => match envelope.candidate {
                Some(candidate) => handle.handle_remote_trickle(candidate).await,
                None => warn!(target: "session", sender, "trickle event without candidate"),
            },
            "webrtcup" => {
                debug!(target: "session", sender, "peer connection is up");
                handle.post_webrtc_state(true, None);
            }
            "hangup" => {
                debug!(target: "session", sender, reason = ?envelope.reason, "hangup event");
                handle.post_webrtc_state(false, envelope.reason.clone());
                handle.post_hangup();
            }
            "detached" => {
                debug!(target: "session", sender, "server-initiated detach");
                self.handles.lock().remove(&sender);
                handle.hangup_local().await;
                self.api.cancel_for_handle(sender);
                handle.fire_detached();
            }
            "media" => {
                let kind = envelope.media_type.unwrap_or_default();
                handle.post_media_state(kind, envelope.receiving.unwrap_or(false), envelope.mid);
            }
            "slowlink" => {
                handle.post_slow_link(
                    envelope.uplink.unwrap_or(false),
                    envelope.lost.unwrap_or(0),
                    envelope.mid,
                );
            }
            "event" => match envelope.plugindata {
                Some(plugindata) => handle.post_message(plugindata.data, envelope.jsep),
                None => warn!(target: "session", sender, "plugin event without plugindata"),
            },
            "timeout" => {
                warn!(target: "session", sender, "session timeout");
                handle.post_timeout();
            }
            "error" => {
                let desc = envelope.error.map(|e| e.reason).unwrap_or_default();
                handle.post_error(desc);
            }
            other => {
                warn!(target: "session", sender, janus = other, "unknown event, dropping");
            }
        }
    }
}
