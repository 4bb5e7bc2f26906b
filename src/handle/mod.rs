//! Plugin handles: the per-handle lifecycle plus the observer contract
//! through which every signaling and media event reaches the application.

pub mod media;
pub mod negotiation;
pub mod simulcast;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::client::ApiClient;
use crate::error::ClientError;
use crate::event_loop::EventLoop;
use crate::peer::{
    IceCandidate, IceConnectionState, MediaKind, MediaSource, MediaTrack, PeerConnectionFactory,
    RtcConfiguration, StatsReport,
};
use crate::protocol::{Envelope, HandleId, Jsep, SessionId, TrickleCandidate};

pub use media::{LocalTracks, MediaConfig};
pub use negotiation::{NegotiationState, OfferConfig, DEFAULT_DATA_LABEL};

use negotiation::{buffer_item, PeerSession, SignalContext};

/// Callbacks a plugin client implements. Every hook is delivered on the
/// event loop, one at a time and in arrival order for the same handle.
#[allow(unused_variables)]
pub trait HandleObserver: Send + Sync {
    fn on_attached(&self, success: bool) {}
    fn on_message(&self, body: Value, jsep: Option<Jsep>) {}
    fn on_trickle(&self, candidate: TrickleCandidate) {}
    fn on_webrtc_state(&self, up: bool, reason: Option<String>) {}
    fn on_media_state(&self, kind: String, receiving: bool, mid: Option<String>) {}
    fn on_slow_link(&self, uplink: bool, lost: u64, mid: Option<String>) {}
    fn on_ice_state(&self, state: IceConnectionState) {}
    fn on_data_open(&self, label: String) {}
    fn on_data(&self, payload: String, label: String) {}
    fn on_local_track(&self, track: Arc<dyn MediaTrack>, added: bool) {}
    fn on_remote_track(&self, track: Arc<dyn MediaTrack>, mid: String, added: bool) {}
    fn on_hangup(&self) {}
    fn on_detached(&self) {}
    fn on_cleanup(&self) {}
    fn on_timeout(&self) {}
    fn on_error(&self, desc: String) {}
    fn on_stats_report(&self, report: StatsReport) {}
}

/// One attached plugin handle. Owns at most one peer session at a time;
/// a hangup followed by a fresh offer behaves like a freshly attached
/// handle as far as media state is concerned.
pub struct HandleClient {
    handle_id: HandleId,
    session_id: SessionId,
    plugin: String,
    opaque_id: String,
    api: ApiClient,
    events: EventLoop,
    observer: Arc<dyn HandleObserver>,
    factory: Arc<dyn PeerConnectionFactory>,
    media_source: Arc<dyn MediaSource>,
    rtc_config: RtcConfiguration,
    default_trickle: bool,
    peer: AsyncMutex<Option<Arc<PeerSession>>>,
    /// Remote candidates that trickled in before any peer session existed.
    early_candidates: Mutex<Vec<Option<IceCandidate>>>,
    detached: AtomicBool,
    stats_task: Mutex<Option<JoinHandle<()>>>,
}

impl HandleClient {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        handle_id: HandleId,
        session_id: SessionId,
        plugin: String,
        opaque_id: String,
        api: ApiClient,
        events: EventLoop,
        observer: Arc<dyn HandleObserver>,
        factory: Arc<dyn PeerConnectionFactory>,
        media_source: Arc<dyn MediaSource>,
        rtc_config: RtcConfiguration,
        default_trickle: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            handle_id,
            session_id,
            plugin,
            opaque_id,
            api,
            events,
            observer,
            factory,
            media_source,
            rtc_config,
            default_trickle,
            peer: AsyncMutex::new(None),
            early_candidates: Mutex::new(Vec::new()),
            detached: AtomicBool::new(false),
            stats_task: Mutex::new(None),
        })
    }

    pub fn id(&self) -> HandleId {
        self.handle_id
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn opaque_id(&self) -> &str {
        &self.opaque_id
    }

    pub async fn negotiation_state(&self) -> Option<NegotiationState> {
        self.peer.lock().await.as_ref().map(|peer| peer.state())
    }

    /// Sends a plugin message and waits for the first correlated reply
    /// that is not an ack.
    pub async fn send_message(
        &self,
        body: Value,
        jsep: Option<Jsep>,
    ) -> Result<Envelope, ClientError> {
        let mut replies =
            self.api.send_message(self.session_id, self.handle_id, body, jsep)?;
        match tokio::time::timeout(self.api.request_timeout(), replies.recv()).await {
            Ok(reply) => reply,
            Err(_) => Err(ClientError::Timeout),
        }
    }

    pub async fn create_offer(self: &Arc<Self>, cfg: OfferConfig) -> Result<Jsep, ClientError> {
        let peer = self.ensure_peer(cfg.trickle).await?;
        let result = peer.create_offer(cfg).await;
        self.clear_peer_on_negotiation_failure(&result).await;
        result
    }

    pub async fn create_answer(
        self: &Arc<Self>,
        cfg: OfferConfig,
        remote: Jsep,
    ) -> Result<Jsep, ClientError> {
        let peer = self.ensure_peer(cfg.trickle).await?;
        let result = peer.create_answer(cfg, remote).await;
        self.clear_peer_on_negotiation_failure(&result).await;
        result
    }

    /// Applies a remote description to the existing peer session, e.g.
    /// the answer the gateway returns for a published offer.
    pub async fn handle_remote_jsep(&self, jsep: Jsep) -> Result<(), ClientError> {
        let peer = self.peer.lock().await.clone();
        let peer = peer.ok_or(ClientError::InvalidJsep)?;
        let result = peer.apply_remote(jsep).await;
        self.clear_peer_on_negotiation_failure(&result).await;
        result
    }

    pub async fn send_data(&self, label: &str, payload: &str) -> Result<(), ClientError> {
        let peer = self.peer.lock().await.clone();
        match peer {
            Some(peer) => peer.send_data(label, payload).await,
            None => Err(ClientError::DataChannelNotOpen(label.to_owned())),
        }
    }

    pub async fn send_dtmf(
        &self,
        tones: &str,
        duration_ms: Option<u32>,
        gap_ms: Option<u32>,
    ) -> Result<(), ClientError> {
        let peer = self.peer.lock().await.clone();
        match peer {
            Some(peer) => peer.send_dtmf(tones, duration_ms, gap_ms).await,
            None => Err(ClientError::InvalidDtmf),
        }
    }

    pub async fn mute(&self, kind: MediaKind, mid: Option<&str>) -> bool {
        match self.peer.lock().await.clone() {
            Some(peer) => peer.set_muted(kind, mid, true).await,
            None => false,
        }
    }

    pub async fn unmute(&self, kind: MediaKind, mid: Option<&str>) -> bool {
        match self.peer.lock().await.clone() {
            Some(peer) => peer.set_muted(kind, mid, false).await,
            None => false,
        }
    }

    pub async fn is_muted(&self, kind: MediaKind, mid: Option<&str>) -> bool {
        match self.peer.lock().await.clone() {
            Some(peer) => peer.is_muted(kind, mid).await,
            None => true,
        }
    }

    /// Closes the peer session and optionally asks the gateway to hang
    /// up its side as well. The handle stays attached.
    pub async fn hangup(&self, send_request: bool) {
        if send_request {
            if let Err(err) = self.api.hangup(self.session_id, self.handle_id).await {
                debug!(target: "handle", handle_id = self.handle_id, error = %err,
                    "hangup request failed");
            }
        }
        self.hangup_local().await;
    }

    /// Local-only teardown: stats ticker, peer session, one `on_cleanup`.
    pub(crate) async fn hangup_local(&self) {
        self.stop_stats_report();
        let peer = self.peer.lock().await.take();
        match peer {
            Some(peer) => peer.close(true).await,
            None => {
                let observer = Arc::clone(&self.observer);
                self.events.post(move || observer.on_cleanup());
            }
        }
    }

    /// Periodically polls peer stats and posts reports to the observer.
    pub fn start_stats_report(self: &Arc<Self>, period: Duration) {
        let mut slot = self.stats_task.lock();
        if slot.is_some() {
            return;
        }
        let handle = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let peer = handle.peer.lock().await.clone();
                let Some(peer) = peer else { continue };
                match peer.get_stats().await {
                    Ok(report) => {
                        let observer = Arc::clone(&handle.observer);
                        handle.events.post(move || observer.on_stats_report(report));
                    }
                    Err(err) => {
                        trace!(target: "handle", handle_id = handle.handle_id, error = %err,
                            "stats poll failed");
                    }
                }
            }
        }));
    }

    pub fn stop_stats_report(&self) {
        if let Some(task) = self.stats_task.lock().take() {
            task.abort();
        }
    }

    async fn ensure_peer(
        self: &Arc<Self>,
        trickle: Option<bool>,
    ) -> Result<Arc<PeerSession>, ClientError> {
        let mut slot = self.peer.lock().await;
        if let Some(peer) = slot.as_ref() {
            return Ok(Arc::clone(peer));
        }
        let pc = self.factory.create_peer_connection(&self.rtc_config).await.map_err(|err| {
            ClientError::negotiation("create_peer_connection", err.to_string())
        })?;
        let buffered: Vec<_> = self.early_candidates.lock().drain(..).collect();
        let ctx = SignalContext {
            api: self.api.clone(),
            session_id: self.session_id,
            handle_id: self.handle_id,
            events: self.events.clone(),
            observer: Arc::clone(&self.observer),
            media_source: Arc::clone(&self.media_source),
        };
        let trickle = trickle.unwrap_or(self.default_trickle);
        debug!(target: "handle", handle_id = self.handle_id, trickle,
            "creating peer session");
        let peer = PeerSession::new(pc, ctx, trickle, self.rtc_config.unified_plan, buffered);
        *slot = Some(Arc::clone(&peer));
        Ok(peer)
    }

    async fn clear_peer_on_negotiation_failure<T>(&self, result: &Result<T, ClientError>) {
        if matches!(result, Err(ClientError::Negotiation { .. })) {
            *self.peer.lock().await = None;
        }
    }

    // Entry points used by the session's dispatch task.

    pub(crate) async fn handle_remote_trickle(&self, candidate: TrickleCandidate) {
        {
            let observer = Arc::clone(&self.observer);
            let candidate = candidate.clone();
            self.events.post(move || observer.on_trickle(candidate));
        }
        let peer = self.peer.lock().await.clone();
        match peer {
            Some(peer) => peer.handle_remote_candidate(&candidate).await,
            None => {
                trace!(target: "handle", handle_id = self.handle_id,
                    "buffering candidate before peer session exists");
                self.early_candidates.lock().push(buffer_item(&candidate));
            }
        }
    }

    pub(crate) fn post_attached(&self, success: bool) {
        let observer = Arc::clone(&self.observer);
        self.events.post(move || observer.on_attached(success));
    }

    pub(crate) fn post_message(&self, body: Value, jsep: Option<Jsep>) {
        let observer = Arc::clone(&self.observer);
        self.events.post(move || observer.on_message(body, jsep));
    }

    pub(crate) fn post_webrtc_state(&self, up: bool, reason: Option<String>) {
        let observer = Arc::clone(&self.observer);
        self.events.post(move || observer.on_webrtc_state(up, reason));
    }

    pub(crate) fn post_hangup(&self) {
        let observer = Arc::clone(&self.observer);
        self.events.post(move || observer.on_hangup());
    }

    pub(crate) fn post_media_state(&self, kind: String, receiving: bool, mid: Option<String>) {
        let observer = Arc::clone(&self.observer);
        self.events.post(move || observer.on_media_state(kind, receiving, mid));
    }

    pub(crate) fn post_slow_link(&self, uplink: bool, lost: u64, mid: Option<String>) {
        let observer = Arc::clone(&self.observer);
        self.events.post(move || observer.on_slow_link(uplink, lost, mid));
    }

    pub(crate) fn post_timeout(&self) {
        let observer = Arc::clone(&self.observer);
        self.events.post(move || observer.on_timeout());
    }

    pub(crate) fn post_error(&self, desc: String) {
        let observer = Arc::clone(&self.observer);
        self.events.post(move || observer.on_error(desc));
    }

    /// Exactly one `on_detached` per attach, however the detach happened.
    pub(crate) fn fire_detached(&self) {
        if self.detached.swap(true, Ordering::SeqCst) {
            warn!(target: "handle", handle_id = self.handle_id, "detached twice, ignoring");
            return;
        }
        let observer = Arc::clone(&self.observer);
        self.events.post(move || observer.on_detached());
    }
}
