//! Per-handle WebRTC negotiation.
//!
//! A [`PeerSession`] wraps one peer connection: it prepares local media
//! from a resolved [`MediaConfig`], runs the offer/answer exchange, relays
//! trickle candidates in both directions and tears everything down on
//! hangup. Remote candidates arriving before the remote description are
//! buffered and drained in FIFO order once it is applied.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::client::ApiClient;
use crate::error::ClientError;
use crate::event_loop::EventLoop;
use crate::handle::media::{capture_needed, normalize, LocalTracks, MediaConfig};
use crate::handle::simulcast::{inject_simulcast, simulcast_encodings};
use crate::handle::HandleObserver;
use crate::peer::{
    DataChannel, DataChannelEvent, DataChannelState, DtmfSender, IceCandidate, MediaKind,
    MediaSource, MediaStream, MediaTrack, OfferOptions, PeerConnection, PeerEvent, RtpParameters,
    TransceiverDirection, TransceiverInit,
};
use crate::protocol::{HandleId, Jsep, JsepType, SessionId, TrickleCandidate};

pub const DEFAULT_DATA_LABEL: &str = "JanusDataChannel";

const DEFAULT_DTMF_DURATION_MS: u32 = 500;
const DEFAULT_DTMF_GAP_MS: u32 = 50;

/// Wire form of a remote candidate as buffered before injection; the
/// end-of-candidates marker buffers as `None`.
pub(crate) fn buffer_item(candidate: &TrickleCandidate) -> Option<IceCandidate> {
    if candidate.is_completed() || candidate.candidate.is_none() {
        return None;
    }
    Some(IceCandidate {
        candidate: candidate.candidate.clone().unwrap_or_default(),
        sdp_mid: candidate.sdp_mid.clone(),
        sdp_mline_index: candidate.sdp_mline_index,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Fresh,
    Negotiating,
    Stable,
    Renegotiating,
    Closed,
}

/// Inputs for one offer or answer.
#[derive(Clone, Default)]
pub struct OfferConfig {
    pub media: MediaConfig,
    /// Fixed for the lifetime of the peer session; only the first
    /// offer/answer on a handle consults it.
    pub trickle: Option<bool>,
    pub simulcast: bool,
    pub ice_restart: bool,
    /// Pre-captured stream supplied by the application; its tracks are
    /// not stopped on hangup.
    pub stream: Option<Arc<MediaStream>>,
}

/// Everything a peer session needs to talk back to the world.
pub(crate) struct SignalContext {
    pub api: ApiClient,
    pub session_id: SessionId,
    pub handle_id: HandleId,
    pub events: EventLoop,
    pub observer: Arc<dyn HandleObserver>,
    pub media_source: Arc<dyn MediaSource>,
}

pub(crate) struct PeerSession {
    pc: Arc<dyn PeerConnection>,
    ctx: SignalContext,
    trickle: bool,
    unified_plan: bool,
    negotiation: AsyncMutex<()>,
    state: Mutex<NegotiationState>,
    local_sdp: Mutex<Option<Jsep>>,
    remote_sdp: Mutex<Option<Jsep>>,
    ice_done: AtomicBool,
    ice_waiters: Mutex<Vec<oneshot::Sender<()>>>,
    queued_remote_candidates: Mutex<Vec<Option<IceCandidate>>>,
    local_stream: Mutex<Option<Arc<MediaStream>>>,
    stream_external: AtomicBool,
    data_channels: Mutex<HashMap<String, Arc<dyn DataChannel>>>,
    dtmf: Mutex<Option<Arc<dyn DtmfSender>>>,
    remote_mids: Mutex<HashMap<String, String>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl PeerSession {
    /// Wires up a fresh peer connection. `buffered` carries remote
    /// candidates that trickled in before the session existed.
    pub(crate) fn new(
        pc: Arc<dyn PeerConnection>,
        ctx: SignalContext,
        trickle: bool,
        unified_plan: bool,
        buffered: Vec<Option<IceCandidate>>,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            pc,
            ctx,
            trickle,
            unified_plan,
            negotiation: AsyncMutex::new(()),
            state: Mutex::new(NegotiationState::Fresh),
            local_sdp: Mutex::new(None),
            remote_sdp: Mutex::new(None),
            ice_done: AtomicBool::new(false),
            ice_waiters: Mutex::new(Vec::new()),
            queued_remote_candidates: Mutex::new(buffered),
            local_stream: Mutex::new(None),
            stream_external: AtomicBool::new(false),
            data_channels: Mutex::new(HashMap::new()),
            dtmf: Mutex::new(None),
            remote_mids: Mutex::new(HashMap::new()),
            pump: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        session.spawn_pump();
        session
    }

    pub(crate) fn state(&self) -> NegotiationState {
        *self.state.lock()
    }

    fn spawn_pump(self: &Arc<Self>) {
        let mut events = match self.pc.take_events() {
            Some(events) => events,
            None => return,
        };
        let session = Arc::clone(self);
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                session.handle_peer_event(event).await;
            }
        });
        *self.pump.lock() = Some(pump);
    }

    async fn handle_peer_event(self: &Arc<Self>, event: PeerEvent) {
        match event {
            PeerEvent::IceCandidate(Some(candidate)) => {
                if self.trickle {
                    let wire = TrickleCandidate::new(
                        candidate.candidate,
                        candidate.sdp_mid,
                        candidate.sdp_mline_index,
                    );
                    if let Err(err) = self
                        .ctx
                        .api
                        .send_trickle(self.ctx.session_id, self.ctx.handle_id, wire)
                        .await
                    {
                        warn!(target: "handle", handle_id = self.ctx.handle_id, error = %err,
                            "failed to send trickle candidate");
                    }
                }
            }
            PeerEvent::IceCandidate(None) => {
                debug!(target: "handle", handle_id = self.ctx.handle_id, "end of candidates");
                self.ice_done.store(true, Ordering::SeqCst);
                if self.trickle {
                    if let Err(err) = self
                        .ctx
                        .api
                        .send_trickle(
                            self.ctx.session_id,
                            self.ctx.handle_id,
                            TrickleCandidate::completed(),
                        )
                        .await
                    {
                        warn!(target: "handle", handle_id = self.ctx.handle_id, error = %err,
                            "failed to send end-of-candidates");
                    }
                } else {
                    for waiter in self.ice_waiters.lock().drain(..) {
                        let _ = waiter.send(());
                    }
                }
            }
            PeerEvent::IceState(state) => {
                let observer = Arc::clone(&self.ctx.observer);
                self.ctx.events.post(move || observer.on_ice_state(state));
            }
            PeerEvent::TrackAdded { track, mid } => {
                self.remote_mids.lock().insert(track.id(), mid.clone());
                let observer = Arc::clone(&self.ctx.observer);
                self.ctx.events.post(move || observer.on_remote_track(track, mid, true));
            }
            PeerEvent::TrackRemoved { track } => {
                if let Some(mid) = self.remote_mids.lock().remove(&track.id()) {
                    let observer = Arc::clone(&self.ctx.observer);
                    self.ctx.events.post(move || observer.on_remote_track(track, mid, false));
                }
            }
            PeerEvent::DataChannel(channel) => {
                debug!(target: "handle", handle_id = self.ctx.handle_id,
                    label = %channel.label(), "adopting peer-created data channel");
                self.adopt_channel(channel);
            }
        }
    }

    fn adopt_channel(self: &Arc<Self>, channel: Arc<dyn DataChannel>) {
        let label = channel.label();
        let mut events = channel.take_events();
        self.data_channels.lock().insert(label.clone(), channel);
        let Some(mut rx) = events.take() else { return };
        let session = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let observer = Arc::clone(&session.ctx.observer);
                let label = label.clone();
                match event {
                    DataChannelEvent::Open => {
                        session.ctx.events.post(move || observer.on_data_open(label));
                    }
                    DataChannelEvent::Message(payload) => {
                        session.ctx.events.post(move || observer.on_data(payload, label));
                    }
                    DataChannelEvent::Closed => break,
                }
            }
        });
    }

    fn local_tracks(&self) -> Option<LocalTracks> {
        self.local_stream.lock().as_ref().map(|stream| LocalTracks {
            has_audio: stream.first_track(MediaKind::Audio).is_some(),
            has_video: stream.first_track(MediaKind::Video).is_some(),
        })
    }

    /// Builds the local offer. With trickle enabled the SDP is returned as
    /// soon as the local description is set; otherwise the call stalls
    /// until candidate gathering finishes and returns the complete SDP.
    pub(crate) async fn create_offer(self: &Arc<Self>, cfg: OfferConfig) -> Result<Jsep, ClientError> {
        let _guard = self.negotiation.lock().await;
        let update = match self.state() {
            NegotiationState::Fresh => false,
            NegotiationState::Stable => true,
            state => {
                return Err(ClientError::negotiation(
                    "create_offer",
                    format!("invalid state {state:?}"),
                ))
            }
        };
        let prior = self.state();
        let normalized = normalize(&cfg.media, update, self.local_tracks())?;
        *self.state.lock() = if update {
            NegotiationState::Renegotiating
        } else {
            NegotiationState::Negotiating
        };

        if let Err(err) = self.prepare_media(&cfg, &normalized).await {
            *self.state.lock() = prior;
            return Err(err);
        }
        let options = self.build_options(&normalized, cfg.ice_restart).await;
        let munge = self.apply_simulcast(&normalized, cfg.simulcast).await;

        debug!(target: "handle", handle_id = self.ctx.handle_id, trickle = self.trickle,
            "creating offer");
        let mut jsep = match self.pc.create_offer(options).await {
            Ok(jsep) => jsep,
            Err(err) => return Err(self.fail_negotiation("create_offer", err).await),
        };
        if munge {
            jsep.sdp = inject_simulcast(&jsep.sdp);
        }
        jsep.trickle = Some(self.trickle);
        *self.local_sdp.lock() = Some(jsep.clone());
        if let Err(err) = self.pc.set_local_description(jsep.clone()).await {
            return Err(self.fail_negotiation("set_local_description", err).await);
        }

        if !self.trickle {
            self.await_ice_done().await;
            if let Some(complete) = self.pc.local_description().await {
                jsep = Jsep { trickle: Some(false), ..complete };
                *self.local_sdp.lock() = Some(jsep.clone());
            }
        }
        Ok(jsep)
    }

    /// Applies the remote offer and builds the local answer; the mirror of
    /// [`PeerSession::create_offer`].
    pub(crate) async fn create_answer(
        self: &Arc<Self>,
        cfg: OfferConfig,
        remote: Jsep,
    ) -> Result<Jsep, ClientError> {
        if remote.sdp.is_empty() {
            return Err(ClientError::InvalidJsep);
        }
        let _guard = self.negotiation.lock().await;
        let prior = self.state();
        let update = match prior {
            NegotiationState::Fresh => false,
            NegotiationState::Stable => true,
            state => {
                return Err(ClientError::negotiation(
                    "create_answer",
                    format!("invalid state {state:?}"),
                ))
            }
        };
        *self.state.lock() = if update {
            NegotiationState::Renegotiating
        } else {
            NegotiationState::Negotiating
        };

        if let Err(err) = self.pc.set_remote_description(remote.clone()).await {
            return Err(self.fail_negotiation("set_remote_description", err).await);
        }
        *self.remote_sdp.lock() = Some(remote);
        self.drain_queued_candidates().await;

        let normalized = match normalize(&cfg.media, update, self.local_tracks()) {
            Ok(normalized) => normalized,
            Err(err) => {
                *self.state.lock() = prior;
                return Err(err);
            }
        };
        if let Err(err) = self.prepare_media(&cfg, &normalized).await {
            *self.state.lock() = prior;
            return Err(err);
        }
        let options = self.build_options(&normalized, cfg.ice_restart).await;
        let munge = self.apply_simulcast(&normalized, cfg.simulcast).await;

        debug!(target: "handle", handle_id = self.ctx.handle_id, trickle = self.trickle,
            "creating answer");
        let mut jsep = match self.pc.create_answer(options).await {
            Ok(jsep) => jsep,
            Err(err) => return Err(self.fail_negotiation("create_answer", err).await),
        };
        if munge {
            jsep.sdp = inject_simulcast(&jsep.sdp);
        }
        jsep.trickle = Some(self.trickle);
        *self.local_sdp.lock() = Some(jsep.clone());
        if let Err(err) = self.pc.set_local_description(jsep.clone()).await {
            return Err(self.fail_negotiation("set_local_description", err).await);
        }
        *self.state.lock() = NegotiationState::Stable;

        if !self.trickle {
            self.await_ice_done().await;
            if let Some(complete) = self.pc.local_description().await {
                jsep = Jsep { trickle: Some(false), ..complete };
                *self.local_sdp.lock() = Some(jsep.clone());
            }
        }
        Ok(jsep)
    }

    /// Applies a remote description received outside the answer path
    /// (e.g. the answer to a published offer), then drains the candidate
    /// buffer into the peer.
    pub(crate) async fn apply_remote(self: &Arc<Self>, jsep: Jsep) -> Result<(), ClientError> {
        if jsep.sdp.is_empty() {
            return Err(ClientError::InvalidJsep);
        }
        let _guard = self.negotiation.lock().await;
        let is_answer = jsep.kind == JsepType::Answer;
        if let Err(err) = self.pc.set_remote_description(jsep.clone()).await {
            return Err(self.fail_negotiation("set_remote_description", err).await);
        }
        *self.remote_sdp.lock() = Some(jsep);
        if is_answer {
            let mut state = self.state.lock();
            if matches!(*state, NegotiationState::Negotiating | NegotiationState::Renegotiating) {
                *state = NegotiationState::Stable;
            }
        }
        self.drain_queued_candidates().await;
        Ok(())
    }

    /// Remote trickle: inject when the remote description is known,
    /// buffer otherwise. A completed marker becomes the null candidate.
    pub(crate) async fn handle_remote_candidate(&self, candidate: &TrickleCandidate) {
        let item = buffer_item(candidate);
        if self.remote_sdp.lock().is_some() {
            if let Err(err) = self.pc.add_ice_candidate(item).await {
                warn!(target: "handle", handle_id = self.ctx.handle_id, error = %err,
                    "failed to add remote candidate");
            }
        } else {
            trace!(target: "handle", handle_id = self.ctx.handle_id,
                "no remote description yet, buffering candidate");
            self.queued_remote_candidates.lock().push(item);
        }
    }

    async fn drain_queued_candidates(&self) {
        let queued: Vec<_> = self.queued_remote_candidates.lock().drain(..).collect();
        for item in queued {
            if let Err(err) = self.pc.add_ice_candidate(item).await {
                warn!(target: "handle", handle_id = self.ctx.handle_id, error = %err,
                    "failed to add buffered candidate");
            }
        }
    }

    async fn await_ice_done(&self) {
        if self.ice_done.load(Ordering::SeqCst) {
            return;
        }
        let (tx, rx) = oneshot::channel();
        self.ice_waiters.lock().push(tx);
        if self.ice_done.load(Ordering::SeqCst) {
            return;
        }
        debug!(target: "handle", handle_id = self.ctx.handle_id, "waiting for all candidates");
        let _ = rx.await;
    }

    async fn build_options(&self, media: &MediaConfig, ice_restart: bool) -> OfferOptions {
        let mut options = OfferOptions { ice_restart, ..OfferOptions::default() };
        if self.unified_plan {
            self.config_transceivers(media).await;
        } else {
            options.offer_to_receive_audio = media.recv_enabled(MediaKind::Audio);
            options.offer_to_receive_video = media.recv_enabled(MediaKind::Video);
        }
        options
    }

    /// Direction policy per kind: (send, recv) maps onto the transceiver
    /// direction; a missing transceiver is created only for recvonly.
    async fn config_transceivers(&self, media: &MediaConfig) {
        let transceivers = self.pc.transceivers().await;
        for kind in [MediaKind::Audio, MediaKind::Video] {
            let existing = transceivers.iter().find(|t| t.kind() == kind);
            let send = media.send_enabled(kind);
            let recv = media.recv_enabled(kind);
            let removed = match kind {
                MediaKind::Audio => media.remove_audio,
                MediaKind::Video => media.remove_video,
            };
            match (send, recv) {
                (true, true) => {
                    if let Some(t) = existing {
                        t.set_direction(TransceiverDirection::SendRecv);
                    }
                }
                (true, false) => {
                    if let Some(t) = existing {
                        t.set_direction(TransceiverDirection::SendOnly);
                    }
                }
                (false, true) => match existing {
                    Some(t) => t.set_direction(TransceiverDirection::RecvOnly),
                    None => {
                        let init = TransceiverInit {
                            direction: Some(TransceiverDirection::RecvOnly),
                            ..TransceiverInit::default()
                        };
                        if let Err(err) = self.pc.add_transceiver(None, kind, init).await {
                            warn!(target: "handle", handle_id = self.ctx.handle_id, error = %err,
                                "failed to add recvonly transceiver");
                        }
                    }
                },
                (false, false) => {
                    if removed {
                        if let Some(t) = existing {
                            t.set_direction(TransceiverDirection::Inactive);
                        }
                    }
                }
            }
        }
    }

    /// Attaches the three encoding layers to the video sender; returns
    /// true when the SDP must be rewritten instead.
    async fn apply_simulcast(&self, media: &MediaConfig, simulcast: bool) -> bool {
        if !simulcast || !media.send_enabled(MediaKind::Video) {
            return false;
        }
        if !self.unified_plan {
            return true;
        }
        let senders = self.pc.senders().await;
        let video_sender = senders
            .iter()
            .find(|s| s.track().map(|t| t.kind()) == Some(MediaKind::Video));
        match video_sender {
            Some(sender) => {
                if sender.parameters().encodings.len() >= 3 {
                    return false;
                }
                let parameters = RtpParameters { encodings: simulcast_encodings() };
                match sender.set_parameters(parameters) {
                    Ok(()) => false,
                    Err(err) => {
                        debug!(target: "handle", handle_id = self.ctx.handle_id, error = %err,
                            "sender rejected encodings, rewriting SDP");
                        true
                    }
                }
            }
            None => false,
        }
    }

    async fn prepare_media(
        self: &Arc<Self>,
        cfg: &OfferConfig,
        media: &MediaConfig,
    ) -> Result<(), ClientError> {
        // Detach whatever a remove/replace leaves behind.
        if media.update && !self.stream_external.load(Ordering::SeqCst) {
            for kind in [MediaKind::Audio, MediaKind::Video] {
                let (remove, replace) = match kind {
                    MediaKind::Audio => (media.remove_audio, media.replace_audio),
                    MediaKind::Video => (media.remove_video, media.replace_video),
                };
                if !remove && !replace {
                    continue;
                }
                let existing = self
                    .local_stream
                    .lock()
                    .as_ref()
                    .and_then(|stream| stream.first_track(kind));
                if let Some(track) = existing {
                    if let Some(stream) = self.local_stream.lock().as_ref() {
                        stream.remove_track(&track.id());
                    }
                    track.set_enabled(false);
                    let observer = Arc::clone(&self.ctx.observer);
                    self.ctx.events.post(move || observer.on_local_track(track, false));
                }
                // With unified plan a replace swaps the sender track; the
                // sender itself is only detached for remove.
                if !(replace && self.unified_plan) {
                    for sender in self.pc.senders().await {
                        if sender.track().map(|t| t.kind()) == Some(kind) {
                            if let Err(err) = self.pc.remove_track(&sender.id()).await {
                                warn!(target: "handle", handle_id = self.ctx.handle_id,
                                    error = %err, "failed to remove sender");
                            }
                        }
                    }
                }
            }
        }

        if let Some(external) = &cfg.stream {
            if media.update {
                let previous = self.local_stream.lock().clone();
                if let Some(previous) = previous {
                    if !Arc::ptr_eq(&previous, external)
                        && !self.stream_external.load(Ordering::SeqCst)
                    {
                        previous.stop_all_tracks();
                    }
                }
            }
            self.stream_external.store(true, Ordering::SeqCst);
            *self.local_stream.lock() = Some(Arc::clone(external));
            self.attach_tracks(external, cfg.simulcast).await?;
        } else if capture_needed(media) {
            let fresh = !media.update || self.local_stream.lock().is_none();
            if fresh {
                let stream = self.ctx.media_source.create_local_media_stream("janus-local");
                if media.send_enabled(MediaKind::Audio) {
                    let track = self.ctx.media_source.create_audio_track("audio0").await?;
                    stream.add_track(track);
                }
                if media.send_enabled(MediaKind::Video) {
                    let track = self.ctx.media_source.create_video_track("video0").await?;
                    stream.add_track(track);
                }
                self.stream_external.store(false, Ordering::SeqCst);
                *self.local_stream.lock() = Some(Arc::clone(&stream));
                self.attach_tracks(&stream, cfg.simulcast).await?;
            } else {
                self.update_tracks(media, cfg.simulcast).await?;
            }
        }

        if media.data_enabled()
            && !self.data_channels.lock().contains_key(DEFAULT_DATA_LABEL)
        {
            debug!(target: "handle", handle_id = self.ctx.handle_id, "creating default data channel");
            let channel = self.pc.create_data_channel(DEFAULT_DATA_LABEL).await?;
            self.adopt_channel(channel);
        }
        Ok(())
    }

    /// Adds every track of a fresh or external stream to the peer.
    async fn attach_tracks(
        &self,
        stream: &Arc<MediaStream>,
        simulcast: bool,
    ) -> Result<(), ClientError> {
        for track in stream.tracks() {
            let added = match track.kind() {
                MediaKind::Video if simulcast && self.unified_plan => {
                    let init = TransceiverInit {
                        direction: Some(TransceiverDirection::SendRecv),
                        stream_ids: vec![stream.id().to_owned()],
                        send_encodings: simulcast_encodings(),
                    };
                    self.pc
                        .add_transceiver(Some(Arc::clone(&track)), MediaKind::Video, init)
                        .await
                        .map(|_| ())
                }
                _ => self.pc.add_track(Arc::clone(&track), stream.id()).await.map(|_| ()),
            };
            match added {
                Ok(()) => {
                    let observer = Arc::clone(&self.ctx.observer);
                    let track = Arc::clone(&track);
                    self.ctx.events.post(move || observer.on_local_track(track, true));
                }
                Err(err) => {
                    warn!(target: "handle", handle_id = self.ctx.handle_id, error = %err,
                        kind = ?track.kind(), "failed to add local track");
                }
            }
        }
        Ok(())
    }

    /// Renegotiation additions/replacements into the existing stream.
    async fn update_tracks(&self, media: &MediaConfig, simulcast: bool) -> Result<(), ClientError> {
        let stream = match self.local_stream.lock().clone() {
            Some(stream) => stream,
            None => return Ok(()),
        };
        for kind in [MediaKind::Audio, MediaKind::Video] {
            let (add, replace) = match kind {
                MediaKind::Audio => (media.add_audio, media.replace_audio),
                MediaKind::Video => (media.add_video, media.replace_video),
            };
            if !add && !replace {
                continue;
            }
            let track = match kind {
                MediaKind::Audio => self.ctx.media_source.create_audio_track("audio0").await?,
                MediaKind::Video => self.ctx.media_source.create_video_track("video0").await?,
            };
            stream.add_track(Arc::clone(&track));

            let reuse = if replace && self.unified_plan {
                self.pc.transceivers().await.into_iter().find(|t| t.kind() == kind)
            } else {
                None
            };
            match reuse {
                Some(transceiver) => {
                    debug!(target: "handle", handle_id = self.ctx.handle_id, kind = ?kind,
                        "replacing track on existing transceiver");
                    transceiver.sender().replace_track(Some(Arc::clone(&track))).await?;
                }
                None => {
                    if kind == MediaKind::Video && simulcast && self.unified_plan {
                        let init = TransceiverInit {
                            direction: Some(TransceiverDirection::SendRecv),
                            stream_ids: vec![stream.id().to_owned()],
                            send_encodings: simulcast_encodings(),
                        };
                        self.pc
                            .add_transceiver(Some(Arc::clone(&track)), MediaKind::Video, init)
                            .await?;
                    } else {
                        self.pc.add_track(Arc::clone(&track), stream.id()).await?;
                    }
                }
            }
            let observer = Arc::clone(&self.ctx.observer);
            self.ctx.events.post(move || observer.on_local_track(track, true));
        }
        Ok(())
    }

    /// Sends on an open channel; a missing channel is created and left
    /// pending, and the send fails either way until it opens.
    pub(crate) async fn send_data(
        self: &Arc<Self>,
        label: &str,
        payload: &str,
    ) -> Result<(), ClientError> {
        let channel = self.data_channels.lock().get(label).cloned();
        match channel {
            Some(channel) if channel.state() == DataChannelState::Open => {
                channel.send_text(payload)
            }
            Some(_) => Err(ClientError::DataChannelNotOpen(label.to_owned())),
            None => {
                debug!(target: "handle", handle_id = self.ctx.handle_id, label,
                    "creating data channel, send will be possible once it opens");
                let channel = self.pc.create_data_channel(label).await?;
                self.adopt_channel(channel);
                Err(ClientError::DataChannelNotOpen(label.to_owned()))
            }
        }
    }

    pub(crate) async fn send_dtmf(
        &self,
        tones: &str,
        duration_ms: Option<u32>,
        gap_ms: Option<u32>,
    ) -> Result<(), ClientError> {
        if tones.is_empty() {
            return Err(ClientError::InvalidDtmf);
        }
        let sender = {
            let cached = self.dtmf.lock().clone();
            match cached {
                Some(sender) => sender,
                None => {
                    let senders = self.pc.senders().await;
                    let audio = senders.into_iter().find(|s| {
                        s.track().map(|t| t.kind()) == Some(MediaKind::Audio) && s.dtmf().is_some()
                    });
                    let Some(dtmf) = audio.and_then(|s| s.dtmf()) else {
                        return Err(ClientError::InvalidDtmf);
                    };
                    *self.dtmf.lock() = Some(Arc::clone(&dtmf));
                    dtmf
                }
            }
        };
        let duration = match duration_ms {
            Some(d) if d > 0 => d,
            _ => DEFAULT_DTMF_DURATION_MS,
        };
        let gap = match gap_ms {
            Some(g) if g > 0 => g,
            _ => DEFAULT_DTMF_GAP_MS,
        };
        debug!(target: "handle", handle_id = self.ctx.handle_id, tones, duration, gap,
            "sending DTMF");
        sender.insert_dtmf(tones, duration, gap)
    }

    /// Toggles the matching local sender track; `mid` narrows the lookup
    /// under unified plan.
    pub(crate) async fn set_muted(&self, kind: MediaKind, mid: Option<&str>, muted: bool) -> bool {
        match self.sender_track(kind, mid).await {
            Some(track) => {
                track.set_enabled(!muted);
                true
            }
            None => false,
        }
    }

    pub(crate) async fn is_muted(&self, kind: MediaKind, mid: Option<&str>) -> bool {
        match self.sender_track(kind, mid).await {
            Some(track) => !track.enabled(),
            None => true,
        }
    }

    async fn sender_track(&self, kind: MediaKind, mid: Option<&str>) -> Option<Arc<dyn MediaTrack>> {
        if let Some(mid) = mid.filter(|m| !m.is_empty() && self.unified_plan) {
            let transceivers = self.pc.transceivers().await;
            let transceiver = transceivers
                .into_iter()
                .find(|t| t.kind() == kind && t.mid().as_deref() == Some(mid))?;
            return transceiver.sender().track();
        }
        self.local_stream.lock().as_ref().and_then(|stream| stream.first_track(kind))
    }

    pub(crate) async fn get_stats(&self) -> Result<crate::peer::StatsReport, ClientError> {
        self.pc.get_stats().await
    }

    async fn fail_negotiation(
        self: &Arc<Self>,
        stage: &'static str,
        err: ClientError,
    ) -> ClientError {
        warn!(target: "handle", handle_id = self.ctx.handle_id, stage, error = %err,
            "negotiation failed, closing peer connection");
        self.close(true).await;
        match err {
            ClientError::Negotiation { .. } => err,
            other => ClientError::negotiation(stage, other.to_string()),
        }
    }

    /// Releases everything this session holds: local tracks (unless the
    /// stream was supplied externally), the peer connection, the candidate
    /// buffer, descriptions, data channels and DTMF state.
    pub(crate) async fn close(self: &Arc<Self>, emit_cleanup: bool) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.state.lock() = NegotiationState::Closed;

        let stream = self.local_stream.lock().take();
        if let Some(stream) = stream {
            if !self.stream_external.swap(false, Ordering::SeqCst) {
                debug!(target: "handle", handle_id = self.ctx.handle_id,
                    "stopping local stream tracks");
                stream.stop_all_tracks();
            }
        }

        self.pc.close().await;
        self.queued_remote_candidates.lock().clear();
        *self.local_sdp.lock() = None;
        *self.remote_sdp.lock() = None;
        self.ice_done.store(false, Ordering::SeqCst);
        for waiter in self.ice_waiters.lock().drain(..) {
            let _ = waiter.send(());
        }
        let channels: Vec<_> = self.data_channels.lock().drain().map(|(_, c)| c).collect();
        for channel in channels {
            channel.close();
        }
        *self.dtmf.lock() = None;
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }

        if emit_cleanup {
            let observer = Arc::clone(&self.ctx.observer);
            self.ctx.events.post(move || observer.on_cleanup());
        }
    }
}
