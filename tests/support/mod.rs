//! Shared fixtures: a scripted in-memory gateway and a mock WebRTC stack.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use janus_videoroom::error::ClientError;
use janus_videoroom::handle::HandleObserver;
use janus_videoroom::peer::{
    DataChannel, DataChannelEvent, DataChannelState, DtmfSender, IceCandidate, IceConnectionState,
    MediaKind, MediaSource, MediaTrack, OfferOptions, PeerConnection, PeerConnectionFactory,
    PeerEvent, RtcConfiguration, RtpParameters, RtpSender, StatsReport, Transceiver,
    TransceiverDirection, TransceiverInit,
};
use janus_videoroom::protocol::{Jsep, TrickleCandidate};
use janus_videoroom::session::{SessionObserver, SessionStatus};
use janus_videoroom::transport::{Transport, TransportEvent};
use janus_videoroom::videoroom::{Participant, RoomState, VideoRoomObserver};
use janus_videoroom::ClientConfig;

pub const FAKE_OFFER_SDP: &str = "v=0\r\n\
    o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
    s=-\r\n\
    m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
    a=mid:0\r\n\
    m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
    a=mid:1\r\n";

pub const FAKE_ANSWER_SDP: &str = "v=0\r\n\
    o=- 773182817386157 2 IN IP4 127.0.0.1\r\n\
    s=-\r\n\
    m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
    a=mid:0\r\n\
    m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
    a=mid:1\r\n";

/// Polls until `condition` holds; panics after two seconds.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        url: "ws://gateway.test/janus".into(),
        request_timeout: Duration::from_millis(500),
        heartbeat_interval: Duration::from_millis(50),
        ..ClientConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Scripted gateway
// ---------------------------------------------------------------------------

/// In-memory transport that impersonates a Janus gateway: control
/// messages are answered immediately, plugin messages are acked and then
/// handed to the VideoRoom script.
pub struct FakeGateway {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>,
    sent: Mutex<Vec<Value>>,
    connected: AtomicBool,
    session_counter: AtomicU64,
    handle_counter: AtomicU64,
    /// Feed id / private id handed out on publisher joins.
    pub joined_feed_id: AtomicU64,
    pub joined_private_id: AtomicU64,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            session_counter: AtomicU64::new(42),
            handle_counter: AtomicU64::new(1000),
            joined_feed_id: AtomicU64::new(77),
            joined_private_id: AtomicU64::new(9),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Pushes a raw frame to the client, as the server would.
    pub fn push(&self, frame: Value) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(TransportEvent::Message(frame.to_string())).is_ok());
    }

    /// Simulates an abrupt transport failure.
    pub fn fail(&self, code: u16, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| {
            tx.send(TransportEvent::Failed { code, reason: reason.to_owned() }).is_ok()
        });
    }

    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    pub fn sent_of_kind(&self, janus: &str) -> Vec<Value> {
        self.sent.lock().iter().filter(|v| v["janus"] == janus).cloned().collect()
    }

    /// Bodies of every plugin message sent so far.
    pub fn message_bodies(&self) -> Vec<Value> {
        self.sent_of_kind("message").iter().map(|v| v["body"].clone()).collect()
    }

    fn reply(&self, frame: Value) {
        self.push(frame);
    }

    fn answer_control(&self, envelope: &Value) {
        let txn = envelope["transaction"].clone();
        match envelope["janus"].as_str().unwrap_or_default() {
            "create" => {
                let id = self.session_counter.load(Ordering::SeqCst);
                self.reply(json!({"janus": "success", "transaction": txn, "data": {"id": id}}));
            }
            "claim" => {
                self.reply(json!({
                    "janus": "success",
                    "transaction": txn,
                    "session_id": envelope["session_id"],
                }));
            }
            "attach" => {
                let id = self.handle_counter.fetch_add(1, Ordering::SeqCst);
                self.reply(json!({"janus": "success", "transaction": txn, "data": {"id": id}}));
            }
            "keepalive" | "trickle" | "detach" | "hangup" | "destroy" => {
                self.reply(json!({"janus": "ack", "transaction": txn}));
            }
            "message" => {
                self.reply(json!({"janus": "ack", "transaction": txn}));
                self.answer_plugin_message(envelope);
            }
            _ => {}
        }
    }

    /// A little VideoRoom: enough of the plugin to drive the client
    /// through join, configure, subscribe, start and leave.
    fn answer_plugin_message(&self, envelope: &Value) {
        let txn = envelope["transaction"].clone();
        let sender = envelope["handle_id"].clone();
        let session = envelope["session_id"].clone();
        let body = &envelope["body"];
        let event = |data: Value, jsep: Option<Value>| {
            let mut frame = json!({
                "janus": "event",
                "transaction": txn,
                "session_id": session,
                "sender": sender,
                "plugindata": {"plugin": "janus.plugin.videoroom", "data": data},
            });
            if let Some(jsep) = jsep {
                frame["jsep"] = jsep;
            }
            frame
        };

        match body["request"].as_str().unwrap_or_default() {
            "join" if body["ptype"] == "publisher" => {
                self.reply(event(
                    json!({
                        "videoroom": "joined",
                        "room": body["room"],
                        "id": self.joined_feed_id.load(Ordering::SeqCst),
                        "private_id": self.joined_private_id.load(Ordering::SeqCst),
                        "publishers": [],
                    }),
                    None,
                ));
            }
            "join" if body["ptype"] == "subscriber" => {
                let streams: Vec<Value> = body["streams"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
                    .iter()
                    .enumerate()
                    .map(|(i, s)| {
                        json!({"mid": i.to_string(), "feed_id": s["feed"], "type": "video"})
                    })
                    .collect();
                self.reply(event(
                    json!({"videoroom": "attached", "room": body["room"], "streams": streams}),
                    Some(json!({"type": "offer", "sdp": FAKE_OFFER_SDP})),
                ));
            }
            "configure" => {
                self.reply(event(
                    json!({"videoroom": "event", "configured": "ok",
                        "audio_codec": "opus", "video_codec": "vp8"}),
                    Some(json!({"type": "answer", "sdp": FAKE_ANSWER_SDP})),
                ));
            }
            "subscribe" => {
                let streams: Vec<Value> = body["streams"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
                    .iter()
                    .enumerate()
                    .map(|(i, s)| {
                        json!({"mid": (100 + i).to_string(), "feed_id": s["feed"], "type": "video"})
                    })
                    .collect();
                self.reply(event(
                    json!({"videoroom": "updated", "streams": streams}),
                    Some(json!({"type": "offer", "sdp": FAKE_OFFER_SDP})),
                ));
            }
            "start" => {
                self.reply(event(json!({"videoroom": "event", "started": "ok"}), None));
            }
            "leave" => {
                self.reply(event(json!({"videoroom": "event", "leaving": "ok"}), None));
            }
            "unpublish" => {
                self.reply(event(json!({"videoroom": "event", "unpublished": "ok"}), None));
            }
            _ => {}
        }
    }
}

#[async_trait]
impl Transport for FakeGateway {
    async fn connect(&self, _url: &str) -> Result<(), ClientError> {
        self.connected.store(true, Ordering::SeqCst);
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(TransportEvent::Opened).is_ok());
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(TransportEvent::Closed).is_ok());
    }

    fn send_text(&self, payload: String) -> Result<(), ClientError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ClientError::Transport { code: 0, reason: "not connected".into() });
        }
        let envelope: Value = serde_json::from_str(&payload).expect("outbound frames are JSON");
        self.sent.lock().push(envelope.clone());
        self.answer_control(&envelope);
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }
}

// ---------------------------------------------------------------------------
// Mock WebRTC stack
// ---------------------------------------------------------------------------

pub struct MockTrack {
    id: String,
    kind: MediaKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl MockTrack {
    pub fn new(id: &str, kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_owned(),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl MediaTrack for MockTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockDtmf {
    pub sent: Mutex<Vec<(String, u32, u32)>>,
}

impl DtmfSender for MockDtmf {
    fn insert_dtmf(&self, tones: &str, duration_ms: u32, gap_ms: u32) -> Result<(), ClientError> {
        self.sent.lock().push((tones.to_owned(), duration_ms, gap_ms));
        Ok(())
    }
}

pub struct MockSender {
    id: String,
    track: Mutex<Option<Arc<dyn MediaTrack>>>,
    parameters: Mutex<RtpParameters>,
    pub reject_parameters: AtomicBool,
    dtmf: Option<Arc<MockDtmf>>,
}

impl MockSender {
    fn new(track: Arc<dyn MediaTrack>) -> Arc<Self> {
        let dtmf = match track.kind() {
            MediaKind::Audio => Some(Arc::new(MockDtmf::default())),
            MediaKind::Video => None,
        };
        Arc::new(Self {
            id: format!("sender-{}", track.id()),
            track: Mutex::new(Some(track)),
            parameters: Mutex::new(RtpParameters::default()),
            reject_parameters: AtomicBool::new(false),
            dtmf,
        })
    }

    pub fn mock_dtmf(&self) -> Option<Arc<MockDtmf>> {
        self.dtmf.clone()
    }
}

#[async_trait]
impl janus_videoroom::peer::RtpSender for MockSender {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn track(&self) -> Option<Arc<dyn MediaTrack>> {
        self.track.lock().clone()
    }

    async fn replace_track(&self, track: Option<Arc<dyn MediaTrack>>) -> Result<(), ClientError> {
        *self.track.lock() = track;
        Ok(())
    }

    fn parameters(&self) -> RtpParameters {
        self.parameters.lock().clone()
    }

    fn set_parameters(&self, parameters: RtpParameters) -> Result<(), ClientError> {
        if self.reject_parameters.load(Ordering::SeqCst) {
            return Err(ClientError::negotiation("set_parameters", "unsupported"));
        }
        *self.parameters.lock() = parameters;
        Ok(())
    }

    fn dtmf(&self) -> Option<Arc<dyn DtmfSender>> {
        self.dtmf.clone().map(|d| d as Arc<dyn DtmfSender>)
    }
}

pub struct MockTransceiver {
    kind: MediaKind,
    mid: Mutex<Option<String>>,
    direction: Mutex<TransceiverDirection>,
    sender: Arc<MockSender>,
    receiver_track: Mutex<Option<Arc<dyn MediaTrack>>>,
}

impl Transceiver for MockTransceiver {
    fn mid(&self) -> Option<String> {
        self.mid.lock().clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn direction(&self) -> TransceiverDirection {
        *self.direction.lock()
    }

    fn set_direction(&self, direction: TransceiverDirection) {
        *self.direction.lock() = direction;
    }

    fn sender(&self) -> Arc<dyn janus_videoroom::peer::RtpSender> {
        Arc::clone(&self.sender) as Arc<dyn janus_videoroom::peer::RtpSender>
    }

    fn receiver_track(&self) -> Option<Arc<dyn MediaTrack>> {
        self.receiver_track.lock().clone()
    }
}

pub struct MockDataChannel {
    label: String,
    state: Mutex<DataChannelState>,
    events_tx: mpsc::UnboundedSender<DataChannelEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<DataChannelEvent>>>,
    pub sent: Mutex<Vec<String>>,
}

impl MockDataChannel {
    pub fn new(label: &str) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            label: label.to_owned(),
            state: Mutex::new(DataChannelState::Connecting),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn open(&self) {
        *self.state.lock() = DataChannelState::Open;
        let _ = self.events_tx.send(DataChannelEvent::Open);
    }

    pub fn receive(&self, payload: &str) {
        let _ = self.events_tx.send(DataChannelEvent::Message(payload.to_owned()));
    }
}

impl DataChannel for MockDataChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn state(&self) -> DataChannelState {
        *self.state.lock()
    }

    fn send_text(&self, payload: &str) -> Result<(), ClientError> {
        if *self.state.lock() != DataChannelState::Open {
            return Err(ClientError::DataChannelNotOpen(self.label.clone()));
        }
        self.sent.lock().push(payload.to_owned());
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<DataChannelEvent>> {
        self.events_rx.lock().take()
    }

    fn close(&self) {
        *self.state.lock() = DataChannelState::Closed;
        let _ = self.events_tx.send(DataChannelEvent::Closed);
    }
}

pub struct MockPeer {
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
    pub local: Mutex<Option<Jsep>>,
    pub remote: Mutex<Option<Jsep>>,
    pub added_candidates: Mutex<Vec<Option<IceCandidate>>>,
    senders: Mutex<Vec<Arc<MockSender>>>,
    transceivers: Mutex<Vec<Arc<MockTransceiver>>>,
    pub data_channels: Mutex<Vec<Arc<MockDataChannel>>>,
    pub closed: AtomicBool,
    mid_counter: AtomicU64,
    /// Candidates gathered after the local description is set.
    pub gathered: Mutex<Vec<IceCandidate>>,
}

impl MockPeer {
    pub fn new() -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            added_candidates: Mutex::new(Vec::new()),
            senders: Mutex::new(Vec::new()),
            transceivers: Mutex::new(Vec::new()),
            data_channels: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            mid_counter: AtomicU64::new(0),
            gathered: Mutex::new(vec![IceCandidate {
                candidate: "candidate:1 1 udp 2122260223 192.0.2.1 54321 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
            }]),
        })
    }

    pub fn emit(&self, event: PeerEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn add_remote_track(&self, track: Arc<dyn MediaTrack>, mid: &str) {
        self.emit(PeerEvent::TrackAdded { track, mid: mid.to_owned() });
    }

    pub fn video_sender(&self) -> Option<Arc<MockSender>> {
        self.senders
            .lock()
            .iter()
            .find(|s| s.track().map(|t| t.kind()) == Some(MediaKind::Video))
            .cloned()
    }

    pub fn audio_sender(&self) -> Option<Arc<MockSender>> {
        self.senders
            .lock()
            .iter()
            .find(|s| s.track().map(|t| t.kind()) == Some(MediaKind::Audio))
            .cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn register_sender(&self, track: Arc<dyn MediaTrack>) -> Arc<MockSender> {
        let sender = MockSender::new(track);
        self.senders.lock().push(Arc::clone(&sender));
        sender
    }
}

#[async_trait]
impl PeerConnection for MockPeer {
    async fn create_offer(&self, _options: OfferOptions) -> Result<Jsep, ClientError> {
        Ok(Jsep::offer(FAKE_OFFER_SDP))
    }

    async fn create_answer(&self, _options: OfferOptions) -> Result<Jsep, ClientError> {
        Ok(Jsep::answer(FAKE_ANSWER_SDP))
    }

    async fn set_local_description(&self, jsep: Jsep) -> Result<(), ClientError> {
        *self.local.lock() = Some(jsep);
        // Gathering starts once the local description is in place.
        for candidate in self.gathered.lock().iter() {
            let _ = self.events_tx.send(PeerEvent::IceCandidate(Some(candidate.clone())));
        }
        let _ = self.events_tx.send(PeerEvent::IceCandidate(None));
        Ok(())
    }

    async fn local_description(&self) -> Option<Jsep> {
        self.local.lock().clone().map(|jsep| Jsep {
            sdp: format!("{}a=end-of-candidates\r\n", jsep.sdp),
            ..jsep
        })
    }

    async fn set_remote_description(&self, jsep: Jsep) -> Result<(), ClientError> {
        *self.remote.lock() = Some(jsep);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: Option<IceCandidate>) -> Result<(), ClientError> {
        self.added_candidates.lock().push(candidate);
        Ok(())
    }

    async fn add_track(
        &self,
        track: Arc<dyn MediaTrack>,
        _stream_id: &str,
    ) -> Result<Arc<dyn janus_videoroom::peer::RtpSender>, ClientError> {
        Ok(self.register_sender(track) as Arc<dyn janus_videoroom::peer::RtpSender>)
    }

    async fn add_transceiver(
        &self,
        track: Option<Arc<dyn MediaTrack>>,
        kind: MediaKind,
        init: TransceiverInit,
    ) -> Result<Arc<dyn Transceiver>, ClientError> {
        let sender = match track {
            Some(track) => self.register_sender(track),
            None => {
                let placeholder = MockTrack::new("placeholder", kind);
                let sender = MockSender::new(placeholder as Arc<dyn MediaTrack>);
                self.senders.lock().push(Arc::clone(&sender));
                sender
            }
        };
        if !init.send_encodings.is_empty() {
            *sender.parameters.lock() = RtpParameters { encodings: init.send_encodings.clone() };
        }
        let mid = self.mid_counter.fetch_add(1, Ordering::SeqCst).to_string();
        let transceiver = Arc::new(MockTransceiver {
            kind,
            mid: Mutex::new(Some(mid)),
            direction: Mutex::new(init.direction.unwrap_or(TransceiverDirection::SendRecv)),
            sender,
            receiver_track: Mutex::new(None),
        });
        self.transceivers.lock().push(Arc::clone(&transceiver));
        Ok(transceiver as Arc<dyn Transceiver>)
    }

    async fn remove_track(&self, sender_id: &str) -> Result<(), ClientError> {
        self.senders.lock().retain(|s| s.id != sender_id);
        Ok(())
    }

    async fn senders(&self) -> Vec<Arc<dyn janus_videoroom::peer::RtpSender>> {
        self.senders
            .lock()
            .iter()
            .cloned()
            .map(|s| s as Arc<dyn janus_videoroom::peer::RtpSender>)
            .collect()
    }

    async fn transceivers(&self) -> Vec<Arc<dyn Transceiver>> {
        self.transceivers.lock().iter().cloned().map(|t| t as Arc<dyn Transceiver>).collect()
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, ClientError> {
        let channel = MockDataChannel::new(label);
        self.data_channels.lock().push(Arc::clone(&channel));
        Ok(channel as Arc<dyn DataChannel>)
    }

    async fn get_stats(&self) -> Result<StatsReport, ClientError> {
        Ok(StatsReport(json!({"transport": {"bytes_sent": 1024}})))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>> {
        self.events_rx.lock().take()
    }
}

pub struct MockFactory {
    pub peers: Mutex<Vec<Arc<MockPeer>>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { peers: Mutex::new(Vec::new()) })
    }

    pub fn peer(&self, index: usize) -> Option<Arc<MockPeer>> {
        self.peers.lock().get(index).cloned()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }
}

#[async_trait]
impl PeerConnectionFactory for MockFactory {
    async fn create_peer_connection(
        &self,
        _config: &RtcConfiguration,
    ) -> Result<Arc<dyn PeerConnection>, ClientError> {
        let peer = MockPeer::new();
        self.peers.lock().push(Arc::clone(&peer));
        Ok(peer as Arc<dyn PeerConnection>)
    }
}

pub struct MockMediaSource {
    pub created: Mutex<Vec<Arc<MockTrack>>>,
}

impl MockMediaSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { created: Mutex::new(Vec::new()) })
    }

    pub fn tracks(&self) -> Vec<Arc<MockTrack>> {
        self.created.lock().clone()
    }
}

#[async_trait]
impl MediaSource for MockMediaSource {
    async fn create_audio_track(&self, id: &str) -> Result<Arc<dyn MediaTrack>, ClientError> {
        let track = MockTrack::new(id, MediaKind::Audio);
        self.created.lock().push(Arc::clone(&track));
        Ok(track as Arc<dyn MediaTrack>)
    }

    async fn create_video_track(&self, id: &str) -> Result<Arc<dyn MediaTrack>, ClientError> {
        let track = MockTrack::new(id, MediaKind::Video);
        self.created.lock().push(Arc::clone(&track));
        Ok(track as Arc<dyn MediaTrack>)
    }
}

// ---------------------------------------------------------------------------
// Recording observers
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSessionObserver {
    pub statuses: Mutex<Vec<SessionStatus>>,
    pub destroyed: AtomicUsize,
}

impl SessionObserver for RecordingSessionObserver {
    fn on_status(&self, status: SessionStatus) {
        self.statuses.lock().push(status);
    }

    fn on_destroyed(&self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

impl RecordingSessionObserver {
    pub fn count(&self, status: SessionStatus) -> usize {
        self.statuses.lock().iter().filter(|s| **s == status).count()
    }
}

#[derive(Default)]
pub struct RecordingHandleObserver {
    pub log: Mutex<Vec<String>>,
    pub cleanups: AtomicUsize,
    pub detacheds: AtomicUsize,
    pub webrtc_states: Mutex<Vec<bool>>,
    pub data_open: Mutex<Vec<String>>,
    pub data: Mutex<Vec<(String, String)>>,
    pub trickles: Mutex<Vec<TrickleCandidate>>,
    pub remote_tracks: Mutex<Vec<(String, bool)>>,
    pub stats: AtomicUsize,
}

impl RecordingHandleObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn cleanup_count(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    pub fn detached_count(&self) -> usize {
        self.detacheds.load(Ordering::SeqCst)
    }
}

impl HandleObserver for RecordingHandleObserver {
    fn on_attached(&self, success: bool) {
        self.log.lock().push(format!("attached:{success}"));
    }

    fn on_message(&self, _body: Value, _jsep: Option<Jsep>) {
        self.log.lock().push("message".into());
    }

    fn on_trickle(&self, candidate: TrickleCandidate) {
        self.trickles.lock().push(candidate);
    }

    fn on_webrtc_state(&self, up: bool, _reason: Option<String>) {
        self.webrtc_states.lock().push(up);
        self.log.lock().push(format!("webrtc:{up}"));
    }

    fn on_data_open(&self, label: String) {
        self.data_open.lock().push(label);
    }

    fn on_data(&self, payload: String, label: String) {
        self.data.lock().push((label, payload));
    }

    fn on_remote_track(
        &self,
        _track: Arc<dyn MediaTrack>,
        mid: String,
        added: bool,
    ) {
        self.remote_tracks.lock().push((mid, added));
    }

    fn on_ice_state(&self, _state: IceConnectionState) {
        self.log.lock().push("ice".into());
    }

    fn on_hangup(&self) {
        self.log.lock().push("hangup".into());
    }

    fn on_cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push("cleanup".into());
    }

    fn on_detached(&self) {
        self.detacheds.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push("detached".into());
    }

    fn on_stats_report(&self, _report: StatsReport) {
        self.stats.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingRoomObserver {
    pub states: Mutex<Vec<RoomState>>,
    pub joined: Mutex<Option<(u64, u64)>>,
    pub created: Mutex<Vec<Participant>>,
    pub removed: Mutex<Vec<Participant>>,
    pub remote_tracks: Mutex<Vec<(Option<u64>, String, bool)>>,
    pub errors: Mutex<Vec<(i64, String)>>,
    pub destroyed: AtomicUsize,
}

impl RecordingRoomObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created_ids(&self) -> Vec<u64> {
        self.created.lock().iter().map(|p| p.id).collect()
    }
}

impl VideoRoomObserver for RecordingRoomObserver {
    fn on_room_state(&self, state: RoomState) {
        self.states.lock().push(state);
    }

    fn on_joined(&self, feed_id: u64, private_id: u64) {
        *self.joined.lock() = Some((feed_id, private_id));
    }

    fn on_create_participant(&self, participant: Participant) {
        self.created.lock().push(participant);
    }

    fn on_remove_participant(&self, participant: Participant) {
        self.removed.lock().push(participant);
    }

    fn on_remote_track(
        &self,
        feed: Option<u64>,
        _track: Arc<dyn MediaTrack>,
        mid: String,
        added: bool,
    ) {
        self.remote_tracks.lock().push((feed, mid, added));
    }

    fn on_room_error(&self, code: i64, reason: String) {
        self.errors.lock().push((code, reason));
    }

    fn on_room_destroyed(&self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}
