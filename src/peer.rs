//! Collaborator interfaces for the WebRTC stack.
//!
//! The negotiation machine drives peer connections exclusively through the
//! traits below; the concrete ICE/DTLS/SRTP implementation, capture devices
//! and codec factories live behind them. The surface mirrors the usual
//! unified-plan peer-connection API so an adapter over an existing stack is
//! mechanical.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::ClientError;
use crate::protocol::Jsep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Disconnected,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u32>,
}

/// One simulcast layer on an outgoing sender.
#[derive(Debug, Clone, PartialEq)]
pub struct RtpEncoding {
    pub rid: String,
    pub active: bool,
    pub max_bitrate: Option<u64>,
    pub scale_resolution_down_by: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RtpParameters {
    pub encodings: Vec<RtpEncoding>,
}

#[derive(Debug, Clone, Default)]
pub struct TransceiverInit {
    pub direction: Option<TransceiverDirection>,
    pub stream_ids: Vec<String>,
    pub send_encodings: Vec<RtpEncoding>,
}

/// Offer/answer options for peers without unified-plan semantics, plus the
/// ICE restart switch.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfferOptions {
    pub offer_to_receive_audio: bool,
    pub offer_to_receive_video: bool,
    pub ice_restart: bool,
}

#[derive(Debug, Clone)]
pub struct StatsReport(pub Value);

#[derive(Debug, Clone)]
pub struct RtcConfiguration {
    pub ice_servers: Vec<String>,
    pub unified_plan: bool,
}

/// Callbacks from the peer, delivered as a stream so the negotiation
/// machine can serialize them.
pub enum PeerEvent {
    /// `None` marks the end of candidate gathering.
    IceCandidate(Option<IceCandidate>),
    IceState(IceConnectionState),
    TrackAdded { track: Arc<dyn MediaTrack>, mid: String },
    TrackRemoved { track: Arc<dyn MediaTrack> },
    /// A channel the remote peer created.
    DataChannel(Arc<dyn DataChannel>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataChannelEvent {
    Open,
    Message(String),
    Closed,
}

pub trait MediaTrack: Send + Sync {
    fn id(&self) -> String;
    fn kind(&self) -> MediaKind;
    fn enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
    fn stop(&self);
}

pub trait DtmfSender: Send + Sync {
    fn insert_dtmf(&self, tones: &str, duration_ms: u32, gap_ms: u32) -> Result<(), ClientError>;
}

#[async_trait]
pub trait RtpSender: Send + Sync {
    fn id(&self) -> String;
    fn track(&self) -> Option<Arc<dyn MediaTrack>>;
    async fn replace_track(&self, track: Option<Arc<dyn MediaTrack>>) -> Result<(), ClientError>;
    fn parameters(&self) -> RtpParameters;
    fn set_parameters(&self, parameters: RtpParameters) -> Result<(), ClientError>;
    fn dtmf(&self) -> Option<Arc<dyn DtmfSender>>;
}

pub trait Transceiver: Send + Sync {
    fn mid(&self) -> Option<String>;
    fn kind(&self) -> MediaKind;
    fn direction(&self) -> TransceiverDirection;
    fn set_direction(&self, direction: TransceiverDirection);
    fn sender(&self) -> Arc<dyn RtpSender>;
    fn receiver_track(&self) -> Option<Arc<dyn MediaTrack>>;
}

pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;
    fn state(&self) -> DataChannelState;
    fn send_text(&self, payload: &str) -> Result<(), ClientError>;
    /// Event stream; single consumer, `None` after it was taken.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<DataChannelEvent>>;
    fn close(&self);
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self, options: OfferOptions) -> Result<Jsep, ClientError>;
    async fn create_answer(&self, options: OfferOptions) -> Result<Jsep, ClientError>;
    async fn set_local_description(&self, jsep: Jsep) -> Result<(), ClientError>;
    /// The current local description, complete with gathered candidates.
    async fn local_description(&self) -> Option<Jsep>;
    async fn set_remote_description(&self, jsep: Jsep) -> Result<(), ClientError>;
    /// `None` injects the end-of-candidates marker.
    async fn add_ice_candidate(&self, candidate: Option<IceCandidate>) -> Result<(), ClientError>;
    async fn add_track(
        &self,
        track: Arc<dyn MediaTrack>,
        stream_id: &str,
    ) -> Result<Arc<dyn RtpSender>, ClientError>;
    async fn add_transceiver(
        &self,
        track: Option<Arc<dyn MediaTrack>>,
        kind: MediaKind,
        init: TransceiverInit,
    ) -> Result<Arc<dyn Transceiver>, ClientError>;
    async fn remove_track(&self, sender_id: &str) -> Result<(), ClientError>;
    async fn senders(&self) -> Vec<Arc<dyn RtpSender>>;
    async fn transceivers(&self) -> Vec<Arc<dyn Transceiver>>;
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, ClientError>;
    async fn get_stats(&self) -> Result<StatsReport, ClientError>;
    async fn close(&self);
    /// Event stream; single consumer, `None` after it was taken.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>>;
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create_peer_connection(
        &self,
        config: &RtcConfiguration,
    ) -> Result<Arc<dyn PeerConnection>, ClientError>;
}

/// Capture-side collaborator.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn create_audio_track(&self, id: &str) -> Result<Arc<dyn MediaTrack>, ClientError>;
    async fn create_video_track(&self, id: &str) -> Result<Arc<dyn MediaTrack>, ClientError>;

    fn create_local_media_stream(&self, id: &str) -> Arc<MediaStream> {
        MediaStream::new(id)
    }
}

/// Plain bag of tracks; the renderer-facing stream type stays out of scope.
pub struct MediaStream {
    id: String,
    tracks: Mutex<Vec<Arc<dyn MediaTrack>>>,
}

impl MediaStream {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self { id: id.to_owned(), tracks: Mutex::new(Vec::new()) })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn add_track(&self, track: Arc<dyn MediaTrack>) {
        self.tracks.lock().push(track);
    }

    pub fn remove_track(&self, track_id: &str) -> Option<Arc<dyn MediaTrack>> {
        let mut tracks = self.tracks.lock();
        let index = tracks.iter().position(|t| t.id() == track_id)?;
        Some(tracks.remove(index))
    }

    pub fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.tracks.lock().clone()
    }

    pub fn tracks_of(&self, kind: MediaKind) -> Vec<Arc<dyn MediaTrack>> {
        self.tracks.lock().iter().filter(|t| t.kind() == kind).cloned().collect()
    }

    pub fn first_track(&self, kind: MediaKind) -> Option<Arc<dyn MediaTrack>> {
        self.tracks.lock().iter().find(|t| t.kind() == kind).cloned()
    }

    /// Disables every track; used when tearing down a stream we captured
    /// ourselves.
    pub fn stop_all_tracks(&self) {
        for track in self.tracks.lock().iter() {
            track.set_enabled(false);
            track.stop();
        }
    }
}
