//! Client-side SDK for multi-party video rooms over the Janus WebSocket
//! JSON API.
//!
//! The crate covers the signaling and session-control core: a session
//! multiplexing plugin handles over one transport, per-handle WebRTC
//! negotiation (offer/answer, trickle ICE, renegotiation), and a
//! VideoRoom client coordinating a local publisher with a pool of remote
//! feeds behind a single subscriber connection.
//!
//! The WebRTC stack itself, capture devices and codecs stay behind the
//! traits in [`peer`]; an application supplies adapters over its media
//! stack and receives every event through the observer traits.
//!
//! ```no_run
//! use std::sync::Arc;
//! use janus_videoroom::{
//!     ClientConfig, RoomConfig, Session, VideoRoomClient, WebSocketTransport,
//! };
//! # use janus_videoroom::peer::{MediaSource, PeerConnectionFactory};
//! # use janus_videoroom::{SessionObserver, VideoRoomObserver};
//! # async fn run(
//! #     factory: Arc<dyn PeerConnectionFactory>,
//! #     media: Arc<dyn MediaSource>,
//! #     session_observer: Arc<dyn SessionObserver>,
//! #     room_observer: Arc<dyn VideoRoomObserver>,
//! # ) -> Result<(), janus_videoroom::ClientError> {
//! let config = ClientConfig::new("wss://janus.example.org/ws");
//! let transport = Arc::new(WebSocketTransport::new(
//!     config.subprotocol.clone(),
//!     config.ping_interval,
//! ));
//! let session =
//!     Session::connect(config, transport, factory, media, session_observer).await?;
//! let room = VideoRoomClient::new(session, RoomConfig::new(1234), room_observer);
//! room.join().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod handle;
pub mod peer;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod videoroom;

pub use client::{ApiClient, ClientEvent, PluginReplies};
pub use config::{ClientConfig, JANUS_PROTOCOL, VIDEOROOM_PLUGIN};
pub use error::ClientError;
pub use event_loop::EventLoop;
pub use handle::{
    HandleClient, HandleObserver, MediaConfig, NegotiationState, OfferConfig,
};
pub use protocol::{Envelope, FeedId, HandleId, Jsep, JsepType, SessionId, TrickleCandidate};
pub use session::{Session, SessionObserver, SessionStatus};
pub use transport::{Transport, TransportEvent, WebSocketTransport};
pub use videoroom::{
    Participant, RoomConfig, RoomState, VideoRoomClient, VideoRoomObserver,
};
