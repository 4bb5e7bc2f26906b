//! Room-level orchestration for the VideoRoom plugin: one publisher
//! handle for the local feed plus one subscriber handle that multiplexes
//! every remote feed in the room.

pub mod messages;
mod subscriber;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::VIDEOROOM_PLUGIN;
use crate::error::ClientError;
use crate::handle::{HandleClient, HandleObserver, MediaConfig, OfferConfig};
use crate::peer::MediaTrack;
use crate::protocol::{FeedId, Jsep};
use crate::session::Session;

use messages::{
    ConfigurePublisher, CreateRoom, DestroyRoom, FeedStream, JoinPublisher, JoinRoom,
    KickParticipant, ListRooms, PublisherInfo, RoomEvent, RoomId, SubscriberStream, Unpublish,
    VideoRoomRequest,
};
use subscriber::SubscriberState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    Outside,
    Joining,
    Joined,
    Leaving,
}

/// A remote publisher as the roster tracks it.
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: FeedId,
    pub display_name: String,
    pub streams: Vec<FeedStream>,
}

/// Room-level callbacks, delivered on the event loop.
#[allow(unused_variables)]
pub trait VideoRoomObserver: Send + Sync {
    fn on_room_state(&self, state: RoomState) {}
    fn on_joined(&self, feed_id: FeedId, private_id: u64) {}
    fn on_create_participant(&self, participant: Participant) {}
    fn on_remove_participant(&self, participant: Participant) {}
    fn on_local_track(&self, track: Arc<dyn MediaTrack>, added: bool) {}
    /// `feed` is resolved from the mid when the subscriber knows it.
    fn on_remote_track(
        &self,
        feed: Option<FeedId>,
        track: Arc<dyn MediaTrack>,
        mid: String,
        added: bool,
    ) {
    }
    fn on_room_error(&self, code: i64, reason: String) {}
    fn on_room_destroyed(&self) {}
}

#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub room: RoomId,
    pub display: Option<String>,
    pub pin: Option<String>,
    /// Bitrate for the publisher `configure`; omitted from the wire when
    /// unset.
    pub bitrate: Option<u64>,
    pub publish_audio: bool,
    pub publish_video: bool,
    pub simulcast: bool,
}

impl RoomConfig {
    pub fn new(room: impl Into<RoomId>) -> Self {
        Self {
            room: room.into(),
            display: None,
            pin: None,
            bitrate: None,
            publish_audio: true,
            publish_video: true,
            simulcast: true,
        }
    }
}

pub(crate) struct RoomInner {
    pub(super) session: Session,
    pub(super) config: RoomConfig,
    pub(super) observer: Arc<dyn VideoRoomObserver>,
    pub(super) state: Mutex<RoomState>,
    pub(super) publisher: Mutex<Option<Arc<HandleClient>>>,
    pub(super) my_feed_id: Mutex<Option<FeedId>>,
    pub(super) private_id: Mutex<Option<u64>>,
    pub(super) participants: Mutex<HashMap<FeedId, Participant>>,
    pub(super) subscriber: SubscriberState,
}

/// Client for one logical room.
#[derive(Clone)]
pub struct VideoRoomClient {
    inner: Arc<RoomInner>,
}

impl VideoRoomClient {
    pub fn new(
        session: Session,
        config: RoomConfig,
        observer: Arc<dyn VideoRoomObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(RoomInner {
                session,
                config,
                observer,
                state: Mutex::new(RoomState::Outside),
                publisher: Mutex::new(None),
                my_feed_id: Mutex::new(None),
                private_id: Mutex::new(None),
                participants: Mutex::new(HashMap::new()),
                subscriber: SubscriberState::new(),
            }),
        }
    }

    pub fn state(&self) -> RoomState {
        *self.inner.state.lock()
    }

    pub fn my_feed_id(&self) -> Option<FeedId> {
        *self.inner.my_feed_id.lock()
    }

    pub fn publisher(&self) -> Option<Arc<HandleClient>> {
        self.inner.publisher.lock().clone()
    }

    pub fn subscriber(&self) -> Option<Arc<HandleClient>> {
        self.inner.subscriber.handle()
    }

    pub fn participant(&self, id: FeedId) -> Option<Participant> {
        self.inner.participants.lock().get(&id).cloned()
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.inner.participants.lock().values().cloned().collect()
    }

    /// Attaches the publisher handle and joins the room. The `joined`
    /// reply drives the rest of the publisher flow.
    pub async fn join(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            if *state != RoomState::Outside {
                warn!(target: "videoroom", state = ?*state, "join ignored, already in a room");
                return Ok(());
            }
            *state = RoomState::Joining;
        }
        inner.notify_state(RoomState::Joining);

        let opaque_id = format!("videoroom-{}", Uuid::new_v4().simple());
        let events = Arc::new(PublisherEvents { room: Arc::downgrade(inner) });
        let publisher = match inner.session.attach(VIDEOROOM_PLUGIN, &opaque_id, events).await {
            Ok(handle) => handle,
            Err(err) => {
                inner.set_state(RoomState::Outside);
                return Err(err);
            }
        };
        *inner.publisher.lock() = Some(Arc::clone(&publisher));

        let body = VideoRoomRequest::Join(JoinRoom::Publisher(JoinPublisher {
            room: inner.config.room.clone(),
            id: None,
            display: inner.config.display.clone(),
            token: None,
            pin: inner.config.pin.clone(),
        }))
        .into_body();
        match publisher.send_message(body, None).await {
            Ok(_) => Ok(()),
            Err(err) => {
                inner.set_state(RoomState::Outside);
                Err(err)
            }
        }
    }

    /// Stops publishing without leaving the room.
    pub async fn unpublish(&self) -> Result<(), ClientError> {
        let publisher = self.require_publisher()?;
        publisher
            .send_message(VideoRoomRequest::Unpublish(Unpublish).into_body(), None)
            .await
            .map(|_| ())
    }

    pub async fn leave(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            if *state != RoomState::Joined {
                return Ok(());
            }
            *state = RoomState::Leaving;
        }
        inner.notify_state(RoomState::Leaving);
        let publisher = self.require_publisher()?;
        publisher
            .send_message(VideoRoomRequest::Leave(messages::Leave).into_body(), None)
            .await
            .map(|_| ())
    }

    pub async fn create_room(&self, request: CreateRoom) -> Result<Value, ClientError> {
        self.plugin_request(VideoRoomRequest::Create(request)).await
    }

    pub async fn destroy_room(&self, request: DestroyRoom) -> Result<Value, ClientError> {
        self.plugin_request(VideoRoomRequest::Destroy(request)).await
    }

    pub async fn kick(&self, id: FeedId) -> Result<Value, ClientError> {
        self.plugin_request(VideoRoomRequest::Kick(KickParticipant {
            room: self.inner.config.room.clone(),
            id,
            secret: None,
        }))
        .await
    }

    pub async fn list_rooms(&self) -> Result<Value, ClientError> {
        self.plugin_request(VideoRoomRequest::List(ListRooms)).await
    }

    /// Detaches both handles and forgets the roster.
    pub async fn close(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        if let Some(publisher) = inner.publisher.lock().take() {
            let _ = inner.session.detach(publisher.id(), false).await;
        }
        if let Some(subscriber) = inner.subscriber.take_handle() {
            let _ = inner.session.detach(subscriber.id(), false).await;
        }
        inner.participants.lock().clear();
        inner.set_state(RoomState::Outside);
        Ok(())
    }

    async fn plugin_request(&self, request: VideoRoomRequest) -> Result<Value, ClientError> {
        let publisher = self.require_publisher()?;
        let reply = publisher.send_message(request.into_body(), None).await?;
        let data = reply.plugindata.map(|pd| pd.data).unwrap_or(Value::Null);
        if let Some(event) = RoomEvent::parse(&data) {
            if let Some(error) = event.error {
                return Err(ClientError::Server {
                    code: event.error_code.unwrap_or(0),
                    reason: error,
                });
            }
        }
        Ok(data)
    }

    fn require_publisher(&self) -> Result<Arc<HandleClient>, ClientError> {
        self.inner
            .publisher
            .lock()
            .clone()
            .ok_or(ClientError::UnknownHandle(0))
    }
}

impl RoomInner {
    fn set_state(&self, state: RoomState) {
        {
            let mut current = self.state.lock();
            if *current == state {
                return;
            }
            *current = state;
        }
        self.notify_state(state);
    }

    fn notify_state(&self, state: RoomState) {
        self.observer.on_room_state(state);
    }

    /// Publisher `joined`: store our ids, negotiate the send-only offer,
    /// absorb the initial publisher list.
    fn on_joined(self: &Arc<Self>, event: RoomEvent) {
        let feed_id = event.id.unwrap_or_default();
        let private_id = event.private_id.unwrap_or_default();
        info!(target: "videoroom", room = %self.config.room, feed_id, "joined room");
        *self.my_feed_id.lock() = Some(feed_id);
        *self.private_id.lock() = Some(private_id);
        self.set_state(RoomState::Joined);
        self.observer.on_joined(feed_id, private_id);

        let room = Arc::clone(self);
        tokio::spawn(async move { room.publish_stream().await });

        self.absorb_publishers(event.publishers);
    }

    /// Negotiates the publisher's send-only connection and wraps the
    /// offer in a `configure`.
    async fn publish_stream(self: Arc<Self>) {
        let Some(publisher) = self.publisher.lock().clone() else { return };
        let media = MediaConfig {
            audio_send: Some(self.config.publish_audio),
            video_send: Some(self.config.publish_video),
            audio_recv: Some(false),
            video_recv: Some(false),
            ..MediaConfig::default()
        };
        let offer = OfferConfig {
            media,
            simulcast: self.config.simulcast,
            ..OfferConfig::default()
        };
        let jsep = match publisher.create_offer(offer).await {
            Ok(jsep) => jsep,
            Err(err) => {
                warn!(target: "videoroom", error = %err, "publisher offer failed");
                return;
            }
        };
        let body = VideoRoomRequest::Configure(ConfigurePublisher {
            audio: Some(self.config.publish_audio),
            video: Some(self.config.publish_video),
            bitrate: self.config.bitrate,
            display: self.config.display.clone(),
            ..ConfigurePublisher::default()
        })
        .into_body();
        if let Err(err) = publisher.send_message(body, Some(jsep)).await {
            warn!(target: "videoroom", error = %err, "configure failed");
        }
    }

    fn absorb_publishers(self: &Arc<Self>, publishers: Vec<PublisherInfo>) {
        if publishers.is_empty() {
            return;
        }
        debug!(target: "videoroom", count = publishers.len(), "publisher list update");
        let mut feeds = Vec::with_capacity(publishers.len());
        for publisher in &publishers {
            feeds.push(SubscriberStream { feed: publisher.id, mid: None });
            let participant = Participant {
                id: publisher.id,
                display_name: publisher.display.clone().unwrap_or_default(),
                streams: publisher.streams.clone(),
            };
            self.participants.lock().insert(publisher.id, participant.clone());
            self.observer.on_create_participant(participant);
        }
        let room = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = SubscriberState::subscribe_to(&room, feeds).await {
                warn!(target: "videoroom", error = %err, "subscribe failed");
            }
        });
    }

    fn remove_participant(&self, id: FeedId) {
        if let Some(participant) = self.participants.lock().remove(&id) {
            self.observer.on_remove_participant(participant);
        }
    }

    /// Everything the gateway sends the publisher handle lands here.
    fn on_publisher_message(self: &Arc<Self>, body: Value, jsep: Option<Jsep>) {
        let Some(event) = RoomEvent::parse(&body) else {
            warn!(target: "videoroom", "unparseable publisher event");
            return;
        };

        let kind = event.kind().to_owned();
        match kind.as_str() {
            "joined" => self.on_joined(event),
            "destroyed" => {
                warn!(target: "videoroom", room = %self.config.room, "room destroyed");
                self.set_state(RoomState::Outside);
                self.observer.on_room_destroyed();
                let room = Arc::clone(self);
                tokio::spawn(async move {
                    let publisher = room.publisher.lock().clone();
                    if let Some(publisher) = publisher {
                        publisher.hangup(false).await;
                    }
                    if let Some(subscriber) = room.subscriber.handle() {
                        subscriber.hangup(false).await;
                    }
                });
            }
            "event" => {
                self.absorb_publishers(event.publishers);
                if let Some(leaving) = event.leaving {
                    if leaving.is_ok_marker() {
                        // Our own leave completed.
                        self.set_state(RoomState::Outside);
                    } else if let Some(id) = leaving.as_id() {
                        debug!(target: "videoroom", feed = id, "participant leaving");
                        self.remove_participant(id);
                    }
                } else if let Some(unpublished) = event.unpublished {
                    if unpublished.is_self() {
                        // The gateway unpublished us: tear the send path down.
                        debug!(target: "videoroom", "own feed unpublished");
                        let room = Arc::clone(self);
                        tokio::spawn(async move {
                            let publisher = room.publisher.lock().clone();
                            if let Some(publisher) = publisher {
                                publisher.hangup(true).await;
                            }
                        });
                        return;
                    } else if let Some(id) = unpublished.as_id() {
                        debug!(target: "videoroom", feed = id, "participant unpublished");
                        self.remove_participant(id);
                    }
                } else if let Some(error) = event.error {
                    let code = event.error_code.unwrap_or(0);
                    warn!(target: "videoroom", code, reason = %error, "room error");
                    self.observer.on_room_error(code, error);
                    let joining = *self.state.lock() == RoomState::Joining;
                    if joining {
                        self.set_state(RoomState::Outside);
                    }
                }
            }
            other => {
                debug!(target: "videoroom", kind = other, "unhandled publisher event");
            }
        }

        if let Some(jsep) = jsep {
            // The answer to our published offer.
            let room = Arc::clone(self);
            tokio::spawn(async move {
                let Some(publisher) = room.publisher.lock().clone() else { return };
                if let Err(err) = publisher.handle_remote_jsep(jsep).await {
                    warn!(target: "videoroom", error = %err, "applying publisher answer failed");
                }
            });
        }
    }
}

/// The room client's behavioral subclassing of the generic handle: the
/// publisher handle's events drive the room machine.
struct PublisherEvents {
    room: std::sync::Weak<RoomInner>,
}

impl HandleObserver for PublisherEvents {
    fn on_attached(&self, success: bool) {
        if let Some(room) = self.room.upgrade() {
            if success {
                debug!(target: "videoroom", room = %room.config.room, "publisher attached");
            } else {
                warn!(target: "videoroom", "publisher attach failed");
                room.set_state(RoomState::Outside);
            }
        }
    }

    fn on_message(&self, body: Value, jsep: Option<Jsep>) {
        if let Some(room) = self.room.upgrade() {
            room.on_publisher_message(body, jsep);
        }
    }

    fn on_webrtc_state(&self, up: bool, reason: Option<String>) {
        debug!(target: "videoroom", up, reason = ?reason, "publisher webrtc state");
    }

    fn on_media_state(&self, kind: String, receiving: bool, _mid: Option<String>) {
        debug!(target: "videoroom", kind = %kind, receiving, "publisher media state");
    }

    fn on_local_track(&self, track: Arc<dyn MediaTrack>, added: bool) {
        if let Some(room) = self.room.upgrade() {
            room.observer.on_local_track(track, added);
        }
    }

    fn on_hangup(&self) {
        debug!(target: "videoroom", "publisher hangup");
    }

    fn on_detached(&self) {
        if let Some(room) = self.room.upgrade() {
            room.publisher.lock().take();
        }
    }

    fn on_error(&self, desc: String) {
        if let Some(room) = self.room.upgrade() {
            room.observer.on_room_error(0, desc);
        }
    }
}
