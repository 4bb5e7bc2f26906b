//! The subscriber side of a room: a single handle whose one peer
//! connection carries every remote feed, answered with no sending. Mids
//! from the aggregated offer are correlated back to publisher feed ids.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::VIDEOROOM_PLUGIN;
use crate::error::ClientError;
use crate::handle::{HandleClient, HandleObserver, MediaConfig, OfferConfig};
use crate::peer::MediaTrack;
use crate::protocol::{FeedId, Jsep, JsepType};

use super::messages::{
    AttachedStream, JoinRoom, JoinSubscriber, RoomEvent, Start, SubscriberStream,
    UpdateSubscription, VideoRoomRequest,
};
use super::RoomInner;

pub(crate) struct SubscriberState {
    handle: Mutex<Option<Arc<HandleClient>>>,
    feeds_by_mid: Mutex<HashMap<String, FeedId>>,
}

impl SubscriberState {
    pub(crate) fn new() -> Self {
        Self { handle: Mutex::new(None), feeds_by_mid: Mutex::new(HashMap::new()) }
    }

    pub(crate) fn handle(&self) -> Option<Arc<HandleClient>> {
        self.handle.lock().clone()
    }

    pub(crate) fn take_handle(&self) -> Option<Arc<HandleClient>> {
        self.feeds_by_mid.lock().clear();
        self.handle.lock().take()
    }

    pub(crate) fn feed_for_mid(&self, mid: &str) -> Option<FeedId> {
        self.feeds_by_mid.lock().get(mid).copied()
    }

    fn record_streams(&self, streams: &[AttachedStream]) {
        if streams.is_empty() {
            return;
        }
        let mut map = self.feeds_by_mid.lock();
        for stream in streams {
            if let (Some(mid), Some(feed)) = (&stream.mid, stream.feed_id) {
                map.insert(mid.clone(), feed);
            }
        }
    }

    /// First call attaches the handle and joins with the whole batch;
    /// later calls update the existing subscription.
    pub(crate) async fn subscribe_to(
        room: &Arc<RoomInner>,
        feeds: Vec<SubscriberStream>,
    ) -> Result<(), ClientError> {
        if feeds.is_empty() {
            return Ok(());
        }
        let subscriber = &room.subscriber;
        match subscriber.handle() {
            None => {
                let opaque_id = format!("videoroom-sub-{}", Uuid::new_v4().simple());
                let events = Arc::new(SubscriberEvents { room: Arc::downgrade(room) });
                let handle = room.session.attach(VIDEOROOM_PLUGIN, &opaque_id, events).await?;
                *subscriber.handle.lock() = Some(Arc::clone(&handle));
                debug!(target: "videoroom", room = %room.config.room, feeds = feeds.len(),
                    "subscribing to initial feeds");
                let body = VideoRoomRequest::Join(JoinRoom::Subscriber(JoinSubscriber {
                    room: room.config.room.clone(),
                    private_id: *room.private_id.lock(),
                    streams: feeds,
                    pin: room.config.pin.clone(),
                }))
                .into_body();
                handle.send_message(body, None).await.map(|_| ())
            }
            Some(handle) => {
                debug!(target: "videoroom", feeds = feeds.len(), "updating subscription");
                let body =
                    VideoRoomRequest::Subscribe(UpdateSubscription { streams: feeds }).into_body();
                handle.send_message(body, None).await.map(|_| ())
            }
        }
    }
}

/// Answers the aggregated offer with a receive-only description, then
/// acknowledges with `start`.
async fn answer_offer(room: Arc<RoomInner>, offer: Jsep) {
    let Some(handle) = room.subscriber.handle() else { return };
    let cfg = OfferConfig { media: MediaConfig::recv_only(), ..OfferConfig::default() };
    match handle.create_answer(cfg, offer).await {
        Ok(answer) => {
            let body = VideoRoomRequest::Start(Start).into_body();
            if let Err(err) = handle.send_message(body, Some(answer)).await {
                warn!(target: "videoroom", error = %err, "subscriber start failed");
            }
        }
        Err(err) => {
            warn!(target: "videoroom", error = %err, "subscriber answer failed");
        }
    }
}

pub(crate) struct SubscriberEvents {
    pub(super) room: Weak<RoomInner>,
}

impl HandleObserver for SubscriberEvents {
    fn on_attached(&self, success: bool) {
        if !success {
            warn!(target: "videoroom", "subscriber attach failed");
        }
    }

    fn on_message(&self, body: Value, jsep: Option<Jsep>) {
        let Some(room) = self.room.upgrade() else { return };
        if let Some(event) = RoomEvent::parse(&body) {
            match event.kind() {
                "attached" | "updated" => {
                    debug!(target: "videoroom", kind = event.kind(), streams = event.streams.len(),
                        "subscription described");
                    room.subscriber.record_streams(&event.streams);
                }
                "event" => {
                    room.subscriber.record_streams(&event.streams);
                    if event.started.is_some() {
                        debug!(target: "videoroom", "subscription started");
                    }
                }
                other => {
                    debug!(target: "videoroom", kind = other, "unhandled subscriber event");
                }
            }
        }
        if let Some(jsep) = jsep {
            if jsep.kind == JsepType::Offer {
                let room = Arc::clone(&room);
                tokio::spawn(async move { answer_offer(room, jsep).await });
            }
        }
    }

    fn on_remote_track(&self, track: Arc<dyn MediaTrack>, mid: String, added: bool) {
        let Some(room) = self.room.upgrade() else { return };
        let feed = room.subscriber.feed_for_mid(&mid);
        room.observer.on_remote_track(feed, track, mid, added);
    }

    fn on_webrtc_state(&self, up: bool, reason: Option<String>) {
        debug!(target: "videoroom", up, reason = ?reason, "subscriber webrtc state");
    }

    fn on_hangup(&self) {
        debug!(target: "videoroom", "subscriber hangup");
    }

    fn on_detached(&self) {
        if let Some(room) = self.room.upgrade() {
            room.subscriber.take_handle();
        }
    }
}
