//! VideoRoom plugin request bodies and event payloads.

use serde::{Deserialize, Serialize};

use crate::protocol::FeedId;

/// Rooms are numeric by default but gateways can be configured for
/// string ids; both shapes are accepted and produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoomId {
    Num(u64),
    Str(String),
}

impl From<u64> for RoomId {
    fn from(id: u64) -> Self {
        RoomId::Num(id)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        RoomId::Str(id.to_owned())
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoomId::Num(id) => write!(f, "{id}"),
            RoomId::Str(id) => f.write_str(id),
        }
    }
}

/// Requests understood by the plugin.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "request")]
pub enum VideoRoomRequest {
    #[serde(rename = "create")]
    Create(CreateRoom),
    #[serde(rename = "destroy")]
    Destroy(DestroyRoom),
    #[serde(rename = "join")]
    Join(JoinRoom),
    #[serde(rename = "configure")]
    Configure(ConfigurePublisher),
    #[serde(rename = "publish")]
    Publish(PublishStream),
    #[serde(rename = "unpublish")]
    Unpublish(Unpublish),
    #[serde(rename = "start")]
    Start(Start),
    #[serde(rename = "subscribe")]
    Subscribe(UpdateSubscription),
    #[serde(rename = "leave")]
    Leave(Leave),
    #[serde(rename = "kick")]
    Kick(KickParticipant),
    #[serde(rename = "list")]
    List(ListRooms),
}

impl VideoRoomRequest {
    pub fn into_body(self) -> serde_json::Value {
        serde_json::to_value(self).expect("plugin body serializes")
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateRoom {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publishers: Option<u64>,
    /// Cap in bit/s advertised to publishers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_private: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permanent: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DestroyRoom {
    pub room: RoomId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permanent: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "ptype")]
pub enum JoinRoom {
    #[serde(rename = "publisher")]
    Publisher(JoinPublisher),
    #[serde(rename = "subscriber")]
    Subscriber(JoinSubscriber),
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinPublisher {
    pub room: RoomId,
    /// Feed id to register; the plugin picks one when missing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<FeedId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinSubscriber {
    pub room: RoomId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_id: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub streams: Vec<SubscriberStream>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriberStream {
    pub feed: FeedId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigurePublisher {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<bool>,
    /// Omitted entirely when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyframe: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishStream {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Unpublish;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Start;

#[derive(Debug, Clone, Serialize)]
pub struct UpdateSubscription {
    pub streams: Vec<SubscriberStream>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Leave;

#[derive(Debug, Clone, Serialize)]
pub struct KickParticipant {
    pub room: RoomId,
    pub id: FeedId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ListRooms;

/// `unpublished`/`leaving` carry a feed id, the literal `0` for "self",
/// or a plain string such as `"ok"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FeedRef {
    Id(FeedId),
    Text(String),
}

impl FeedRef {
    pub fn as_id(&self) -> Option<FeedId> {
        match self {
            FeedRef::Id(id) => Some(*id),
            FeedRef::Text(text) => text.parse().ok(),
        }
    }

    /// The literal `0` denotes the local publisher, in either encoding.
    pub fn is_self(&self) -> bool {
        self.as_id() == Some(0)
    }

    pub fn is_ok_marker(&self) -> bool {
        matches!(self, FeedRef::Text(text) if text == "ok")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublisherInfo {
    pub id: FeedId,
    #[serde(default)]
    pub display: Option<String>,
    #[serde(default)]
    pub audio_codec: Option<String>,
    #[serde(default)]
    pub video_codec: Option<String>,
    #[serde(default)]
    pub streams: Vec<FeedStream>,
}

/// One published stream as described in a publisher list.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedStream {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub mid: Option<String>,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// One slot in the subscriber's aggregated connection, correlating a
/// local mid with the remote feed it carries.
#[derive(Debug, Clone, Deserialize)]
pub struct AttachedStream {
    #[serde(default)]
    pub mid: Option<String>,
    #[serde(default)]
    pub feed_id: Option<FeedId>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

/// The `plugindata.data` payload of every VideoRoom event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoomEvent {
    #[serde(default)]
    pub videoroom: Option<String>,
    #[serde(default)]
    pub room: Option<RoomId>,
    #[serde(default)]
    pub id: Option<FeedId>,
    #[serde(default)]
    pub private_id: Option<u64>,
    #[serde(default)]
    pub publishers: Vec<PublisherInfo>,
    #[serde(default)]
    pub leaving: Option<FeedRef>,
    #[serde(default)]
    pub unpublished: Option<FeedRef>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub display: Option<String>,
    #[serde(default)]
    pub audio_codec: Option<String>,
    #[serde(default)]
    pub video_codec: Option<String>,
    #[serde(default)]
    pub started: Option<String>,
    #[serde(default)]
    pub configured: Option<String>,
    #[serde(default)]
    pub streams: Vec<AttachedStream>,
}

impl RoomEvent {
    pub fn parse(data: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(data.clone()).ok()
    }

    pub fn kind(&self) -> &str {
        self.videoroom.as_deref().unwrap_or("")
    }
}
