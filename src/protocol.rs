//! Wire envelopes for the Janus WebSocket JSON API.
//!
//! Every outbound envelope carries a freshly generated transaction id;
//! inbound envelopes either answer a pending transaction or arrive
//! unsolicited with a `sender` handle id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub type SessionId = u64;
pub type HandleId = u64;
pub type FeedId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub String);

impl TransactionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsepType {
    Offer,
    Answer,
}

/// The `{type, sdp}` container used to move SDP over the signaling channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jsep {
    #[serde(rename = "type")]
    pub kind: JsepType,
    pub sdp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trickle: Option<bool>,
}

impl Jsep {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { kind: JsepType::Offer, sdp: sdp.into(), trickle: None }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { kind: JsepType::Answer, sdp: sdp.into(), trickle: None }
    }
}

/// One trickled candidate, or the end-of-candidates marker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrickleCandidate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<String>,
    #[serde(rename = "sdpMid", skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl TrickleCandidate {
    pub fn new(candidate: String, sdp_mid: Option<String>, sdp_mline_index: Option<u32>) -> Self {
        Self { candidate: Some(candidate), sdp_mid, sdp_mline_index, completed: None }
    }

    pub fn completed() -> Self {
        Self { completed: Some(true), ..Self::default() }
    }

    pub fn is_completed(&self) -> bool {
        self.completed.unwrap_or(false)
    }
}

/// Control messages sent to the gateway.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "janus", rename_all = "lowercase")]
pub enum Request {
    Create {
        transaction: TransactionId,
    },
    /// Re-binds an existing session after a transport loss.
    Claim {
        session_id: SessionId,
        transaction: TransactionId,
    },
    Destroy {
        session_id: SessionId,
        transaction: TransactionId,
    },
    Keepalive {
        session_id: SessionId,
        transaction: TransactionId,
    },
    Attach {
        session_id: SessionId,
        plugin: String,
        opaque_id: String,
        transaction: TransactionId,
    },
    Detach {
        session_id: SessionId,
        handle_id: HandleId,
        transaction: TransactionId,
    },
    Hangup {
        session_id: SessionId,
        handle_id: HandleId,
        transaction: TransactionId,
    },
    Message {
        session_id: SessionId,
        handle_id: HandleId,
        body: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        jsep: Option<Jsep>,
        transaction: TransactionId,
    },
    Trickle {
        session_id: SessionId,
        handle_id: HandleId,
        candidate: TrickleCandidate,
        transaction: TransactionId,
    },
}

impl Request {
    pub fn handle_id(&self) -> Option<HandleId> {
        match self {
            Request::Detach { handle_id, .. }
            | Request::Hangup { handle_id, .. }
            | Request::Message { handle_id, .. }
            | Request::Trickle { handle_id, .. } => Some(*handle_id),
            _ => None,
        }
    }

    pub fn transaction(&self) -> &TransactionId {
        match self {
            Request::Create { transaction }
            | Request::Claim { transaction, .. }
            | Request::Destroy { transaction, .. }
            | Request::Keepalive { transaction, .. }
            | Request::Attach { transaction, .. }
            | Request::Detach { transaction, .. }
            | Request::Hangup { transaction, .. }
            | Request::Message { transaction, .. }
            | Request::Trickle { transaction, .. } => transaction,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IdData {
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginData {
    pub plugin: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServerError {
    pub code: i64,
    pub reason: String,
}

/// Every inbound frame decodes to this shape; `janus` discriminates the
/// kind and everything else is optional. A frame that fails to decode is
/// dropped with a warning rather than tearing the session down.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub janus: String,
    #[serde(default)]
    pub transaction: Option<TransactionId>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub sender: Option<HandleId>,
    #[serde(default)]
    pub data: Option<IdData>,
    #[serde(default)]
    pub plugindata: Option<PluginData>,
    #[serde(default)]
    pub jsep: Option<Jsep>,
    #[serde(default)]
    pub candidate: Option<TrickleCandidate>,
    #[serde(default)]
    pub error: Option<ServerError>,
    /// Hangup reason.
    #[serde(default)]
    pub reason: Option<String>,
    /// Media-event fields.
    #[serde(rename = "type", default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub receiving: Option<bool>,
    #[serde(default)]
    pub mid: Option<String>,
    /// Slowlink-event fields.
    #[serde(default)]
    pub uplink: Option<bool>,
    #[serde(default)]
    pub lost: Option<u64>,
}

impl Envelope {
    pub fn is_ack(&self) -> bool {
        self.janus == "ack"
    }

    /// Session id carried by a `create`/`claim` reply: prefers the
    /// top-level field when positive, falls back to `data.id`.
    pub fn created_session_id(&self) -> Option<SessionId> {
        match self.session_id {
            Some(id) if id > 0 => Some(id),
            _ => self.data.as_ref().map(|d| d.id),
        }
    }
}
