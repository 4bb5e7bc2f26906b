use crate::peer::MediaKind;

/// Failure taxonomy for the whole crate.
///
/// Transport-level failures mark the session down and fail every pending
/// request with [`ClientError::SessionDown`]; parse errors on inbound
/// envelopes are logged and the envelope is dropped without tearing the
/// session down.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("transport failure ({code}): {reason}")]
    Transport { code: u16, reason: String },

    #[error("malformed envelope: {0}")]
    ProtocolParse(String),

    #[error("session is down")]
    SessionDown,

    #[error("no handle {0} attached to this session")]
    UnknownHandle(u64),

    #[error("invalid JSEP")]
    InvalidJsep,

    #[error("invalid DTMF parameters")]
    InvalidDtmf,

    #[error("data channel {0:?} is not open")]
    DataChannelNotOpen(String),

    #[error("{0:?} track already present")]
    TrackAlreadyPresent(MediaKind),

    #[error("negotiation failed during {stage}: {reason}")]
    Negotiation { stage: &'static str, reason: String },

    #[error("server error {code}: {reason}")]
    Server { code: i64, reason: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("request timed out")]
    Timeout,
}

impl ClientError {
    pub fn negotiation(stage: &'static str, reason: impl Into<String>) -> Self {
        ClientError::Negotiation {
            stage,
            reason: reason.into(),
        }
    }
}
