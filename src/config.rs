use std::time::Duration;

pub const JANUS_PROTOCOL: &str = "janus-protocol";
pub const VIDEOROOM_PLUGIN: &str = "janus.plugin.videoroom";

/// Static configuration shared by the session and every handle it attaches.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `ws://` or `wss://` endpoint of the Janus gateway.
    pub url: String,
    /// WebSocket subprotocol announced at connect time.
    pub subprotocol: String,
    /// Keepalive cadence while the session is up.
    pub heartbeat_interval: Duration,
    /// Deadline applied to every correlated request.
    pub request_timeout: Duration,
    /// Interval between WebSocket pings on the wire.
    pub ping_interval: Duration,
    /// STUN/TURN URIs handed to every new peer connection.
    pub ice_servers: Vec<String>,
    /// Unified-plan transceiver semantics; legacy offer-to-receive flags otherwise.
    pub unified_plan: bool,
    /// Default trickle setting for new peer sessions.
    pub trickle: bool,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            subprotocol: JANUS_PROTOCOL.to_owned(),
            heartbeat_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            ice_servers: vec!["stun:stun.l.google.com:19302".to_owned()],
            unified_plan: true,
            trickle: true,
        }
    }
}
