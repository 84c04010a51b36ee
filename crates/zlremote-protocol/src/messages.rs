use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{
    AdaptationReason, ConnectionId, ConnectionQuality, ErrorCode, QualitySettings, QualityTier,
    SessionId,
};

/// Messages sent from client to server via WebSocket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Start sharing: allocate a session with this connection as host
    RegisterHost {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device_info: Option<Value>,
    },

    /// Join an existing session as a viewer
    ConnectToHost {
        session_id: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },

    /// Viewer is ready to receive an offer
    ViewerReady,

    /// SDP offer from the host. Without `viewer_id` it goes to every viewer.
    WebrtcOffer {
        offer: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        viewer_id: Option<ConnectionId>,
    },

    /// SDP answer from a viewer, always delivered to its host
    WebrtcAnswer { answer: Value },

    /// ICE candidate. Host candidates fan out unless `viewer_id` is set;
    /// viewer candidates always go to the host.
    IceCandidate {
        candidate: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        viewer_id: Option<ConnectionId>,
    },

    /// Remote input from a viewer
    InputEvent { data: Value },

    /// Packet loss (percent) measured by the client media pipeline
    NetworkFeedback { packet_loss: f64 },

    /// Host ends its session without closing the connection
    StopHosting,

    /// Application-level keepalive
    Ping,
}

impl ClientMessage {
    /// Wire tag of this message, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::RegisterHost { .. } => "register_host",
            ClientMessage::ConnectToHost { .. } => "connect_to_host",
            ClientMessage::ViewerReady => "viewer_ready",
            ClientMessage::WebrtcOffer { .. } => "webrtc_offer",
            ClientMessage::WebrtcAnswer { .. } => "webrtc_answer",
            ClientMessage::IceCandidate { .. } => "ice_candidate",
            ClientMessage::InputEvent { .. } => "input_event",
            ClientMessage::NetworkFeedback { .. } => "network_feedback",
            ClientMessage::StopHosting => "stop_hosting",
            ClientMessage::Ping => "ping",
        }
    }
}

/// Messages sent from server to client via WebSocket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Identifier assigned to this connection
    ClientId { client_id: ConnectionId },

    /// Session created for the registering host
    HostRegistered { session_id: SessionId },

    /// Viewer successfully joined
    ConnectedToHost { session_id: SessionId },

    /// A viewer joined the host's session
    ViewerJoined { viewer_id: ConnectionId },

    /// A viewer left the host's session
    ViewerLeft { viewer_id: ConnectionId },

    /// A viewer is ready to receive an offer
    ViewerReady { viewer_id: ConnectionId },

    /// The session host went away; the session no longer exists
    HostDisconnected,

    /// SDP offer relayed from the host
    WebrtcOffer { offer: Value, host_id: ConnectionId },

    /// SDP answer relayed from a viewer
    WebrtcAnswer { answer: Value, viewer_id: ConnectionId },

    /// ICE candidate relayed from the other side of the pair
    IceCandidate {
        candidate: Value,
        sender_id: ConnectionId,
    },

    /// Remote input relayed from a viewer
    InputEvent { data: Value, viewer_id: ConnectionId },

    /// Smoothed link statistics for this connection
    NetworkStats {
        latency: u64,
        jitter: u64,
        packet_loss: f64,
        quality: ConnectionQuality,
    },

    /// New adaptive quality decision for the transmitting side
    QualityChange {
        quality: QualityTier,
        fps: u32,
        buffer_frames: usize,
        reason: AdaptationReason,
        settings: QualitySettings,
    },

    /// Pong response to ping
    Pong,

    /// Error message
    Error { code: ErrorCode, message: String },
}
