//! Wire protocol types for the signaling relay
//!
//! One JSON object per WebSocket text frame, discriminated by a `type`
//! string field. Negotiation payloads (`sdp`, `candidate`) are transported
//! verbatim; the relay only checks presence, never content.

use serde::{Deserialize, Serialize};

/// Messages accepted from clients (agent or viewer)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Register the caller as agent for a new (or re-attached) session
    CreateSession {
        /// Pre-derived id for permanent sessions; omitted for a fresh one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    /// Register the caller as viewer for an existing session
    JoinSession { session_id: String },

    /// SDP offer from the agent, forwarded verbatim to the viewer
    Offer { session_id: String, sdp: String },

    /// SDP answer from the viewer, forwarded verbatim to the agent
    Answer { session_id: String, sdp: String },

    /// Trickle ICE candidate, forwarded or queued per negotiation state
    IceCandidate {
        session_id: String,
        candidate: CandidatePayload,
    },

    /// Remote-control input from the viewer, forwarded to the agent
    InputEvent {
        session_id: String,
        event: InputAction,
    },
}

impl ClientMessage {
    /// Session id referenced by this message, if any
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ClientMessage::CreateSession { session_id } => session_id.as_deref(),
            ClientMessage::JoinSession { session_id }
            | ClientMessage::Offer { session_id, .. }
            | ClientMessage::Answer { session_id, .. }
            | ClientMessage::IceCandidate { session_id, .. }
            | ClientMessage::InputEvent { session_id, .. } => Some(session_id),
        }
    }

    /// Parse a message from a JSON text frame
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to decode client message: {}", e))
        })
    }

    /// Convert to a JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to encode client message: {}", e))
        })
    }
}

/// Notifications and forwarded payloads sent to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Session registered; carries the adopted or generated id
    SessionCreated { session_id: String },

    /// A viewer joined; sent to both agent and viewer
    ViewerJoined { session_id: String },

    /// The viewer detached; session stays open for a rejoin
    ViewerDisconnected { session_id: String },

    /// The agent went away; the session no longer exists
    AgentDisconnected { session_id: String },

    /// Forwarded SDP offer
    Offer { session_id: String, sdp: String },

    /// Forwarded SDP answer
    Answer { session_id: String, sdp: String },

    /// Forwarded ICE candidate
    IceCandidate {
        session_id: String,
        candidate: CandidatePayload,
    },

    /// Forwarded input event (delivered to the agent)
    InputEvent {
        session_id: String,
        event: InputAction,
    },

    /// Non-fatal error reported back to the sender
    Error { reason: String },
}

impl ServerMessage {
    /// Convert to a JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to encode server message: {}", e))
        })
    }

    /// Parse from a JSON string
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to decode server message: {}", e))
        })
    }
}

/// Trickle ICE candidate payload, transported opaquely
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePayload {
    /// The candidate-attribute line
    pub candidate: String,

    /// Media stream identification tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// Index of the media description the candidate belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

/// Remote-control action descriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum InputAction {
    /// Continuous pointer movement; never deduplicated
    MouseMove { x: i32, y: i32 },

    /// Pointer button press
    MouseDown { x: i32, y: i32, button: MouseButton },

    /// Pointer button release; the only deduplicated commit action
    MouseUp { x: i32, y: i32, button: MouseButton },

    /// Scroll wheel movement
    Wheel { dx: i32, dy: i32 },

    /// Key press
    KeyDown { key: String },

    /// Key release
    KeyUp { key: String },
}

impl InputAction {
    /// Whether this is a discrete commit action subject to deduplication
    pub fn is_commit(&self) -> bool {
        matches!(self, InputAction::MouseUp { .. })
    }
}

/// Pointer button identifier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_session_with_id() {
        let msg = ClientMessage::CreateSession {
            session_id: Some("abc12345".to_string()),
        };

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"create-session\""));
        assert!(json.contains("\"sessionId\":\"abc12345\""));

        let parsed = ClientMessage::from_json(&json).unwrap();
        assert_eq!(msg, parsed);
    }

    #[test]
    fn test_create_session_without_id() {
        let parsed = ClientMessage::from_json(r#"{"type":"create-session"}"#).unwrap();
        assert_eq!(parsed, ClientMessage::CreateSession { session_id: None });
    }

    #[test]
    fn test_offer_round_trip() {
        let msg = ClientMessage::Offer {
            session_id: "abc12345".to_string(),
            sdp: "v=0\r\no=- ...".to_string(),
        };

        let json = msg.to_json().unwrap();
        let parsed = ClientMessage::from_json(&json).unwrap();
        assert_eq!(msg, parsed);
        assert_eq!(parsed.session_id(), Some("abc12345"));
    }

    #[test]
    fn test_ice_candidate_optional_fields() {
        let msg = ClientMessage::IceCandidate {
            session_id: "abc12345".to_string(),
            candidate: CandidatePayload {
                candidate: "candidate:0 1 UDP 2122252543 192.0.2.1 54400 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_m_line_index: Some(0),
            },
        };

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"sdpMLineIndex\":0"));
        let parsed = ClientMessage::from_json(&json).unwrap();
        assert_eq!(msg, parsed);

        // Both optional fields may be absent
        let bare = r#"{"type":"ice-candidate","sessionId":"abc12345","candidate":{"candidate":"candidate:..."}}"#;
        let parsed = ClientMessage::from_json(bare).unwrap();
        match parsed {
            ClientMessage::IceCandidate { candidate, .. } => {
                assert!(candidate.sdp_mid.is_none());
                assert!(candidate.sdp_m_line_index.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_input_event_mouse_up() {
        let json = r#"{"type":"input-event","sessionId":"abc12345","event":{"action":"mouse-up","x":10,"y":20,"button":"left"}}"#;
        let parsed = ClientMessage::from_json(json).unwrap();
        match &parsed {
            ClientMessage::InputEvent { event, .. } => {
                assert!(event.is_commit());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_mouse_move_is_not_commit() {
        let event = InputAction::MouseMove { x: 1, y: 2 };
        assert!(!event.is_commit());

        let event = InputAction::KeyDown {
            key: "Enter".to_string(),
        };
        assert!(!event.is_commit());
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(ClientMessage::from_json(r#"{"type":"telemetry","sessionId":"x"}"#).is_err());
        assert!(ClientMessage::from_json("not json at all").is_err());
    }

    #[test]
    fn test_server_message_round_trip() {
        let msg = ServerMessage::ViewerJoined {
            session_id: "abc12345".to_string(),
        };

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"viewer-joined\""));
        let parsed = ServerMessage::from_json(&json).unwrap();
        assert_eq!(msg, parsed);
    }

    #[test]
    fn test_server_error_message() {
        let msg = ServerMessage::Error {
            reason: "Session not found: abc12345".to_string(),
        };

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains("\"reason\""));
    }
}
