//! Wire protocol frames for the chat backend.
//!
//! Each WebSocket text frame carries exactly one JSON object tagged by a
//! `type` field. Outbound frames flow client → backend, inbound frames
//! backend → client. Framing is atomic at this layer: the transport may
//! fragment, but decoding always yields whole frames.
//!
//! # Frames
//!
//! ```text
//! Outbound:  open_session { session_id }
//!            user_message { session_id, message_id, text, client_style? }
//! Inbound:   final_text   { message_id, text }
//!            meta         { used_ops }
//!            eot          {}
//!            error        { error }
//! ```

// Rust guideline compliant 2026-02

use serde::{Deserialize, Serialize};

/// Per-message style hints sent alongside a user message.
///
/// Carried only when the user has configured a formality preference
/// (`반말` casual / `존댓말` polite); omitted from the frame otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStyle {
    /// Speech-level preference for the agent's replies.
    pub formality: String,
}

/// Frame sent from the client to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// Bind the connection to a session and open it on the backend.
    OpenSession {
        /// Session the connection is (re)bound to.
        session_id: String,
    },
    /// A user message for the backend to answer.
    UserMessage {
        /// Session the message belongs to.
        session_id: String,
        /// Client-generated message id, unique within the session.
        message_id: String,
        /// Message text.
        text: String,
        /// Optional style hints.
        #[serde(skip_serializing_if = "Option::is_none")]
        client_style: Option<ClientStyle>,
    },
}

/// Frame received from the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// The agent's complete reply text for one turn.
    FinalText {
        /// Backend-generated message id.
        message_id: String,
        /// Full reply text.
        text: String,
    },
    /// Planner metadata describing which operators produced the reply.
    Meta {
        /// Operator tags, e.g. `"memory.recall"`.
        used_ops: Vec<String>,
    },
    /// End of turn: the reply that preceded this frame is complete.
    Eot,
    /// Backend-reported error for the current turn.
    Error {
        /// Human-readable description.
        error: String,
    },
}

/// Why an inbound payload could not be decoded.
///
/// Both variants are swallowed at the connection boundary (logged, never
/// propagated) so one bad frame cannot crash the channel.
#[derive(Debug)]
pub enum DecodeError {
    /// Payload was not valid JSON or was missing required fields.
    Malformed(String),
    /// Payload was valid JSON but carried an unrecognized `type`.
    UnknownType(String),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(detail) => write!(f, "malformed frame: {detail}"),
            Self::UnknownType(kind) => write!(f, "unknown frame type: {kind}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Known inbound discriminants, used to tell "unknown type" apart from
/// "known type with bad fields".
const INBOUND_TYPES: &[&str] = &["final_text", "meta", "eot", "error"];

/// Encode an outbound frame to its wire form.
pub fn encode_outbound(frame: &Outbound) -> String {
    // Tagged enums with string/vec fields cannot fail to serialize
    serde_json::to_string(frame).unwrap_or_default()
}

/// Decode one inbound wire payload.
///
/// Two-stage: parse the JSON, then inspect the `type` discriminant so that
/// unrecognized frame kinds and malformed payloads produce distinct
/// diagnostics.
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] for invalid JSON, a missing `type`,
/// or wrong fields on a known type; [`DecodeError::UnknownType`] for a
/// well-formed frame of a kind this client does not speak.
pub fn decode_inbound(payload: &str) -> Result<Inbound, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| DecodeError::Malformed("missing type field".to_string()))?;

    if !INBOUND_TYPES.contains(&kind) {
        return Err(DecodeError::UnknownType(kind.to_string()));
    }

    serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))
}
