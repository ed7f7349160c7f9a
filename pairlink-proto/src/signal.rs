//! Signaling events exchanged between peers and the relay.
//!
//! Every event travels as one JSON object of the form
//! `{"event": <name>, "data": <payload>}`, with `data` omitted for events that
//! carry nothing. Event names are the contract with browser clients, so they
//! are spelled exactly as those clients emit and listen for them
//! (`peer-joined`, `createOffer`, ...).
//!
//! Session descriptions and connectivity candidates are opaque to the relay:
//! they are kept as [`serde_json::Value`] and handed back out untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error type for signaling encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// The frame is not a well-formed event.
    #[error("signal decode error: {0}")]
    Decode(String),
    /// The event could not be serialized.
    #[error("signal encode error: {0}")]
    Encode(String),
}

/// A session description (offer or answer) addressed to a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescription {
    /// Opaque description produced by the sender's media stack.
    pub sdp: Value,
    /// Room whose other member should receive the description.
    #[serde(alias = "roomId")]
    pub room_key: String,
}

/// A connectivity candidate addressed to a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSignal {
    /// Opaque candidate produced by the sender's media stack.
    pub candidate: Value,
    /// Room whose other member should receive the candidate.
    #[serde(alias = "roomId")]
    pub room_key: String,
}

/// Events a peer sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ClientEvent {
    /// Join (or create) the named room.
    Join(String),
    /// Leave the named room.
    Leave(String),
    /// Forward a session description offer to the room-mate.
    Offer(SessionDescription),
    /// Forward a session description answer to the room-mate.
    Answer(SessionDescription),
    /// Forward a connectivity candidate to the room-mate.
    Candidate(CandidateSignal),
}

impl ClientEvent {
    /// Wire name of the event, for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::Leave(_) => "leave",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::Candidate(_) => "candidate",
        }
    }

    /// The raw room key the event refers to, as sent by the peer.
    #[must_use]
    pub fn room_key(&self) -> &str {
        match self {
            Self::Join(key) | Self::Leave(key) => key,
            Self::Offer(desc) | Self::Answer(desc) => &desc.room_key,
            Self::Candidate(cand) => &cand.room_key,
        }
    }
}

/// Events the relay sends to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// You are the only member of the room you joined.
    #[serde(rename = "created")]
    Created,
    /// A second member arrived in your room.
    #[serde(rename = "peer-joined")]
    PeerJoined,
    /// You joined as second member and must start negotiation.
    #[serde(rename = "createOffer")]
    CreateOffer,
    /// The room already has two members; your join was rejected.
    #[serde(rename = "room-full")]
    RoomFull,
    /// Your room-mate left or disconnected.
    #[serde(rename = "peer-left")]
    PeerLeft,
    /// Offer relayed from your room-mate.
    #[serde(rename = "offer")]
    Offer(Value),
    /// Answer relayed from your room-mate.
    #[serde(rename = "answer")]
    Answer(Value),
    /// Candidate relayed from your room-mate.
    #[serde(rename = "candidate")]
    Candidate(Value),
}

impl ServerEvent {
    /// Wire name of the event, for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::PeerJoined => "peer-joined",
            Self::CreateOffer => "createOffer",
            Self::RoomFull => "room-full",
            Self::PeerLeft => "peer-left",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::Candidate(_) => "candidate",
        }
    }
}

/// Decodes a [`ClientEvent`] from the bytes of a text or binary frame.
///
/// # Errors
///
/// Returns [`SignalError::Decode`] for malformed JSON, unknown event names,
/// or payloads of the wrong shape.
pub fn decode_client(bytes: &[u8]) -> Result<ClientEvent, SignalError> {
    serde_json::from_slice(bytes).map_err(|e| SignalError::Decode(e.to_string()))
}

/// Encodes a [`ClientEvent`] as a JSON string.
///
/// # Errors
///
/// Returns [`SignalError::Encode`] if the event cannot be serialized.
pub fn encode_client(event: &ClientEvent) -> Result<String, SignalError> {
    serde_json::to_string(event).map_err(|e| SignalError::Encode(e.to_string()))
}

/// Decodes a [`ServerEvent`] from the bytes of a frame.
///
/// # Errors
///
/// Returns [`SignalError::Decode`] if the bytes are not a server event.
pub fn decode_server(bytes: &[u8]) -> Result<ServerEvent, SignalError> {
    serde_json::from_slice(bytes).map_err(|e| SignalError::Decode(e.to_string()))
}

/// Encodes a [`ServerEvent`] as a JSON string.
///
/// # Errors
///
/// Returns [`SignalError::Encode`] if the event cannot be serialized.
pub fn encode_server(event: &ServerEvent) -> Result<String, SignalError> {
    serde_json::to_string(event).map_err(|e| SignalError::Encode(e.to_string()))
}
