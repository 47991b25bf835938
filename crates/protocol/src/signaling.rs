//! Signaling-Nachrichten (JSON)
//!
//! Jede Nachricht ist ein JSON-Objekt mit einem `type`-Diskriminator.
//! Eingehende Nachrichten werden zweistufig geparst: zuerst als beliebiges
//! JSON (Fehler -> `Invalid JSON format`), dann anhand des Typs in die
//! typisierte Variante. So kann ein unbekannter Typ von einem bekannten Typ
//! mit fehlenden Feldern unterschieden werden.

use roomcast_core::types::{PeerId, RoomId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Gemeinsame Bausteine
// ---------------------------------------------------------------------------

/// Art einer Session-Beschreibung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl std::fmt::Display for SdpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Pranswer => "pranswer",
            Self::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

/// Session-Beschreibung `{type, sdp}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE-Kandidat wie er zwischen Browser und Server ausgetauscht wird
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

/// Antwort-Payload einer `answer`-Nachricht inklusive gesammelter Kandidaten
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerPayload {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub ice_candidates: Vec<IceCandidateInit>,
}

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

/// Alle Nachrichtentypen, die der Orchestrator versteht
pub const BEKANNTE_TYPEN: &[&str] = &[
    "offer",
    "answer",
    "ice-candidate",
    "join-room",
    "leave-room",
    "ping",
];

/// Nachricht vom Client an den Orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    Offer {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        offer: SessionDescription,
    },
    Answer {
        answer: SessionDescription,
    },
    IceCandidate {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        candidate: IceCandidateInit,
    },
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    LeaveRoom {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    Ping {
        #[serde(default)]
        timestamp: Value,
    },
}

impl ClientMessage {
    /// Wire-Name des Nachrichtentyps (fuer Logging)
    pub fn typ(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::JoinRoom { .. } => "join-room",
            Self::LeaveRoom { .. } => "leave-room",
            Self::Ping { .. } => "ping",
        }
    }
}

/// Fehler beim Parsen einer eingehenden Nachricht
#[derive(Debug, Error)]
pub enum ParseError {
    /// Kein gueltiges JSON-Objekt
    #[error("Invalid JSON format")]
    UngueltigesJson,

    /// Unbekannter oder fehlender `type`
    #[error("Unknown message type: {0}")]
    UnbekannterTyp(String),

    /// Bekannter Typ, aber Pflichtfelder fehlen oder haben den falschen Typ
    #[error("Ungueltige '{typ}'-Nachricht: {grund}")]
    UngueltigeFelder { typ: String, grund: String },
}

/// Parst eine eingehende Text-Nachricht
pub fn parse_client_message(text: &str) -> Result<ClientMessage, ParseError> {
    let wert: Value = serde_json::from_str(text).map_err(|_| ParseError::UngueltigesJson)?;
    if !wert.is_object() {
        return Err(ParseError::UngueltigesJson);
    }

    let typ = match wert.get("type") {
        Some(Value::String(s)) => s.clone(),
        Some(anderes) => return Err(ParseError::UnbekannterTyp(anderes.to_string())),
        None => return Err(ParseError::UnbekannterTyp("null".into())),
    };

    if !BEKANNTE_TYPEN.contains(&typ.as_str()) {
        return Err(ParseError::UnbekannterTyp(typ));
    }

    serde_json::from_value(wert).map_err(|e| ParseError::UngueltigeFelder {
        typ,
        grund: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

/// Nachricht vom Orchestrator an einen Client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "connection_established")]
    ConnectionEstablished { user_id: PeerId, status: String },

    #[serde(rename = "answer")]
    Answer {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        answer: AnswerPayload,
    },

    #[serde(rename = "room-joined")]
    RoomJoined {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },

    #[serde(rename = "room-left")]
    RoomLeft {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },

    #[serde(rename = "user-joined-room")]
    UserJoinedRoom {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },

    #[serde(rename = "user-left-room")]
    UserLeftRoom {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },

    #[serde(rename = "pong")]
    Pong { timestamp: Value },

    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerMessage {
    /// Begruessung direkt nach dem Verbindungsaufbau
    pub fn verbunden(peer_id: PeerId) -> Self {
        Self::ConnectionEstablished {
            user_id: peer_id,
            status: "connected".into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Fehlerantwort fuer eine Ausnahme waehrend der Verarbeitung
    pub fn verarbeitungsfehler(detail: impl std::fmt::Display) -> Self {
        Self::error(format!("Error processing message: {detail}"))
    }

    /// Fehlerantwort fuer einen Parse-Fehler
    pub fn aus_parse_fehler(fehler: &ParseError) -> Self {
        match fehler {
            ParseError::UngueltigesJson | ParseError::UnbekannterTyp(_) => {
                Self::error(fehler.to_string())
            }
            ParseError::UngueltigeFelder { .. } => Self::verarbeitungsfehler(fehler),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
