//! roomcast-protocol – Signaling-Protokoll
//!
//! Dieses Crate definiert die JSON-Nachrichten zwischen Client und
//! Orchestrator, den Parser fuer ICE-Kandidaten und das Wire-Format fuer
//! byte-orientierte Signaling-Kanaele.

pub mod candidate;
pub mod signaling;
pub mod wire;

pub use candidate::{parse_candidate, CandidateError, ParsedCandidate};
pub use signaling::{
    parse_client_message, AnswerPayload, ClientMessage, IceCandidateInit, ParseError, SdpType,
    ServerMessage, SessionDescription,
};
pub use wire::SignalingCodec;
