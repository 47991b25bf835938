//! Status-Snapshots fuer Health-Checks und Diagnose

use std::collections::BTreeMap;

use roomcast_core::types::{PeerId, RoomId};
use serde::Serialize;

use crate::media::{ConnectionState, IceConnectionState, IceGatheringState, SignalingState};
use crate::pipeline::PeerStats;
use crate::session::{NegotiationState, SessionSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub active_connections: usize,
    pub active_rooms: usize,
    pub active_sessions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionsStatus {
    pub active_connections: Vec<PeerId>,
    pub total_connections: usize,
}

/// Zustand aller Transport-Ebenen einer Peer-Verbindung
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub peer_id: PeerId,
    pub connection_state: ConnectionState,
    pub ice_connection_state: IceConnectionState,
    pub ice_gathering_state: IceGatheringState,
    pub signaling_state: SignalingState,
    pub negotiation_state: NegotiationState,
    pub local_candidates: usize,
}

impl From<SessionSnapshot> for ConnectionInfo {
    fn from(s: SessionSnapshot) -> Self {
        Self {
            peer_id: s.peer_id,
            connection_state: s.transport.connection,
            ice_connection_state: s.transport.ice_connection,
            ice_gathering_state: s.transport.ice_gathering,
            signaling_state: s.transport.signaling,
            negotiation_state: s.negotiation,
            local_candidates: s.local_candidates,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub total_peers: usize,
    pub peers: Vec<PeerId>,
    /// Peers mit aktiver Veroeffentlichung
    pub peers_with_audio: Vec<PeerId>,
    /// Peers mit laufender Session
    pub peers_with_connections: Vec<PeerId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamingStatus {
    /// Anzahl laufender Sessions
    pub total_connections: usize,
    pub total_audio_tracks: usize,
    pub active_rooms: usize,
    pub audio_statistics: BTreeMap<PeerId, PeerStats>,
    pub room_info: Option<RoomInfo>,
}
