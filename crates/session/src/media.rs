//! Schnittstelle zur Media Engine
//!
//! Die Engine uebernimmt ICE, DTLS/SRTP, RTP und Codecs. Der Orchestrator
//! kennt sie nur ueber diese Traits. Rueckmeldungen der Engine (neue
//! Tracks, lokale Kandidaten, Zustandswechsel) kommen als
//! [`ConnectionEvent`] ueber einen mpsc-Kanal in den Session-Task.

use std::fmt;

use async_trait::async_trait;
use roomcast_audio::TrackHandle;
use roomcast_core::types::PeerId;
use roomcast_protocol::{IceCandidateInit, ParsedCandidate, SessionDescription};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Zustaende
// ---------------------------------------------------------------------------

/// Gesamtzustand einer Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Zustaende, in denen die Session beendet wird
    pub fn ist_endgueltig(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    #[default]
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceGatheringState {
    #[default]
    New,
    Gathering,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    #[default]
    Stable,
    HaveRemoteOffer,
    HaveLocalPranswer,
    Closed,
}

/// Momentaufnahme aller Transport-Zustaende einer Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransportStatus {
    pub connection: ConnectionState,
    pub ice_connection: IceConnectionState,
    pub ice_gathering: IceGatheringState,
    pub signaling: SignalingState,
}

// ---------------------------------------------------------------------------
// Events und Fehler
// ---------------------------------------------------------------------------

/// Rueckmeldung der Engine an die Session
pub enum ConnectionEvent {
    /// Der Remote-Peer hat einen Track veroeffentlicht
    Track(TrackHandle),
    /// Lokaler Kandidat gefunden
    IceCandidate(IceCandidateInit),
    /// Candidate-Gathering abgeschlossen
    GatheringComplete,
    StateChanged(ConnectionState),
}

impl fmt::Debug for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Track(t) => f.debug_tuple("Track").field(&t.id()).finish(),
            Self::IceCandidate(c) => f.debug_tuple("IceCandidate").field(c).finish(),
            Self::GatheringComplete => f.write_str("GatheringComplete"),
            Self::StateChanged(s) => f.debug_tuple("StateChanged").field(s).finish(),
        }
    }
}

/// Handle der Engine auf einen ausgehenden Track
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SenderId(pub String);

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fehler der Media Engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("Ungueltige Session-Beschreibung: {0}")]
    UngueltigeBeschreibung(String),

    #[error("Kandidat abgelehnt: {0}")]
    KandidatAbgelehnt(String),

    #[error("Track konnte nicht hinzugefuegt werden: {0}")]
    TrackFehler(String),

    #[error("Verbindung geschlossen")]
    Geschlossen,

    #[error("Engine-Fehler: {0}")]
    Intern(String),
}

pub type MediaResult<T> = Result<T, MediaError>;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Fabrik fuer Verbindungen
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Erstellt eine neue Verbindung fuer den Peer
    ///
    /// Alle Rueckmeldungen der Verbindung gehen ueber `events`.
    async fn create_connection(
        &self,
        peer: &PeerId,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> MediaResult<Box<dyn MediaConnection>>;
}

/// Eine Verbindung zu einem Remote-Peer, exklusiv im Besitz der Session
#[async_trait]
pub trait MediaConnection: Send + Sync {
    async fn set_remote_description(&self, desc: &SessionDescription) -> MediaResult<()>;

    async fn create_answer(&self) -> MediaResult<SessionDescription>;

    async fn set_local_description(&self, desc: &SessionDescription) -> MediaResult<()>;

    async fn add_ice_candidate(
        &self,
        candidate: &ParsedCandidate,
        sdp_mid: Option<&str>,
        sdp_mline_index: Option<u16>,
    ) -> MediaResult<()>;

    /// Haengt einen ausgehenden Track an
    async fn add_track(&self, track: TrackHandle) -> MediaResult<SenderId>;

    async fn remove_track(&self, sender: &SenderId) -> MediaResult<()>;

    fn status(&self) -> TransportStatus;

    async fn close(&self);
}
