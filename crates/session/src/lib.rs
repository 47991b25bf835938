//! roomcast-session – Session- und Raum-Orchestrierung
//!
//! Dieses Crate verbindet Signaling, Media Engine und lokale Wiedergabe:
//! - Raum-Registry (ein Peer, hoechstens ein Raum)
//! - Peer-Sessions als eigene Tasks mit Verhandlungs-Zustandsmaschine
//! - Media Relay und Audio-Prozessoren fuer veroeffentlichte Tracks
//! - Weiterleitung an verbundene Peers im selben Raum
//! - Orchestrator-Fassade und Client-Verbindungsschleife
//!
//! Die Media Engine selbst (ICE, DTLS, RTP, Codecs) ist ueber
//! [`MediaEngine`] angebunden und nicht Teil dieses Crates.

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod error;
pub mod forwarding;
pub mod media;
pub mod orchestrator;
pub mod pipeline;
pub mod processor;
pub mod relay;
pub mod room;
pub mod session;
pub mod status;

pub use broadcast::{ClientSender, ConnectionRegistry};
pub use config::{ConfigError, RoomcastConfig};
pub use connection::ClientConnection;
pub use error::{SessionError, SessionResult};
pub use forwarding::{ForwardReport, ForwardingPolicy, LateJoinPolicy, PublishedTrack};
pub use media::{
    ConnectionEvent, ConnectionState, IceConnectionState, IceGatheringState, MediaConnection,
    MediaEngine, MediaError, MediaResult, SenderId, SignalingState, TransportStatus,
};
pub use orchestrator::SessionOrchestrator;
pub use pipeline::{PeerStats, TrackPipeline};
pub use processor::{AudioProcessor, GainProcessor, PassthroughProcessor, ProcessorRegistry};
pub use relay::{MediaRelay, RelayedTrack};
pub use room::RoomRegistry;
pub use session::{NegotiationState, SessionHandle, SessionRegistry, SessionSnapshot};
pub use status::{ConnectionInfo, ConnectionsStatus, HealthStatus, RoomInfo, StreamingStatus};
