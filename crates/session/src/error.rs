//! Fehlertypen fuer die Session-Orchestrierung

use roomcast_audio::AudioError;
use roomcast_core::types::PeerId;
use roomcast_protocol::CandidateError;
use thiserror::Error;

use crate::media::MediaError;

/// Fehler bei der Verarbeitung einer Signaling-Nachricht oder eines Session-Befehls
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No peer connection found for {0}")]
    NoSession(PeerId),

    #[error("{0}")]
    MalformedCandidate(#[from] CandidateError),

    #[error("Media-Engine-Fehler: {0}")]
    Media(#[from] MediaError),

    #[error("Peer bereits verbunden: {0}")]
    PeerBereitsVerbunden(PeerId),

    #[error("Session geschlossen: {0}")]
    SessionGeschlossen(PeerId),

    #[error("Peer {0} veroeffentlicht keinen Track")]
    KeinTrack(PeerId),

    #[error("Audio-Fehler: {0}")]
    Audio(#[from] AudioError),
}

impl SessionError {
    /// `true` wenn der Fehler vom Client verursacht wurde
    pub fn ist_client_fehler(&self) -> bool {
        matches!(self, Self::NoSession(_) | Self::MalformedCandidate(_))
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;
    use roomcast_protocol::parse_candidate;

    #[test]
    fn kandidatenfehler_wird_durchgereicht() {
        let fehler: SessionError = parse_candidate("1 1 udp").unwrap_err().into();
        assert!(fehler.ist_client_fehler());
        assert!(matches!(fehler, SessionError::MalformedCandidate(_)));
    }

    #[test]
    fn no_session_nennt_den_peer() {
        let fehler = SessionError::NoSession(PeerId::new("alice"));
        assert!(fehler.to_string().contains("alice"));
        assert!(fehler.ist_client_fehler());
        assert!(!SessionError::SessionGeschlossen(PeerId::new("a")).ist_client_fehler());
    }
}
