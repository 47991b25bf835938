//! Fehlertypen fuer die lokale Audio-Wiedergabe

use thiserror::Error;

/// Alle moeglichen Fehler der Audio-Wiedergabe
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Audio-Geraet nicht gefunden: {0}")]
    GeraetNichtGefunden(String),

    #[error("Kein Ausgabegeraet verfuegbar")]
    KeinAusgabegeraet,

    /// Nach allen Geraete- und Format-Fallbacks ist keine Ausgabe moeglich
    #[error("Audio-Ausgabe nicht verfuegbar: {0}")]
    DeviceUnavailable(String),

    #[error("Sample-Format nicht unterstuetzt: {0}")]
    FormatNichtUnterstuetzt(String),

    #[error("Stream-Fehler: {0}")]
    StreamFehler(String),

    #[error("Kein Audio-Track fuer Peer {0}")]
    KeinTrack(String),

    #[error("Aufnahme fuer Peer {0} laeuft bereits")]
    AufnahmeLaeuft(String),

    #[error("Aufnahme-Fehler: {0}")]
    Aufnahme(#[from] hound::Error),

    #[error("I/O-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

pub type AudioResult<T> = Result<T, AudioError>;
