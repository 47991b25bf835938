//! roomcast-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! Standardwerte, ohne Konfigurationsdatei laeuft der Orchestrator mit
//! 15 s Gathering-Timeout, 16 Kandidaten und ohne lokale Wiedergabe.

use std::time::Duration;

use roomcast_audio::{PlaybackConfig, PlayerConfig};
use roomcast_observability::{log_level_pruefen, LogFormat, LoggingError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::forwarding::LateJoinPolicy;

/// Vollstaendige Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomcastConfig {
    /// Session- und Signaling-Einstellungen
    pub session: SessionEinstellungen,
    /// Lokale Wiedergabe
    pub audio: AudioEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Session-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionEinstellungen {
    /// Maximale Wartezeit auf das Ende des Candidate-Gatherings
    pub gathering_timeout_sek: u64,
    /// Maximale Anzahl gesammelter lokaler Kandidaten pro Offer
    pub max_gathered_candidates: usize,
    /// Groesse der Befehls-Queue pro Session
    pub command_queue: usize,
    /// Groesse der Sende-Queue pro Client-Verbindung
    pub send_queue: usize,
    /// Name des Audio-Prozessors fuer veroeffentlichte Tracks
    pub processor: String,
    /// Weiterleitung an Peers, die spaeter verbunden werden
    pub late_join: LateJoinPolicy,
    /// Peer beim Verbindungsabbau vollstaendig entfernen
    pub cleanup_on_disconnect: bool,
}

impl Default for SessionEinstellungen {
    fn default() -> Self {
        Self {
            gathering_timeout_sek: 15,
            max_gathered_candidates: 16,
            command_queue: 64,
            send_queue: 64,
            processor: "default".into(),
            late_join: LateJoinPolicy::default(),
            cleanup_on_disconnect: true,
        }
    }
}

impl SessionEinstellungen {
    pub fn gathering_timeout(&self) -> Duration {
        Duration::from_secs(self.gathering_timeout_sek)
    }
}

/// Einstellungen fuer die lokale Wiedergabe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEinstellungen {
    /// Veroeffentlichte Tracks zusaetzlich lokal abspielen
    pub local_playback: bool,
    pub sample_rate: u32,
    pub channels: u16,
    /// Tiefe des Jitter Buffers in Sekunden
    pub buffer_seconds: f32,
    /// Aufwaermzeit vor dem Stream-Start in Millisekunden
    pub warmup_ms: u64,
    /// Gewuenschtes Ausgabegeraet (None = automatisch)
    pub output_device: Option<String>,
    /// Start-Lautstaerke neuer Peers (0.0 - 1.0)
    pub volume: f32,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        Self {
            local_playback: false,
            sample_rate: 48000,
            channels: 1,
            buffer_seconds: 0.3,
            warmup_ms: 200,
            output_device: None,
            volume: 1.0,
        }
    }
}

impl AudioEinstellungen {
    /// Uebersetzt in die Konfiguration des lokalen Players
    pub fn player_config(&self) -> PlayerConfig {
        PlayerConfig {
            sample_rate: self.sample_rate,
            channels: self.channels,
            output_device: self.output_device.clone(),
            playback: PlaybackConfig {
                buffer_seconds: self.buffer_seconds,
                warmup: Duration::from_millis(self.warmup_ms),
            },
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: trace, debug, info, warn, error
    pub level: String,
    /// Format: text oder json
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl LoggingEinstellungen {
    /// Richtet den globalen Subscriber nach diesen Einstellungen ein
    pub fn initialisieren(&self) -> anyhow::Result<()> {
        roomcast_observability::logging_initialisieren(&self.level, &self.format)
    }
}

/// Ungueltige Konfigurationswerte
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("session.max_gathered_candidates muss groesser als 0 sein")]
    KeineKandidaten,

    #[error("session.{feld} muss groesser als 0 sein")]
    LeereQueue { feld: &'static str },

    #[error("audio.channels und audio.sample_rate muessen groesser als 0 sein")]
    UngueltigesFormat,

    #[error("audio.volume ausserhalb von 0.0 - 1.0: {0}")]
    UngueltigeLautstaerke(f32),

    #[error("logging: {0}")]
    Logging(#[from] LoggingError),
}

impl RoomcastConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei
    ///
    /// Fehlt die Datei, werden die Standardwerte verwendet.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                config.validieren()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Prueft Werte, die serde allein nicht abfangen kann
    pub fn validieren(&self) -> Result<(), ConfigError> {
        if self.session.max_gathered_candidates == 0 {
            return Err(ConfigError::KeineKandidaten);
        }
        if self.session.command_queue == 0 {
            return Err(ConfigError::LeereQueue {
                feld: "command_queue",
            });
        }
        if self.session.send_queue == 0 {
            return Err(ConfigError::LeereQueue { feld: "send_queue" });
        }
        if self.audio.channels == 0 || self.audio.sample_rate == 0 {
            return Err(ConfigError::UngueltigesFormat);
        }
        if !(0.0..=1.0).contains(&self.audio.volume) {
            return Err(ConfigError::UngueltigeLautstaerke(self.audio.volume));
        }
        self.logging.format.parse::<LogFormat>()?;
        // Ziel-Direktiven wie "roomcast_session=debug" prueft erst der EnvFilter
        if !self.logging.level.contains('=') {
            log_level_pruefen(&self.logging.level)?;
        }
        Ok(())
    }
}
