//! Verarbeitung eingehender Tracks
//!
//! Fuer jeden Track, den ein Peer veroeffentlicht:
//! 1. Relay-Kopie abonnieren
//! 2. Audio-Prozessor anwenden
//! 3. als Veroeffentlichung des Peers merken
//! 4. an die verbundenen Peers im Raum weiterleiten
//! 5. optional lokal abspielen
//!
//! Eingehender und verarbeiteter Track sind je eine eigene Relay-Quelle.
//! Weiterleitung, Wiedergabe und Aufnahme lesen Kopien der verarbeiteten.
//!
//! Schlaegt ein Schritt fehl, wird mit dem unveraenderten Track weitergemacht.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use roomcast_audio::{AudioRecorder, AufnahmeInfo, LocalAudioPlayer, TrackHandle, TrackKind};
use roomcast_core::types::PeerId;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::forwarding::{ForwardReport, ForwardingPolicy, LateJoinPolicy, PublishedTrack};
use crate::processor::ProcessorRegistry;

/// Audio-Statistik eines Peers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerStats {
    pub track_active: bool,
    pub track_type: TrackKind,
    pub track_id: String,
    pub timestamp: DateTime<Utc>,
    pub last_forward: Option<ForwardReport>,
    pub local_playback: bool,
}

pub struct TrackPipeline {
    forwarding: ForwardingPolicy,
    processors: Arc<ProcessorRegistry>,
    processor: String,
    player: Option<LocalAudioPlayer>,
    recorder: AudioRecorder,
    volume: f32,
    stats: DashMap<PeerId, PeerStats>,
}

impl TrackPipeline {
    pub fn new(
        forwarding: ForwardingPolicy,
        processors: Arc<ProcessorRegistry>,
        processor: impl Into<String>,
        player: Option<LocalAudioPlayer>,
        volume: f32,
    ) -> Self {
        Self {
            forwarding,
            processors,
            processor: processor.into(),
            player,
            recorder: AudioRecorder::new(),
            volume,
            stats: DashMap::new(),
        }
    }

    pub fn forwarding(&self) -> &ForwardingPolicy {
        &self.forwarding
    }

    pub fn player(&self) -> Option<&LocalAudioPlayer> {
        self.player.as_ref()
    }

    pub fn stats(&self, peer: &PeerId) -> Option<PeerStats> {
        self.stats.get(peer).map(|s| s.clone())
    }

    pub fn all_stats(&self) -> Vec<(PeerId, PeerStats)> {
        let mut alle: Vec<(PeerId, PeerStats)> = self
            .stats
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        alle.sort_by(|a, b| a.0.cmp(&b.0));
        alle
    }

    pub fn remove_stats(&self, peer: &PeerId) -> bool {
        self.stats.remove(peer).is_some()
    }

    /// Verarbeitet einen neu veroeffentlichten Track
    pub async fn track_verarbeiten(&self, peer: PeerId, track: TrackHandle) -> ForwardReport {
        info!(peer = %peer, track = %track.id(), kind = %track.kind(), "Track empfangen");

        // Vorherige Veroeffentlichung desselben Peers abloesen
        if self.quelle_beenden(&peer) {
            debug!(peer = %peer, "Vorherige Veroeffentlichung ersetzt");
        }

        let relay = self.forwarding.relay();
        let kind = track.kind();
        let source_id = track.id().to_string();
        let input_key = relay.add_source(track);
        let Some(kopie) = relay.subscribe(&input_key) else {
            warn!(peer = %peer, track = %source_id, "Track endete vor der Verarbeitung");
            return ForwardReport::default();
        };
        let verarbeitet = self
            .processors
            .process(&self.processor, &peer, kopie)
            .await;
        let output_key = relay.add_source(verarbeitet);

        let veroeffentlicht = PublishedTrack {
            source_id: source_id.clone(),
            kind,
            input_key,
            output_key,
        };
        self.forwarding.publish(&peer, veroeffentlicht.clone());
        self.stats.insert(
            peer.clone(),
            PeerStats {
                track_active: true,
                track_type: kind,
                track_id: source_id,
                timestamp: Utc::now(),
                last_forward: None,
                local_playback: false,
            },
        );

        let report = self.forwarding.forward(&peer, &veroeffentlicht).await;
        let lokal = self.lokal_abspielen(&peer, &veroeffentlicht).await;

        if let Some(mut s) = self.stats.get_mut(&peer) {
            s.last_forward = Some(report);
            s.local_playback = lokal;
        }
        report
    }

    async fn lokal_abspielen(&self, peer: &PeerId, track: &PublishedTrack) -> bool {
        let Some(player) = &self.player else {
            return false;
        };
        if !player.is_available() {
            debug!(peer = %peer, "Lokale Wiedergabe nicht verfuegbar");
            return false;
        }
        let Some(kopie) = self.forwarding.relay().subscribe(&track.output_key) else {
            return false;
        };
        if !player.add_track(peer, kopie, self.volume) {
            return false;
        }
        let gestartet = player.start(peer).await;
        if !gestartet {
            warn!(peer = %peer, "Lokale Wiedergabe konnte nicht gestartet werden");
        }
        gestartet
    }

    /// Beendet die Veroeffentlichung eines Peers samt Relay und Wiedergabe
    ///
    /// Die Kopien bei den Zielen werden im Hintergrund entfernt. Eine
    /// laufende Aufnahme endet mit der Relay-Quelle und wird abgeschlossen.
    pub fn quelle_beenden(&self, peer: &PeerId) -> bool {
        let Some(alt) = self.forwarding.unpublish(peer) else {
            return false;
        };
        let relay = self.forwarding.relay();
        relay.stop_source(&alt.output_key);
        relay.stop_source(&alt.input_key);
        self.forwarding.retract(peer, &alt);
        if let Some(player) = &self.player {
            player.remove_track(peer);
        }
        if let Some(mut s) = self.stats.get_mut(peer) {
            s.track_active = false;
        }
        info!(peer = %peer, track = %alt.source_id, "Veroeffentlichung beendet");
        true
    }

    /// Nimmt den veroeffentlichten Track eines Peers als WAV-Datei auf
    pub fn aufnahme_starten(&self, peer: &PeerId, pfad: impl Into<PathBuf>) -> SessionResult<()> {
        let veroeffentlicht = self
            .forwarding
            .published(peer)
            .ok_or_else(|| SessionError::KeinTrack(peer.clone()))?;
        let kopie = self
            .forwarding
            .relay()
            .subscribe(&veroeffentlicht.output_key)
            .ok_or_else(|| SessionError::KeinTrack(peer.clone()))?;
        self.recorder.start(peer, kopie, pfad)?;
        Ok(())
    }

    /// Stoppt die Aufnahme eines Peers und schliesst die Datei ab
    pub async fn aufnahme_stoppen(&self, peer: &PeerId) -> Option<AufnahmeInfo> {
        self.recorder.stop(peer).await
    }

    pub fn nimmt_auf(&self, peer: &PeerId) -> bool {
        self.recorder.is_recording(peer)
    }

    pub async fn alle_aufnahmen_stoppen(&self) {
        self.recorder.stop_all().await;
    }

    /// Wird aufgerufen, sobald die Verbindung eines Peers steht
    pub fn peer_verbunden(self: &Arc<Self>, peer: &PeerId) {
        if self.forwarding.late_join() != LateJoinPolicy::Retroactive {
            return;
        }
        let pipeline = Arc::clone(self);
        let peer = peer.clone();
        tokio::spawn(async move {
            pipeline.forwarding.catch_up(&peer).await;
        });
    }
}
