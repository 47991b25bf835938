//! LocalAudioPlayer – lokale Wiedergabe der Tracks mehrerer Peers
//!
//! Verwaltet pro Peer einen Track, seine Lautstaerke, einen optionalen
//! Audio-Callback und die laufende Playback-Pipeline. Ist beim Initialisieren kein Geraet nutzbar, bleibt
//! der Player im Zustand "nicht verfuegbar": alle Wiedergabe-Anfragen
//! liefern `false`, nichts panikt. Die Initialisierung kann wiederholt
//! werden.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use roomcast_core::types::PeerId;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::device::{AudioHost, AusgabeWahl, DeviceManager, OutputDevice, SampleFormat};
use crate::error::{AudioError, AudioResult};
use crate::frame::TrackHandle;
use crate::playback::{AudioCallback, CallbackSlot, Lautstaerke, PlaybackConfig, PlaybackPipeline};

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration des Players
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Gewuenschtes Ausgabegeraet (None = automatisch)
    pub output_device: Option<String>,
    pub playback: PlaybackConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            output_device: None,
            playback: PlaybackConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Status-Snapshots
// ---------------------------------------------------------------------------

/// Wiedergabe-Status eines Peers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerAudioStatus {
    pub peer_id: PeerId,
    pub has_track: bool,
    pub is_playing: bool,
    pub volume: f32,
    pub stream_active: bool,
    pub has_callback: bool,
}

/// Status des Audio-Systems
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioSystemStatus {
    pub audio_available: bool,
    pub host: String,
    pub audio_format: Option<SampleFormat>,
    pub sample_rate: u32,
    pub channels: u16,
    pub output_device: Option<OutputDevice>,
    pub output_devices: Vec<OutputDevice>,
}

// ---------------------------------------------------------------------------
// Player
// ---------------------------------------------------------------------------

struct PeerEintrag {
    track: TrackHandle,
    lautstaerke: Lautstaerke,
    callback: CallbackSlot,
    pipeline: Option<PlaybackPipeline>,
}

struct PlayerInner {
    geraete: DeviceManager,
    config: PlayerConfig,
    ausgabe: RwLock<Option<AusgabeWahl>>,
    peers: DashMap<PeerId, PeerEintrag>,
}

/// Lokaler Audio-Player (Clone teilt den Zustand)
#[derive(Clone)]
pub struct LocalAudioPlayer {
    inner: Arc<PlayerInner>,
}

impl LocalAudioPlayer {
    /// Erstellt den Player und initialisiert sofort die Ausgabe
    pub fn new(host: Arc<dyn AudioHost>, config: PlayerConfig) -> Self {
        let player = Self {
            inner: Arc::new(PlayerInner {
                geraete: DeviceManager::new(host),
                config,
                ausgabe: RwLock::new(None),
                peers: DashMap::new(),
            }),
        };
        player.initialisieren();
        player
    }

    fn initialisieren(&self) -> bool {
        let cfg = &self.inner.config;
        let wahl = self.inner.geraete.initialisieren(
            cfg.output_device.as_deref(),
            cfg.sample_rate,
            cfg.channels,
        );
        match wahl {
            Ok(w) => {
                *self.inner.ausgabe.write() = Some(w);
                true
            }
            Err(e) => {
                warn!(fehler = %e, "Audio-Wiedergabe nicht verfuegbar");
                *self.inner.ausgabe.write() = None;
                false
            }
        }
    }

    /// Ob eine Ausgabe initialisiert ist
    pub fn is_available(&self) -> bool {
        self.inner.ausgabe.read().is_some()
    }

    /// Registriert den Track eines Peers; ein vorhandener wird ersetzt
    pub fn add_track(&self, peer: &PeerId, track: TrackHandle, volume: f32) -> bool {
        if !self.is_available() {
            warn!(peer = %peer, "Audio-Track nicht hinzugefuegt: Audio nicht verfuegbar");
            return false;
        }
        // Ein gesetzter Callback ueberlebt das Ersetzen des Tracks
        let mut callback = CallbackSlot::default();
        if let Some((_, mut alt)) = self.inner.peers.remove(peer) {
            warn!(peer = %peer, "Audio-Track existiert bereits, wird ersetzt");
            if let Some(mut p) = alt.pipeline.take() {
                p.stop();
            }
            callback = alt.callback.clone();
        }
        self.inner.peers.insert(
            peer.clone(),
            PeerEintrag {
                track,
                lautstaerke: Lautstaerke::new(volume),
                callback,
                pipeline: None,
            },
        );
        info!(peer = %peer, "Audio-Track hinzugefuegt");
        true
    }

    /// Entfernt den Track eines Peers und stoppt seine Wiedergabe
    pub fn remove_track(&self, peer: &PeerId) -> bool {
        match self.inner.peers.remove(peer) {
            Some((_, mut eintrag)) => {
                if let Some(mut p) = eintrag.pipeline.take() {
                    p.stop();
                }
                info!(peer = %peer, "Audio-Track entfernt");
                true
            }
            None => false,
        }
    }

    /// Startet die Wiedergabe eines registrierten Tracks
    pub async fn start(&self, peer: &PeerId) -> bool {
        match self.start_intern(peer).await {
            Ok(()) => true,
            Err(e) => {
                warn!(peer = %peer, fehler = %e, "Wiedergabe konnte nicht gestartet werden");
                false
            }
        }
    }

    async fn start_intern(&self, peer: &PeerId) -> AudioResult<()> {
        let wahl = self
            .inner
            .ausgabe
            .read()
            .clone()
            .ok_or_else(|| AudioError::DeviceUnavailable("nicht initialisiert".into()))?;

        let (track, lautstaerke, callback) = {
            let eintrag = self
                .inner
                .peers
                .get(peer)
                .ok_or_else(|| AudioError::KeinTrack(peer.to_string()))?;
            if eintrag.pipeline.as_ref().is_some_and(|p| p.is_active()) {
                warn!(peer = %peer, "Wiedergabe laeuft bereits");
                return Ok(());
            }
            (
                Arc::clone(&eintrag.track),
                eintrag.lautstaerke.clone(),
                eintrag.callback.clone(),
            )
        };

        let host = Arc::clone(self.inner.geraete.host());
        let pipeline = PlaybackPipeline::start(
            track,
            &host,
            &wahl,
            &self.inner.config.playback,
            lautstaerke,
            callback,
        )
        .await?;

        match self.inner.peers.get_mut(peer) {
            Some(mut eintrag) => {
                if let Some(mut alt) = eintrag.pipeline.replace(pipeline) {
                    alt.stop();
                }
                Ok(())
            }
            // Track wurde waehrend der Aufwaermphase entfernt
            None => Err(AudioError::KeinTrack(peer.to_string())),
        }
    }

    /// Stoppt die Wiedergabe, der Track bleibt registriert
    pub fn stop(&self, peer: &PeerId) -> bool {
        match self.inner.peers.get_mut(peer) {
            Some(mut eintrag) => {
                if let Some(mut p) = eintrag.pipeline.take() {
                    p.stop();
                    info!(peer = %peer, "Wiedergabe gestoppt");
                }
                true
            }
            None => false,
        }
    }

    pub fn set_volume(&self, peer: &PeerId, volume: f32) -> bool {
        match self.inner.peers.get(peer) {
            Some(eintrag) => {
                eintrag.lautstaerke.set(volume);
                info!(peer = %peer, volume = eintrag.lautstaerke.get(), "Lautstaerke gesetzt");
                true
            }
            None => {
                error!(peer = %peer, "Kein Audio-Track fuer Peer");
                false
            }
        }
    }

    pub fn volume(&self, peer: &PeerId) -> Option<f32> {
        self.inner.peers.get(peer).map(|e| e.lautstaerke.get())
    }

    /// Setzt den Audio-Callback eines Peers, wirkt auch auf eine laufende Wiedergabe
    pub fn add_callback(&self, peer: &PeerId, callback: AudioCallback) -> bool {
        match self.inner.peers.get(peer) {
            Some(eintrag) => {
                eintrag.callback.set(callback);
                info!(peer = %peer, "Audio-Callback gesetzt");
                true
            }
            None => {
                error!(peer = %peer, "Kein Audio-Track fuer Peer");
                false
            }
        }
    }

    pub fn remove_callback(&self, peer: &PeerId) -> bool {
        self.inner
            .peers
            .get(peer)
            .is_some_and(|e| e.callback.clear())
    }

    /// Stoppt alle laufenden Wiedergaben
    pub fn pause_all(&self) {
        for mut eintrag in self.inner.peers.iter_mut() {
            if let Some(mut p) = eintrag.pipeline.take() {
                p.stop();
            }
        }
        info!("Alle Wiedergaben pausiert");
    }

    /// Startet alle registrierten, nicht laufenden Tracks
    pub async fn resume_all(&self) {
        let peers: Vec<PeerId> = self
            .inner
            .peers
            .iter()
            .filter(|e| !e.pipeline.as_ref().is_some_and(|p| p.is_active()))
            .map(|e| e.key().clone())
            .collect();
        for peer in peers {
            self.start(&peer).await;
        }
        info!("Alle Wiedergaben fortgesetzt");
    }

    pub fn status(&self, peer: &PeerId) -> PeerAudioStatus {
        match self.inner.peers.get(peer) {
            Some(e) => {
                let laeuft = e.pipeline.as_ref().is_some_and(|p| p.is_active());
                PeerAudioStatus {
                    peer_id: peer.clone(),
                    has_track: true,
                    is_playing: e.pipeline.is_some(),
                    volume: e.lautstaerke.get(),
                    stream_active: laeuft,
                    has_callback: e.callback.is_set(),
                }
            }
            None => PeerAudioStatus {
                peer_id: peer.clone(),
                has_track: false,
                is_playing: false,
                volume: 0.0,
                stream_active: false,
                has_callback: false,
            },
        }
    }

    pub fn all_status(&self) -> Vec<PeerAudioStatus> {
        let peers: Vec<PeerId> = self.inner.peers.iter().map(|e| e.key().clone()).collect();
        peers.iter().map(|p| self.status(p)).collect()
    }

    pub fn system_status(&self) -> AudioSystemStatus {
        let ausgabe = self.inner.ausgabe.read().clone();
        let output_devices = self
            .inner
            .geraete
            .list_output_devices()
            .unwrap_or_else(|e| {
                warn!(fehler = %e, "Geraeteliste nicht abrufbar");
                Vec::new()
            });
        let cfg = &self.inner.config;
        AudioSystemStatus {
            audio_available: ausgabe.is_some(),
            host: self.inner.geraete.host().name().to_string(),
            audio_format: ausgabe.as_ref().map(|w| w.config.format),
            sample_rate: ausgabe
                .as_ref()
                .map_or(cfg.sample_rate, |w| w.config.sample_rate),
            channels: ausgabe.as_ref().map_or(cfg.channels, |w| w.config.channels),
            output_device: ausgabe.map(|w| w.device),
            output_devices,
        }
    }

    /// Stoppt alles und vergisst alle Tracks
    pub fn cleanup(&self) {
        self.pause_all();
        self.inner.peers.clear();
        info!("LocalAudioPlayer aufgeraeumt");
    }

    /// Wiederholt die Initialisierung der Ausgabe
    pub fn retry_init(&self) -> bool {
        info!("Audio-Initialisierung wird wiederholt");
        self.initialisieren()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testhost::{geraet, TestHost};
    use crate::device::NullHost;
    use crate::frame::{AudioFrame, ChannelTrack, TrackKind};

    fn player() -> (LocalAudioPlayer, Arc<TestHost>) {
        let host = Arc::new(TestHost::new(
            vec![geraet("lautsprecher", true)],
            vec![SampleFormat::F32],
        ));
        let player = LocalAudioPlayer::new(host.clone(), PlayerConfig::default());
        (player, host)
    }

    fn track(id: &str) -> (TrackHandle, tokio::sync::mpsc::Sender<Arc<AudioFrame>>) {
        let (t, tx) = ChannelTrack::new(id, TrackKind::Audio, 8);
        (Arc::new(t), tx)
    }

    #[test]
    fn ohne_geraet_nicht_verfuegbar() {
        let player = LocalAudioPlayer::new(Arc::new(NullHost), PlayerConfig::default());
        assert!(!player.is_available());
        let (t, _tx) = track("t");
        assert!(!player.add_track(&PeerId::from("a"), t, 1.0));
        assert!(!player.retry_init());
        let status = player.system_status();
        assert!(!status.audio_available);
        assert_eq!(status.host, "null");
        assert!(status.audio_format.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn start_ohne_verfuegbarkeit_liefert_false() {
        let player = LocalAudioPlayer::new(Arc::new(NullHost), PlayerConfig::default());
        assert!(!player.start(&PeerId::from("a")).await);
    }

    #[tokio::test(start_paused = true)]
    async fn lebenszyklus_eines_peers() {
        let (player, host) = player();
        let peer = PeerId::from("a");
        let (t, _tx) = track("t");

        assert!(player.is_available());
        assert!(player.add_track(&peer, t, 0.8));
        assert_eq!(player.volume(&peer), Some(0.8));
        assert!(!player.status(&peer).is_playing);

        assert!(player.start(&peer).await);
        let status = player.status(&peer);
        assert!(status.is_playing);
        assert!(status.stream_active);
        assert_eq!(host.offen.lock().len(), 1);

        assert!(player.set_volume(&peer, 3.0));
        assert_eq!(player.volume(&peer), Some(1.0));

        assert!(player.stop(&peer));
        assert!(!player.status(&peer).is_playing);
        assert!(player.status(&peer).has_track);

        assert!(player.remove_track(&peer));
        assert!(!player.status(&peer).has_track);
        assert!(!player.remove_track(&peer));
        assert!(!player.set_volume(&peer, 0.5));
        assert_eq!(player.volume(&peer), None);
    }

    #[tokio::test(start_paused = true)]
    async fn start_ohne_track_liefert_false() {
        let (player, _) = player();
        assert!(!player.start(&PeerId::from("unbekannt")).await);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_und_resume_aller_peers() {
        let (player, host) = player();
        let (t1, _tx1) = track("t1");
        let (t2, _tx2) = track("t2");
        player.add_track(&PeerId::from("a"), t1, 1.0);
        player.add_track(&PeerId::from("b"), t2, 1.0);

        player.resume_all().await;
        assert!(player.all_status().iter().all(|s| s.is_playing));
        assert_eq!(host.offen.lock().len(), 2);

        player.pause_all();
        assert!(player.all_status().iter().all(|s| !s.is_playing));

        player.cleanup();
        assert!(player.all_status().is_empty());
    }

    #[test]
    fn system_status_mit_geraet() {
        let (player, _) = player();
        let status = player.system_status();
        assert!(status.audio_available);
        assert_eq!(status.audio_format, Some(SampleFormat::F32));
        assert_eq!(status.output_devices.len(), 1);
        assert_eq!(
            status.output_device.map(|d| d.id),
            Some("lautsprecher".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn callback_pro_peer() {
        let (player, host) = player();
        let peer = PeerId::from("a");
        let (t, tx) = track("t");

        assert!(!player.add_callback(&peer, Arc::new(|_: &mut [f32]| {})));
        assert!(player.add_track(&peer, t, 1.0));
        assert!(player.add_callback(
            &peer,
            Arc::new(|samples: &mut [f32]| samples.iter_mut().for_each(|s| *s *= 2.0)),
        ));
        assert!(player.status(&peer).has_callback);

        tx.send(Arc::new(AudioFrame::interleaved(vec![0.25], 1, 48000)))
            .await
            .unwrap();
        assert!(player.start(&peer).await);
        let mut out = [0.0f32; 1];
        assert!(host.render(&mut out));
        assert_eq!(out, [0.5]);

        // Ersetzen des Tracks behaelt den Callback
        let (t2, _tx2) = track("t2");
        assert!(player.add_track(&peer, t2, 1.0));
        assert!(player.status(&peer).has_callback);

        assert!(player.remove_callback(&peer));
        assert!(!player.status(&peer).has_callback);
        assert!(!player.remove_callback(&peer));
    }
}
