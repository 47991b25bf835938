//! Gemeinsame Test-Helfer: skriptbare Media Engine und stummer Audio-Host

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use roomcast_audio::{
    AudioFrame, AudioHost, AudioResult, ChannelTrack, OutputDevice, OutputStream, RenderCallback,
    SampleFormat, StreamConfig, TrackHandle, TrackKind,
};
use roomcast_core::types::PeerId;
use roomcast_protocol::{IceCandidateInit, ParsedCandidate, SessionDescription};
use roomcast_session::{
    ConnectionEvent, ConnectionState, IceConnectionState, IceGatheringState, MediaConnection,
    MediaEngine, MediaError, MediaResult, SenderId, SignalingState, TransportStatus,
};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Fake Media Engine
// ---------------------------------------------------------------------------

/// Verhalten jeder neuen Verbindung
#[derive(Debug, Clone, Copy)]
pub struct Skript {
    /// Anzahl lokaler Kandidaten nach `set_local_description`
    pub kandidaten: usize,
    /// Danach `GatheringComplete` melden
    pub gathering_fertig: bool,
    /// Verbindungsaufbau schlaegt fehl
    pub erstellen_fehlschlagen: bool,
}

impl Default for Skript {
    fn default() -> Self {
        Self {
            kandidaten: 3,
            gathering_fertig: true,
            erstellen_fehlschlagen: false,
        }
    }
}

/// Beobachtbarer Zustand einer Fake-Verbindung
pub struct FakeVerbindung {
    pub peer: PeerId,
    events: mpsc::Sender<ConnectionEvent>,
    skript: Skript,
    pub remote: Mutex<Vec<SessionDescription>>,
    pub kandidaten: Mutex<Vec<(ParsedCandidate, Option<String>, Option<u16>)>>,
    pub tracks: Mutex<Vec<(SenderId, TrackHandle)>>,
    pub entfernt: Mutex<Vec<SenderId>>,
    pub geschlossen: AtomicBool,
    status: Mutex<TransportStatus>,
    naechster_sender: AtomicU64,
}

impl FakeVerbindung {
    /// Meldet einen Zustandswechsel wie die echte Engine
    pub async fn zustand_melden(&self, zustand: ConnectionState) {
        {
            let mut status = self.status.lock();
            status.connection = zustand;
            status.ice_connection = match zustand {
                ConnectionState::Connected => IceConnectionState::Connected,
                ConnectionState::Failed => IceConnectionState::Failed,
                ConnectionState::Closed => IceConnectionState::Closed,
                _ => IceConnectionState::Checking,
            };
        }
        let _ = self.events.send(ConnectionEvent::StateChanged(zustand)).await;
    }

    /// Veroeffentlicht einen Audio-Track; ueber den Sender kommen die Frames
    pub async fn track_veroeffentlichen(&self, id: &str) -> mpsc::Sender<Arc<AudioFrame>> {
        let (track, tx) = ChannelTrack::new(id, TrackKind::Audio, 16);
        let _ = self
            .events
            .send(ConnectionEvent::Track(Arc::new(track)))
            .await;
        tx
    }

    pub async fn event_senden(&self, event: ConnectionEvent) {
        let _ = self.events.send(event).await;
    }

    pub fn ist_geschlossen(&self) -> bool {
        self.geschlossen.load(Ordering::SeqCst)
    }

    pub fn anzahl_tracks(&self) -> usize {
        self.tracks.lock().len()
    }

    pub fn track(&self, index: usize) -> Option<TrackHandle> {
        self.tracks.lock().get(index).map(|(_, t)| Arc::clone(t))
    }
}

struct FakeConnection(Arc<FakeVerbindung>);

#[async_trait]
impl MediaConnection for FakeConnection {
    async fn set_remote_description(&self, desc: &SessionDescription) -> MediaResult<()> {
        if desc.sdp.is_empty() {
            return Err(MediaError::UngueltigeBeschreibung("leeres SDP".into()));
        }
        self.0.remote.lock().push(desc.clone());
        self.0.status.lock().signaling = SignalingState::HaveRemoteOffer;
        Ok(())
    }

    async fn create_answer(&self) -> MediaResult<SessionDescription> {
        Ok(SessionDescription::answer("v=0\r\ns=fake-answer\r\n"))
    }

    async fn set_local_description(&self, _desc: &SessionDescription) -> MediaResult<()> {
        {
            let mut status = self.0.status.lock();
            status.signaling = SignalingState::Stable;
            status.ice_gathering = IceGatheringState::Gathering;
        }
        let verbindung = Arc::clone(&self.0);
        tokio::spawn(async move {
            for i in 0..verbindung.skript.kandidaten {
                let kandidat = IceCandidateInit {
                    candidate: format!(
                        "candidate:{i} 1 udp 2122260223 192.168.1.{} {} typ host",
                        10 + i,
                        50000 + i
                    ),
                    sdp_mid: Some("0".into()),
                    sdp_mline_index: Some(0),
                };
                if verbindung
                    .events
                    .send(ConnectionEvent::IceCandidate(kandidat))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            if verbindung.skript.gathering_fertig {
                verbindung.status.lock().ice_gathering = IceGatheringState::Complete;
                let _ = verbindung
                    .events
                    .send(ConnectionEvent::GatheringComplete)
                    .await;
            }
        });
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        candidate: &ParsedCandidate,
        sdp_mid: Option<&str>,
        sdp_mline_index: Option<u16>,
    ) -> MediaResult<()> {
        self.0.kandidaten.lock().push((
            candidate.clone(),
            sdp_mid.map(str::to_string),
            sdp_mline_index,
        ));
        Ok(())
    }

    async fn add_track(&self, track: TrackHandle) -> MediaResult<SenderId> {
        if self.0.ist_geschlossen() {
            return Err(MediaError::Geschlossen);
        }
        let n = self.0.naechster_sender.fetch_add(1, Ordering::SeqCst);
        let sender = SenderId(format!("{}-sender-{n}", self.0.peer));
        self.0.tracks.lock().push((sender.clone(), track));
        Ok(sender)
    }

    async fn remove_track(&self, sender: &SenderId) -> MediaResult<()> {
        self.0.tracks.lock().retain(|(s, _)| s != sender);
        self.0.entfernt.lock().push(sender.clone());
        Ok(())
    }

    fn status(&self) -> TransportStatus {
        *self.0.status.lock()
    }

    async fn close(&self) {
        self.0.geschlossen.store(true, Ordering::SeqCst);
        self.0.status.lock().connection = ConnectionState::Closed;
    }
}

/// Skriptbare Engine, merkt sich jede erstellte Verbindung
#[derive(Default)]
pub struct FakeEngine {
    skript: Mutex<Skript>,
    verbindungen: Mutex<Vec<Arc<FakeVerbindung>>>,
}

impl FakeEngine {
    pub fn new(skript: Skript) -> Arc<Self> {
        Arc::new(Self {
            skript: Mutex::new(skript),
            verbindungen: Mutex::new(Vec::new()),
        })
    }

    pub fn skript_setzen(&self, skript: Skript) {
        *self.skript.lock() = skript;
    }

    /// Juengste Verbindung des Peers
    pub fn verbindung(&self, peer: &str) -> Option<Arc<FakeVerbindung>> {
        self.verbindungen
            .lock()
            .iter()
            .rev()
            .find(|v| v.peer.as_str() == peer)
            .cloned()
    }

    pub fn alle_verbindungen(&self, peer: &str) -> Vec<Arc<FakeVerbindung>> {
        self.verbindungen
            .lock()
            .iter()
            .filter(|v| v.peer.as_str() == peer)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn create_connection(
        &self,
        peer: &PeerId,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> MediaResult<Box<dyn MediaConnection>> {
        let skript = *self.skript.lock();
        if skript.erstellen_fehlschlagen {
            return Err(MediaError::Intern("Verbindung nicht moeglich".into()));
        }
        let verbindung = Arc::new(FakeVerbindung {
            peer: peer.clone(),
            events,
            skript,
            remote: Mutex::new(Vec::new()),
            kandidaten: Mutex::new(Vec::new()),
            tracks: Mutex::new(Vec::new()),
            entfernt: Mutex::new(Vec::new()),
            geschlossen: AtomicBool::new(false),
            status: Mutex::new(TransportStatus::default()),
            naechster_sender: AtomicU64::new(1),
        });
        self.verbindungen.lock().push(Arc::clone(&verbindung));
        Ok(Box::new(FakeConnection(verbindung)))
    }
}

// ---------------------------------------------------------------------------
// Audio-Host ohne Hardware
// ---------------------------------------------------------------------------

/// Host mit einem Ausgabegeraet, das nur f32 kann und nichts abspielt
#[derive(Default)]
pub struct StummerHost {
    pub geoeffnet: AtomicU64,
}

struct StummerStream;

impl OutputStream for StummerStream {
    fn stop(&mut self) {}
}

impl AudioHost for StummerHost {
    fn name(&self) -> &str {
        "stumm"
    }

    fn devices(&self) -> AudioResult<Vec<OutputDevice>> {
        Ok(vec![OutputDevice {
            id: "stumm-0".into(),
            name: "Stummes Geraet".into(),
            channels: 2,
            sample_rate: 48000,
            output: true,
        }])
    }

    fn probe(&self, _device: &OutputDevice, config: &StreamConfig) -> AudioResult<()> {
        match config.format {
            SampleFormat::F32 => Ok(()),
            anderes => Err(roomcast_audio::AudioError::FormatNichtUnterstuetzt(
                anderes.to_string(),
            )),
        }
    }

    fn open_output(
        &self,
        _device: &OutputDevice,
        _config: &StreamConfig,
        _render: RenderCallback,
    ) -> AudioResult<Box<dyn OutputStream>> {
        self.geoeffnet.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StummerStream))
    }
}

// ---------------------------------------------------------------------------
// Warten auf asynchrone Effekte
// ---------------------------------------------------------------------------

/// Wartet bis die Bedingung gilt; `false` nach 5 s (virtueller) Zeit
pub async fn warten_bis(mut bedingung: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if bedingung() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bedingung()
}

pub fn offer_json(raum: &str) -> String {
    format!(r#"{{"type":"offer","roomId":"{raum}","offer":{{"type":"offer","sdp":"v=0\r\ns=fake-offer\r\n"}}}}"#)
}
