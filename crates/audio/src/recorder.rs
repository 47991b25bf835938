//! WAV-Aufnahme einzelner Peer-Tracks
//!
//! Pro Peer laeuft hoechstens eine Aufnahme. Die Datei wird beim ersten
//! Frame mit dessen Kanalanzahl und Abtastrate angelegt (32-Bit Float).
//! Spaetere Frames mit anderer Kanalanzahl werden angepasst. Endet der
//! Track, wird die Datei abgeschlossen und die Aufnahme ist beendet.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hound::{WavSpec, WavWriter};
use roomcast_core::types::PeerId;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{AudioError, AudioResult};
use crate::frame::{adapt_channels, AudioFrame, TrackHandle};

/// Ergebnis einer abgeschlossenen Aufnahme
#[derive(Debug, Clone, PartialEq)]
pub struct AufnahmeInfo {
    pub pfad: PathBuf,
    pub frames: u64,
    /// Samples ueber alle Kanaele
    pub samples: u64,
    pub channels: u16,
    pub sample_rate: u32,
}

struct Aufnahme {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<AudioResult<AufnahmeInfo>>,
}

/// Verwaltet laufende Aufnahmen, indiziert nach Peer
#[derive(Default)]
pub struct AudioRecorder {
    aufnahmen: DashMap<PeerId, Aufnahme>,
}

impl AudioRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Startet die Aufnahme eines Tracks nach `pfad`
    ///
    /// Eine bereits beendete Aufnahme desselben Peers wird ersetzt.
    pub fn start(&self, peer: &PeerId, track: TrackHandle, pfad: impl Into<PathBuf>) -> AudioResult<()> {
        let pfad = pfad.into();
        match self.aufnahmen.entry(peer.clone()) {
            Entry::Occupied(mut e) => {
                if !e.get().task.is_finished() {
                    return Err(AudioError::AufnahmeLaeuft(peer.to_string()));
                }
                e.insert(Self::starten(peer, track, pfad));
            }
            Entry::Vacant(e) => {
                e.insert(Self::starten(peer, track, pfad));
            }
        }
        Ok(())
    }

    fn starten(peer: &PeerId, track: TrackHandle, pfad: PathBuf) -> Aufnahme {
        info!(peer = %peer, pfad = %pfad.display(), "Aufnahme gestartet");
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(aufnahme_schleife(track, pfad, stop_rx));
        Aufnahme { stop_tx, task }
    }

    /// Stoppt die Aufnahme und wartet, bis die Datei abgeschlossen ist
    ///
    /// `None` wenn fuer den Peer keine Aufnahme existiert oder sie
    /// fehlgeschlagen ist.
    pub async fn stop(&self, peer: &PeerId) -> Option<AufnahmeInfo> {
        let (_, aufnahme) = self.aufnahmen.remove(peer)?;
        let _ = aufnahme.stop_tx.send(true);
        match aufnahme.task.await {
            Ok(Ok(info)) => {
                info!(peer = %peer, frames = info.frames, pfad = %info.pfad.display(), "Aufnahme gestoppt");
                Some(info)
            }
            Ok(Err(e)) => {
                warn!(peer = %peer, fehler = %e, "Aufnahme fehlgeschlagen");
                None
            }
            Err(e) => {
                warn!(peer = %peer, fehler = %e, "Aufnahme-Task abgebrochen");
                None
            }
        }
    }

    /// Stoppt alle Aufnahmen
    pub async fn stop_all(&self) {
        let peers: Vec<PeerId> = self.aufnahmen.iter().map(|e| e.key().clone()).collect();
        for peer in peers {
            self.stop(&peer).await;
        }
    }

    pub fn is_recording(&self, peer: &PeerId) -> bool {
        self.aufnahmen
            .get(peer)
            .map(|a| !a.task.is_finished())
            .unwrap_or(false)
    }
}

fn wav_anlegen(pfad: &Path, frame: &AudioFrame) -> AudioResult<WavWriter<BufWriter<File>>> {
    let spec = WavSpec {
        channels: frame.channels.max(1),
        sample_rate: frame.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    Ok(WavWriter::create(pfad, spec)?)
}

async fn aufnahme_schleife(
    track: TrackHandle,
    pfad: PathBuf,
    mut stop_rx: watch::Receiver<bool>,
) -> AudioResult<AufnahmeInfo> {
    let mut writer: Option<WavWriter<BufWriter<File>>> = None;
    let mut info = AufnahmeInfo {
        pfad: pfad.clone(),
        frames: 0,
        samples: 0,
        channels: 0,
        sample_rate: 0,
    };

    loop {
        tokio::select! {
            res = stop_rx.changed() => {
                if res.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            frame = track.recv() => {
                let Some(frame) = frame else {
                    debug!(track = %track.id(), "Track beendet, Aufnahme wird abgeschlossen");
                    break;
                };
                if writer.is_none() {
                    writer = Some(wav_anlegen(&pfad, &frame)?);
                    info.channels = frame.channels.max(1);
                    info.sample_rate = frame.sample_rate;
                }
                let samples = adapt_channels(&frame.to_interleaved_f32(), frame.channels, info.channels);
                if let Some(w) = writer.as_mut() {
                    for s in &samples {
                        w.write_sample(*s)?;
                    }
                }
                info.frames += 1;
                info.samples += samples.len() as u64;
            }
        }
    }

    // Ohne Frames wird keine Datei angelegt
    if let Some(w) = writer {
        w.finalize()?;
    }
    Ok(info)
}
