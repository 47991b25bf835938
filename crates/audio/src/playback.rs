//! Playback-Pipeline: Track -> Jitter Buffer -> Ausgabegeraet
//!
//! Ein tokio-Task liest Frames vom Track, normalisiert und passt die
//! Kanaele an, wendet einen optionalen Callback an und schreibt in den
//! Jitter Buffer. Nach einer kurzen
//! Aufwaermphase wird der Ausgabestream geoeffnet; dessen Render-Callback
//! liest aus dem Buffer und wendet die Lautstaerke an.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::device::{AudioHost, AusgabeWahl, OutputStream};
use crate::error::AudioResult;
use crate::frame::{adapt_channels, TrackHandle};
use crate::jitter_buffer::{JitterBuffer, JitterBufferStatistik, DEFAULT_BUFFER_SECONDS};

/// Standard-Aufwaermzeit zwischen Pipeline-Start und Stream-Start
pub const DEFAULT_WARMUP: Duration = Duration::from_millis(200);

/// Konfiguration fuer die Playback-Pipeline
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Puffertiefe in Sekunden
    pub buffer_seconds: f32,
    /// Wartezeit bevor das Geraet zu lesen beginnt
    pub warmup: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            buffer_seconds: DEFAULT_BUFFER_SECONDS,
            warmup: DEFAULT_WARMUP,
        }
    }
}

/// Lautstaerke (0.0..=1.0), lock-frei zwischen Steuerung und Audio-Thread geteilt
#[derive(Debug, Clone)]
pub struct Lautstaerke(Arc<AtomicU32>);

impl Lautstaerke {
    pub fn new(wert: f32) -> Self {
        Self(Arc::new(AtomicU32::new(wert.clamp(0.0, 1.0).to_bits())))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, wert: f32) {
        self.0.store(wert.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

impl Default for Lautstaerke {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Eigene Verarbeitung der Samples (verschraenkt, Zielkanaele) vor dem Jitter Buffer
pub type AudioCallback = Arc<dyn Fn(&mut [f32]) + Send + Sync>;

/// Platz fuer einen Callback, austauschbar auch waehrend der Wiedergabe
#[derive(Clone, Default)]
pub struct CallbackSlot(Arc<RwLock<Option<AudioCallback>>>);

impl CallbackSlot {
    pub fn set(&self, callback: AudioCallback) {
        *self.0.write() = Some(callback);
    }

    pub fn clear(&self) -> bool {
        self.0.write().take().is_some()
    }

    pub fn is_set(&self) -> bool {
        self.0.read().is_some()
    }

    /// Wendet den Callback an; `false` wenn er panikt, die Samples bleiben dann wie sie sind
    fn anwenden(&self, samples: &mut [f32]) -> bool {
        let Some(callback) = self.0.read().clone() else {
            return true;
        };
        let mut kopie = samples.to_vec();
        match catch_unwind(AssertUnwindSafe(|| callback(&mut kopie))) {
            Ok(()) => {
                samples.copy_from_slice(&kopie);
                true
            }
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for CallbackSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CallbackSlot").field(&self.is_set()).finish()
    }
}

/// Laufende Wiedergabe eines Tracks
pub struct PlaybackPipeline {
    track_id: String,
    buffer: Arc<JitterBuffer>,
    lautstaerke: Lautstaerke,
    stop_tx: watch::Sender<bool>,
    ingest: JoinHandle<()>,
    stream: Option<Box<dyn OutputStream>>,
}

impl PlaybackPipeline {
    /// Startet Ingestion, wartet die Aufwaermphase ab und oeffnet den Stream
    pub async fn start(
        track: TrackHandle,
        host: &Arc<dyn AudioHost>,
        wahl: &AusgabeWahl,
        config: &PlaybackConfig,
        lautstaerke: Lautstaerke,
        callback: CallbackSlot,
    ) -> AudioResult<Self> {
        let track_id = track.id().to_string();
        let buffer = Arc::new(JitterBuffer::new(
            wahl.config.sample_rate,
            wahl.config.channels,
            config.buffer_seconds,
        ));
        let (stop_tx, stop_rx) = watch::channel(false);

        let ingest = tokio::spawn(ingest_schleife(track, Arc::clone(&buffer), callback, stop_rx));

        tokio::time::sleep(config.warmup).await;

        let render_buffer = Arc::clone(&buffer);
        let render_lautstaerke = lautstaerke.clone();
        let stream = match host.open_output(
            &wahl.device,
            &wahl.config,
            Box::new(move |out: &mut [f32]| {
                render_buffer.render(out, render_lautstaerke.get());
            }),
        ) {
            Ok(s) => s,
            Err(e) => {
                let _ = stop_tx.send(true);
                ingest.abort();
                warn!(track = %track_id, fehler = %e, "Ausgabestream konnte nicht geoeffnet werden");
                return Err(e);
            }
        };

        info!(
            track = %track_id,
            geraet = %wahl.device.name,
            format = %wahl.config.format,
            rate = wahl.config.sample_rate,
            kanaele = wahl.config.channels,
            "Wiedergabe gestartet"
        );

        Ok(Self {
            track_id,
            buffer,
            lautstaerke,
            stop_tx,
            ingest,
            stream: Some(stream),
        })
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn lautstaerke(&self) -> &Lautstaerke {
        &self.lautstaerke
    }

    /// `true` solange Stream offen ist und der Track noch Frames liefert
    pub fn is_active(&self) -> bool {
        self.stream.is_some() && !self.ingest.is_finished()
    }

    pub fn statistik(&self) -> JitterBufferStatistik {
        self.buffer.statistik()
    }

    /// Beendet Ingestion und schliesst den Ausgabestream
    pub fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            debug!(track = %self.track_id, "Wiedergabe gestoppt");
        }
        self.buffer.clear();
    }
}

impl Drop for PlaybackPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn ingest_schleife(
    track: TrackHandle,
    buffer: Arc<JitterBuffer>,
    callback: CallbackSlot,
    mut stop_rx: watch::Receiver<bool>,
) {
    let ziel_kanaele = buffer.kanaele();
    loop {
        tokio::select! {
            res = stop_rx.changed() => {
                if res.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            frame = track.recv() => match frame {
                Some(frame) => {
                    let samples = frame.to_interleaved_f32();
                    let mut angepasst = adapt_channels(&samples, frame.channels, ziel_kanaele);
                    if !callback.anwenden(&mut angepasst) {
                        warn!(track = %track.id(), "Audio-Callback fehlgeschlagen, Frame unveraendert");
                    }
                    let verworfen = buffer.push(&angepasst);
                    if verworfen > 0 {
                        debug!(track = %track.id(), verworfen, "Jitter Buffer voll, aelteste Frames verworfen");
                    }
                }
                None => {
                    debug!(track = %track.id(), "Track beendet");
                    break;
                }
            }
        }
    }
}
