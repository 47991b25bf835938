//! Jitter Buffer fuer die lokale Wiedergabe
//!
//! FIFO aus verschraenkten `f32`-Frames mit fester Kanalanzahl. Der
//! Ingestion-Task schreibt, der Render-Callback des Geraets liest. Beide
//! teilen sich nur diesen Buffer; der kritische Abschnitt ist ein
//! einzelnes Push bzw. Pop.
//!
//! ## Eigenschaften
//! - Kapazitaet = Abtastrate x Puffer-Sekunden (in Frames)
//! - Ist der Buffer voll, werden die aeltesten Frames verworfen
//! - Render bei leerem Buffer liefert Stille, blockiert nie

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Standard-Puffertiefe in Sekunden
pub const DEFAULT_BUFFER_SECONDS: f32 = 0.3;

/// Statistiken des Jitter Buffers (Snapshot)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JitterBufferStatistik {
    /// Geschriebene Frames gesamt
    pub geschrieben: u64,
    /// Wegen Ueberlauf verworfene Frames
    pub verworfen: u64,
    /// Frames, die beim Rendern gefehlt haben (mit Stille ersetzt)
    pub unterlauf: u64,
    /// Aktueller Fuellstand in Frames
    pub fuellstand: usize,
}

/// Jitter Buffer fuer verschraenkte Sample-Frames
#[derive(Debug)]
pub struct JitterBuffer {
    kanaele: usize,
    kapazitaet: usize,
    samples: Mutex<VecDeque<f32>>,
    geschrieben: AtomicU64,
    verworfen: AtomicU64,
    unterlauf: AtomicU64,
}

impl JitterBuffer {
    /// Erstellt einen Buffer fuer `sample_rate * sekunden` Frames
    pub fn new(sample_rate: u32, kanaele: u16, sekunden: f32) -> Self {
        let kapazitaet = ((sample_rate as f32 * sekunden) as usize).max(1);
        Self::mit_kapazitaet(kapazitaet, kanaele)
    }

    /// Erstellt einen Buffer mit expliziter Kapazitaet in Frames
    pub fn mit_kapazitaet(kapazitaet_frames: usize, kanaele: u16) -> Self {
        let kanaele = (kanaele as usize).max(1);
        let kapazitaet = kapazitaet_frames.max(1);
        Self {
            kanaele,
            kapazitaet,
            samples: Mutex::new(VecDeque::with_capacity(kapazitaet * kanaele)),
            geschrieben: AtomicU64::new(0),
            verworfen: AtomicU64::new(0),
            unterlauf: AtomicU64::new(0),
        }
    }

    pub fn kanaele(&self) -> u16 {
        self.kanaele as u16
    }

    /// Kapazitaet in Frames
    pub fn kapazitaet(&self) -> usize {
        self.kapazitaet
    }

    /// Aktueller Fuellstand in Frames
    pub fn len(&self) -> usize {
        self.samples.lock().len() / self.kanaele
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Haengt verschraenkte Samples an
    ///
    /// Ein unvollstaendiger letzter Frame wird ignoriert. Gibt die Anzahl
    /// der dabei verdraengten (aeltesten) Frames zurueck.
    pub fn push(&self, samples: &[f32]) -> usize {
        let neue_frames = samples.len() / self.kanaele;
        if neue_frames == 0 {
            return 0;
        }
        let nutzbar = &samples[..neue_frames * self.kanaele];

        let mut buf = self.samples.lock();
        buf.extend(nutzbar.iter().copied());

        let frames = buf.len() / self.kanaele;
        let ueberlauf = frames.saturating_sub(self.kapazitaet);
        if ueberlauf > 0 {
            buf.drain(..ueberlauf * self.kanaele);
        }
        drop(buf);

        self.geschrieben
            .fetch_add(neue_frames as u64, Ordering::Relaxed);
        if ueberlauf > 0 {
            self.verworfen.fetch_add(ueberlauf as u64, Ordering::Relaxed);
        }
        ueberlauf
    }

    /// Fuellt `out` vollstaendig mit Samples aus dem Buffer
    ///
    /// Fehlende Samples werden mit Stille aufgefuellt, `lautstaerke` wird
    /// auf jedes Sample angewendet. Gibt die Anzahl gelesener Frames zurueck.
    pub fn render(&self, out: &mut [f32], lautstaerke: f32) -> usize {
        let gelesen = {
            let mut buf = self.samples.lock();
            let verfuegbar = buf.len().min(out.len() / self.kanaele * self.kanaele);
            for (ziel, sample) in out.iter_mut().zip(buf.drain(..verfuegbar)) {
                *ziel = sample * lautstaerke;
            }
            verfuegbar
        };

        if gelesen < out.len() {
            out[gelesen..].fill(0.0);
            let fehlend = (out.len() - gelesen) / self.kanaele;
            self.unterlauf.fetch_add(fehlend as u64, Ordering::Relaxed);
        }
        gelesen / self.kanaele
    }

    /// Leert den Buffer
    pub fn clear(&self) {
        self.samples.lock().clear();
    }

    pub fn statistik(&self) -> JitterBufferStatistik {
        JitterBufferStatistik {
            geschrieben: self.geschrieben.load(Ordering::Relaxed),
            verworfen: self.verworfen.load(Ordering::Relaxed),
            unterlauf: self.unterlauf.load(Ordering::Relaxed),
            fuellstand: self.len(),
        }
    }
}
