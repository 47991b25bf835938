//! Audio-Frames, Normalisierung und Kanal-Anpassung
//!
//! Eingehende Frames koennen in verschiedenen Sample-Formaten und Layouts
//! ankommen. Fuer die Wiedergabe wird alles in `f32` im Bereich [-1, 1]
//! mit verschraenktem (interleaved) Layout umgewandelt.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// Rohdaten eines Frames im Quellformat
#[derive(Debug, Clone, PartialEq)]
pub enum SampleData {
    F32(Vec<f32>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    U8(Vec<u8>),
}

impl SampleData {
    pub fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::I16(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::U8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_f32(&self) -> Vec<f32> {
        match self {
            Self::F32(v) => v.clone(),
            Self::I16(v) => v.iter().map(|&s| s as f32 / 32768.0).collect(),
            Self::I32(v) => v.iter().map(|&s| s as f32 / 2_147_483_648.0).collect(),
            Self::U8(v) => v.iter().map(|&s| (s as f32 - 128.0) / 128.0).collect(),
        }
    }
}

/// Ein dekodierter Audio-Frame
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub data: SampleData,
    pub channels: u16,
    pub sample_rate: u32,
    /// `true` wenn die Samples kanalweise hintereinander liegen
    pub planar: bool,
}

impl AudioFrame {
    /// Verschraenkter `f32`-Frame
    pub fn interleaved(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            data: SampleData::F32(samples),
            channels,
            sample_rate,
            planar: false,
        }
    }

    /// Anzahl Samples pro Kanal
    pub fn samples_per_channel(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.data.len() / self.channels as usize
    }

    /// Normalisiert auf `f32` in [-1, 1], verschraenktes Layout
    pub fn to_interleaved_f32(&self) -> Vec<f32> {
        let samples = self.data.to_f32();
        if !self.planar || self.channels <= 1 {
            return samples;
        }

        let kanaele = self.channels as usize;
        let pro_kanal = samples.len() / kanaele;
        let mut out = Vec::with_capacity(pro_kanal * kanaele);
        for i in 0..pro_kanal {
            for k in 0..kanaele {
                out.push(samples[k * pro_kanal + i]);
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Kanal-Anpassung
// ---------------------------------------------------------------------------

/// Passt verschraenkte Samples an die Kanalanzahl des Ausgabegeraets an
///
/// - Mono auf N Kanaele: Sample wird dupliziert
/// - Stereo auf Mono: arithmetisches Mittel
/// - Mehr Kanaele als Ziel: ueberzaehlige werden abgeschnitten
/// - Weniger Kanaele als Ziel: fehlende werden mit Stille aufgefuellt
pub fn adapt_channels(samples: &[f32], von: u16, nach: u16) -> Vec<f32> {
    if von == nach || von == 0 || nach == 0 {
        return samples.to_vec();
    }

    let von = von as usize;
    let nach = nach as usize;
    let frames = samples.len() / von;
    let mut out = Vec::with_capacity(frames * nach);

    for frame in samples.chunks_exact(von) {
        match (von, nach) {
            (1, _) => out.extend(std::iter::repeat(frame[0]).take(nach)),
            (2, 1) => out.push((frame[0] + frame[1]) / 2.0),
            (v, n) if v > n => out.extend_from_slice(&frame[..n]),
            (v, n) => {
                out.extend_from_slice(frame);
                out.extend(std::iter::repeat(0.0).take(n - v));
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Track-Abstraktion
// ---------------------------------------------------------------------------

/// Art eines Media-Tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// Live-Stream eines Peers
///
/// `recv` liefert `None` sobald der Track beendet ist.
#[async_trait]
pub trait AudioTrack: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    async fn recv(&self) -> Option<Arc<AudioFrame>>;
}

/// Geteilter Track-Handle
pub type TrackHandle = Arc<dyn AudioTrack>;

/// Track, der seine Frames aus einem mpsc-Kanal liest
///
/// Der Track endet, sobald alle Sender gedroppt sind.
pub struct ChannelTrack {
    id: String,
    kind: TrackKind,
    rx: Mutex<mpsc::Receiver<Arc<AudioFrame>>>,
}

impl ChannelTrack {
    pub fn new(
        id: impl Into<String>,
        kind: TrackKind,
        puffer: usize,
    ) -> (Self, mpsc::Sender<Arc<AudioFrame>>) {
        let (tx, rx) = mpsc::channel(puffer.max(1));
        let track = Self {
            id: id.into(),
            kind,
            rx: Mutex::new(rx),
        };
        (track, tx)
    }
}

#[async_trait]
impl AudioTrack for ChannelTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    async fn recv(&self) -> Option<Arc<AudioFrame>> {
        self.rx.lock().await.recv().await
    }
}
