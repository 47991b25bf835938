//! Audio-Prozessoren fuer veroeffentlichte Tracks
//!
//! Ein Prozessor nimmt einen Track und liefert einen (eventuell
//! veraenderten) Track zurueck. Die Registry waehlt per Name; unbekannte
//! Namen fallen auf `default` (Durchreichen) zurueck, ebenso jeder Fehler
//! beim Verarbeiten.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use roomcast_audio::{AudioFrame, AudioTrack, TrackHandle, TrackKind};
use roomcast_core::types::PeerId;
use tracing::{debug, warn};

/// Name des Standard-Prozessors
pub const DEFAULT_PROCESSOR: &str = "default";

#[async_trait]
pub trait AudioProcessor: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self, peer: &PeerId, track: TrackHandle) -> anyhow::Result<TrackHandle>;
}

// ---------------------------------------------------------------------------
// Eingebaute Prozessoren
// ---------------------------------------------------------------------------

/// Reicht den Track unveraendert durch
pub struct PassthroughProcessor;

#[async_trait]
impl AudioProcessor for PassthroughProcessor {
    fn name(&self) -> &str {
        DEFAULT_PROCESSOR
    }

    async fn process(&self, _peer: &PeerId, track: TrackHandle) -> anyhow::Result<TrackHandle> {
        Ok(track)
    }
}

/// Verstaerkt oder daempft alle Samples um einen festen Faktor
pub struct GainProcessor {
    faktor: f32,
}

impl GainProcessor {
    pub fn new(faktor: f32) -> Self {
        Self { faktor }
    }
}

impl Default for GainProcessor {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[async_trait]
impl AudioProcessor for GainProcessor {
    fn name(&self) -> &str {
        "gain"
    }

    async fn process(&self, _peer: &PeerId, track: TrackHandle) -> anyhow::Result<TrackHandle> {
        if !self.faktor.is_finite() || self.faktor < 0.0 {
            anyhow::bail!("ungueltiger Verstaerkungsfaktor: {}", self.faktor);
        }
        Ok(Arc::new(GainTrack {
            id: format!("{}:gain", track.id()),
            inner: track,
            faktor: self.faktor,
        }))
    }
}

struct GainTrack {
    id: String,
    inner: TrackHandle,
    faktor: f32,
}

#[async_trait]
impl AudioTrack for GainTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.inner.kind()
    }

    async fn recv(&self) -> Option<Arc<AudioFrame>> {
        let frame = self.inner.recv().await?;
        let samples = frame
            .to_interleaved_f32()
            .into_iter()
            .map(|s| (s * self.faktor).clamp(-1.0, 1.0))
            .collect();
        Some(Arc::new(AudioFrame::interleaved(
            samples,
            frame.channels,
            frame.sample_rate,
        )))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Registry der verfuegbaren Prozessoren
pub struct ProcessorRegistry {
    prozessoren: RwLock<HashMap<String, Arc<dyn AudioProcessor>>>,
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessorRegistry {
    /// Registry mit `default` und `gain`
    pub fn new() -> Self {
        let registry = Self {
            prozessoren: RwLock::new(HashMap::new()),
        };
        registry.register(Arc::new(PassthroughProcessor));
        registry.register(Arc::new(GainProcessor::default()));
        registry
    }

    /// Registriert einen Prozessor, ein gleichnamiger wird ersetzt
    pub fn register(&self, prozessor: Arc<dyn AudioProcessor>) {
        let name = prozessor.name().to_string();
        debug!(prozessor = %name, "Audio-Prozessor registriert");
        self.prozessoren.write().insert(name, prozessor);
    }

    /// Prozessor nach Name, unbekannte Namen liefern `default`
    pub fn get(&self, name: &str) -> Arc<dyn AudioProcessor> {
        let prozessoren = self.prozessoren.read();
        if let Some(p) = prozessoren.get(name) {
            return Arc::clone(p);
        }
        warn!(prozessor = %name, "Unbekannter Audio-Prozessor, verwende default");
        prozessoren
            .get(DEFAULT_PROCESSOR)
            .cloned()
            .unwrap_or_else(|| Arc::new(PassthroughProcessor))
    }

    pub fn names(&self) -> Vec<String> {
        let mut namen: Vec<String> = self.prozessoren.read().keys().cloned().collect();
        namen.sort();
        namen
    }

    /// Verarbeitet den Track; bei Fehlern wird der Original-Track geliefert
    pub async fn process(&self, name: &str, peer: &PeerId, track: TrackHandle) -> TrackHandle {
        let prozessor = self.get(name);
        match prozessor.process(peer, Arc::clone(&track)).await {
            Ok(verarbeitet) => verarbeitet,
            Err(e) => {
                warn!(
                    peer = %peer,
                    prozessor = %prozessor.name(),
                    fehler = %e,
                    "Audio-Verarbeitung fehlgeschlagen, verwende Original-Track"
                );
                track
            }
        }
    }
}
