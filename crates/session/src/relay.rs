//! Media Relay – ein Quell-Track, beliebig viele unabhaengige Kopien
//!
//! Pro Quelle liest genau ein Task die Frames und verteilt sie ueber einen
//! `broadcast`-Kanal. Jede Kopie ([`RelayedTrack`]) hat ihren eigenen
//! Empfaenger; wer zu langsam liest, verliert Frames statt die anderen
//! aufzuhalten. Endet die Quelle oder wird sie gestoppt, enden alle Kopien.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use roomcast_audio::{AudioFrame, AudioTrack, TrackHandle, TrackKind};
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Frames, die eine Kopie im Rueckstand sein darf
pub const RELAY_PUFFER: usize = 64;

struct RelayQuelle {
    tx: broadcast::Sender<Arc<AudioFrame>>,
    kind: TrackKind,
    leser: JoinHandle<()>,
}

struct RelayInner {
    quellen: DashMap<String, RelayQuelle>,
    naechste_generation: AtomicU64,
    naechste_kopie: AtomicU64,
}

/// Geteiltes Relay (Clone teilt den Zustand)
#[derive(Clone)]
pub struct MediaRelay {
    inner: Arc<RelayInner>,
}

impl Default for MediaRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaRelay {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RelayInner {
                quellen: DashMap::new(),
                naechste_generation: AtomicU64::new(1),
                naechste_kopie: AtomicU64::new(1),
            }),
        }
    }

    /// Registriert einen Track als Quelle und startet seinen Lese-Task
    ///
    /// Der Schluessel ist eindeutig, auch wenn mehrere Peers Tracks mit
    /// derselben Id liefern.
    pub fn add_source(&self, track: TrackHandle) -> String {
        let (tx, _) = broadcast::channel(RELAY_PUFFER);
        let generation = self.inner.naechste_generation.fetch_add(1, Ordering::Relaxed);
        let schluessel = format!("{}@{generation}", track.id());
        let kind = track.kind();

        // Lesen beginnt erst, wenn der Eintrag steht
        let (start_tx, start_rx) = oneshot::channel();
        let leser = tokio::spawn(lese_schleife(
            Arc::clone(&track),
            tx.clone(),
            Arc::clone(&self.inner),
            schluessel.clone(),
            start_rx,
        ));
        self.inner
            .quellen
            .insert(schluessel.clone(), RelayQuelle { tx, kind, leser });
        let _ = start_tx.send(());
        info!(quelle = %schluessel, "Relay-Quelle gestartet");
        schluessel
    }

    /// Liefert eine neue Kopie der Quelle, `None` wenn sie nicht (mehr) existiert
    pub fn subscribe(&self, schluessel: &str) -> Option<TrackHandle> {
        let (rx, kind) = {
            let quelle = self.inner.quellen.get(schluessel)?;
            (quelle.tx.subscribe(), quelle.kind)
        };

        let n = self.inner.naechste_kopie.fetch_add(1, Ordering::Relaxed);
        debug!(quelle = %schluessel, kopie = n, "Relay-Abonnement erstellt");
        Some(Arc::new(RelayedTrack {
            id: format!("{schluessel}#{n}"),
            kind,
            rx: Mutex::new(rx),
        }))
    }

    /// Stoppt eine Quelle; alle Kopien enden danach
    pub fn stop_source(&self, schluessel: &str) -> bool {
        match self.inner.quellen.remove(schluessel) {
            Some((_, quelle)) => {
                quelle.leser.abort();
                info!(quelle = %schluessel, "Relay-Quelle gestoppt");
                true
            }
            None => false,
        }
    }

    pub fn source_count(&self) -> usize {
        self.inner.quellen.len()
    }

    pub fn has_source(&self, schluessel: &str) -> bool {
        self.inner.quellen.contains_key(schluessel)
    }

    /// Anzahl lebender Kopien einer Quelle
    pub fn subscriber_count(&self, schluessel: &str) -> usize {
        self.inner
            .quellen
            .get(schluessel)
            .map(|q| q.tx.receiver_count())
            .unwrap_or(0)
    }
}

async fn lese_schleife(
    track: TrackHandle,
    tx: broadcast::Sender<Arc<AudioFrame>>,
    inner: Arc<RelayInner>,
    schluessel: String,
    start: oneshot::Receiver<()>,
) {
    if start.await.is_err() {
        return;
    }
    while let Some(frame) = track.recv().await {
        // Ohne Empfaenger ist send ein Fehler, das ist hier normal
        let _ = tx.send(frame);
    }
    debug!(quelle = %schluessel, "Relay-Quelle beendet");
    inner.quellen.remove(&schluessel);
}

/// Eine Kopie eines Quell-Tracks
pub struct RelayedTrack {
    id: String,
    kind: TrackKind,
    rx: Mutex<broadcast::Receiver<Arc<AudioFrame>>>,
}

#[async_trait]
impl AudioTrack for RelayedTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    async fn recv(&self) -> Option<Arc<AudioFrame>> {
        let mut rx = self.rx.lock().await;
        loop {
            match rx.recv().await {
                Ok(frame) => return Some(frame),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(track = %self.id, verpasst = n, "Relay-Kopie im Rueckstand");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
