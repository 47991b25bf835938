//! Peer-Session – ein Task pro Peer
//!
//! Die Session besitzt die Verbindung zur Media Engine exklusiv und fuehrt
//! die Verhandlung als Zustandsmaschine:
//!
//! ```text
//! Idle -> OfferReceived -> AnswerSent -> Stable
//!   \__________\_______________\__________\__-> Closed
//! ```
//!
//! Befehle (Offer, Answer, Kandidat, Relay anhaengen/entfernen) und Engine-Events
//! werden strikt in Ankunftsreihenfolge abgearbeitet. Ein Shutdown-Signal
//! bricht jede laufende Wartephase ab, auch das Candidate-Gathering.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use roomcast_audio::{TrackHandle, TrackKind};
use roomcast_core::types::PeerId;
use roomcast_protocol::{parse_candidate, AnswerPayload, IceCandidateInit, SessionDescription};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::media::{
    ConnectionEvent, ConnectionState, MediaConnection, MediaEngine, SenderId, TransportStatus,
};
use crate::pipeline::TrackPipeline;

/// Groesse der Event-Queue zwischen Engine und Session
pub const EVENT_QUEUE_GROESSE: usize = 64;

// ---------------------------------------------------------------------------
// Zustand und Snapshot
// ---------------------------------------------------------------------------

/// Verhandlungszustand (antwortende Rolle)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationState {
    #[default]
    Idle,
    OfferReceived,
    /// Antwort gesetzt, Kandidaten werden gesammelt
    AnswerSent,
    Stable,
    Closed,
}

/// Lesbarer Zustand einer Session, ohne den Session-Task zu blockieren
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub peer_id: PeerId,
    pub negotiation: NegotiationState,
    pub transport: TransportStatus,
    pub local_candidates: usize,
    /// Peers, deren Audio diese Session gerade empfaengt
    pub outbound_sources: Vec<PeerId>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Befehle
// ---------------------------------------------------------------------------

enum Befehl {
    Offer {
        offer: SessionDescription,
        antwort: oneshot::Sender<SessionResult<AnswerPayload>>,
    },
    Answer {
        answer: SessionDescription,
        antwort: oneshot::Sender<SessionResult<()>>,
    },
    Kandidat {
        kandidat: IceCandidateInit,
        antwort: oneshot::Sender<SessionResult<()>>,
    },
    RelayAnhaengen {
        quelle: PeerId,
        relay_key: String,
        track: TrackHandle,
        antwort: oneshot::Sender<SessionResult<SenderId>>,
    },
    RelayEntfernen {
        quelle: PeerId,
        relay_key: String,
        antwort: oneshot::Sender<SessionResult<bool>>,
    },
}

// ---------------------------------------------------------------------------
// Gemeinsamer Kontext
// ---------------------------------------------------------------------------

/// Was jede Session zum Arbeiten braucht
pub struct SessionKontext {
    pub engine: Arc<dyn MediaEngine>,
    pub pipeline: Arc<TrackPipeline>,
    pub registry: SessionRegistry,
    pub gathering_timeout: Duration,
    pub max_kandidaten: usize,
    pub befehls_queue: usize,
    naechste_id: AtomicU64,
}

impl SessionKontext {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        pipeline: Arc<TrackPipeline>,
        registry: SessionRegistry,
        gathering_timeout: Duration,
        max_kandidaten: usize,
        befehls_queue: usize,
    ) -> Self {
        Self {
            engine,
            pipeline,
            registry,
            gathering_timeout,
            max_kandidaten: max_kandidaten.max(1),
            befehls_queue: befehls_queue.max(1),
            naechste_id: AtomicU64::new(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle auf eine laufende Session (Clone ist billig)
#[derive(Clone)]
pub struct SessionHandle {
    peer: PeerId,
    id: u64,
    befehle: mpsc::Sender<Befehl>,
    snapshot: watch::Receiver<SessionSnapshot>,
    shutdown: Arc<watch::Sender<bool>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SessionHandle {
    pub fn peer_id(&self) -> &PeerId {
        &self.peer
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.snapshot.borrow().transport.connection
    }

    pub fn negotiation_state(&self) -> NegotiationState {
        self.snapshot.borrow().negotiation
    }

    /// `true` sobald der Session-Task nicht mehr laeuft
    pub fn is_closed(&self) -> bool {
        self.befehle.is_closed()
    }

    /// Verarbeitet ein Offer und liefert Antwort plus gesammelte Kandidaten
    pub async fn offer(&self, offer: SessionDescription) -> SessionResult<AnswerPayload> {
        self.anfrage(|antwort| Befehl::Offer { offer, antwort }).await
    }

    pub async fn answer(&self, answer: SessionDescription) -> SessionResult<()> {
        self.anfrage(|antwort| Befehl::Answer { answer, antwort })
            .await
    }

    pub async fn add_candidate(&self, kandidat: IceCandidateInit) -> SessionResult<()> {
        self.anfrage(|antwort| Befehl::Kandidat { kandidat, antwort })
            .await
    }

    /// Haengt die Relay-Kopie eines anderen Peers an die eigene Verbindung
    ///
    /// `relay_key` ist die Relay-Quelle, von der die Kopie stammt.
    pub async fn attach_relay(
        &self,
        quelle: PeerId,
        relay_key: String,
        track: TrackHandle,
    ) -> SessionResult<SenderId> {
        self.anfrage(|antwort| Befehl::RelayAnhaengen {
            quelle,
            relay_key,
            track,
            antwort,
        })
        .await
    }

    /// Entfernt die Kopie einer bestimmten Relay-Quelle wieder
    ///
    /// `false` wenn keine passende Kopie angehaengt war, etwa weil sie
    /// inzwischen durch eine neuere Veroeffentlichung ersetzt wurde.
    pub async fn detach_relay(&self, quelle: PeerId, relay_key: String) -> SessionResult<bool> {
        self.anfrage(|antwort| Befehl::RelayEntfernen {
            quelle,
            relay_key,
            antwort,
        })
        .await
    }

    /// Wartet, bis die Verbindung den Zustand erreicht oder die Session endet
    pub async fn wait_for_state(&self, zustand: ConnectionState) -> bool {
        let mut rx = self.snapshot.clone();
        let ergebnis = rx
            .wait_for(|s| {
                s.transport.connection == zustand || s.negotiation == NegotiationState::Closed
            })
            .await
            .map(|s| s.transport.connection == zustand);
        ergebnis.unwrap_or(false)
    }

    /// Beendet die Session und wartet auf das Aufraeumen
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(peer = %self.peer, fehler = %e, "Session-Task nicht sauber beendet");
            }
        }
    }

    async fn anfrage<T>(
        &self,
        befehl: impl FnOnce(oneshot::Sender<SessionResult<T>>) -> Befehl,
    ) -> SessionResult<T> {
        let (tx, rx) = oneshot::channel();
        self.befehle
            .send(befehl(tx))
            .await
            .map_err(|_| SessionError::SessionGeschlossen(self.peer.clone()))?;
        rx.await
            .map_err(|_| SessionError::SessionGeschlossen(self.peer.clone()))?
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Alle aktiven Sessions, nach Peer
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<DashMap<PeerId, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, peer: &PeerId) -> Option<SessionHandle> {
        self.inner.get(peer).map(|h| h.clone())
    }

    /// Liefert die laufende Session oder startet eine neue
    pub fn get_or_start(&self, peer: &PeerId, kontext: &Arc<SessionKontext>) -> SessionHandle {
        match self.inner.entry(peer.clone()) {
            Entry::Occupied(mut eintrag) => {
                if eintrag.get().is_closed() {
                    let handle = PeerSession::starten(peer.clone(), Arc::clone(kontext));
                    eintrag.insert(handle.clone());
                    handle
                } else {
                    eintrag.get().clone()
                }
            }
            Entry::Vacant(eintrag) => {
                let handle = PeerSession::starten(peer.clone(), Arc::clone(kontext));
                eintrag.insert(handle.clone());
                handle
            }
        }
    }

    pub fn remove(&self, peer: &PeerId) -> Option<SessionHandle> {
        self.inner.remove(peer).map(|(_, h)| h)
    }

    /// Entfernt den Eintrag nur, wenn er noch zu dieser Session gehoert
    fn entfernen_wenn(&self, peer: &PeerId, id: u64) {
        self.inner.remove_if(peer, |_, h| h.id == id);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.inner.iter().map(|e| e.key().clone()).collect();
        peers.sort();
        peers
    }

    pub fn handles(&self) -> Vec<SessionHandle> {
        self.inner.iter().map(|e| e.value().clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// Session-Task
// ---------------------------------------------------------------------------

struct Ausgehend {
    quelle: PeerId,
    relay_key: String,
    sender: SenderId,
}

struct PeerSession {
    peer: PeerId,
    id: u64,
    kontext: Arc<SessionKontext>,
    befehle: mpsc::Receiver<Befehl>,
    shutdown: watch::Receiver<bool>,
    snapshot: watch::Sender<SessionSnapshot>,
    verbindung: Option<Box<dyn MediaConnection>>,
    events: Option<mpsc::Receiver<ConnectionEvent>>,
    kandidaten: Vec<IceCandidateInit>,
    ausgehend: HashMap<String, Ausgehend>,
    negotiation: NegotiationState,
    zustand: ConnectionState,
    beenden: bool,
}

impl PeerSession {
    fn starten(peer: PeerId, kontext: Arc<SessionKontext>) -> SessionHandle {
        let id = kontext.naechste_id.fetch_add(1, Ordering::Relaxed);
        let (befehl_tx, befehl_rx) = mpsc::channel(kontext.befehls_queue);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot {
            peer_id: peer.clone(),
            negotiation: NegotiationState::Idle,
            transport: TransportStatus::default(),
            local_candidates: 0,
            outbound_sources: Vec::new(),
            created_at: Utc::now(),
        });

        let session = PeerSession {
            peer: peer.clone(),
            id,
            kontext,
            befehle: befehl_rx,
            shutdown: shutdown_rx,
            snapshot: snapshot_tx,
            verbindung: None,
            events: None,
            kandidaten: Vec::new(),
            ausgehend: HashMap::new(),
            negotiation: NegotiationState::Idle,
            zustand: ConnectionState::New,
            beenden: false,
        };
        let task = tokio::spawn(session.run());

        SessionHandle {
            peer,
            id,
            befehle: befehl_tx,
            snapshot: snapshot_rx,
            shutdown: Arc::new(shutdown_tx),
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    async fn run(mut self) {
        info!(peer = %self.peer, session = self.id, "Session gestartet");

        while !self.beenden {
            tokio::select! {
                befehl = self.befehle.recv() => match befehl {
                    Some(befehl) => self.befehl_verarbeiten(befehl).await,
                    None => break,
                },
                event = naechstes_event(&mut self.events) => match event {
                    Some(event) => {
                        if self.event_verarbeiten(event).is_break() {
                            break;
                        }
                    }
                    None => self.events = None,
                },
                res = self.shutdown.changed() => {
                    if res.is_err() || *self.shutdown.borrow() {
                        debug!(peer = %self.peer, "Shutdown-Signal empfangen");
                        break;
                    }
                }
            }
        }

        self.schliessen().await;
    }

    async fn befehl_verarbeiten(&mut self, befehl: Befehl) {
        match befehl {
            Befehl::Offer { offer, antwort } => {
                let ergebnis = self.offer_verarbeiten(offer).await;
                if matches!(ergebnis, Err(SessionError::SessionGeschlossen(_))) {
                    self.beenden = true;
                }
                let _ = antwort.send(ergebnis);
            }
            Befehl::Answer { answer, antwort } => {
                let _ = antwort.send(self.answer_verarbeiten(answer).await);
            }
            Befehl::Kandidat { kandidat, antwort } => {
                let _ = antwort.send(self.kandidat_verarbeiten(kandidat).await);
            }
            Befehl::RelayAnhaengen {
                quelle,
                relay_key,
                track,
                antwort,
            } => {
                let _ = antwort.send(self.relay_anhaengen(quelle, relay_key, track).await);
            }
            Befehl::RelayEntfernen {
                quelle,
                relay_key,
                antwort,
            } => {
                let _ = antwort.send(Ok(self.relay_entfernen(&quelle, &relay_key).await));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Verhandlung
    // -----------------------------------------------------------------------

    async fn offer_verarbeiten(&mut self, offer: SessionDescription) -> SessionResult<AnswerPayload> {
        if let Some(alt) = self.verbindung.take() {
            info!(peer = %self.peer, "Bestehende Verbindung wird ersetzt");
            alt.close().await;
            self.ausgehend.clear();
        }
        self.events = None;
        self.kandidaten.clear();
        self.zustand = ConnectionState::New;

        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_GROESSE);
        let verbindung = self
            .kontext
            .engine
            .create_connection(&self.peer, event_tx)
            .await?;
        self.events = Some(event_rx);
        self.negotiation = NegotiationState::OfferReceived;
        self.snapshot_aktualisieren();

        let answer = match verhandeln(verbindung.as_ref(), &offer).await {
            Ok(a) => a,
            Err(e) => {
                warn!(peer = %self.peer, fehler = %e, "Verhandlung fehlgeschlagen");
                verbindung.close().await;
                self.events = None;
                self.negotiation = NegotiationState::Idle;
                self.snapshot_aktualisieren();
                return Err(e.into());
            }
        };
        self.verbindung = Some(verbindung);
        self.negotiation = NegotiationState::AnswerSent;
        self.snapshot_aktualisieren();

        self.kandidaten_sammeln().await?;

        self.negotiation = NegotiationState::Stable;
        self.snapshot_aktualisieren();
        info!(
            peer = %self.peer,
            kandidaten = self.kandidaten.len(),
            "Antwort erstellt"
        );

        Ok(AnswerPayload {
            sdp: answer.sdp,
            sdp_type: answer.sdp_type,
            ice_candidates: self.kandidaten.clone(),
        })
    }

    /// Sammelt lokale Kandidaten bis Gathering fertig, Timeout oder Obergrenze
    async fn kandidaten_sammeln(&mut self) -> SessionResult<()> {
        let frist = Instant::now() + self.kontext.gathering_timeout;

        loop {
            if self.kandidaten.len() >= self.kontext.max_kandidaten {
                debug!(peer = %self.peer, "Kandidaten-Obergrenze erreicht");
                return Ok(());
            }
            let Some(events) = self.events.as_mut() else {
                return Ok(());
            };

            tokio::select! {
                _ = tokio::time::sleep_until(frist) => {
                    info!(
                        peer = %self.peer,
                        kandidaten = self.kandidaten.len(),
                        "Gathering-Timeout, antworte mit bisherigen Kandidaten"
                    );
                    return Ok(());
                }
                res = self.shutdown.changed() => {
                    if res.is_err() || *self.shutdown.borrow() {
                        return Err(SessionError::SessionGeschlossen(self.peer.clone()));
                    }
                }
                event = events.recv() => match event {
                    Some(ConnectionEvent::IceCandidate(kandidat)) => {
                        debug!(peer = %self.peer, kandidat = %kandidat.candidate, "Lokaler Kandidat");
                        self.kandidaten.push(kandidat);
                        self.snapshot_aktualisieren();
                    }
                    Some(ConnectionEvent::GatheringComplete) => {
                        debug!(peer = %self.peer, "Gathering abgeschlossen");
                        self.snapshot_aktualisieren();
                        return Ok(());
                    }
                    Some(anderes) => {
                        if self.event_verarbeiten(anderes).is_break() {
                            return Err(SessionError::SessionGeschlossen(self.peer.clone()));
                        }
                    }
                    None => {
                        self.events = None;
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn answer_verarbeiten(&mut self, answer: SessionDescription) -> SessionResult<()> {
        let verbindung = self
            .verbindung
            .as_ref()
            .ok_or_else(|| SessionError::NoSession(self.peer.clone()))?;
        verbindung.set_remote_description(&answer).await?;
        self.negotiation = NegotiationState::Stable;
        self.snapshot_aktualisieren();
        debug!(peer = %self.peer, "Remote-Answer gesetzt");
        Ok(())
    }

    async fn kandidat_verarbeiten(&mut self, kandidat: IceCandidateInit) -> SessionResult<()> {
        let verbindung = self
            .verbindung
            .as_ref()
            .ok_or_else(|| SessionError::NoSession(self.peer.clone()))?;
        let geparst = parse_candidate(&kandidat.candidate)?;
        verbindung
            .add_ice_candidate(
                &geparst,
                kandidat.sdp_mid.as_deref(),
                kandidat.sdp_mline_index,
            )
            .await?;
        debug!(
            peer = %self.peer,
            ip = %geparst.ip,
            port = geparst.port,
            typ = %geparst.candidate_type,
            "Remote-Kandidat hinzugefuegt"
        );
        Ok(())
    }

    /// Haengt einen Relay-Track an; eine fruehere Kopie derselben Quelle wird ersetzt
    async fn relay_anhaengen(
        &mut self,
        quelle: PeerId,
        relay_key: String,
        track: TrackHandle,
    ) -> SessionResult<SenderId> {
        if self.verbindung.is_none() {
            return Err(SessionError::NoSession(self.peer.clone()));
        }
        self.ausgehend_entfernen(|a| a.quelle == quelle).await;

        let verbindung = self
            .verbindung
            .as_ref()
            .ok_or_else(|| SessionError::NoSession(self.peer.clone()))?;
        let track_id = track.id().to_string();
        let sender = verbindung.add_track(track).await?;
        self.ausgehend.insert(
            track_id,
            Ausgehend {
                quelle,
                relay_key,
                sender: sender.clone(),
            },
        );
        self.snapshot_aktualisieren();
        Ok(sender)
    }

    async fn relay_entfernen(&mut self, quelle: &PeerId, relay_key: &str) -> bool {
        let entfernt = self
            .ausgehend_entfernen(|a| &a.quelle == quelle && a.relay_key == relay_key)
            .await;
        if entfernt > 0 {
            self.snapshot_aktualisieren();
            debug!(peer = %self.peer, quelle = %quelle, "Relay-Track der beendeten Quelle entfernt");
        }
        entfernt > 0
    }

    /// Nimmt passende Relay-Tracks von der Verbindung, liefert die Anzahl
    async fn ausgehend_entfernen(&mut self, passt: impl Fn(&Ausgehend) -> bool) -> usize {
        let ids: Vec<String> = self
            .ausgehend
            .iter()
            .filter(|(_, a)| passt(a))
            .map(|(id, _)| id.clone())
            .collect();
        for track_id in &ids {
            let Some(alt) = self.ausgehend.remove(track_id) else {
                continue;
            };
            if let Some(verbindung) = self.verbindung.as_ref() {
                if let Err(e) = verbindung.remove_track(&alt.sender).await {
                    warn!(peer = %self.peer, track = %track_id, fehler = %e, "Relay-Track nicht entfernbar");
                }
            }
        }
        ids.len()
    }

    // -----------------------------------------------------------------------
    // Engine-Events
    // -----------------------------------------------------------------------

    fn event_verarbeiten(&mut self, event: ConnectionEvent) -> ControlFlow<()> {
        match event {
            ConnectionEvent::Track(track) => {
                if track.kind() != TrackKind::Audio {
                    warn!(peer = %self.peer, kind = %track.kind(), "Nicht unterstuetzter Track ignoriert");
                    return ControlFlow::Continue(());
                }
                let pipeline = Arc::clone(&self.kontext.pipeline);
                let peer = self.peer.clone();
                tokio::spawn(async move {
                    pipeline.track_verarbeiten(peer, track).await;
                });
            }
            ConnectionEvent::IceCandidate(kandidat) => {
                debug!(peer = %self.peer, kandidat = %kandidat.candidate, "Spaeter Kandidat ignoriert");
            }
            ConnectionEvent::GatheringComplete => {
                self.snapshot_aktualisieren();
            }
            ConnectionEvent::StateChanged(neu) => {
                let alt = std::mem::replace(&mut self.zustand, neu);
                info!(peer = %self.peer, von = %alt, nach = %neu, "Verbindungszustand geaendert");
                self.snapshot_aktualisieren();

                if neu == ConnectionState::Connected && alt != ConnectionState::Connected {
                    self.kontext.pipeline.peer_verbunden(&self.peer);
                }
                if neu.ist_endgueltig() {
                    return ControlFlow::Break(());
                }
            }
        }
        ControlFlow::Continue(())
    }

    // -----------------------------------------------------------------------
    // Snapshot und Aufraeumen
    // -----------------------------------------------------------------------

    fn snapshot_aktualisieren(&self) {
        let mut transport = self
            .verbindung
            .as_ref()
            .map(|v| v.status())
            .unwrap_or_default();
        transport.connection = self.zustand;

        let mut quellen: Vec<PeerId> = self.ausgehend.values().map(|a| a.quelle.clone()).collect();
        quellen.sort();
        quellen.dedup();

        let negotiation = self.negotiation;
        let kandidaten = self.kandidaten.len();
        self.snapshot.send_modify(|s| {
            s.negotiation = negotiation;
            s.transport = transport;
            s.local_candidates = kandidaten;
            s.outbound_sources = quellen;
        });
    }

    async fn schliessen(&mut self) {
        if let Some(verbindung) = self.verbindung.take() {
            verbindung.close().await;
        }
        self.events = None;
        self.ausgehend.clear();
        self.negotiation = NegotiationState::Closed;
        if !self.zustand.ist_endgueltig() {
            self.zustand = ConnectionState::Closed;
        }
        self.snapshot_aktualisieren();

        self.kontext.pipeline.quelle_beenden(&self.peer);
        self.kontext.registry.entfernen_wenn(&self.peer, self.id);
        info!(peer = %self.peer, session = self.id, "Session beendet");
    }
}

async fn verhandeln(
    verbindung: &dyn MediaConnection,
    offer: &SessionDescription,
) -> Result<SessionDescription, crate::media::MediaError> {
    verbindung.set_remote_description(offer).await?;
    let answer = verbindung.create_answer().await?;
    verbindung.set_local_description(&answer).await?;
    Ok(answer)
}

async fn naechstes_event(
    events: &mut Option<mpsc::Receiver<ConnectionEvent>>,
) -> Option<ConnectionEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
