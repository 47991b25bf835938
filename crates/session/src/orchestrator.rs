//! SessionOrchestrator – zentrale Fassade
//!
//! Nimmt Signaling-Nachrichten der Clients entgegen, verteilt sie an die
//! Peer-Sessions und pflegt Raeume und Verbindungen. Jede Nachricht eines
//! Peers wird vollstaendig verarbeitet, bevor die naechste desselben Peers
//! drankommt; verschiedene Peers laufen unabhaengig.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use roomcast_audio::{AudioHost, AufnahmeInfo, LocalAudioPlayer};
use roomcast_core::types::{PeerId, RoomId};
use roomcast_protocol::{parse_client_message, ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::broadcast::ConnectionRegistry;
use crate::config::RoomcastConfig;
use crate::error::{SessionError, SessionResult};
use crate::forwarding::ForwardingPolicy;
use crate::media::{ConnectionState, MediaEngine};
use crate::pipeline::{PeerStats, TrackPipeline};
use crate::processor::ProcessorRegistry;
use crate::relay::MediaRelay;
use crate::room::RoomRegistry;
use crate::session::{SessionKontext, SessionRegistry};
use crate::status::{ConnectionInfo, ConnectionsStatus, HealthStatus, RoomInfo, StreamingStatus};

struct OrchestratorInner {
    config: RoomcastConfig,
    rooms: RoomRegistry,
    sessions: SessionRegistry,
    connections: ConnectionRegistry,
    processors: Arc<ProcessorRegistry>,
    pipeline: Arc<TrackPipeline>,
    kontext: Arc<SessionKontext>,
}

/// Zentrale Fassade (Clone teilt den Zustand)
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl SessionOrchestrator {
    /// Orchestrator ohne lokale Wiedergabe
    pub fn new(config: RoomcastConfig, engine: Arc<dyn MediaEngine>) -> Self {
        Self::bauen(config, engine, None)
    }

    /// Orchestrator mit lokalem Player, falls `audio.local_playback` gesetzt ist
    pub fn with_audio(
        config: RoomcastConfig,
        engine: Arc<dyn MediaEngine>,
        host: Arc<dyn AudioHost>,
    ) -> Self {
        let player = config
            .audio
            .local_playback
            .then(|| LocalAudioPlayer::new(host, config.audio.player_config()));
        Self::bauen(config, engine, player)
    }

    fn bauen(
        config: RoomcastConfig,
        engine: Arc<dyn MediaEngine>,
        player: Option<LocalAudioPlayer>,
    ) -> Self {
        let rooms = RoomRegistry::new();
        let sessions = SessionRegistry::new();
        let processors = Arc::new(ProcessorRegistry::new());
        let forwarding = ForwardingPolicy::new(
            rooms.clone(),
            sessions.clone(),
            MediaRelay::new(),
            config.session.late_join,
        );
        let pipeline = Arc::new(TrackPipeline::new(
            forwarding,
            Arc::clone(&processors),
            config.session.processor.clone(),
            player,
            config.audio.volume,
        ));
        let kontext = Arc::new(SessionKontext::new(
            engine,
            Arc::clone(&pipeline),
            sessions.clone(),
            config.session.gathering_timeout(),
            config.session.max_gathered_candidates,
            config.session.command_queue,
        ));
        let connections = ConnectionRegistry::neu(config.session.send_queue);

        info!(
            gathering_timeout_sek = config.session.gathering_timeout_sek,
            prozessor = %config.session.processor,
            late_join = ?config.session.late_join,
            lokale_wiedergabe = config.audio.local_playback,
            "SessionOrchestrator erstellt"
        );

        Self {
            inner: Arc::new(OrchestratorInner {
                config,
                rooms,
                sessions,
                connections,
                processors,
                pipeline,
                kontext,
            }),
        }
    }

    pub fn config(&self) -> &RoomcastConfig {
        &self.inner.config
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.inner.rooms
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.inner.sessions
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.inner.connections
    }

    /// Registry zum Nachruesten eigener Prozessoren
    pub fn processors(&self) -> &ProcessorRegistry {
        &self.inner.processors
    }

    pub fn player(&self) -> Option<&LocalAudioPlayer> {
        self.inner.pipeline.player()
    }

    // -----------------------------------------------------------------------
    // Verbindungen
    // -----------------------------------------------------------------------

    /// Registriert einen Client und schickt ihm `connection_established`
    ///
    /// Eine zweite Verbindung mit derselben Peer-ID wird abgelehnt.
    pub fn connect(&self, peer: &PeerId) -> SessionResult<mpsc::Receiver<ServerMessage>> {
        let rx = self
            .inner
            .connections
            .registrieren(peer)
            .ok_or_else(|| SessionError::PeerBereitsVerbunden(peer.clone()))?;
        info!(peer = %peer, "Client verbunden");
        self.inner
            .connections
            .an_peer_senden(peer, ServerMessage::verbunden(peer.clone()));
        Ok(rx)
    }

    /// Client getrennt; raeumt je nach Konfiguration den Peer vollstaendig ab
    pub async fn disconnect(&self, peer: &PeerId) {
        if self.inner.connections.entfernen(peer) {
            info!(peer = %peer, "Client getrennt");
        }
        if self.inner.config.session.cleanup_on_disconnect {
            self.remove_peer(peer).await;
        }
    }

    // -----------------------------------------------------------------------
    // Nachrichten
    // -----------------------------------------------------------------------

    /// Verarbeitet eine rohe Text-Nachricht; Fehler gehen als `error` an den Client
    pub async fn handle_text(&self, peer: &PeerId, text: &str) {
        let nachricht = match parse_client_message(text) {
            Ok(n) => n,
            Err(e) => {
                warn!(peer = %peer, fehler = %e, "Ungueltige Nachricht");
                self.antworten(peer, ServerMessage::aus_parse_fehler(&e));
                return;
            }
        };

        let typ = nachricht.typ();
        debug!(peer = %peer, typ, "Nachricht empfangen");
        if let Err(e) = self.handle_message(peer, nachricht).await {
            warn!(peer = %peer, typ, fehler = %e, "Nachricht konnte nicht verarbeitet werden");
            self.antworten(peer, ServerMessage::verarbeitungsfehler(&e));
        }
    }

    /// Verarbeitet eine geparste Nachricht
    pub async fn handle_message(&self, peer: &PeerId, nachricht: ClientMessage) -> SessionResult<()> {
        match nachricht {
            ClientMessage::Offer { room_id, offer } => {
                self.inner.rooms.join(&room_id, peer);
                let session = self
                    .inner
                    .sessions
                    .get_or_start(peer, &self.inner.kontext);
                let answer = session.offer(offer).await?;
                self.antworten(peer, ServerMessage::Answer { room_id, answer });
            }
            ClientMessage::Answer { answer } => {
                let session = self.session(peer)?;
                session.answer(answer).await?;
            }
            ClientMessage::IceCandidate { room_id, candidate } => {
                let session = self.session(peer)?;
                debug!(peer = %peer, raum = %room_id, "Remote-Kandidat");
                session.add_candidate(candidate).await?;
            }
            ClientMessage::JoinRoom { room_id } => self.join_room(peer, room_id),
            ClientMessage::LeaveRoom { room_id } => self.leave_room(peer, room_id),
            ClientMessage::Ping { timestamp } => {
                self.antworten(peer, ServerMessage::Pong { timestamp });
            }
        }
        Ok(())
    }

    fn session(&self, peer: &PeerId) -> SessionResult<crate::session::SessionHandle> {
        self.inner
            .sessions
            .get(peer)
            .filter(|s| !s.is_closed())
            .ok_or_else(|| SessionError::NoSession(peer.clone()))
    }

    fn join_room(&self, peer: &PeerId, room_id: RoomId) {
        self.inner.rooms.join(&room_id, peer);
        self.antworten(
            peer,
            ServerMessage::RoomJoined {
                room_id: room_id.clone(),
                peer_id: peer.clone(),
            },
        );
        self.inner.connections.an_alle_senden(ServerMessage::UserJoinedRoom {
            room_id,
            peer_id: peer.clone(),
        });

        // Bereits verbundene Peers bekommen die aktiven Tracks des neuen Raums
        let verbunden = self
            .inner
            .sessions
            .get(peer)
            .is_some_and(|s| s.connection_state() == ConnectionState::Connected);
        if verbunden {
            self.inner.pipeline.peer_verbunden(peer);
        }
    }

    fn leave_room(&self, peer: &PeerId, room_id: RoomId) {
        if self.inner.rooms.room_of(peer).as_ref() == Some(&room_id) {
            self.inner.rooms.leave(peer);
        } else {
            debug!(peer = %peer, raum = %room_id, "Peer ist nicht Mitglied des Raums");
        }
        self.antworten(
            peer,
            ServerMessage::RoomLeft {
                room_id: room_id.clone(),
                peer_id: peer.clone(),
            },
        );
        self.inner.connections.an_alle_senden(ServerMessage::UserLeftRoom {
            room_id,
            peer_id: peer.clone(),
        });
    }

    fn antworten(&self, peer: &PeerId, nachricht: ServerMessage) {
        self.inner.connections.an_peer_senden(peer, nachricht);
    }

    // -----------------------------------------------------------------------
    // Aufnahme
    // -----------------------------------------------------------------------

    /// Nimmt den aktuell veroeffentlichten Track eines Peers als WAV auf
    pub fn start_recording(&self, peer: &PeerId, pfad: impl Into<PathBuf>) -> SessionResult<()> {
        self.inner.pipeline.aufnahme_starten(peer, pfad)
    }

    /// Stoppt die Aufnahme; `None` wenn keine lief oder sie fehlschlug
    pub async fn stop_recording(&self, peer: &PeerId) -> Option<AufnahmeInfo> {
        self.inner.pipeline.aufnahme_stoppen(peer).await
    }

    pub fn is_recording(&self, peer: &PeerId) -> bool {
        self.inner.pipeline.nimmt_auf(peer)
    }

    // -----------------------------------------------------------------------
    // Aufraeumen
    // -----------------------------------------------------------------------

    /// Entfernt einen Peer vollstaendig
    ///
    /// Jeder Schritt wird ausgefuehrt, auch wenn ein frueherer nichts zu tun hatte.
    pub async fn remove_peer(&self, peer: &PeerId) {
        info!(peer = %peer, "Peer wird entfernt");

        match self.inner.sessions.remove(peer) {
            Some(session) => session.close().await,
            None => debug!(peer = %peer, "Keine Session vorhanden"),
        }

        if !self.inner.pipeline.quelle_beenden(peer) {
            debug!(peer = %peer, "Keine aktive Veroeffentlichung");
        }

        if let Some(info) = self.stop_recording(peer).await {
            info!(peer = %peer, pfad = %info.pfad.display(), "Aufnahme beim Entfernen abgeschlossen");
        }

        if let Some(player) = self.player() {
            player.remove_track(peer);
        }

        self.inner.pipeline.remove_stats(peer);

        if let Some(raum) = self.inner.rooms.leave(peer) {
            self.inner.connections.an_alle_senden(ServerMessage::UserLeftRoom {
                room_id: raum,
                peer_id: peer.clone(),
            });
        }
    }

    /// Beendet alle Sessions und gibt die Audio-Ausgabe frei
    pub async fn shutdown(&self) {
        let sessions = self.inner.sessions.handles();
        info!(sessions = sessions.len(), "Orchestrator wird heruntergefahren");
        for session in sessions {
            let peer = session.peer_id().clone();
            self.inner.sessions.remove(&peer);
            session.close().await;
        }
        self.inner.pipeline.alle_aufnahmen_stoppen().await;
        if let Some(player) = self.player() {
            player.cleanup();
        }
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "healthy".into(),
            active_connections: self.inner.connections.anzahl(),
            active_rooms: self.inner.rooms.room_count(),
            active_sessions: self.inner.sessions.len(),
        }
    }

    pub fn connections_status(&self) -> ConnectionsStatus {
        let peers = self.inner.connections.peers();
        ConnectionsStatus {
            total_connections: peers.len(),
            active_connections: peers,
        }
    }

    pub fn connection_info(&self, peer: &PeerId) -> Option<ConnectionInfo> {
        self.inner
            .sessions
            .get(peer)
            .map(|s| ConnectionInfo::from(s.snapshot()))
    }

    pub fn peer_stats(&self, peer: &PeerId) -> Option<PeerStats> {
        self.inner.pipeline.stats(peer)
    }

    /// Streaming-Uebersicht, optional mit Details zu einem Raum
    pub fn streaming_status(&self, room: Option<&RoomId>) -> StreamingStatus {
        let forwarding = self.inner.pipeline.forwarding();
        let room_info = room.map(|raum| {
            let peers = self.inner.rooms.peers_in(raum);
            let peers_with_audio = peers
                .iter()
                .filter(|p| forwarding.published(p).is_some())
                .cloned()
                .collect();
            let peers_with_connections = peers
                .iter()
                .filter(|p| self.inner.sessions.get(p).is_some())
                .cloned()
                .collect();
            RoomInfo {
                room_id: raum.clone(),
                total_peers: peers.len(),
                peers,
                peers_with_audio,
                peers_with_connections,
            }
        });

        StreamingStatus {
            total_connections: self.inner.sessions.len(),
            total_audio_tracks: forwarding.published_count(),
            active_rooms: self.inner.rooms.room_count(),
            audio_statistics: self
                .inner
                .pipeline
                .all_stats()
                .into_iter()
                .collect::<BTreeMap<_, _>>(),
            room_info,
        }
    }
}
