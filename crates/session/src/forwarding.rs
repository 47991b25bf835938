//! Weiterleitung veroeffentlichter Tracks an die anderen Peers im Raum
//!
//! Ziel ist jeder Peer im Raum der Quelle ausser der Quelle selbst, dessen
//! Verbindung `connected` ist. Jedes Ziel bekommt eine eigene Relay-Kopie,
//! angehaengt ueber den Task seiner eigenen Session. Fehler bei einem Ziel
//! brechen die Weiterleitung an die anderen nicht ab. Endet eine
//! Veroeffentlichung, werden ihre Kopien bei allen Zielen wieder entfernt.

use std::sync::Arc;

use dashmap::DashMap;
use roomcast_audio::TrackKind;
use roomcast_core::types::PeerId;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::media::ConnectionState;
use crate::relay::MediaRelay;
use crate::room::RoomRegistry;
use crate::session::{SessionHandle, SessionRegistry};

/// Umgang mit Peers, die erst nach der Veroeffentlichung verbunden sind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LateJoinPolicy {
    /// Nur zum Zeitpunkt der Veroeffentlichung weiterleiten
    #[default]
    PublishTimeOnly,
    /// Beim Wechsel auf `connected` alle aktiven Tracks des Raums nachliefern
    Retroactive,
}

/// Ergebnis einer Weiterleitung
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ForwardReport {
    /// Peers im Raum ausser der Quelle
    pub attempted: usize,
    pub succeeded: usize,
    /// Ohne Session oder noch nicht verbunden
    pub skipped_not_ready: usize,
    /// Anhaengen in der Ziel-Session fehlgeschlagen
    pub failed: usize,
}

impl ForwardReport {
    /// Mindestens ein Ziel erreicht, aber nicht alle
    pub fn is_partial_failure(&self) -> bool {
        self.succeeded > 0 && self.succeeded < self.attempted
    }

    pub fn is_complete(&self) -> bool {
        self.succeeded == self.attempted
    }
}

impl std::fmt::Display for ForwardReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.succeeded, self.attempted)
    }
}

/// Veroeffentlichter Track eines Peers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedTrack {
    /// Id des Tracks, wie ihn die Engine geliefert hat
    pub source_id: String,
    pub kind: TrackKind,
    /// Relay-Quelle des eingehenden Tracks
    pub input_key: String,
    /// Relay-Quelle des verarbeiteten Tracks, von der die Ziele ihre Kopien bekommen
    pub output_key: String,
}

/// Fan-out-Logik fuer veroeffentlichte Tracks
#[derive(Clone)]
pub struct ForwardingPolicy {
    rooms: RoomRegistry,
    sessions: SessionRegistry,
    relay: MediaRelay,
    published: Arc<DashMap<PeerId, PublishedTrack>>,
    late_join: LateJoinPolicy,
}

impl ForwardingPolicy {
    pub fn new(
        rooms: RoomRegistry,
        sessions: SessionRegistry,
        relay: MediaRelay,
        late_join: LateJoinPolicy,
    ) -> Self {
        Self {
            rooms,
            sessions,
            relay,
            published: Arc::new(DashMap::new()),
            late_join,
        }
    }

    pub fn late_join(&self) -> LateJoinPolicy {
        self.late_join
    }

    pub fn relay(&self) -> &MediaRelay {
        &self.relay
    }

    /// Merkt sich den Track als aktuelle Veroeffentlichung des Peers
    pub fn publish(&self, peer: &PeerId, track: PublishedTrack) -> Option<PublishedTrack> {
        self.published.insert(peer.clone(), track)
    }

    pub fn unpublish(&self, peer: &PeerId) -> Option<PublishedTrack> {
        self.published.remove(peer).map(|(_, t)| t)
    }

    pub fn published(&self, peer: &PeerId) -> Option<PublishedTrack> {
        self.published.get(peer).map(|t| t.clone())
    }

    pub fn published_count(&self) -> usize {
        self.published.len()
    }

    /// Leitet den Track der Quelle an alle verbundenen Peers im Raum weiter
    pub async fn forward(&self, source: &PeerId, track: &PublishedTrack) -> ForwardReport {
        let mut report = ForwardReport::default();

        if track.kind != TrackKind::Audio {
            warn!(peer = %source, kind = %track.kind, "Nur Audio-Tracks werden weitergeleitet");
            return report;
        }
        let Some(raum) = self.rooms.room_of(source) else {
            debug!(peer = %source, "Peer in keinem Raum, keine Weiterleitung");
            return report;
        };
        let ziele = self.rooms.others(&raum, source);
        if ziele.is_empty() {
            debug!(peer = %source, raum = %raum, "Keine anderen Peers im Raum");
            return report;
        }

        for ziel in &ziele {
            self.zustellen(source, ziel, track, &mut report).await;
        }

        info!(
            peer = %source,
            raum = %raum,
            ergebnis = %report,
            nicht_bereit = report.skipped_not_ready,
            "Audio-Weiterleitung abgeschlossen"
        );
        if report.is_partial_failure() {
            warn!(peer = %source, ergebnis = %report, "Weiterleitung nur teilweise erfolgreich");
        }
        report
    }

    /// Liefert einem Peer alle aktiven Tracks seines Raums nach
    pub async fn catch_up(&self, target: &PeerId) -> ForwardReport {
        let mut report = ForwardReport::default();
        let Some(raum) = self.rooms.room_of(target) else {
            return report;
        };

        for quelle in self.rooms.others(&raum, target) {
            let Some(veroeffentlicht) = self.published(&quelle) else {
                continue;
            };
            self.zustellen(&quelle, target, &veroeffentlicht, &mut report)
                .await;
        }

        if report.attempted > 0 {
            info!(peer = %target, raum = %raum, ergebnis = %report, "Aktive Tracks nachgeliefert");
        }
        report
    }

    /// Entfernt die Kopien einer beendeten Veroeffentlichung bei allen Zielen
    ///
    /// Laeuft im Hintergrund; die Sessions arbeiten den Befehl in ihrer
    /// eigenen Reihenfolge ab.
    pub fn retract(&self, source: &PeerId, track: &PublishedTrack) {
        let ziele: Vec<SessionHandle> = self
            .sessions
            .handles()
            .into_iter()
            .filter(|h| h.peer_id() != source)
            .collect();
        if ziele.is_empty() {
            return;
        }
        let quelle = source.clone();
        let schluessel = track.output_key.clone();
        tokio::spawn(async move {
            for ziel in ziele {
                match ziel.detach_relay(quelle.clone(), schluessel.clone()).await {
                    Ok(true) => {
                        debug!(quelle = %quelle, ziel = %ziel.peer_id(), "Relay-Track entfernt");
                    }
                    Ok(false) => {}
                    Err(e) => {
                        debug!(quelle = %quelle, ziel = %ziel.peer_id(), fehler = %e, "Relay-Track nicht entfernbar");
                    }
                }
            }
        });
    }

    async fn zustellen(
        &self,
        quelle: &PeerId,
        ziel: &PeerId,
        track: &PublishedTrack,
        report: &mut ForwardReport,
    ) {
        report.attempted += 1;

        let Some(session) = self.sessions.get(ziel) else {
            debug!(quelle = %quelle, ziel = %ziel, "Ziel hat keine Session");
            report.skipped_not_ready += 1;
            return;
        };
        let zustand = session.connection_state();
        if zustand != ConnectionState::Connected {
            debug!(quelle = %quelle, ziel = %ziel, zustand = %zustand, "Ziel noch nicht verbunden");
            report.skipped_not_ready += 1;
            return;
        }

        let Some(kopie) = self.relay.subscribe(&track.output_key) else {
            warn!(quelle = %quelle, ziel = %ziel, "Relay-Quelle bereits beendet");
            report.failed += 1;
            return;
        };
        match session
            .attach_relay(quelle.clone(), track.output_key.clone(), kopie)
            .await
        {
            Ok(sender) => {
                debug!(quelle = %quelle, ziel = %ziel, sender = %sender, "Relay-Track angehaengt");
                report.succeeded += 1;
            }
            Err(e) => {
                warn!(quelle = %quelle, ziel = %ziel, fehler = %e, "Weiterleitung an Ziel fehlgeschlagen");
                report.failed += 1;
            }
        }
    }
}
