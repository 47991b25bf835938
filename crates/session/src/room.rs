//! Raum-Registry – welcher Peer ist in welchem Raum
//!
//! Ein Peer gehoert hoechstens einem Raum an. Ein Raum existiert genau so
//! lange, wie er Mitglieder hat. Alle mehrstufigen Aenderungen (alten Raum
//! verlassen, neuen betreten) laufen unter einem einzigen Lock.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use roomcast_core::types::{PeerId, RoomId};

#[derive(Debug, Default)]
struct RaumZustand {
    raeume: HashMap<RoomId, BTreeSet<PeerId>>,
    mitgliedschaft: HashMap<PeerId, RoomId>,
}

impl RaumZustand {
    /// Entfernt den Peer aus seinem Raum und loescht leere Raeume
    fn austragen(&mut self, peer: &PeerId) -> Option<RoomId> {
        let raum = self.mitgliedschaft.remove(peer)?;
        if let Some(mitglieder) = self.raeume.get_mut(&raum) {
            mitglieder.remove(peer);
            if mitglieder.is_empty() {
                self.raeume.remove(&raum);
                tracing::debug!(raum = %raum, "Raum geloescht (leer)");
            }
        }
        Some(raum)
    }
}

/// Geteilte Raum-Registry (Clone teilt den Zustand)
#[derive(Debug, Clone, Default)]
pub struct RoomRegistry {
    inner: Arc<RwLock<RaumZustand>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verschiebt den Peer in den Raum
    ///
    /// Gibt den vorherigen Raum zurueck, falls der Peer ihn dafuer verlassen hat.
    /// Ist der Peer schon Mitglied, passiert nichts.
    pub fn join(&self, room: &RoomId, peer: &PeerId) -> Option<RoomId> {
        let mut zustand = self.inner.write();
        if zustand.mitgliedschaft.get(peer) == Some(room) {
            return None;
        }
        let vorher = zustand.austragen(peer);
        zustand
            .raeume
            .entry(room.clone())
            .or_default()
            .insert(peer.clone());
        zustand.mitgliedschaft.insert(peer.clone(), room.clone());
        drop(zustand);

        tracing::info!(peer = %peer, raum = %room, vorher = ?vorher, "Peer betritt Raum");
        vorher
    }

    /// Entfernt den Peer aus seinem Raum, ohne Raum kein Effekt
    pub fn leave(&self, peer: &PeerId) -> Option<RoomId> {
        let raum = self.inner.write().austragen(peer);
        if let Some(r) = &raum {
            tracing::info!(peer = %peer, raum = %r, "Peer verlaesst Raum");
        }
        raum
    }

    /// Mitglieder des Raums, sortiert
    pub fn peers_in(&self, room: &RoomId) -> Vec<PeerId> {
        self.inner
            .read()
            .raeume
            .get(room)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Mitglieder des Raums ohne den angegebenen Peer
    pub fn others(&self, room: &RoomId, peer: &PeerId) -> Vec<PeerId> {
        self.inner
            .read()
            .raeume
            .get(room)
            .map(|m| m.iter().filter(|p| *p != peer).cloned().collect())
            .unwrap_or_default()
    }

    pub fn room_of(&self, peer: &PeerId) -> Option<RoomId> {
        self.inner.read().mitgliedschaft.get(peer).cloned()
    }

    /// Alle aktiven Raeume, sortiert
    pub fn rooms(&self) -> Vec<RoomId> {
        let mut raeume: Vec<RoomId> = self.inner.read().raeume.keys().cloned().collect();
        raeume.sort();
        raeume
    }

    pub fn room_count(&self) -> usize {
        self.inner.read().raeume.len()
    }

    pub fn contains(&self, room: &RoomId) -> bool {
        self.inner.read().raeume.contains_key(room)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(id: &str) -> PeerId {
        PeerId::new(id)
    }

    fn r(id: &str) -> RoomId {
        RoomId::new(id)
    }

    #[test]
    fn beitritt_legt_raum_an() {
        let reg = RoomRegistry::new();
        assert_eq!(reg.join(&r("r1"), &p("a")), None);
        assert!(reg.contains(&r("r1")));
        assert_eq!(reg.room_of(&p("a")), Some(r("r1")));
        assert_eq!(reg.peers_in(&r("r1")), vec![p("a")]);
    }

    #[test]
    fn wechsel_verlaesst_alten_raum() {
        let reg = RoomRegistry::new();
        reg.join(&r("r1"), &p("a"));
        reg.join(&r("r1"), &p("b"));
        assert_eq!(reg.join(&r("r2"), &p("a")), Some(r("r1")));

        assert_eq!(reg.room_of(&p("a")), Some(r("r2")));
        assert_eq!(reg.peers_in(&r("r1")), vec![p("b")]);
        assert_eq!(reg.peers_in(&r("r2")), vec![p("a")]);
    }

    #[test]
    fn leerer_raum_verschwindet_sofort() {
        let reg = RoomRegistry::new();
        reg.join(&r("r1"), &p("a"));
        reg.join(&r("r2"), &p("a"));
        assert!(!reg.contains(&r("r1")));
        assert_eq!(reg.room_count(), 1);

        assert_eq!(reg.leave(&p("a")), Some(r("r2")));
        assert_eq!(reg.room_count(), 0);
        assert!(reg.rooms().is_empty());
    }

    #[test]
    fn doppelter_beitritt_ist_idempotent() {
        let reg = RoomRegistry::new();
        reg.join(&r("r1"), &p("a"));
        assert_eq!(reg.join(&r("r1"), &p("a")), None);
        assert_eq!(reg.peers_in(&r("r1")).len(), 1);
    }

    #[test]
    fn verlassen_ohne_raum_ist_kein_fehler() {
        let reg = RoomRegistry::new();
        assert_eq!(reg.leave(&p("niemand")), None);
        assert!(reg.peers_in(&r("unbekannt")).is_empty());
    }

    #[test]
    fn others_filtert_den_peer() {
        let reg = RoomRegistry::new();
        for id in ["a", "b", "c"] {
            reg.join(&r("r1"), &p(id));
        }
        assert_eq!(reg.others(&r("r1"), &p("b")), vec![p("a"), p("c")]);
        assert_eq!(reg.rooms(), vec![r("r1")]);
    }

    #[test]
    fn parallele_wechsel_bleiben_konsistent() {
        let reg = RoomRegistry::new();
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    let peer = p(&format!("p{i}"));
                    for n in 0..100 {
                        reg.join(&r(&format!("r{}", n % 3)), &peer);
                    }
                    reg.leave(&peer);
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(reg.room_count(), 0);
    }
}
