//! Verbindungs-Registry – Send-Queues aller verbundenen Clients
//!
//! Jede Client-Verbindung liest ihre Queue und schreibt die Nachrichten auf
//! den Signaling-Kanal. Gesendet wird nicht-blockierend: ist eine Queue
//! voll, wird die Nachricht verworfen statt den Absender aufzuhalten.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use roomcast_core::types::PeerId;
use roomcast_protocol::ServerMessage;
use tokio::sync::mpsc;

/// Handle auf die Send-Queue eines verbundenen Clients
#[derive(Clone, Debug)]
pub struct ClientSender {
    pub peer_id: PeerId,
    pub tx: mpsc::Sender<ServerMessage>,
}

impl ClientSender {
    /// Reiht eine Nachricht ein, `false` bei voller oder geschlossener Queue
    pub fn senden(&self, nachricht: ServerMessage) -> bool {
        match self.tx.try_send(nachricht) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(peer = %self.peer_id, "Send-Queue voll, Nachricht verworfen");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(peer = %self.peer_id, "Send-Queue geschlossen (Client getrennt)");
                false
            }
        }
    }
}

/// Alle verbundenen Clients (Clone teilt den Zustand)
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<ConnectionRegistryInner>,
}

struct ConnectionRegistryInner {
    clients: DashMap<PeerId, ClientSender>,
    queue_groesse: usize,
}

impl ConnectionRegistry {
    pub fn neu(queue_groesse: usize) -> Self {
        Self {
            inner: Arc::new(ConnectionRegistryInner {
                clients: DashMap::new(),
                queue_groesse: queue_groesse.max(1),
            }),
        }
    }

    /// Registriert einen Client und liefert seine Empfangs-Queue
    ///
    /// Ist der Peer bereits verbunden, wird `None` geliefert und nichts geaendert.
    pub fn registrieren(&self, peer: &PeerId) -> Option<mpsc::Receiver<ServerMessage>> {
        match self.inner.clients.entry(peer.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(eintrag) => {
                let (tx, rx) = mpsc::channel(self.inner.queue_groesse);
                eintrag.insert(ClientSender {
                    peer_id: peer.clone(),
                    tx,
                });
                tracing::debug!(peer = %peer, "Client registriert");
                Some(rx)
            }
        }
    }

    pub fn entfernen(&self, peer: &PeerId) -> bool {
        let entfernt = self.inner.clients.remove(peer).is_some();
        if entfernt {
            tracing::debug!(peer = %peer, "Client entfernt");
        }
        entfernt
    }

    pub fn ist_verbunden(&self, peer: &PeerId) -> bool {
        self.inner.clients.contains_key(peer)
    }

    /// Sendet an einen einzelnen Client
    pub fn an_peer_senden(&self, peer: &PeerId, nachricht: ServerMessage) -> bool {
        match self.inner.clients.get(peer) {
            Some(sender) => sender.senden(nachricht),
            None => {
                tracing::debug!(peer = %peer, "Senden an unbekannten Client");
                false
            }
        }
    }

    /// Sendet an alle Clients, liefert die Anzahl erfolgreicher Sendungen
    pub fn an_alle_senden(&self, nachricht: ServerMessage) -> usize {
        // Sender zuerst kopieren, damit waehrend des Sendens kein Shard gesperrt ist
        let senders: Vec<ClientSender> = self
            .inner
            .clients
            .iter()
            .map(|e| e.value().clone())
            .collect();
        senders
            .iter()
            .filter(|s| s.senden(nachricht.clone()))
            .count()
    }

    pub fn anzahl(&self) -> usize {
        self.inner.clients.len()
    }

    /// Verbundene Peers, sortiert
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.inner.clients.iter().map(|e| e.key().clone()).collect();
        peers.sort();
        peers
    }
}
