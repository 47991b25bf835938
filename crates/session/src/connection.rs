//! Client-Verbindung – eine Signaling-Verbindung pro Peer
//!
//! Liest laengenpraefixierte JSON-Nachrichten vom Client, reicht sie an den
//! Orchestrator weiter und schreibt die Send-Queue des Peers zurueck auf
//! den Kanal. Jede eingehende Nachricht wird fertig verarbeitet, bevor die
//! naechste gelesen wird.

use futures_util::{SinkExt, StreamExt};
use roomcast_core::types::PeerId;
use roomcast_protocol::{ServerMessage, SignalingCodec};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::error::SessionResult;
use crate::orchestrator::SessionOrchestrator;

pub struct ClientConnection {
    orchestrator: SessionOrchestrator,
    peer: PeerId,
}

impl ClientConnection {
    pub fn neu(orchestrator: SessionOrchestrator, peer: PeerId) -> Self {
        Self { orchestrator, peer }
    }

    /// Verarbeitet die Verbindung bis Client-Ende, Fehler oder Shutdown
    ///
    /// Ist die Peer-ID schon verbunden, bekommt der Client eine `error`-Nachricht
    /// und die Verbindung endet sofort.
    pub async fn verarbeiten<S>(
        self,
        stream: S,
        mut shutdown: watch::Receiver<bool>,
    ) -> SessionResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(stream, SignalingCodec::new());

        let mut ausgang = match self.orchestrator.connect(&self.peer) {
            Ok(rx) => rx,
            Err(e) => {
                warn!(peer = %self.peer, fehler = %e, "Verbindung abgelehnt");
                let _ = framed.send(ServerMessage::error(e.to_string())).await;
                return Err(e);
            }
        };

        loop {
            tokio::select! {
                frame = framed.next() => match frame {
                    Some(Ok(text)) => {
                        self.orchestrator.handle_text(&self.peer, &text).await;
                    }
                    Some(Err(e)) => {
                        warn!(peer = %self.peer, fehler = %e, "Lesefehler");
                        break;
                    }
                    None => {
                        debug!(peer = %self.peer, "Client hat die Verbindung geschlossen");
                        break;
                    }
                },
                nachricht = ausgang.recv() => match nachricht {
                    Some(nachricht) => {
                        if let Err(e) = framed.send(nachricht).await {
                            warn!(peer = %self.peer, fehler = %e, "Senden fehlgeschlagen");
                            break;
                        }
                    }
                    None => break,
                },
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        debug!(peer = %self.peer, "Shutdown-Signal empfangen");
                        break;
                    }
                }
            }
        }

        self.orchestrator.disconnect(&self.peer).await;
        Ok(())
    }
}
