//! Integration-Tests fuer Weiterleitung, Relay und Aufraeumen

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{offer_json, warten_bis, FakeEngine, Skript, StummerHost};
use roomcast_audio::{AudioFrame, TrackKind};
use roomcast_core::types::{PeerId, RoomId};
use roomcast_protocol::ServerMessage;
use roomcast_session::{
    ConnectionState, ForwardReport, LateJoinPolicy, RoomcastConfig, SessionOrchestrator,
};
use tokio::sync::mpsc;

struct Aufbau {
    orch: SessionOrchestrator,
    engine: Arc<FakeEngine>,
    a: PeerId,
    b: PeerId,
    rx_b: mpsc::Receiver<ServerMessage>,
}

/// Zwei Peers im Raum r1, beide mit fertiger Verhandlung
async fn aufbauen(config: RoomcastConfig) -> Aufbau {
    let engine = FakeEngine::new(Skript {
        kandidaten: 1,
        ..Default::default()
    });
    let orch = SessionOrchestrator::new(config, engine.clone());
    let a = PeerId::new("a");
    let b = PeerId::new("b");
    let _rx_a = orch.connect(&a).unwrap();
    let rx_b = orch.connect(&b).unwrap();

    orch.handle_text(&b, &offer_json("r1")).await;
    orch.handle_text(&a, &offer_json("r1")).await;
    assert_eq!(orch.rooms().peers_in(&RoomId::new("r1")).len(), 2);

    Aufbau {
        orch,
        engine,
        a,
        b,
        rx_b,
    }
}

async fn verbinden(aufbau: &Aufbau, peer: &PeerId) {
    aufbau
        .engine
        .verbindung(peer.as_str())
        .unwrap()
        .zustand_melden(ConnectionState::Connected)
        .await;
    let session = aufbau.orch.sessions().get(peer).unwrap();
    assert!(session.wait_for_state(ConnectionState::Connected).await);
}

async fn letzter_report(orch: &SessionOrchestrator, peer: &PeerId) -> ForwardReport {
    assert!(
        warten_bis(|| orch.peer_stats(peer).and_then(|s| s.last_forward).is_some()).await,
        "keine Weiterleitung fuer {peer}"
    );
    orch.peer_stats(peer).unwrap().last_forward.unwrap()
}

fn frame(wert: f32) -> Arc<AudioFrame> {
    Arc::new(AudioFrame::interleaved(vec![wert; 4], 1, 48000))
}

#[tokio::test]
async fn verbundener_peer_bekommt_relay_track() {
    let aufbau = aufbauen(RoomcastConfig::default()).await;
    verbinden(&aufbau, &aufbau.b).await;

    let quelle = aufbau
        .engine
        .verbindung("a")
        .unwrap()
        .track_veroeffentlichen("a-audio")
        .await;
    let report = letzter_report(&aufbau.orch, &aufbau.a).await;
    assert_eq!(report.attempted, 1);
    assert_eq!(report.succeeded, 1);
    assert!(report.is_complete());

    let verbindung_b = aufbau.engine.verbindung("b").unwrap();
    assert_eq!(verbindung_b.anzahl_tracks(), 1);
    let kopie = verbindung_b.track(0).unwrap();
    assert_eq!(kopie.kind(), TrackKind::Audio);

    quelle.send(frame(0.25)).await.unwrap();
    let empfangen = tokio::time::timeout(Duration::from_secs(1), kopie.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(empfangen.to_interleaved_f32(), vec![0.25; 4]);

    let snapshot = aufbau.orch.sessions().get(&aufbau.b).unwrap().snapshot();
    assert_eq!(snapshot.outbound_sources, vec![aufbau.a.clone()]);

    // Die Quelle selbst bekommt nichts zurueck
    assert_eq!(aufbau.engine.verbindung("a").unwrap().anzahl_tracks(), 0);
}

#[tokio::test]
async fn nicht_verbundener_peer_wird_uebersprungen() {
    let aufbau = aufbauen(RoomcastConfig::default()).await;

    let _quelle = aufbau
        .engine
        .verbindung("a")
        .unwrap()
        .track_veroeffentlichen("a-audio")
        .await;
    let report = letzter_report(&aufbau.orch, &aufbau.a).await;
    assert_eq!(report.attempted, 1);
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.skipped_not_ready, 1);
    assert!(!report.is_partial_failure());
    assert_eq!(aufbau.engine.verbindung("b").unwrap().anzahl_tracks(), 0);

    // Ohne Nachlieferung bleibt es dabei, auch wenn b spaeter verbunden ist
    verbinden(&aufbau, &aufbau.b).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(aufbau.engine.verbindung("b").unwrap().anzahl_tracks(), 0);
}

#[tokio::test]
async fn nachlieferung_bei_spaeter_verbindung() {
    let mut config = RoomcastConfig::default();
    config.session.late_join = LateJoinPolicy::Retroactive;
    let aufbau = aufbauen(config).await;

    let _quelle = aufbau
        .engine
        .verbindung("a")
        .unwrap()
        .track_veroeffentlichen("a-audio")
        .await;
    let report = letzter_report(&aufbau.orch, &aufbau.a).await;
    assert_eq!(report.succeeded, 0);

    verbinden(&aufbau, &aufbau.b).await;
    let verbindung_b = aufbau.engine.verbindung("b").unwrap();
    assert!(warten_bis(|| verbindung_b.anzahl_tracks() == 1).await);
}

#[tokio::test]
async fn neuer_track_ersetzt_alten_beim_ziel() {
    let aufbau = aufbauen(RoomcastConfig::default()).await;
    verbinden(&aufbau, &aufbau.b).await;
    let verbindung_a = aufbau.engine.verbindung("a").unwrap();
    let verbindung_b = aufbau.engine.verbindung("b").unwrap();

    let _erste = verbindung_a.track_veroeffentlichen("a-audio-1").await;
    assert!(warten_bis(|| verbindung_b.anzahl_tracks() == 1).await);

    let _zweite = verbindung_a.track_veroeffentlichen("a-audio-2").await;
    assert!(
        warten_bis(|| {
            aufbau
                .orch
                .peer_stats(&aufbau.a)
                .is_some_and(|s| s.track_id == "a-audio-2" && s.last_forward.is_some())
        })
        .await
    );
    assert_eq!(verbindung_b.anzahl_tracks(), 1);
    assert_eq!(verbindung_b.entfernt.lock().len(), 1);
    assert_eq!(aufbau.orch.streaming_status(None).total_audio_tracks, 1);
}

#[tokio::test]
async fn video_track_wird_nicht_weitergeleitet() {
    let aufbau = aufbauen(RoomcastConfig::default()).await;
    verbinden(&aufbau, &aufbau.b).await;

    let (track, _tx) = roomcast_audio::ChannelTrack::new("a-video", TrackKind::Video, 1);
    aufbau
        .engine
        .verbindung("a")
        .unwrap()
        .event_senden(roomcast_session::ConnectionEvent::Track(Arc::new(track)))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(aufbau.orch.peer_stats(&aufbau.a).is_none());
    assert_eq!(aufbau.engine.verbindung("b").unwrap().anzahl_tracks(), 0);
}

#[tokio::test]
async fn fehlgeschlagene_verbindung_beendet_session() {
    let aufbau = aufbauen(RoomcastConfig::default()).await;
    let verbindung_b = aufbau.engine.verbindung("b").unwrap();

    verbindung_b.zustand_melden(ConnectionState::Failed).await;
    assert!(warten_bis(|| aufbau.orch.sessions().get(&aufbau.b).is_none()).await);
    assert!(verbindung_b.ist_geschlossen());

    // Raum und Client-Verbindung bleiben bestehen
    assert_eq!(aufbau.orch.rooms().room_of(&aufbau.b), Some(RoomId::new("r1")));
    assert!(aufbau.orch.connections().ist_verbunden(&aufbau.b));
}

#[tokio::test]
async fn remove_peer_raeumt_alles_ab() {
    let mut aufbau = aufbauen(RoomcastConfig::default()).await;
    verbinden(&aufbau, &aufbau.b).await;

    let _quelle = aufbau
        .engine
        .verbindung("a")
        .unwrap()
        .track_veroeffentlichen("a-audio")
        .await;
    assert_eq!(letzter_report(&aufbau.orch, &aufbau.a).await.succeeded, 1);
    let kopie = aufbau.engine.verbindung("b").unwrap().track(0).unwrap();

    // Begruessung und Raum-Nachrichten von b verwerfen
    while aufbau.rx_b.try_recv().is_ok() {}

    aufbau.orch.remove_peer(&aufbau.a).await;

    assert!(aufbau.orch.sessions().get(&aufbau.a).is_none());
    assert!(aufbau.orch.peer_stats(&aufbau.a).is_none());
    assert_eq!(aufbau.orch.rooms().room_of(&aufbau.a), None);
    assert!(aufbau.engine.verbindung("a").unwrap().ist_geschlossen());
    assert_eq!(aufbau.orch.streaming_status(None).total_audio_tracks, 0);

    // Die Relay-Kopie bei b endet
    let ende = tokio::time::timeout(Duration::from_secs(1), kopie.recv())
        .await
        .unwrap();
    assert!(ende.is_none());

    // b traegt keinen Relay-Track von a mehr
    let verbindung_b = aufbau.engine.verbindung("b").unwrap();
    assert!(warten_bis(|| verbindung_b.anzahl_tracks() == 0).await);
    assert_eq!(verbindung_b.entfernt.lock().len(), 1);
    let session_b = aufbau.orch.sessions().get(&aufbau.b).unwrap();
    assert!(warten_bis(|| session_b.snapshot().outbound_sources.is_empty()).await);

    match aufbau.rx_b.recv().await.unwrap() {
        ServerMessage::UserLeftRoom { room_id, peer_id } => {
            assert_eq!(room_id, RoomId::new("r1"));
            assert_eq!(peer_id, aufbau.a);
        }
        anderes => panic!("user-left-room erwartet, erhalten: {anderes:?}"),
    }

    // Ein zweiter Aufruf hat nichts mehr zu tun
    aufbau.orch.remove_peer(&aufbau.a).await;
    assert_eq!(aufbau.orch.rooms().peers_in(&RoomId::new("r1")), vec![aufbau.b.clone()]);
}

#[tokio::test]
async fn gleiche_track_id_ueberlebt_entfernen_des_anderen_peers() {
    let mut config = RoomcastConfig::default();
    config.session.late_join = LateJoinPolicy::Retroactive;
    let aufbau = aufbauen(config).await;
    verbinden(&aufbau, &aufbau.a).await;
    verbinden(&aufbau, &aufbau.b).await;

    let _von_a = aufbau
        .engine
        .verbindung("a")
        .unwrap()
        .track_veroeffentlichen("audio")
        .await;
    letzter_report(&aufbau.orch, &aufbau.a).await;
    let von_b = aufbau
        .engine
        .verbindung("b")
        .unwrap()
        .track_veroeffentlichen("audio")
        .await;
    letzter_report(&aufbau.orch, &aufbau.b).await;

    aufbau.orch.remove_peer(&aufbau.a).await;
    assert!(aufbau.orch.peer_stats(&aufbau.b).unwrap().track_active);

    // Ein neuer Peer bekommt b's Track nachgeliefert und hoert b
    let c = PeerId::new("c");
    let _rx_c = aufbau.orch.connect(&c).unwrap();
    aufbau.orch.handle_text(&c, &offer_json("r1")).await;
    verbinden(&aufbau, &c).await;
    let verbindung_c = aufbau.engine.verbindung("c").unwrap();
    assert!(warten_bis(|| verbindung_c.anzahl_tracks() == 1).await);
    let kopie = verbindung_c.track(0).unwrap();

    von_b.send(frame(0.9)).await.unwrap();
    let empfangen = tokio::time::timeout(Duration::from_secs(1), kopie.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(empfangen.to_interleaved_f32(), vec![0.9; 4]);
}

#[tokio::test]
async fn aufnahme_des_veroeffentlichten_tracks() {
    let dir = tempfile::tempdir().unwrap();
    let pfad = dir.path().join("a.wav");
    let aufbau = aufbauen(RoomcastConfig::default()).await;

    assert!(aufbau.orch.start_recording(&aufbau.a, &pfad).is_err());

    let quelle = aufbau
        .engine
        .verbindung("a")
        .unwrap()
        .track_veroeffentlichen("a-audio")
        .await;
    letzter_report(&aufbau.orch, &aufbau.a).await;
    aufbau.orch.start_recording(&aufbau.a, &pfad).unwrap();
    assert!(aufbau.orch.is_recording(&aufbau.a));

    quelle.send(frame(0.5)).await.unwrap();
    quelle.send(frame(0.25)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // remove_peer schliesst die Aufnahme ab
    aufbau.orch.remove_peer(&aufbau.a).await;
    assert!(!aufbau.orch.is_recording(&aufbau.a));
    assert!(aufbau.orch.stop_recording(&aufbau.a).await.is_none());

    let mut reader = hound::WavReader::open(&pfad).unwrap();
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.spec().sample_rate, 48000);
    let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
    assert_eq!(samples, [vec![0.5; 4], vec![0.25; 4]].concat());
}

#[tokio::test]
async fn disconnect_raeumt_peer_ab() {
    let aufbau = aufbauen(RoomcastConfig::default()).await;
    aufbau.orch.disconnect(&aufbau.a).await;
    assert!(!aufbau.orch.connections().ist_verbunden(&aufbau.a));
    assert!(aufbau.orch.sessions().get(&aufbau.a).is_none());
    assert_eq!(aufbau.orch.rooms().room_of(&aufbau.a), None);
}

#[tokio::test]
async fn disconnect_ohne_aufraeumen_behaelt_session() {
    let mut config = RoomcastConfig::default();
    config.session.cleanup_on_disconnect = false;
    let aufbau = aufbauen(config).await;
    aufbau.orch.disconnect(&aufbau.a).await;
    assert!(!aufbau.orch.connections().ist_verbunden(&aufbau.a));
    assert!(aufbau.orch.sessions().get(&aufbau.a).is_some());
    assert_eq!(aufbau.orch.rooms().room_of(&aufbau.a), Some(RoomId::new("r1")));
}

#[tokio::test]
async fn status_uebersicht() {
    let aufbau = aufbauen(RoomcastConfig::default()).await;
    verbinden(&aufbau, &aufbau.b).await;
    let _quelle = aufbau
        .engine
        .verbindung("a")
        .unwrap()
        .track_veroeffentlichen("a-audio")
        .await;
    letzter_report(&aufbau.orch, &aufbau.a).await;

    let health = aufbau.orch.health();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.active_connections, 2);
    assert_eq!(health.active_rooms, 1);
    assert_eq!(health.active_sessions, 2);

    let verbindungen = aufbau.orch.connections_status();
    assert_eq!(verbindungen.total_connections, 2);

    let info = aufbau.orch.connection_info(&aufbau.b).unwrap();
    assert_eq!(info.connection_state, ConnectionState::Connected);
    assert!(aufbau.orch.connection_info(&PeerId::new("x")).is_none());

    let status = aufbau.orch.streaming_status(Some(&RoomId::new("r1")));
    assert_eq!(status.total_connections, 2);
    assert_eq!(status.total_audio_tracks, 1);
    assert_eq!(status.active_rooms, 1);
    let stats = &status.audio_statistics[&aufbau.a];
    assert!(stats.track_active);
    assert_eq!(stats.track_id, "a-audio");
    assert!(!stats.local_playback);
    let raum = status.room_info.unwrap();
    assert_eq!(raum.total_peers, 2);
    assert_eq!(raum.peers_with_audio, vec![aufbau.a.clone()]);
    assert_eq!(raum.peers_with_connections.len(), 2);

    let json = serde_json::to_value(aufbau.orch.streaming_status(None)).unwrap();
    assert_eq!(json["audio_statistics"]["a"]["track_type"], "audio");
    assert!(json["room_info"].is_null());
}

#[tokio::test]
async fn lokale_wiedergabe_ueber_stummen_host() {
    let mut config = RoomcastConfig::default();
    config.audio.local_playback = true;
    config.audio.warmup_ms = 20;
    let engine = FakeEngine::new(Skript::default());
    let host = Arc::new(StummerHost::default());
    let orch = SessionOrchestrator::with_audio(config, engine.clone(), host.clone());
    let a = PeerId::new("a");

    orch.handle_text(&a, &offer_json("r1")).await;
    let _quelle = engine
        .verbindung("a")
        .unwrap()
        .track_veroeffentlichen("a-audio")
        .await;

    assert!(warten_bis(|| orch.peer_stats(&a).is_some_and(|s| s.local_playback)).await);
    let player = orch.player().unwrap();
    let status = player.status(&a);
    assert!(status.has_track);
    assert!(status.is_playing);
    assert_eq!(host.geoeffnet.load(std::sync::atomic::Ordering::SeqCst), 1);

    orch.remove_peer(&a).await;
    assert!(!player.status(&a).has_track);
}

#[tokio::test]
async fn ohne_lokale_wiedergabe_kein_player() {
    let engine = FakeEngine::new(Skript::default());
    let orch = SessionOrchestrator::with_audio(
        RoomcastConfig::default(),
        engine,
        Arc::new(StummerHost::default()),
    );
    assert!(orch.player().is_none());
}
