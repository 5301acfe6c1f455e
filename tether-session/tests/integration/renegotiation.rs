use crate::integration::init_tracing;
use crate::utils::harness::{EventLog, wait_until};
use crate::utils::mock_transport::{MockFactory, MockHub};
use anyhow::Result;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tether_core::{ConnectionDoc, ConnectionId, MediaTrack, RoomId, TrackKind, paths};
use tether_session::{
    FieldWrite, Fields, MemoryStore, NegotiationState, Session, SignalingStore,
};
use tokio::time::sleep;

#[tokio::test]
async fn adding_a_track_runs_a_new_round() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let hub = MockHub::new();
    let room = RoomId::from("upgrade");

    let (alice, alice_rx) = Session::spawn(
        room.clone(),
        store.clone(),
        Arc::new(MockFactory::new(hub.clone())),
    );
    let (bob, bob_rx) = Session::spawn(
        room.clone(),
        store.clone(),
        Arc::new(MockFactory::new(hub.clone())),
    );
    let alice_log = EventLog::pump(alice_rx);
    let bob_log = EventLog::pump(bob_rx);

    alice.create_room().await?;
    bob.join_room().await?;
    let alice_id = alice.participant_id().await?;
    let bob_id = bob.participant_id().await?;

    wait_until(
        || alice_log.connected(bob_id) && bob_log.connected(alice_id),
        "both sides connected",
    )
    .await;

    let records = store.list(&paths::connections(&room)).await?;
    let first: ConnectionDoc = serde_json::from_value(records[0].1.clone())?;
    let first_time = first.offer_time.unwrap();

    alice
        .add_track(MediaTrack::new("cam", TrackKind::Video))
        .await?;

    wait_until(
        || {
            bob_log
                .tracks_from(alice_id)
                .iter()
                .any(|track| track.id == "cam" && track.kind == TrackKind::Video)
        },
        "bob saw the new track",
    )
    .await;
    wait_until(
        || {
            let states = alice_log.states(bob_id);
            states.contains(&NegotiationState::Renegotiating)
                && states.last() == Some(&NegotiationState::Connected)
        },
        "alice renegotiated back to connected",
    )
    .await;

    // The document now carries alice's newer round, fully answered.
    let records = store.list(&paths::connections(&room)).await?;
    assert_eq!(records.len(), 1);
    let doc: ConnectionDoc = serde_json::from_value(records[0].1.clone())?;
    assert_eq!(doc.from, alice_id);
    assert_eq!(doc.to, bob_id);
    assert!(doc.offer_time.unwrap() > first_time);
    assert!(doc.answer.is_some());
    assert!(doc.offer.unwrap().sdp.contains("track:cam:video"));
    Ok(())
}

#[tokio::test]
async fn offer_not_newer_than_last_applied_is_ignored() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let hub = MockHub::new();
    let room = RoomId::from("stale");

    let (alice, alice_rx) = Session::spawn(
        room.clone(),
        store.clone(),
        Arc::new(MockFactory::new(hub.clone())),
    );
    let (bob, bob_rx) = Session::spawn(
        room.clone(),
        store.clone(),
        Arc::new(MockFactory::new(hub.clone())),
    );
    let alice_log = EventLog::pump(alice_rx);
    let bob_log = EventLog::pump(bob_rx);

    alice.create_room().await?;
    bob.join_room().await?;
    let alice_id = alice.participant_id().await?;
    let bob_id = bob.participant_id().await?;

    wait_until(
        || alice_log.connected(bob_id) && bob_log.connected(alice_id),
        "both sides connected",
    )
    .await;

    // Replay an offer from bob with an ancient timestamp. Alice already
    // applied bob's real offer, so she must not answer this one.
    let records = store.list(&paths::connections(&room)).await?;
    let conn = ConnectionId::from(records[0].0.as_str());
    let doc_path = paths::connection_doc(&room, &conn);

    let mut fields = Fields::new();
    fields.insert("from".to_owned(), FieldWrite::Value(serde_json::to_value(bob_id)?));
    fields.insert("to".to_owned(), FieldWrite::Value(serde_json::to_value(alice_id)?));
    fields.insert(
        "offer".to_owned(),
        FieldWrite::Value(json!({"type": "offer", "sdp": "v=mock\no=stale"})),
    );
    fields.insert("offerTime".to_owned(), FieldWrite::Value(json!(1)));
    fields.insert("answer".to_owned(), FieldWrite::Value(Value::Null));
    store.update(&doc_path, fields).await?;

    sleep(Duration::from_millis(200)).await;
    let doc: ConnectionDoc =
        serde_json::from_value(store.get(&doc_path).await?.unwrap())?;
    assert!(doc.answer.is_none(), "stale offer must stay unanswered");
    assert!(alice_log.connected(bob_id));
    assert!(bob_log.connected(alice_id));
    Ok(())
}
