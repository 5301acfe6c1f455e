use crate::integration::init_tracing;
use crate::utils::failing_store::FailingStore;
use crate::utils::harness::{EventLog, wait_until};
use crate::utils::mock_transport::{MockFactory, MockHub};
use anyhow::Result;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{ConnectionDoc, ParticipantId, RoomDoc, RoomId, paths};
use tether_session::{MemoryStore, Session, SessionError, SignalingStore};
use tokio::time::sleep;

#[tokio::test]
async fn joiner_and_creator_negotiate_one_connection() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let hub = MockHub::new();
    let room = RoomId::from("pairwise");

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
    let (alice_id, bob_id) =
        futures::future::try_join(alice.participant_id(), bob.participant_id()).await?;

    wait_until(
        || alice_log.connected(bob_id) && bob_log.connected(alice_id),
        "both sides connected",
    )
    .await;

    // One shared connection document, fully negotiated, bob as author.
    let records = store.list(&paths::connections(&room)).await?;
    assert_eq!(records.len(), 1);
    let doc: ConnectionDoc = serde_json::from_value(records[0].1.clone())?;
    assert_eq!(doc.from, bob_id);
    assert_eq!(doc.to, alice_id);
    assert!(doc.offer.is_some());
    assert!(doc.answer.is_some());
    assert!(doc.offer_time.is_some());

    let room_doc: RoomDoc =
        serde_json::from_value(store.get(&paths::room_doc(&room)).await?.unwrap())?;
    assert_eq!(room_doc.participants, vec![alice_id, bob_id]);
    Ok(())
}

#[tokio::test]
async fn candidates_trickle_both_ways() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let hub = MockHub::new();
    let room = RoomId::from("trickle");

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
    wait_until(
        || {
            hub.candidates_applied(alice_id, bob_id) >= 1
                && hub.candidates_applied(bob_id, alice_id) >= 1
        },
        "each side applied a remote candidate",
    )
    .await;
    Ok(())
}

#[tokio::test]
async fn messages_flow_over_the_channel() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let hub = MockHub::new();
    let room = RoomId::from("chat");

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
        || alice_log.channel_open(bob_id) && bob_log.channel_open(alice_id),
        "channels open",
    )
    .await;

    alice.send_message(Bytes::from_static(b"ping")).await?;
    wait_until(
        || bob_log.messages_from(alice_id) == vec![Bytes::from_static(b"ping")],
        "bob received ping",
    )
    .await;

    bob.send_message(Bytes::from_static(b"pong")).await?;
    wait_until(
        || alice_log.messages_from(bob_id) == vec![Bytes::from_static(b"pong")],
        "alice received pong",
    )
    .await;
    Ok(())
}

#[tokio::test]
async fn duplicate_candidate_payloads_are_harmless() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let hub = MockHub::new();
    let room = RoomId::from("dup-candidates");

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

    // Replayed payload under fresh record ids: applied again, never fatal.
    let records = store.list(&paths::connections(&room)).await?;
    let conn = tether_core::ConnectionId::from(records[0].0.as_str());
    let coll = paths::candidates(&room, &conn, &alice_id);
    let payload = serde_json::json!({
        "candidate": "candidate:dup 1 udp 1 192.0.2.9 9 typ host",
        "sdpMid": "0",
        "sdpMLineIndex": 0,
    });
    store.append(&coll, payload.clone()).await?;
    store.append(&coll, payload).await?;

    let before = hub.candidates_applied(bob_id, alice_id);
    wait_until(
        || hub.candidates_applied(bob_id, alice_id) >= before + 2,
        "bob applied the duplicated payloads",
    )
    .await;

    sleep(Duration::from_millis(100)).await;
    assert!(bob_log.connected(alice_id));
    alice.send_message(Bytes::from_static(b"still here")).await?;
    wait_until(
        || !bob_log.messages_from(alice_id).is_empty(),
        "channel still works",
    )
    .await;
    Ok(())
}

#[tokio::test]
async fn colliding_identity_is_regenerated_at_join() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let hub = MockHub::new();
    let room = RoomId::from("collision");

    // Seed both sessions with the same identity; the joiner must notice
    // the clash against the room document and pick a fresh one.
    let seed = ParticipantId::new();
    let (alice, alice_rx) = Session::spawn_with_id(
        seed,
        room.clone(),
        store.clone(),
        Arc::new(MockFactory::new(hub.clone())),
    );
    let (bob, bob_rx) = Session::spawn_with_id(
        seed,
        room.clone(),
        store.clone(),
        Arc::new(MockFactory::new(hub.clone())),
    );
    let alice_log = EventLog::pump(alice_rx);
    let bob_log = EventLog::pump(bob_rx);

    alice.create_room().await?;
    bob.join_room().await?;
    let bob_id = bob.participant_id().await?;
    assert_ne!(bob_id, seed);

    wait_until(
        || alice_log.connected(bob_id) && bob_log.connected(seed),
        "pair connected despite the seeded collision",
    )
    .await;

    let room_doc: RoomDoc =
        serde_json::from_value(store.get(&paths::room_doc(&room)).await?.unwrap())?;
    assert_eq!(room_doc.participants, vec![seed, bob_id]);
    Ok(())
}

#[tokio::test]
async fn failed_join_fan_out_leaves_no_trace() -> Result<()> {
    init_tracing();
    let store = Arc::new(FailingStore::new());
    let hub = MockHub::new();
    let room = RoomId::from("half-joined");

    let (alice, alice_rx) = Session::spawn(
        room.clone(),
        store.clone(),
        Arc::new(MockFactory::new(hub.clone())),
    );
    let (carol, carol_rx) = Session::spawn(
        room.clone(),
        store.clone(),
        Arc::new(MockFactory::new(hub.clone())),
    );
    let alice_log = EventLog::pump(alice_rx);
    let carol_log = EventLog::pump(carol_rx);

    alice.create_room().await?;
    carol.join_room().await?;
    let alice_id = alice.participant_id().await?;
    let carol_id = carol.participant_id().await?;
    wait_until(
        || alice_log.connected(carol_id) && carol_log.connected(alice_id),
        "alice and carol connected",
    )
    .await;
    let baseline = store.list(&paths::connections(&room)).await?.len();

    // Bob's fan-out publishes one offer per present participant; the
    // second write is rejected mid-join.
    store.arm_set_merge(1);
    let (bob, bob_rx) = Session::spawn(
        room.clone(),
        store.clone(),
        Arc::new(MockFactory::new(hub.clone())),
    );
    let bob_log = EventLog::pump(bob_rx);
    assert!(matches!(
        bob.join_room().await,
        Err(SessionError::Store(_))
    ));
    let bob_id = bob.participant_id().await?;

    // The aborted join erased the connection it had already published
    // and never announced membership.
    let records = store.list(&paths::connections(&room)).await?;
    assert_eq!(records.len(), baseline);
    for (_, value) in records {
        let doc: ConnectionDoc = serde_json::from_value(value)?;
        assert_ne!(doc.from, bob_id);
        assert_ne!(doc.to, bob_id);
    }
    let room_doc: RoomDoc =
        serde_json::from_value(store.get(&paths::room_doc(&room)).await?.unwrap())?;
    assert_eq!(room_doc.participants, vec![alice_id, carol_id]);

    // No connection kept negotiating behind the error.
    sleep(Duration::from_millis(200)).await;
    assert!(!bob_log.connected(alice_id));
    assert!(!bob_log.connected(carol_id));

    // The session never attached, so leaving has nothing to undo.
    bob.hang_up().await?;
    assert_eq!(store.list(&paths::connections(&room)).await?.len(), baseline);
    Ok(())
}

#[tokio::test]
async fn session_guards_room_lifecycle() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let hub = MockHub::new();
    let room = RoomId::from("guards");

    let (session, _rx) = Session::spawn(
        room.clone(),
        store.clone(),
        Arc::new(MockFactory::new(hub.clone())),
    );

    assert!(matches!(
        session.join_room().await,
        Err(SessionError::RoomNotFound)
    ));
    assert!(matches!(
        session.send_message(Bytes::from_static(b"x")).await,
        Err(SessionError::NotActive)
    ));

    session.create_room().await?;
    assert!(matches!(
        session.create_room().await,
        Err(SessionError::AlreadyActive)
    ));
    Ok(())
}
