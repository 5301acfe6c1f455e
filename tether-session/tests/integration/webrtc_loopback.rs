use crate::integration::init_tracing;
use crate::utils::harness::{EventLog, wait_until};
use anyhow::Result;
use bytes::Bytes;
use std::sync::Arc;
use tether_core::RoomId;
use tether_session::{MemoryStore, Session, WebRtcFactory, WebRtcTransportConfig};

/// End to end over real peer connections: two sessions rendezvous through
/// the in-process store and exchange data channel messages over loopback.
#[tokio::test(flavor = "multi_thread")]
async fn loopback_peers_connect_and_exchange_messages() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let factory = Arc::new(WebRtcFactory::new(WebRtcTransportConfig::local()));
    let room = RoomId::from("loopback");

    let (alice, alice_rx) = Session::spawn(room.clone(), store.clone(), factory.clone());
    let (bob, bob_rx) = Session::spawn(room.clone(), store.clone(), factory);
    let alice_log = EventLog::pump(alice_rx);
    let bob_log = EventLog::pump(bob_rx);

    alice.create_room().await?;
    bob.join_room().await?;
    let alice_id = alice.participant_id().await?;
    let bob_id = bob.participant_id().await?;

    wait_until(
        || alice_log.channel_open(bob_id) && bob_log.channel_open(alice_id),
        "data channels open on both sides",
    )
    .await;

    bob.send_message(Bytes::from_static(b"over the wire")).await?;
    wait_until(
        || alice_log.messages_from(bob_id) == vec![Bytes::from_static(b"over the wire")],
        "alice received the payload",
    )
    .await;

    alice.send_message(Bytes::from_static(b"ack")).await?;
    wait_until(
        || bob_log.messages_from(alice_id) == vec![Bytes::from_static(b"ack")],
        "bob received the reply",
    )
    .await;

    bob.hang_up().await?;
    alice.hang_up().await?;
    Ok(())
}
