use crate::integration::init_tracing;
use crate::utils::mock_transport::{MockFactory, MockHub};
use anyhow::Result;
use std::sync::Arc;
use tether_core::{ConnectionDoc, ConnectionId, ParticipantId, RoomId, paths};
use tether_session::negotiation::NegotiationCoordinator;
use tether_session::{MemoryStore, NegotiationState, SignalingStore, TransportFactory};
use tokio::sync::mpsc;

/// Both sides offer on the same document at once. The protocol settles
/// deterministically: the smaller participant id's offer wins, the other
/// side abandons its own offer and answers.
#[tokio::test]
async fn competing_offers_settle_on_smaller_id() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let hub = MockHub::new();
    let factory = MockFactory::new(hub.clone());

    let mut ids = [ParticipantId::new(), ParticipantId::new()];
    ids.sort();
    let [small, large] = ids;

    let room = RoomId::from("glare");
    let conn = ConnectionId::from("shared");
    let doc_path = paths::connection_doc(&room, &conn);

    let (small_tx, _small_rx) = mpsc::channel(64);
    let small_transport = factory.create(small, large, true, small_tx).await?;
    let (large_tx, mut large_rx) = mpsc::channel(64);
    let large_transport = factory.create(large, small, true, large_tx).await?;

    let (small_ev, _small_events) = mpsc::unbounded_channel();
    let mut winner = NegotiationCoordinator::new(
        small,
        large,
        &room,
        conn.clone(),
        store.clone(),
        small_transport,
        small_ev,
    );
    let (large_ev, _large_events) = mpsc::unbounded_channel();
    let mut loser = NegotiationCoordinator::new(
        large,
        small,
        &room,
        conn.clone(),
        store.clone(),
        large_transport,
        large_ev,
    );

    // Race: both publish an offer, the second write lands on top.
    winner.send_offer().await?;
    let winning_write = store.get(&doc_path).await?.unwrap();
    loser.send_offer().await?;
    let losing_write = store.get(&doc_path).await?.unwrap();

    // Each side now observes the other's write.
    winner.handle_doc(losing_write).await?;
    assert_eq!(
        winner.state(),
        NegotiationState::OfferSent,
        "winner keeps its offer in flight"
    );

    loser.handle_doc(winning_write).await?;
    assert_eq!(
        loser.state(),
        NegotiationState::AnswerPending,
        "loser abandons its offer and answers"
    );

    // The answering write restored the winning offer alongside the answer.
    let settled = store.get(&doc_path).await?.unwrap();
    let doc: ConnectionDoc = serde_json::from_value(settled.clone())?;
    assert_eq!(doc.from, small);
    assert_eq!(doc.to, large);
    assert!(doc.offer.is_some());
    assert!(doc.answer.is_some());

    winner.handle_doc(settled).await?;
    assert_eq!(winner.state(), NegotiationState::Connected);

    while let Ok(event) = large_rx.try_recv() {
        loser.handle_transport(event).await?;
    }
    assert_eq!(loser.state(), NegotiationState::Connected);
    Ok(())
}

/// The glare winner must not react to the losing offer even if it shows
/// up again later with an older timestamp.
#[tokio::test]
async fn winner_ignores_replayed_losing_offer() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let hub = MockHub::new();
    let factory = MockFactory::new(hub.clone());

    let mut ids = [ParticipantId::new(), ParticipantId::new()];
    ids.sort();
    let [small, large] = ids;

    let room = RoomId::from("glare-replay");
    let conn = ConnectionId::from("shared");

    let (tx, _rx) = mpsc::channel(64);
    let transport = factory.create(small, large, true, tx).await?;
    let (ev, _events) = mpsc::unbounded_channel();
    let mut winner =
        NegotiationCoordinator::new(small, large, &room, conn, store.clone(), transport, ev);

    winner.send_offer().await?;

    let losing = serde_json::json!({
        "from": large,
        "to": small,
        "offer": {"type": "offer", "sdp": "v=mock\no=replayed"},
        "offerTime": 1,
        "answer": null,
    });
    winner.handle_doc(losing.clone()).await?;
    winner.handle_doc(losing).await?;
    assert_eq!(winner.state(), NegotiationState::OfferSent);
    Ok(())
}
