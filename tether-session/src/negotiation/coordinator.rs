use crate::negotiation::state::{NegotiationState, offer_wins};
use crate::relay::CandidateRelay;
use crate::session::{SessionError, SessionEvent};
use crate::store::{FieldWrite, Fields, SignalingStore, StoreError, WatchEvent, WatchHandle, value_field};
use crate::transport::{PeerTransport, TransportError, TransportEvent, TransportState};
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use tether_core::{
    ConnectionDoc, ConnectionId, MediaTrack, ParticipantId, RoomId, SessionDescription, Timestamp,
    paths,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Drives the offer/answer state machine for one pairwise connection.
///
/// All input arrives through the owning session loop: store watch events
/// via [`handle_doc`](Self::handle_doc) and
/// [`handle_candidate`](Self::handle_candidate), transport callbacks via
/// [`handle_transport`](Self::handle_transport). The coordinator never
/// holds a lock across an await; the loop serializes everything.
pub struct NegotiationCoordinator {
    local: ParticipantId,
    peer: ParticipantId,
    conn_id: ConnectionId,
    doc_path: String,
    store: Arc<dyn SignalingStore>,
    transport: Arc<dyn PeerTransport>,
    relay: CandidateRelay,
    state: NegotiationState,
    last_sent_offer: Option<Timestamp>,
    last_applied_offer: Option<Timestamp>,
    pending_renegotiation: bool,
    doc_watch: Option<WatchHandle>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl NegotiationCoordinator {
    pub fn new(
        local: ParticipantId,
        peer: ParticipantId,
        room: &RoomId,
        conn_id: ConnectionId,
        store: Arc<dyn SignalingStore>,
        transport: Arc<dyn PeerTransport>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let doc_path = paths::connection_doc(room, &conn_id);
        let relay = CandidateRelay::new(
            store.clone(),
            transport.clone(),
            paths::candidates(room, &conn_id, &local),
            paths::candidates(room, &conn_id, &peer),
        );
        Self {
            local,
            peer,
            conn_id,
            doc_path,
            store,
            transport,
            relay,
            state: NegotiationState::Idle,
            last_sent_offer: None,
            last_applied_offer: None,
            pending_renegotiation: false,
            doc_watch: None,
            events,
        }
    }

    pub fn peer(&self) -> ParticipantId {
        self.peer
    }

    pub fn conn_id(&self) -> &ConnectionId {
        &self.conn_id
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Observe the connection document; `notify` must route back into the
    /// owning loop.
    pub fn watch_doc(
        &mut self,
        notify: impl Fn(WatchEvent) + Send + Sync + 'static,
    ) -> Result<(), StoreError> {
        let handle = self.store.watch_doc(&self.doc_path, Box::new(notify))?;
        self.doc_watch = Some(handle);
        Ok(())
    }

    /// Observe the peer's candidate sub-collection.
    pub fn watch_candidates(
        &mut self,
        notify: impl Fn(WatchEvent) + Send + Sync + 'static,
    ) -> Result<(), StoreError> {
        self.relay.subscribe(notify)
    }

    /// Publish a fresh offer and move to `OfferSent`.
    ///
    /// The write carries a null `answer` so a renegotiation offer clears
    /// any previous round's answer in the same atomic write.
    pub async fn send_offer(&mut self) -> Result<(), SessionError> {
        let prev = self.state;
        self.set_state(NegotiationState::Offering);
        match self.publish_offer().await {
            Ok(sent) => {
                self.last_sent_offer = Some(sent);
                self.set_state(NegotiationState::OfferSent);
                Ok(())
            }
            Err(error) => {
                warn!(peer = %self.peer, %error, "offer failed, reverting");
                self.set_state(prev);
                Err(error)
            }
        }
    }

    async fn publish_offer(&mut self) -> Result<Timestamp, SessionError> {
        let offer = self.transport.create_offer().await?;
        self.transport.set_local_description(offer.clone()).await?;
        // Strictly newer than anything this connection has seen, in
        // either direction, even inside one millisecond.
        let floor = self.last_sent_offer.max(self.last_applied_offer);
        let sent = Timestamp::monotonic_after(floor);

        let mut fields = Fields::new();
        fields.insert("from".to_owned(), value_field(self.local));
        fields.insert("to".to_owned(), value_field(self.peer));
        fields.insert("offer".to_owned(), value_field(&offer));
        fields.insert("offerTime".to_owned(), value_field(sent));
        fields.insert("answer".to_owned(), FieldWrite::Value(Value::Null));
        self.store.set_merge(&self.doc_path, fields).await?;

        info!(peer = %self.peer, conn = %self.conn_id, time = sent.0, "offer published");
        Ok(sent)
    }

    /// React to a connection document snapshot or change.
    pub async fn handle_doc(&mut self, doc: Value) -> Result<(), SessionError> {
        if self.state == NegotiationState::Closed {
            return Ok(());
        }
        let doc: ConnectionDoc = match serde_json::from_value(doc) {
            Ok(doc) => doc,
            Err(error) => {
                warn!(conn = %self.conn_id, %error, "malformed connection document ignored");
                return Ok(());
            }
        };

        if doc.from == self.local {
            self.handle_own_offer_answered(&doc).await
        } else if doc.from == self.peer {
            self.handle_remote_offer(&doc).await
        } else {
            warn!(conn = %self.conn_id, from = %doc.from, "document from unexpected author ignored");
            Ok(())
        }
    }

    /// The document still carries our offer; apply the answer once it
    /// appears, and only against the offer it responds to.
    async fn handle_own_offer_answered(&mut self, doc: &ConnectionDoc) -> Result<(), SessionError> {
        let Some(answer) = doc.answer.clone() else {
            return Ok(());
        };
        if self.state != NegotiationState::OfferSent {
            return Ok(());
        }
        if doc.offer_time != self.last_sent_offer {
            debug!(
                conn = %self.conn_id,
                doc_time = ?doc.offer_time,
                sent = ?self.last_sent_offer,
                "answer targets a superseded offer, ignoring"
            );
            return Ok(());
        }

        self.transport.set_remote_description(answer).await?;
        self.relay.mark_remote_ready().await;
        info!(peer = %self.peer, conn = %self.conn_id, "answer applied");
        self.set_state(NegotiationState::Connected);
        self.service_pending().await
    }

    /// The document carries the peer's offer.
    async fn handle_remote_offer(&mut self, doc: &ConnectionDoc) -> Result<(), SessionError> {
        let Some(offer) = doc.offer.clone() else {
            return Ok(());
        };
        let Some(offered) = doc.offer_time else {
            warn!(conn = %self.conn_id, "remote offer without a timestamp ignored");
            return Ok(());
        };
        if self
            .last_applied_offer
            .is_some_and(|applied| offered <= applied)
        {
            debug!(conn = %self.conn_id, time = offered.0, "stale offer ignored");
            return Ok(());
        }

        if self.state == NegotiationState::OfferSent
            || self.state == NegotiationState::Offering
        {
            // Both sides offered at once. The smaller id's offer wins;
            // each side decides from ids alone.
            if offer_wins(self.local, self.peer) {
                debug!(peer = %self.peer, "glare: local offer wins, ignoring remote offer");
                return Ok(());
            }
            info!(peer = %self.peer, "glare: remote offer wins, abandoning local offer");
            if let Err(error) = self.transport.rollback_local_description().await {
                warn!(peer = %self.peer, %error, "rollback unavailable, answering anyway");
            }
            self.last_sent_offer = None;
        }

        let prev = self.state;
        self.set_state(NegotiationState::Answering);
        match self.publish_answer(offer, offered).await {
            Ok(()) => {
                self.last_applied_offer = Some(offered);
                self.set_state(NegotiationState::AnswerPending);
                Ok(())
            }
            Err(error) => {
                warn!(peer = %self.peer, %error, "answer failed, reverting");
                self.set_state(prev);
                Err(error)
            }
        }
    }

    /// Apply the remote offer and publish the answer.
    ///
    /// The write echoes the offer fields it answers, so whichever of two
    /// racing writes lands last the document still holds one coherent
    /// offer/answer pair.
    async fn publish_answer(
        &mut self,
        offer: SessionDescription,
        offered: Timestamp,
    ) -> Result<(), SessionError> {
        self.transport.set_remote_description(offer.clone()).await?;
        self.relay.mark_remote_ready().await;

        let answer = self.transport.create_answer().await?;
        self.transport.set_local_description(answer.clone()).await?;

        let mut fields = Fields::new();
        fields.insert("from".to_owned(), value_field(self.peer));
        fields.insert("to".to_owned(), value_field(self.local));
        fields.insert("offer".to_owned(), value_field(&offer));
        fields.insert("offerTime".to_owned(), value_field(offered));
        fields.insert("answer".to_owned(), value_field(&answer));
        self.store.update(&self.doc_path, fields).await?;

        info!(peer = %self.peer, conn = %self.conn_id, time = offered.0, "answer published");
        Ok(())
    }

    /// React to a record event from the peer's candidate sub-collection.
    pub async fn handle_candidate(&mut self, event: WatchEvent) {
        let WatchEvent::Added { id, doc } = event else {
            return;
        };
        match serde_json::from_value(doc) {
            Ok(candidate) => self.relay.on_remote_record(&id, candidate).await,
            Err(error) => {
                warn!(conn = %self.conn_id, %id, %error, "malformed candidate record ignored");
            }
        }
    }

    /// React to an event from this connection's transport.
    pub async fn handle_transport(&mut self, event: TransportEvent) -> Result<(), SessionError> {
        if self.state == NegotiationState::Closed {
            return Ok(());
        }
        match event {
            TransportEvent::CandidateGenerated(_, doc) => {
                self.relay.publish_local(doc).await?;
            }
            TransportEvent::NegotiationNeeded(_) => match self.state {
                NegotiationState::Idle => self.send_offer().await?,
                NegotiationState::Connected => {
                    self.set_state(NegotiationState::Renegotiating);
                    self.send_offer().await?;
                }
                state => {
                    debug!(peer = %self.peer, %state, "negotiation request ignored mid-round");
                }
            },
            TransportEvent::TrackAdded(_, track) => {
                let _ = self.events.send(SessionEvent::TrackAdded {
                    peer: self.peer,
                    track,
                });
            }
            TransportEvent::ChannelOpen(_) => {
                let _ = self.events.send(SessionEvent::ChannelOpen { peer: self.peer });
            }
            TransportEvent::Message(_, data) => {
                let _ = self.events.send(SessionEvent::MessageReceived {
                    peer: self.peer,
                    data,
                });
            }
            TransportEvent::StateChanged(_, state) => {
                self.handle_transport_state(state).await?;
            }
        }
        Ok(())
    }

    async fn handle_transport_state(
        &mut self,
        state: TransportState,
    ) -> Result<(), SessionError> {
        match state {
            TransportState::Connected => {
                if self.state == NegotiationState::AnswerPending {
                    self.set_state(NegotiationState::Connected);
                    self.service_pending().await?;
                }
            }
            TransportState::Failed | TransportState::Disconnected => {
                warn!(peer = %self.peer, ?state, "transport lost");
                let _ = self
                    .events
                    .send(SessionEvent::TransportFailed { peer: self.peer });
            }
            _ => {}
        }
        Ok(())
    }

    /// Attach a local media track and renegotiate.
    pub async fn add_track(&mut self, track: MediaTrack) -> Result<(), SessionError> {
        self.transport.add_track(track).await?;
        self.note_local_change().await
    }

    /// A local change needs a new offer/answer round. Starts one now if
    /// the connection is settled, otherwise queues a single follow-up
    /// round for when the current one completes.
    pub async fn note_local_change(&mut self) -> Result<(), SessionError> {
        match self.state {
            NegotiationState::Idle => self.send_offer().await,
            NegotiationState::Connected => {
                self.set_state(NegotiationState::Renegotiating);
                self.send_offer().await
            }
            NegotiationState::Closed => Err(SessionError::Terminated),
            _ => {
                self.pending_renegotiation = true;
                Ok(())
            }
        }
    }

    async fn service_pending(&mut self) -> Result<(), SessionError> {
        if !self.pending_renegotiation {
            return Ok(());
        }
        self.pending_renegotiation = false;
        debug!(peer = %self.peer, "servicing queued renegotiation");
        self.set_state(NegotiationState::Renegotiating);
        self.send_offer().await
    }

    /// Send a payload over this connection's message channel.
    pub async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        self.transport.send(data).await
    }

    /// Tear down the connection. Idempotent; releases both watches before
    /// closing the transport so no event lands afterwards.
    pub async fn close(&mut self) {
        if self.state == NegotiationState::Closed {
            return;
        }
        self.relay.release();
        if let Some(watch) = self.doc_watch.take() {
            watch.unsubscribe();
        }
        if let Err(error) = self.transport.close().await {
            debug!(peer = %self.peer, %error, "transport close reported an error");
        }
        self.set_state(NegotiationState::Closed);
    }

    fn set_state(&mut self, next: NegotiationState) {
        if self.state == next {
            return;
        }
        debug!(peer = %self.peer, from = %self.state, to = %next, "negotiation state");
        self.state = next;
        let _ = self.events.send(SessionEvent::PeerState {
            peer: self.peer,
            state: next,
        });
    }
}
