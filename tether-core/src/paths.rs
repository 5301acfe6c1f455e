//! Store path layout, following the original rendezvous schema:
//! `rooms/{room}` holds the participant list, `rooms/{room}/connections`
//! holds one document per negotiated pair, and each connection document
//! carries one candidate sub-collection per originating participant.

use crate::model::{ConnectionId, ParticipantId, RoomId};

pub fn room_doc(room: &RoomId) -> String {
    format!("rooms/{room}")
}

pub fn connections(room: &RoomId) -> String {
    format!("rooms/{room}/connections")
}

pub fn connection_doc(room: &RoomId, conn: &ConnectionId) -> String {
    format!("rooms/{room}/connections/{conn}")
}

pub fn candidates(room: &RoomId, conn: &ConnectionId, origin: &ParticipantId) -> String {
    format!("rooms/{room}/connections/{conn}/{origin}")
}
