//! Room membership state machine.
//!
//! [`RoomBook`] owns the connection registry and the capacity-2 rooms. Each
//! inbound event is applied through [`RoomBook::apply`] (or the matching
//! lifecycle method) and produces the list of [`Delivery`] values the caller
//! must push to peers. The book itself performs no I/O.
//!
//! Rooms are ephemeral: created on first join, dropped when the last member
//! leaves, and lost on relay restart.

use std::collections::HashMap;
use std::fmt;

use pairlink_proto::room::RoomKey;
use pairlink_proto::signal::{ClientEvent, ServerEvent};
use uuid::Uuid;

/// Maximum number of members a room can hold.
pub const ROOM_CAPACITY: usize = 2;

/// Opaque identifier assigned to a connection when it opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generates a fresh, time-ordered connection identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An outbound event addressed to one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Connection that must receive the event.
    pub to: ConnectionId,
    /// The event itself.
    pub event: ServerEvent,
}

impl Delivery {
    const fn new(to: ConnectionId, event: ServerEvent) -> Self {
        Self { to, event }
    }
}

/// Registry of live connections and the rooms they occupy.
///
/// Every connection is in at most one room. Room members are kept in arrival
/// order; the first is the creator, the second the offerer.
#[derive(Debug, Default)]
pub struct RoomBook {
    /// Room key to members in arrival order. Never holds an empty room.
    rooms: HashMap<RoomKey, Vec<ConnectionId>>,
    /// Live connections and their current room, if any.
    assignments: HashMap<ConnectionId, Option<RoomKey>>,
}

impl RoomBook {
    /// Creates an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly opened connection with no room.
    ///
    /// Registering an already known connection leaves its room untouched.
    pub fn connect(&mut self, conn: ConnectionId) {
        self.assignments.entry(conn).or_insert(None);
    }

    /// Applies one inbound event from `conn`.
    pub fn apply(&mut self, conn: ConnectionId, event: ClientEvent) -> Vec<Delivery> {
        let Ok(key) = RoomKey::parse(event.room_key()) else {
            tracing::debug!(conn = %conn, event = event.name(), "ignoring event with empty room key");
            return Vec::new();
        };

        match event {
            ClientEvent::Join(_) => self.join(conn, &key),
            ClientEvent::Leave(_) => self.leave(conn, &key),
            ClientEvent::Offer(desc) => self.forward(conn, &key, ServerEvent::Offer(desc.sdp)),
            ClientEvent::Answer(desc) => self.forward(conn, &key, ServerEvent::Answer(desc.sdp)),
            ClientEvent::Candidate(cand) => {
                self.forward(conn, &key, ServerEvent::Candidate(cand.candidate))
            }
        }
    }

    /// Adds `conn` to the room named `key`, creating it if needed.
    ///
    /// The first member receives `created`. The second receives `createOffer`
    /// and the first is told `peer-joined`. Anyone beyond that gets
    /// `room-full` and is not added.
    ///
    /// Unknown connections, repeated joins of the same room and joins while
    /// already in another room are ignored.
    pub fn join(&mut self, conn: ConnectionId, key: &RoomKey) -> Vec<Delivery> {
        let Some(current) = self.assignments.get(&conn) else {
            tracing::debug!(conn = %conn, room = %key, "join from unknown connection ignored");
            return Vec::new();
        };
        if let Some(current) = current {
            tracing::debug!(
                conn = %conn,
                room = %key,
                current = %current,
                "join ignored, connection already in a room"
            );
            return Vec::new();
        }

        let members = self.rooms.entry(key.clone()).or_default();
        if members.len() >= ROOM_CAPACITY {
            tracing::info!(conn = %conn, room = %key, "room full, join rejected");
            return vec![Delivery::new(conn, ServerEvent::RoomFull)];
        }

        members.push(conn);
        let deliveries = if members.len() == 1 {
            tracing::info!(conn = %conn, room = %key, "room created");
            vec![Delivery::new(conn, ServerEvent::Created)]
        } else {
            tracing::info!(conn = %conn, room = %key, "second peer joined");
            let mut out = vec![Delivery::new(conn, ServerEvent::CreateOffer)];
            out.extend(
                members
                    .iter()
                    .filter(|&&m| m != conn)
                    .map(|&m| Delivery::new(m, ServerEvent::PeerJoined)),
            );
            out
        };

        self.assignments.insert(conn, Some(key.clone()));
        deliveries
    }

    /// Removes `conn` from the room named `key` and tells the remaining
    /// members `peer-left`.
    ///
    /// Leaving a room the connection is not in does nothing.
    pub fn leave(&mut self, conn: ConnectionId, key: &RoomKey) -> Vec<Delivery> {
        let Some(notices) = self.remove_member(conn, key) else {
            return Vec::new();
        };
        if let Some(slot) = self.assignments.get_mut(&conn)
            && slot.as_ref() == Some(key)
        {
            *slot = None;
        }
        notices
    }

    /// Forwards a relayed event from `conn` to every member of `key` other
    /// than `conn` itself. The sender does not have to be a member.
    pub fn forward(&self, conn: ConnectionId, key: &RoomKey, event: ServerEvent) -> Vec<Delivery> {
        let Some(members) = self.rooms.get(key) else {
            tracing::debug!(conn = %conn, room = %key, event = event.name(), "relay to missing room dropped");
            return Vec::new();
        };
        let targets: Vec<ConnectionId> = members.iter().copied().filter(|&m| m != conn).collect();
        if targets.is_empty() {
            tracing::debug!(conn = %conn, room = %key, event = event.name(), "no peer to relay to");
        }
        targets
            .into_iter()
            .map(|to| Delivery::new(to, event.clone()))
            .collect()
    }

    /// Drops `conn` from the registry, leaving its room first.
    ///
    /// Safe to call for connections that never joined a room or were already
    /// disconnected.
    pub fn disconnect(&mut self, conn: ConnectionId) -> Vec<Delivery> {
        let Some(assigned) = self.assignments.remove(&conn) else {
            return Vec::new();
        };
        let Some(key) = assigned else {
            return Vec::new();
        };
        tracing::info!(conn = %conn, room = %key, "connection left room on disconnect");
        self.remove_member(conn, &key).into_iter().flatten().collect()
    }

    /// Returns the members of a room in arrival order.
    #[must_use]
    pub fn members(&self, key: &RoomKey) -> &[ConnectionId] {
        self.rooms.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns the room a connection is currently in.
    #[must_use]
    pub fn room_of(&self, conn: ConnectionId) -> Option<&RoomKey> {
        self.assignments.get(&conn).and_then(Option::as_ref)
    }

    /// Whether the connection is registered.
    #[must_use]
    pub fn is_connected(&self, conn: ConnectionId) -> bool {
        self.assignments.contains_key(&conn)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.assignments.len()
    }

    /// Number of non-empty rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Removes `conn` from `key`'s member list.
    ///
    /// Returns `None` if it was not a member, otherwise the `peer-left`
    /// notifications for the members that remain. Empty rooms are dropped.
    fn remove_member(&mut self, conn: ConnectionId, key: &RoomKey) -> Option<Vec<Delivery>> {
        let members = self.rooms.get_mut(key)?;
        let pos = members.iter().position(|&m| m == conn)?;
        members.remove(pos);

        tracing::info!(conn = %conn, room = %key, remaining = members.len(), "peer left room");
        let notices = members
            .iter()
            .map(|&m| Delivery::new(m, ServerEvent::PeerLeft))
            .collect();
        if members.is_empty() {
            self.rooms.remove(key);
        }
        Some(notices)
    }
}
