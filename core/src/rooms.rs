//! Named peer groups for multicast.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::frame::PeerId;

/// Room membership table, owned by the multicasting endpoint. Membership
/// has set semantics: a peer appears at most once per room.
pub struct RoomRegistry {
    rooms: DashMap<String, HashSet<PeerId>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Adds `peer` to the room, creating the room on first use.
    pub fn join(&self, peer: PeerId, room: &str) {
        self.rooms.entry(room.to_string()).or_default().insert(peer);
    }

    /// Removes `peer` from the room if present. An emptied room is deleted
    /// rather than retained as a placeholder.
    pub fn leave(&self, peer: &PeerId, room: &str) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(peer);
            let empty = members.is_empty();
            drop(members);
            if empty {
                self.rooms.remove_if(room, |_, m| m.is_empty());
            }
        }
    }

    /// Membership snapshot, or `None` when the room does not exist.
    pub fn members(&self, room: &str) -> Option<Vec<PeerId>> {
        self.rooms
            .get(room)
            .map(|m| m.iter().cloned().collect())
    }

    pub fn contains(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
