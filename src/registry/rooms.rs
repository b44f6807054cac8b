//! Room registry - CRUD bookkeeping for match rooms

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::util::time::unix_millis;

/// Room lifecycle status. Transitions only move forward; `reset` creates a
/// fresh Waiting record for reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Waiting,
    Playing,
    Ended,
}

/// Room metadata (owned by the registry)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRecord {
    pub room_id: Uuid,
    pub name: String,
    pub creator_id: Uuid,
    pub status: RoomStatus,
    pub max_players: u32,
    pub member_ids: Vec<Uuid>,
    pub created_at: i64,
    pub game_start_time: Option<i64>,
    pub game_end_time: Option<i64>,
}

impl RoomRecord {
    pub fn current_players(&self) -> u32 {
        self.member_ids.len() as u32
    }

    /// A room accepts members while waiting, and re-entry while playing
    /// (a dropped player coming back); only an ended room refuses.
    pub fn can_join(&self) -> bool {
        self.status != RoomStatus::Ended && self.current_players() < self.max_players
    }
}

/// Registry of all rooms
pub struct RoomRegistry {
    rooms: DashMap<Uuid, RoomRecord>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Create a room with the creator as its first member
    pub fn create(&self, name: &str, creator_id: Uuid, max_players: u32) -> RoomRecord {
        let room = RoomRecord {
            room_id: Uuid::new_v4(),
            name: name.to_string(),
            creator_id,
            status: RoomStatus::Waiting,
            max_players: max_players.clamp(1, 16),
            member_ids: vec![creator_id],
            created_at: unix_millis(),
            game_start_time: None,
            game_end_time: None,
        };

        self.rooms.insert(room.room_id, room.clone());
        info!(room_id = %room.room_id, name = %name, creator_id = %creator_id, "Room created");
        room
    }

    /// Join a room. Returns false on ordinary races: room missing, full,
    /// or the user already present.
    pub fn join(&self, room_id: Uuid, user_id: Uuid) -> bool {
        let Some(mut room) = self.rooms.get_mut(&room_id) else {
            warn!(room_id = %room_id, user_id = %user_id, "Join failed: room missing");
            return false;
        };

        if !room.can_join() {
            warn!(room_id = %room_id, user_id = %user_id, "Join failed: room full or ended");
            return false;
        }
        if room.member_ids.contains(&user_id) {
            warn!(room_id = %room_id, user_id = %user_id, "Join failed: already a member");
            return false;
        }

        room.member_ids.push(user_id);
        info!(room_id = %room_id, user_id = %user_id, players = room.current_players(), "User joined room");
        true
    }

    /// Leave a room. Deletes the room once it empties.
    pub fn leave(&self, room_id: Uuid, user_id: Uuid) -> bool {
        let emptied = {
            let Some(mut room) = self.rooms.get_mut(&room_id) else {
                return false;
            };
            let before = room.member_ids.len();
            room.member_ids.retain(|id| *id != user_id);
            if room.member_ids.len() == before {
                return false;
            }
            info!(room_id = %room_id, user_id = %user_id, "User left room");
            room.member_ids.is_empty()
        };

        if emptied {
            self.rooms.remove(&room_id);
            info!(room_id = %room_id, "Room deleted (empty)");
        }
        true
    }

    pub fn get(&self, room_id: Uuid) -> Option<RoomRecord> {
        self.rooms.get(&room_id).map(|r| r.value().clone())
    }

    /// List rooms that have not ended
    pub fn list(&self) -> Vec<RoomRecord> {
        self.rooms
            .iter()
            .filter(|r| r.status != RoomStatus::Ended)
            .map(|r| r.value().clone())
            .collect()
    }

    /// Forward-only status transition. Stamps start/end times.
    pub fn set_status(&self, room_id: Uuid, status: RoomStatus) -> bool {
        let Some(mut room) = self.rooms.get_mut(&room_id) else {
            return false;
        };

        let allowed = matches!(
            (room.status, status),
            (RoomStatus::Waiting, RoomStatus::Playing)
                | (RoomStatus::Waiting, RoomStatus::Ended)
                | (RoomStatus::Playing, RoomStatus::Ended)
        );
        if !allowed {
            warn!(room_id = %room_id, from = ?room.status, to = ?status, "Rejected backward status transition");
            return false;
        }

        match status {
            RoomStatus::Playing => room.game_start_time = Some(unix_millis()),
            RoomStatus::Ended => room.game_end_time = Some(unix_millis()),
            RoomStatus::Waiting => {}
        }
        room.status = status;
        info!(room_id = %room_id, status = ?status, "Room status changed");
        true
    }

    /// Replace an ended room with a fresh Waiting record keeping id, name
    /// and membership.
    pub fn reset(&self, room_id: Uuid) -> bool {
        let Some(mut room) = self.rooms.get_mut(&room_id) else {
            return false;
        };
        room.status = RoomStatus::Waiting;
        room.game_start_time = None;
        room.game_end_time = None;
        info!(room_id = %room_id, "Room reset to waiting");
        true
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_fails_when_full() {
        let registry = RoomRegistry::new();
        let room = registry.create("r", Uuid::new_v4(), 2);
        assert!(registry.join(room.room_id, Uuid::new_v4()));
        assert!(!registry.join(room.room_id, Uuid::new_v4()));
    }

    #[test]
    fn join_allowed_while_playing_but_not_after_end() {
        let registry = RoomRegistry::new();
        let room = registry.create("r", Uuid::new_v4(), 4);
        registry.set_status(room.room_id, RoomStatus::Playing);
        assert!(registry.join(room.room_id, Uuid::new_v4()));

        registry.set_status(room.room_id, RoomStatus::Ended);
        assert!(!registry.join(room.room_id, Uuid::new_v4()));
    }

    #[test]
    fn join_fails_for_duplicate_member() {
        let registry = RoomRegistry::new();
        let creator = Uuid::new_v4();
        let room = registry.create("r", creator, 4);
        assert!(!registry.join(room.room_id, creator));
    }

    #[test]
    fn leaving_last_member_deletes_room() {
        let registry = RoomRegistry::new();
        let creator = Uuid::new_v4();
        let room = registry.create("r", creator, 4);
        assert!(registry.leave(room.room_id, creator));
        assert!(registry.get(room.room_id).is_none());
    }

    #[test]
    fn status_never_moves_backward() {
        let registry = RoomRegistry::new();
        let room = registry.create("r", Uuid::new_v4(), 4);
        assert!(registry.set_status(room.room_id, RoomStatus::Playing));
        assert!(!registry.set_status(room.room_id, RoomStatus::Waiting));
        assert!(registry.set_status(room.room_id, RoomStatus::Ended));
        assert!(!registry.set_status(room.room_id, RoomStatus::Playing));
    }

    #[test]
    fn reset_returns_room_to_waiting() {
        let registry = RoomRegistry::new();
        let room = registry.create("r", Uuid::new_v4(), 4);
        registry.set_status(room.room_id, RoomStatus::Playing);
        registry.set_status(room.room_id, RoomStatus::Ended);
        assert!(registry.reset(room.room_id));
        let fresh = registry.get(room.room_id).unwrap();
        assert_eq!(fresh.status, RoomStatus::Waiting);
        assert!(fresh.game_start_time.is_none());
    }
}
