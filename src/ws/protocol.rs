//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::registry::rooms::RoomRecord;

/// One player's input for one frame. Immutable once stored: the engine keeps
/// exactly one instance per (frame, player_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInput {
    pub player_id: i64,
    pub frame: i32,
    pub move_x: f32,
    pub move_y: f32,
    pub attack: bool,
    pub skill1: bool,
    pub skill2: bool,
    pub born_info: i32,
    pub timestamp: i64,
}

impl PlayerInput {
    /// Neutral input used when a player has no buffered input at all
    pub fn neutral(player_id: i64, frame: i32, timestamp: i64) -> Self {
        Self {
            player_id,
            frame,
            move_x: 0.0,
            move_y: 0.0,
            attack: false,
            skill1: false,
            skill2: false,
            born_info: 0,
            timestamp,
        }
    }

    /// Reuse this input's movement/action fields for a later frame
    pub fn restamped(&self, frame: i32, timestamp: i64) -> Self {
        Self {
            frame,
            timestamp,
            ..self.clone()
        }
    }
}

/// Input submission envelope: one input for one frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleInput {
    pub player_id: i64,
    pub frame_id: i32,
    pub input: PlayerInput,
}

/// Canonical input set for exactly one frame, keyed by player id.
/// Total over every player that has ever submitted input in the session.
pub type FrameInputSet = BTreeMap<i64, PlayerInput>;

/// Game configuration sent with the start notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    pub max_players: u32,
    pub min_players: u32,
    pub round_time_secs: u32,
    pub max_rounds: u32,
    pub allow_spectators: bool,
    pub game_modes: Vec<String>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            max_players: 4,
            min_players: 2,
            round_time_secs: 300,
            max_rounds: 3,
            allow_spectators: true,
            game_modes: vec!["quick_match".to_string()],
        }
    }
}

/// Room state sent with the start notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameRoomState {
    pub room_id: Uuid,
    pub current_round: u32,
    pub max_rounds: u32,
    pub round_start_time: i64,
    pub active_players: Vec<Uuid>,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Enter the quick-match queue
    JoinQueue {
        display_name: Option<String>,
    },

    /// Leave the quick-match queue
    LeaveQueue,

    /// Create a named room
    CreateRoom {
        name: String,
        max_players: u32,
    },

    /// Join an existing room
    JoinRoom {
        room_id: Uuid,
    },

    /// Leave the current room
    LeaveRoom,

    /// Request the current room list
    ListRooms,

    /// Player input for a frame
    Input(SingleInput),

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: i64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        user_id: Uuid,
        server_time: i64,
    },

    /// Queue entry confirmed
    Queued {
        position: usize,
    },

    /// Room membership changed
    RoomUpdate {
        room: RoomRecord,
    },

    /// Current room list
    RoomList {
        rooms: Vec<RoomRecord>,
    },

    /// A quick match was formed; the frame-sync start follows
    GameStart {
        room_id: Uuid,
        config: GameConfig,
        room_state: GameRoomState,
        start_time_ms: i64,
        player_ids: Vec<Uuid>,
    },

    /// Frame sync is starting (or a reconnect snapshot)
    FrameSyncStart {
        room_id: Uuid,
        frame_rate_hz: u32,
        frame_interval_ms: i64,
        start_time_ms: i64,
        player_ids: Vec<Uuid>,
        /// Opaque world snapshot taken at the current authority frame
        world_snapshot: Vec<u8>,
        /// user id -> entity player id, identical on every client
        player_id_mapping: BTreeMap<Uuid, i64>,
    },

    /// Canonical inputs for one processed frame
    FrameSyncData {
        room_id: Uuid,
        authority_frame: i32,
        frame_inputs: FrameInputSet,
        timestamp_ms: i64,
    },

    /// Frame sync has ended
    FrameSyncEnd {
        room_id: Uuid,
        final_frame: i32,
        end_time_ms: i64,
        reason: String,
    },

    /// Queue entry expired before a match formed
    MatchTimeout {
        message: String,
        timestamp_ms: i64,
        wait_time_seconds: i64,
    },

    /// Error message
    Error {
        code: String,
        message: String,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: i64,
    },
}
