//! WebSocket protocol message definitions
//!
//! Control traffic is JSON in text frames. The movement hot path (command
//! batches, snapshots, rotations) travels as binary frames, see [`super::wire`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sync::ChoreKind;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Request to join a session
    JoinSession {
        /// Specific session to join, otherwise any session with room
        #[serde(default)]
        session_id: Option<Uuid>,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Leave current session
    LeaveSession,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        /// Entity this connection will own
        entity_id: Uuid,
        server_time: u64,
        /// Frame counter ceiling the client must wrap at
        max_frame_num: i16,
    },

    /// Confirmation of session join
    SessionJoined {
        session_id: Uuid,
        /// All entities in the session at join time
        entities: Vec<EntityInfo>,
    },

    EntityJoined {
        entity: EntityInfo,
    },

    EntityLeft {
        entity_id: Uuid,
        reason: String,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },

    /// Something the game rules decided
    Event {
        event: GameEvent,
    },

    /// Error message
    Error {
        code: String,
        message: String,
    },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Entity info for join notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityInfo {
    pub entity_id: Uuid,
    pub display_name: String,
    pub position: [f32; 3],
    pub health: f32,
}

/// Side effects resolved by the authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GameEvent {
    Strike {
        attacker: Uuid,
        target: Uuid,
        damage: f32,
        remaining_health: f32,
    },
    Defeated {
        entity_id: Uuid,
        by: Uuid,
    },
    Chore {
        entity_id: Uuid,
        chore: ChoreKind,
    },
    IslandHopRequested {
        entity_id: Uuid,
        from_island: Option<u32>,
    },
    IslandLanded {
        entity_id: Uuid,
        island_id: u32,
    },
    FightState {
        entity_id: Uuid,
        in_fight: bool,
    },
    CameraTarget {
        entity_id: Uuid,
        island_id: u32,
    },
}

/// One outgoing WebSocket frame
#[derive(Debug, Clone)]
pub enum Outbound {
    Control(ServerMsg),
    Binary(Bytes),
}
