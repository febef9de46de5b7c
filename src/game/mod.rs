//! Authoritative session hosting

pub mod combat;
pub mod session;
pub mod snapshot;
pub mod world;

pub use session::{
    GameSession, SessionError, SessionHandle, SessionRegistry, SessionSettings, SessionSummary,
};
pub use world::{GameRules, Island, IslandId, World};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::sync::InputCommand;
use crate::ws::protocol::Outbound;

/// Input received from a WebSocket connection
#[derive(Debug, Clone)]
pub struct EntityInput {
    pub entity_id: Uuid,
    pub kind: InputKind,
}

#[derive(Debug, Clone)]
pub enum InputKind {
    Join {
        display_name: String,
        /// Direct line back to the joining connection
        reply: mpsc::UnboundedSender<Outbound>,
    },
    Batch(Vec<InputCommand>),
    Leave,
}
