//! Session state and authoritative tick loop

use dashmap::DashMap;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::sync::{
    authority_feed, AuthorityDriver, BatchRejected, InputCommand, PlayerState, SyncSettings,
};
use crate::util::time::{tick_delta, tick_duration};
use crate::ws::protocol::{Outbound, ServerMsg};

use super::snapshot::{entity_info, SnapshotPublisher};
use super::world::{dispatch_effect, World};
use super::{EntityInput, InputKind};

/// Per-session tunables
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub tick_rate: u32,
    pub max_entities: usize,
    pub island_count: usize,
    pub sync: SyncSettings,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick_rate: config.tick_rate,
            max_entities: config.max_session_entities,
            island_count: config.island_count,
            sync: config.sync,
        }
    }
}

/// Why a connection could not be placed in a session
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(Uuid),

    #[error("session {0} is full")]
    Full(Uuid),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::NotFound(_) => "session_not_found",
            SessionError::Full(_) => "session_full",
        }
    }
}

/// An entity inside a session (authoritative)
struct SessionEntity {
    display_name: String,
    driver: AuthorityDriver,
    reply: mpsc::UnboundedSender<Outbound>,
}

/// Session state (owned by session task)
struct SessionState {
    id: Uuid,
    tick: u64,
    settings: SessionSettings,
    world: World,
    entities: HashMap<Uuid, SessionEntity>,
    rng: ChaCha8Rng,
    /// Someone joined at least once; an empty session after that ends
    occupied: bool,
}

/// Handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    pub input_tx: mpsc::Sender<EntityInput>,
    pub outbound_tx: broadcast::Sender<Outbound>,
    pub max_entities: usize,
    entity_count: Arc<AtomicUsize>,
}

impl SessionHandle {
    pub fn entity_count(&self) -> usize {
        self.entity_count.load(Ordering::Relaxed)
    }

    pub fn is_full(&self) -> bool {
        self.entity_count() >= self.max_entities
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.outbound_tx.subscribe()
    }
}

/// Listing entry for the HTTP API
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub entities: usize,
    pub max_entities: usize,
}

/// Registry of all active sessions
pub struct SessionRegistry {
    sessions: DashMap<Uuid, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<SessionHandle> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    pub fn insert(&self, handle: SessionHandle) {
        self.sessions.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<SessionHandle> {
        self.sessions.remove(id).map(|(_, h)| h)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn total_entities(&self) -> usize {
        self.sessions.iter().map(|s| s.value().entity_count()).sum()
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        self.sessions
            .iter()
            .map(|s| SessionSummary {
                session_id: s.id,
                entities: s.entity_count(),
                max_entities: s.max_entities,
            })
            .collect()
    }

    /// Find a session with available slots
    pub fn find_available(&self) -> Option<SessionHandle> {
        self.sessions
            .iter()
            .find(|s| !s.value().is_full())
            .map(|s| s.value().clone())
    }

    /// Pick the session a connection should join, opening one if none has room
    pub fn join_target(
        self: &Arc<Self>,
        requested: Option<Uuid>,
        settings: SessionSettings,
    ) -> Result<SessionHandle, SessionError> {
        match requested {
            Some(id) => {
                let handle = self.get(&id).ok_or(SessionError::NotFound(id))?;
                if handle.is_full() {
                    return Err(SessionError::Full(id));
                }
                Ok(handle)
            }
            None => Ok(self
                .find_available()
                .unwrap_or_else(|| self.open(settings))),
        }
    }

    /// Start a new session task; it unregisters itself when it ends
    pub fn open(self: &Arc<Self>, settings: SessionSettings) -> SessionHandle {
        let id = Uuid::new_v4();
        let (session, handle) = GameSession::new(id, rand::random(), settings);
        self.insert(handle.clone());

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            session.run().await;
            registry.remove(&id);
        });
        handle
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative game session
pub struct GameSession {
    state: SessionState,
    input_rx: mpsc::Receiver<EntityInput>,
    outbound_tx: broadcast::Sender<Outbound>,
    publisher: SnapshotPublisher,
    entity_count: Arc<AtomicUsize>,
}

impl GameSession {
    /// Create a new session
    pub fn new(id: Uuid, seed: u64, settings: SessionSettings) -> (Self, SessionHandle) {
        let (input_tx, input_rx) = mpsc::channel(256);
        let (outbound_tx, _) = broadcast::channel(256);
        let entity_count = Arc::new(AtomicUsize::new(0));

        let handle = SessionHandle {
            id,
            input_tx,
            outbound_tx: outbound_tx.clone(),
            max_entities: settings.max_entities,
            entity_count: entity_count.clone(),
        };

        let session = Self {
            state: SessionState {
                id,
                tick: 0,
                settings,
                world: World::archipelago(settings.island_count),
                entities: HashMap::new(),
                rng: ChaCha8Rng::seed_from_u64(seed),
                occupied: false,
            },
            input_rx,
            publisher: SnapshotPublisher::new(outbound_tx.clone()),
            outbound_tx,
            entity_count,
        };

        (session, handle)
    }

    /// Run the authoritative tick loop
    pub async fn run(mut self) {
        info!(session_id = %self.state.id, "Session started");

        let mut tick_interval = interval(tick_duration(self.state.settings.tick_rate));
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;

            // Input phase: joins, leaves and command batches
            self.process_inputs();

            // Physics phase
            self.run_tick();

            if self.state.occupied && self.state.entities.is_empty() {
                info!(session_id = %self.state.id, "All entities left, ending session");
                break;
            }
        }
    }

    /// Process all pending inputs from connections
    fn process_inputs(&mut self) {
        while let Ok(input) = self.input_rx.try_recv() {
            match input.kind {
                InputKind::Join {
                    display_name,
                    reply,
                } => self.handle_join(input.entity_id, display_name, reply),
                InputKind::Batch(commands) => self.handle_batch(input.entity_id, &commands),
                InputKind::Leave => self.handle_leave(input.entity_id),
            }
        }
    }

    fn handle_join(
        &mut self,
        entity_id: Uuid,
        display_name: String,
        reply: mpsc::UnboundedSender<Outbound>,
    ) {
        if self.state.entities.contains_key(&entity_id) {
            warn!(entity_id = %entity_id, "Entity already in session");
            let _ = reply.send(Outbound::Control(ServerMsg::error(
                "already_joined",
                "Already in this session",
            )));
            return;
        }

        if self.state.entities.len() >= self.state.settings.max_entities {
            let _ = reply.send(Outbound::Control(ServerMsg::error(
                "session_full",
                "Session is full",
            )));
            return;
        }

        let position = self.state.world.spawn(entity_id, &mut self.state.rng);
        let player = PlayerState::new(entity_id, position);
        let health = self.state.world.health(entity_id).unwrap_or_default();
        let info = entity_info(&display_name, &player, health);

        let feed = authority_feed();
        self.publisher.attach(entity_id, &feed);
        let driver = AuthorityDriver::new(self.state.settings.sync, player, feed);

        // Notify everyone already here of the new entity
        let _ = self.outbound_tx.send(Outbound::Control(ServerMsg::EntityJoined {
            entity: info,
        }));

        self.state.entities.insert(
            entity_id,
            SessionEntity {
                display_name,
                driver,
                reply: reply.clone(),
            },
        );
        self.state.occupied = true;
        self.entity_count
            .store(self.state.entities.len(), Ordering::Relaxed);

        let world = &self.state.world;
        let entities = self
            .state
            .entities
            .values()
            .map(|e| {
                let state = e.driver.state();
                let health = world.health(state.entity).unwrap_or_default();
                entity_info(&e.display_name, state, health)
            })
            .collect();
        let _ = reply.send(Outbound::Control(ServerMsg::SessionJoined {
            session_id: self.state.id,
            entities,
        }));

        info!(
            session_id = %self.state.id,
            entity_id = %entity_id,
            entity_count = self.state.entities.len(),
            "Entity joined session"
        );
    }

    /// Re-simulate one batch and hand its effects to the rules
    fn handle_batch(&mut self, entity_id: Uuid, commands: &[InputCommand]) {
        let SessionState {
            id,
            entities,
            world,
            ..
        } = &mut self.state;
        let Some(entity) = entities.get_mut(&entity_id) else {
            debug!(session_id = %id, entity_id = %entity_id, "Batch for unknown entity");
            return;
        };

        match entity.driver.apply_batch(commands, &*world) {
            Ok(report) => {
                world.set_position(entity_id, entity.driver.state().position);
                for effect in report.effects {
                    dispatch_effect(&mut *world, effect);
                }
                debug!(
                    session_id = %id,
                    entity_id = %entity_id,
                    applied = report.applied,
                    stale = report.stale,
                    reordered = report.reordered,
                    frame = ?report.published.map(|s| s.frame.value()),
                    "Applied command batch"
                );
            }
            Err(rejected @ BatchRejected::OutOfRange(_)) => {
                warn!(
                    session_id = %id,
                    entity_id = %entity_id,
                    error = %rejected,
                    "Rejected command batch"
                );
                let _ = entity.reply.send(Outbound::Control(ServerMsg::error(
                    "bad_frames",
                    rejected.to_string(),
                )));
            }
            Err(rejected) => {
                debug!(
                    session_id = %id,
                    entity_id = %entity_id,
                    error = %rejected,
                    "Rejected command batch"
                );
            }
        }
    }

    /// Handle entity leave
    fn handle_leave(&mut self, entity_id: Uuid) {
        if self.state.entities.remove(&entity_id).is_some() {
            self.state.world.despawn(entity_id);
            self.entity_count
                .store(self.state.entities.len(), Ordering::Relaxed);

            let _ = self.outbound_tx.send(Outbound::Control(ServerMsg::EntityLeft {
                entity_id,
                reason: "disconnected".to_string(),
            }));

            info!(
                session_id = %self.state.id,
                entity_id = %entity_id,
                "Entity left session"
            );
        }
    }

    /// Run a single physics tick and broadcast resolved events
    fn run_tick(&mut self) {
        self.state.tick += 1;
        let dt = tick_delta(self.state.settings.tick_rate);

        let SessionState {
            entities, world, ..
        } = &mut self.state;
        for (entity_id, entity) in entities.iter_mut() {
            let lane = world.lane_for(*entity_id);
            entity.driver.physics_step(dt, lane);
            let state = entity.driver.state();
            world.settle(*entity_id, state.position, state.grounded);
        }

        for event in self.state.world.drain_events() {
            let _ = self
                .outbound_tx
                .send(Outbound::Control(ServerMsg::Event { event }));
        }
    }

    /// Tick counter, for diagnostics
    pub fn tick(&self) -> u64 {
        self.state.tick
    }
}
