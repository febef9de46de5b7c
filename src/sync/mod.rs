//! Movement synchronization core: prediction, authoritative re-simulation,
//! reconciliation and remote interpolation.

pub mod batcher;
pub mod driver;
pub mod frame;
pub mod input;
pub mod interpolate;
pub mod latency;
pub mod log;
pub mod reconcile;
pub mod replicated;
pub mod simulator;

pub use batcher::{batch_size_for_latency, BatcherSettings, CommandBatcher};
pub use driver::{ApplyReport, AuthorityDriver, BatchRejected, ObserverDriver, OwnerDriver, OwnerTick};
pub use frame::{Frame, FrameClock, DEFAULT_MAX_FRAME, MIN_MAX_FRAME};
pub use input::{ActionIntent, InputCommand, InputFlags, InputSampler};
pub use interpolate::{InterpolationSettings, RemoteInterpolator};
pub use latency::{FixedLatency, LatencyTracker, NetworkContext};
pub use log::{BoundedLog, CommandLog, RecordedSnapshot, Snapshot, SnapshotLog};
pub use reconcile::{ReconcileOutcome, ReconciliationEngine, DEFAULT_TOLERANCE};
pub use replicated::{authority_feed, AuthorityFeed, AuthorityState, ReplicatedVar};
pub use simulator::{
    ActionEffect, ChoreKind, PlayerState, SimParams, Simulator, StaticSurroundings, Surroundings,
    TargetInfo,
};

/// Tunables shared by every driver of one entity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncSettings {
    pub max_frame: i16,
    /// Largest accepted prediction error before a resync
    pub tolerance: f32,
    pub batcher: BatcherSettings,
    pub sim: SimParams,
    pub interpolation: InterpolationSettings,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_frame: DEFAULT_MAX_FRAME,
            tolerance: DEFAULT_TOLERANCE,
            batcher: BatcherSettings::default(),
            sim: SimParams::default(),
            interpolation: InterpolationSettings::default(),
        }
    }
}
