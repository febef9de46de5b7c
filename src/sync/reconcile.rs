//! Owner-side reconciliation against authoritative snapshots

use tracing::debug;

use super::log::{CommandLog, RecordedSnapshot, Snapshot, SnapshotLog};
use super::simulator::{PlayerState, Simulator, Surroundings};

/// Largest prediction error accepted without correction (world units)
pub const DEFAULT_TOLERANCE: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconcileOutcome {
    /// No recorded prediction for that frame (evicted or not reached yet)
    NoMatch,
    WithinTolerance { error: f32 },
    /// Snapped to the authoritative position and replayed newer commands
    Corrected { error: f32, replayed: usize },
}

/// Compares authoritative snapshots with recorded predictions and resyncs on
/// divergence. Correction is all or nothing: a `reconcile` call either leaves
/// the prediction alone or finishes the snap and replay before returning.
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    tolerance: f32,
    max_frame: i16,
    last_outcome: Option<ReconcileOutcome>,
    corrections: u64,
}

impl ReconciliationEngine {
    pub fn new(tolerance: f32, max_frame: i16) -> Self {
        Self {
            tolerance,
            max_frame,
            last_outcome: None,
            corrections: 0,
        }
    }

    /// Result of the most recent check, `None` before the first snapshot
    pub fn last_outcome(&self) -> Option<ReconcileOutcome> {
        self.last_outcome
    }

    /// Number of corrections applied so far
    pub fn corrections(&self) -> u64 {
        self.corrections
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    /// Check one authoritative snapshot. On divergence, `current` is rebuilt
    /// from the recorded state at that frame with the authoritative position,
    /// replaying every retained command after it, and the recorded predictions
    /// for those frames are rewritten.
    pub fn reconcile(
        &mut self,
        authoritative: &Snapshot,
        current: &mut PlayerState,
        snapshots: &mut SnapshotLog,
        commands: &CommandLog,
        sim: &Simulator,
        env: &dyn Surroundings,
    ) -> ReconcileOutcome {
        let outcome = self.check(authoritative, current, snapshots, commands, sim, env);
        self.last_outcome = Some(outcome);
        outcome
    }

    fn check(
        &mut self,
        authoritative: &Snapshot,
        current: &mut PlayerState,
        snapshots: &mut SnapshotLog,
        commands: &CommandLog,
        sim: &Simulator,
        env: &dyn Surroundings,
    ) -> ReconcileOutcome {
        let Some(recorded) = snapshots.find(authoritative.frame) else {
            return ReconcileOutcome::NoMatch;
        };

        let error = recorded.snapshot.position.distance(authoritative.position);
        if error <= self.tolerance {
            return ReconcileOutcome::WithinTolerance { error };
        }

        let mut state = recorded.state.clone();
        state.position = authoritative.position;
        if let Some(entry) = snapshots.find_mut(authoritative.frame) {
            *entry = RecordedSnapshot::new(authoritative.frame, state.clone());
        }

        let mut replayed = 0;
        for command in commands.newer_than(authoritative.frame, self.max_frame) {
            state = sim.step(&state, command, env).state;
            if let Some(entry) = snapshots.find_mut(command.frame) {
                *entry = RecordedSnapshot::new(command.frame, state.clone());
            }
            replayed += 1;
        }

        debug!(
            frame = %authoritative.frame,
            error,
            replayed,
            "Prediction diverged, resynced to authority"
        );

        *current = state;
        self.corrections += 1;

        ReconcileOutcome::Corrected { error, replayed }
    }
}
