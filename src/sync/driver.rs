//! Per-role drivers wiring the core components into tick callbacks.
//!
//! Each driver exposes two callbacks. `tick` is the input/prediction phase and
//! runs first in a frame; `physics_step` is the physics-affecting phase and
//! runs after it.

use std::sync::Arc;
use std::time::Instant;

use glam::{Quat, Vec3};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::batcher::CommandBatcher;
use super::frame::{Frame, FrameClock, MIN_MAX_FRAME};
use super::input::{InputCommand, InputSampler};
use super::interpolate::RemoteInterpolator;
use super::latency::NetworkContext;
use super::log::{RecordedSnapshot, Snapshot, SnapshotLog};
use super::reconcile::{ReconcileOutcome, ReconciliationEngine};
use super::replicated::{AuthorityFeed, AuthorityState};
use super::simulator::{ActionEffect, PlayerState, Simulator, Surroundings};
use super::SyncSettings;

/// Result of one owner tick
#[derive(Debug, Default)]
pub struct OwnerTick {
    pub frame: Frame,
    /// Batch to put on the wire, if one was due
    pub batch: Option<Vec<InputCommand>>,
    /// Predicted effects, for presentation only
    pub effects: Vec<ActionEffect>,
    pub reconciled: Vec<ReconcileOutcome>,
}

/// Drives an entity the local process owns: samples input, predicts, batches
/// and reconciles against the authority.
pub struct OwnerDriver {
    settings: SyncSettings,
    clock: FrameClock,
    sampler: InputSampler,
    batcher: CommandBatcher,
    snapshots: SnapshotLog,
    sim: Simulator,
    reconciler: ReconciliationEngine,
    state: PlayerState,
    displayed_rotation: Quat,
    inbox: mpsc::UnboundedReceiver<AuthorityState>,
    last_checked: Option<Snapshot>,
}

impl OwnerDriver {
    pub fn new(
        mut settings: SyncSettings,
        state: PlayerState,
        feed: &AuthorityFeed,
        network: Arc<dyn NetworkContext>,
    ) -> Self {
        settings.max_frame = settings.max_frame.max(MIN_MAX_FRAME);
        let batcher = CommandBatcher::new(settings.batcher, network);
        let snapshots = SnapshotLog::new(batcher.batch_size());
        Self {
            clock: FrameClock::new(settings.max_frame),
            sampler: InputSampler::new(),
            snapshots,
            batcher,
            sim: Simulator::new(settings.sim),
            reconciler: ReconciliationEngine::new(settings.tolerance, settings.max_frame),
            displayed_rotation: state.facing,
            state,
            inbox: feed.subscribe_channel(),
            last_checked: None,
            settings,
        }
    }

    /// Raw intent for the next tick
    pub fn input(&mut self) -> &mut InputSampler {
        &mut self.sampler
    }

    /// Input and prediction phase
    pub fn tick(&mut self, now: Instant, env: &dyn Surroundings) -> OwnerTick {
        let reconciled = self.drain_authority(env);

        let frame = self.clock.advance();

        if let Some(size) = self.batcher.maybe_resize(now) {
            self.snapshots.set_capacity(size);
        }

        let command = self.sampler.sample(frame);
        let outcome = self.sim.step(&self.state, &command, env);
        self.state = outcome.state;

        self.batcher.record(command);
        self.snapshots
            .push(RecordedSnapshot::new(frame, self.state.clone()));

        OwnerTick {
            frame,
            batch: self.batcher.maybe_flush(now),
            effects: outcome.effects,
            reconciled,
        }
    }

    /// Physics phase: turn the body toward the simulated facing
    pub fn physics_step(&mut self, dt: f32) {
        let t = (self.settings.interpolation.rotation_rate * dt).clamp(0.0, 1.0);
        self.displayed_rotation = self.displayed_rotation.slerp(self.state.facing, t);
    }

    /// Apply queued authority updates before this tick reads any state
    fn drain_authority(&mut self, env: &dyn Surroundings) -> Vec<ReconcileOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(update) = self.inbox.try_recv() {
            let Some(snapshot) = update.snapshot else {
                continue;
            };
            // Rotation-only updates repeat the last snapshot
            if self.last_checked == Some(snapshot) {
                continue;
            }
            self.last_checked = Some(snapshot);

            let outcome = self.reconciler.reconcile(
                &snapshot,
                &mut self.state,
                &mut self.snapshots,
                self.batcher.history(),
                &self.sim,
                env,
            );
            outcomes.push(outcome);
        }
        outcomes
    }

    pub fn state(&self) -> &PlayerState {
        &self.state
    }

    pub fn displayed_rotation(&self) -> Quat {
        self.displayed_rotation
    }

    pub fn frame(&self) -> Frame {
        self.clock.current()
    }

    pub fn batch_size(&self) -> usize {
        self.batcher.batch_size()
    }

    pub fn snapshots(&self) -> &SnapshotLog {
        &self.snapshots
    }

    pub fn batcher(&self) -> &CommandBatcher {
        &self.batcher
    }

    pub fn reconciler(&self) -> &ReconciliationEngine {
        &self.reconciler
    }
}

/// Drives an entity neither owned nor simulated locally
pub struct ObserverDriver {
    interpolator: RemoteInterpolator,
    inbox: mpsc::UnboundedReceiver<AuthorityState>,
    /// Latest published transform, kept between updates
    target: Option<(Vec3, Quat)>,
    seen_first: bool,
}

impl ObserverDriver {
    pub fn new(settings: SyncSettings, feed: &AuthorityFeed) -> Self {
        let current = feed.get();
        let target = current.snapshot.map(|s| (s.position, current.rotation));
        let position = target.map(|(p, _)| p).unwrap_or_default();
        Self {
            interpolator: RemoteInterpolator::new(settings.interpolation, position, current.rotation),
            inbox: feed.subscribe_channel(),
            seen_first: target.is_some(),
            target,
        }
    }

    /// Take queued updates, then blend toward the latest published transform
    pub fn tick(&mut self, dt: f32) {
        while let Ok(update) = self.inbox.try_recv() {
            if let Some(snapshot) = update.snapshot {
                self.target = Some((snapshot.position, update.rotation));
            }
        }
        let Some((position, rotation)) = self.target else {
            return;
        };
        if !self.seen_first {
            // Nothing to blend from yet
            self.interpolator.snap_to(position, rotation);
            self.seen_first = true;
            return;
        }
        self.interpolator.update(position, rotation, dt);
    }

    pub fn interpolator(&self) -> &RemoteInterpolator {
        &self.interpolator
    }
}

/// Why an authority refused a whole batch
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchRejected {
    #[error("batch is empty")]
    Empty,

    #[error("all {0} commands had out-of-range frames")]
    OutOfRange(usize),

    #[error("all {0} commands were already applied")]
    Stale(usize),
}

/// What the authority did with one batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    pub applied: usize,
    pub stale: usize,
    pub out_of_range: usize,
    pub reordered: bool,
    pub effects: Vec<ActionEffect>,
    pub published: Option<Snapshot>,
}

/// Re-simulates an owner's commands and publishes the result
pub struct AuthorityDriver {
    settings: SyncSettings,
    sim: Simulator,
    state: PlayerState,
    rotation: Quat,
    last_applied: Option<Frame>,
    feed: AuthorityFeed,
}

impl AuthorityDriver {
    pub fn new(mut settings: SyncSettings, state: PlayerState, feed: AuthorityFeed) -> Self {
        settings.max_frame = settings.max_frame.max(MIN_MAX_FRAME);
        Self {
            sim: Simulator::new(settings.sim),
            rotation: state.facing,
            state,
            last_applied: None,
            feed,
            settings,
        }
    }

    /// Validate, order and apply one batch, then publish the resulting snapshot.
    ///
    /// Out-of-range frames are discarded, frames not newer than the last
    /// applied one are dropped as duplicates, the rest run in wrap-aware frame
    /// order.
    pub fn apply_batch(
        &mut self,
        batch: &[InputCommand],
        env: &dyn Surroundings,
    ) -> Result<ApplyReport, BatchRejected> {
        if batch.is_empty() {
            return Err(BatchRejected::Empty);
        }
        let max_frame = self.settings.max_frame;

        let valid: Vec<InputCommand> = batch
            .iter()
            .copied()
            .filter(|c| c.frame.is_valid(max_frame))
            .collect();
        let out_of_range = batch.len() - valid.len();
        if valid.is_empty() {
            warn!(count = out_of_range, "Discarding batch with out-of-range frames");
            return Err(BatchRejected::OutOfRange(out_of_range));
        }

        let anchor = self.last_applied.unwrap_or_else(|| {
            let earliest = valid
                .iter()
                .map(|c| c.frame)
                .fold(valid[0].frame, |a, b| if a.is_newer_than(b, max_frame) { b } else { a });
            Frame(i16::try_from(earliest.wrapping_distance(Frame(1), max_frame)).unwrap_or(0))
        });

        let mut fresh: Vec<(i32, InputCommand)> = valid
            .iter()
            .filter(|c| c.frame.is_newer_than(anchor, max_frame))
            .map(|c| (c.frame.wrapping_distance(anchor, max_frame), *c))
            .collect();
        let in_order = fresh.windows(2).all(|w| w[0].0 < w[1].0);
        fresh.sort_by_key(|(key, _)| *key);
        fresh.dedup_by_key(|(key, _)| *key);

        let stale = valid.len() - fresh.len();
        if fresh.is_empty() {
            debug!(count = stale, "Batch carried only already-applied frames");
            return Err(BatchRejected::Stale(stale));
        }

        let mut effects = Vec::new();
        for (_, command) in &fresh {
            let outcome = self.sim.step(&self.state, command, env);
            self.state = outcome.state;
            effects.extend(outcome.effects);
            self.last_applied = Some(command.frame);
        }

        let published = Snapshot {
            frame: fresh[fresh.len() - 1].1.frame,
            position: self.state.position,
        };
        let rotation = self.rotation;
        self.feed.update(|s| {
            s.snapshot = Some(published);
            s.rotation = rotation;
        });

        Ok(ApplyReport {
            applied: fresh.len(),
            stale,
            out_of_range,
            reordered: !in_order,
            effects,
            published: Some(published),
        })
    }

    /// Physics phase: turn toward the facing and keep the body on its lane.
    /// A kinematic body (mid-jump) is left where the jump arc put it.
    pub fn physics_step(&mut self, dt: f32, lane_z: Option<f32>) {
        let t = (self.settings.interpolation.rotation_rate * dt).clamp(0.0, 1.0);
        self.rotation = self.rotation.slerp(self.state.facing, t);
        if self.state.is_kinematic() {
            return;
        }
        if let Some(z) = lane_z {
            self.state.position.z = z;
        }
    }

    pub fn state(&self) -> &PlayerState {
        &self.state
    }

    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    pub fn last_applied(&self) -> Option<Frame> {
        self.last_applied
    }

    pub fn feed(&self) -> &AuthorityFeed {
        &self.feed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::frame::DEFAULT_MAX_FRAME;
    use crate::sync::input::InputFlags;
    use crate::sync::replicated::authority_feed;
    use crate::sync::simulator::StaticSurroundings;
    use uuid::Uuid;

    fn right(frame: i16) -> InputCommand {
        InputCommand::new(Frame(frame), InputFlags::from_bits(InputFlags::MOVE_RIGHT))
    }

    fn authority() -> AuthorityDriver {
        AuthorityDriver::new(
            SyncSettings::default(),
            PlayerState::new(Uuid::new_v4(), Vec3::ZERO),
            authority_feed(),
        )
    }

    #[test]
    fn publishes_last_applied_frame() {
        let mut auth = authority();
        let env = StaticSurroundings::floor(0.0);
        let report = auth
            .apply_batch(&[right(1), right(2), right(3)], &env)
            .expect("valid batch");
        assert_eq!(report.applied, 3);
        let published = auth.feed().get().snapshot.expect("snapshot published");
        assert_eq!(published.frame, Frame(3));
        assert_eq!(published.position, auth.state().position);
    }

    #[test]
    fn shuffled_batch_is_reordered() {
        let mut ordered = authority();
        let mut shuffled = authority();
        let env = StaticSurroundings::floor(0.0);
        let jump = InputCommand::new(Frame(2), InputFlags::from_bits(InputFlags::JUMP | InputFlags::MOVE_RIGHT));

        ordered.apply_batch(&[right(1), jump, right(3)], &env).expect("ordered");
        let report = shuffled
            .apply_batch(&[right(3), right(1), jump], &env)
            .expect("shuffled");

        assert!(report.reordered);
        assert_eq!(shuffled.last_applied(), Some(Frame(3)));
        assert_eq!(ordered.state().position, shuffled.state().position);
    }

    #[test]
    fn duplicates_and_out_of_range_are_dropped() {
        let mut auth = authority();
        let env = StaticSurroundings::floor(0.0);
        auth.apply_batch(&[right(1), right(2)], &env).expect("first batch");
        let after_first = auth.state().position;

        let report = auth
            .apply_batch(&[right(1), right(2), right(3), right(-4), right(DEFAULT_MAX_FRAME)], &env)
            .expect("overlapping batch");
        assert_eq!(report.applied, 1);
        assert_eq!(report.stale, 2);
        assert_eq!(report.out_of_range, 2);
        assert!(auth.state().position.x > after_first.x);

        assert_eq!(
            auth.apply_batch(&[right(2), right(3)], &env),
            Err(BatchRejected::Stale(2))
        );
        assert_eq!(auth.apply_batch(&[right(-1)], &env), Err(BatchRejected::OutOfRange(1)));
        assert_eq!(auth.apply_batch(&[], &env), Err(BatchRejected::Empty));
    }

    #[test]
    fn batch_across_wrap_applies_in_order() {
        let mut auth = authority();
        let env = StaticSurroundings::floor(0.0);
        let max = DEFAULT_MAX_FRAME;
        auth.apply_batch(&[right(max - 2)], &env).expect("before wrap");
        let report = auth
            .apply_batch(&[right(1), right(max - 1), right(0)], &env)
            .expect("across wrap");
        assert_eq!(report.applied, 3);
        assert!(report.reordered);
        assert_eq!(auth.last_applied(), Some(Frame(1)));
    }

    #[test]
    fn lane_lock_pins_depth() {
        let mut auth = authority();
        auth.physics_step(1.0 / 60.0, Some(4.5));
        assert_eq!(auth.state().position.z, 4.5);
    }

    #[test]
    fn lane_lock_waits_for_landing() {
        let mut auth = authority();
        let env = StaticSurroundings::floor(0.0);
        let jump = InputCommand::new(Frame(1), InputFlags::from_bits(InputFlags::JUMP));
        auth.apply_batch(&[jump], &env).expect("jump batch");
        assert!(auth.state().is_kinematic());

        auth.physics_step(1.0 / 60.0, Some(4.5));
        assert_eq!(auth.state().position.z, 0.0);

        let idle: Vec<InputCommand> = (2..=60)
            .map(|f| InputCommand::new(Frame(f), InputFlags::default()))
            .collect();
        auth.apply_batch(&idle, &env).expect("idle batch");
        assert!(!auth.state().is_kinematic());
        auth.physics_step(1.0 / 60.0, Some(4.5));
        assert_eq!(auth.state().position.z, 4.5);
    }

    #[test]
    fn tiny_frame_ceiling_is_raised() {
        let settings = SyncSettings {
            max_frame: 3,
            ..SyncSettings::default()
        };
        let mut auth = AuthorityDriver::new(
            settings,
            PlayerState::new(Uuid::new_v4(), Vec3::ZERO),
            authority_feed(),
        );
        let env = StaticSurroundings::floor(0.0);
        let report = auth.apply_batch(&[right(1), right(2)], &env).expect("applied");
        assert_eq!(report.applied, 2);
        assert_eq!(auth.apply_batch(&[right(3)], &env).map(|r| r.applied), Ok(1));
    }

    #[test]
    fn observer_snaps_on_first_snapshot_then_blends() {
        let feed = authority_feed();
        let mut observer = ObserverDriver::new(SyncSettings::default(), &feed);
        feed.update(|s| {
            s.snapshot = Some(Snapshot {
                frame: Frame(1),
                position: Vec3::new(3.0, 0.0, 0.0),
            })
        });
        observer.tick(1.0 / 60.0);
        assert_eq!(observer.interpolator().position(), Vec3::new(3.0, 0.0, 0.0));

        feed.update(|s| {
            s.snapshot = Some(Snapshot {
                frame: Frame(2),
                position: Vec3::new(4.0, 0.0, 0.0),
            })
        });
        observer.tick(1.0 / 60.0);
        let x = observer.interpolator().position().x;
        assert!(x > 3.0 && x < 4.0);
        assert!(!observer.interpolator().physics_enabled());

        // No new publish: keeps closing in on the last target
        observer.tick(1.0 / 60.0);
        assert!(observer.interpolator().position().x > x);
    }
}
