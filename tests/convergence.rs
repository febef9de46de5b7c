//! Owner prediction against an in-process authority, without a network.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Vec3;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use uuid::Uuid;

use isle_sync::sync::{
    authority_feed, AuthorityDriver, BatchRejected, FixedLatency, InputCommand, LatencyTracker, ObserverDriver,
    OwnerDriver, PlayerState, StaticSurroundings, SyncSettings,
};

const TICK: Duration = Duration::from_millis(16);

fn owner_for(
    settings: SyncSettings,
    authority: &AuthorityDriver,
    start: Vec3,
    latency_ms: u64,
) -> OwnerDriver {
    let state = PlayerState::new(authority.state().entity, start);
    OwnerDriver::new(
        settings,
        state,
        authority.feed(),
        Arc::new(FixedLatency(Duration::from_millis(latency_ms))),
    )
}

fn script(owner: &mut OwnerDriver, tick: u32) {
    match tick {
        0..=14 => owner.input().request_move_right(),
        15 => owner.input().request_jump(),
        40..=55 => owner.input().request_move_left(),
        _ => {}
    }
}

#[test]
fn delayed_and_reversed_batches_still_converge() {
    let settings = SyncSettings::default();
    let env = StaticSurroundings::floor(0.0);
    let entity = Uuid::new_v4();
    let mut authority = AuthorityDriver::new(
        settings,
        PlayerState::new(entity, Vec3::ZERO),
        authority_feed(),
    );
    let mut owner = owner_for(settings, &authority, Vec3::ZERO, 150);

    let start = Instant::now();
    let mut in_flight: VecDeque<(u32, Vec<InputCommand>)> = VecDeque::new();
    let mut reordered = 0;

    for tick in 0..90u32 {
        script(&mut owner, tick);
        let out = owner.tick(start + TICK * tick, &env);
        if let Some(mut batch) = out.batch {
            batch.reverse();
            in_flight.push_back((tick + 4, batch));
        }
        while in_flight.front().map_or(false, |(due, _)| *due <= tick) {
            let (_, batch) = in_flight.pop_front().unwrap();
            let report = authority.apply_batch(&batch, &env).unwrap();
            if report.reordered {
                reordered += 1;
            }
        }
        owner.physics_step(1.0 / 60.0);
        authority.physics_step(1.0 / 60.0, None);
    }

    // Force out whatever is still pending, then deliver everything
    let out = owner.tick(start + TICK * 200, &env);
    in_flight.push_back((0, out.batch.expect("pending commands flushed")));
    for (_, batch) in in_flight.drain(..) {
        authority.apply_batch(&batch, &env).unwrap();
    }

    assert!(reordered > 0);
    assert_eq!(authority.last_applied(), Some(owner.frame()));
    assert!(authority.state().position.distance(owner.state().position) < 1e-5);
    assert_eq!(owner.reconciler().corrections(), 0);
    // 150 ms latency selects the mid batch size
    assert_eq!(owner.batch_size(), 15);
    assert_eq!(owner.snapshots().capacity(), 15);
}

/// Random walking and jumping for 400 ticks with batches delivered in shuffled
/// groups of four, then a quiet period. Returns the final owner to authority
/// distance, how many frames the authority dropped as already applied and how
/// many batches arrived after a newer one.
fn shuffled_arrival_run(seed: u64) -> (f32, usize, usize) {
    let settings = SyncSettings::default();
    let env = StaticSurroundings::floor(0.0);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut authority = AuthorityDriver::new(
        settings,
        PlayerState::new(Uuid::new_v4(), Vec3::ZERO),
        authority_feed(),
    );
    let mut owner = owner_for(settings, &authority, Vec3::ZERO, 150);

    let start = Instant::now();
    let mut group: Vec<(usize, Vec<InputCommand>)> = Vec::new();
    let mut sent = 0;
    let mut newest_delivered = None;
    let mut late = 0;
    let mut stale = 0;

    let mut deliver = |authority: &mut AuthorityDriver, seq: usize, batch: &[InputCommand]| {
        if newest_delivered.map_or(false, |newest| seq < newest) {
            late += 1;
        }
        newest_delivered = newest_delivered.max(Some(seq));
        match authority.apply_batch(batch, &env) {
            Ok(report) => stale += report.stale,
            Err(BatchRejected::Stale(count)) => stale += count,
            Err(other) => panic!("unexpected rejection: {other}"),
        }
    };

    for tick in 0..520u32 {
        if tick < 400 {
            match rng.gen_range(0..8u32) {
                0..=2 => owner.input().request_move_right(),
                3 | 4 => owner.input().request_move_left(),
                5 => owner.input().request_jump(),
                _ => {}
            }
        }
        let out = owner.tick(start + TICK * tick, &env);
        if let Some(batch) = out.batch {
            group.push((sent, batch));
            sent += 1;
        }
        if group.len() == 4 {
            group.shuffle(&mut rng);
            for (seq, batch) in group.drain(..) {
                deliver(&mut authority, seq, &batch);
            }
        }
        owner.physics_step(1.0 / 60.0);
        authority.physics_step(1.0 / 60.0, None);
    }

    // Deliver the tail in order so the newest frame is published last
    for (seq, batch) in group.drain(..) {
        deliver(&mut authority, seq, &batch);
    }
    let out = owner.tick(start + TICK * 600, &env);
    let last = out.batch.expect("idle commands flushed");
    deliver(&mut authority, sent, &last);
    // Pick up the final publish
    owner.tick(start + TICK * 601, &env);

    let distance = authority.state().position.distance(owner.state().position);
    (distance, stale, late)
}

#[test]
fn shuffled_batch_arrival_converges_after_quiet_period() {
    let tolerance = SyncSettings::default().tolerance;
    for seed in 1..=8 {
        let (distance, stale, late) = shuffled_arrival_run(seed);
        assert!(
            distance <= tolerance + 1e-4,
            "seed {seed}: owner ended {distance} from authority"
        );
        assert!(stale > 0, "seed {seed}: no frame was dropped as already applied");
        assert!(late > 0, "seed {seed}: every batch arrived in order");
    }
}

#[test]
fn displaced_owner_is_corrected_once() {
    let settings = SyncSettings::default();
    let env = StaticSurroundings::floor(0.0);
    let mut authority = AuthorityDriver::new(
        settings,
        PlayerState::new(Uuid::new_v4(), Vec3::ZERO),
        authority_feed(),
    );
    let mut owner = owner_for(settings, &authority, Vec3::new(1.0, 0.0, 0.0), 20);

    let start = Instant::now();
    let mut corrected = Vec::new();
    for tick in 0..60u32 {
        owner.input().request_move_right();
        let out = owner.tick(start + TICK * tick, &env);
        corrected.extend(out.reconciled);
        if let Some(batch) = out.batch {
            authority.apply_batch(&batch, &env).unwrap();
        }
    }

    assert_eq!(owner.reconciler().corrections(), 1);
    let first = corrected
        .iter()
        .find_map(|o| match o {
            isle_sync::sync::ReconcileOutcome::Corrected { error, .. } => Some(*error),
            _ => None,
        })
        .expect("a correction happened");
    assert!((first - 1.0).abs() < 1e-4);

    // After the resync every later prediction lines up with the authority
    let out = owner.tick(start + TICK * 200, &env);
    authority.apply_batch(&out.batch.unwrap(), &env).unwrap();
    assert!(authority.state().position.distance(owner.state().position) < 1e-5);
}

#[test]
fn observer_settles_on_published_position() {
    let settings = SyncSettings::default();
    let env = StaticSurroundings::floor(0.0);
    let feed = authority_feed();
    let mut authority = AuthorityDriver::new(
        settings,
        PlayerState::new(Uuid::new_v4(), Vec3::ZERO),
        feed.clone(),
    );
    let mut observer = ObserverDriver::new(settings, &feed);

    let walk: Vec<InputCommand> = (1..=20)
        .map(|f| {
            InputCommand::new(
                isle_sync::sync::Frame(f),
                isle_sync::sync::InputFlags::from_bits(isle_sync::sync::InputFlags::MOVE_RIGHT),
            )
        })
        .collect();
    authority.apply_batch(&walk[..1], &env).unwrap();
    observer.tick(1.0 / 60.0);
    authority.apply_batch(&walk[1..], &env).unwrap();

    observer.tick(1.0 / 60.0);
    for _ in 0..60 {
        observer.tick(1.0 / 60.0);
    }

    let target = authority.state().position;
    assert!(observer.interpolator().position().distance(target) < 1e-3);
    assert!(observer.interpolator().physics_enabled());
}

#[test]
fn batch_size_follows_measured_latency() {
    let settings = SyncSettings::default();
    let env = StaticSurroundings::floor(0.0);
    let tracker = Arc::new(LatencyTracker::default());
    tracker.record(Duration::from_millis(250));

    let feed = authority_feed();
    let mut owner = OwnerDriver::new(
        settings,
        PlayerState::new(Uuid::new_v4(), Vec3::ZERO),
        &feed,
        tracker.clone(),
    );

    let start = Instant::now();
    owner.tick(start, &env);
    assert_eq!(owner.batch_size(), 20);

    // Drive the estimate down, then wait out the resize cadence
    for _ in 0..60 {
        tracker.record(Duration::from_millis(20));
    }
    owner.tick(start + settings.batcher.resize_interval, &env);
    assert_eq!(owner.batch_size(), 10);
    assert_eq!(owner.snapshots().capacity(), 10);
}
