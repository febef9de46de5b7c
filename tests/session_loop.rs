//! A client-side owner driving a live session task over its channels.

use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Vec3;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_test::assert_ok;
use uuid::Uuid;

use isle_sync::game::{EntityInput, InputKind, SessionHandle, SessionRegistry, SessionSettings, World};
use isle_sync::sync::{
    authority_feed, AuthorityFeed, FixedLatency, InputCommand, OwnerDriver, PlayerState,
    Snapshot, SyncSettings,
};
use isle_sync::ws::protocol::{Outbound, ServerMsg};
use isle_sync::ws::wire::{decode_batch, decode_server, encode_batch, ServerFrame};

fn settings() -> SessionSettings {
    SessionSettings {
        tick_rate: 60,
        max_entities: 4,
        island_count: 2,
        sync: SyncSettings::default(),
    }
}

async fn send_batch(session: &SessionHandle, entity_id: Uuid, batch: &[InputCommand]) {
    // Through the codec, as a connection would
    let commands = assert_ok!(decode_batch(&encode_batch(batch)));
    assert_ok!(
        session
            .input_tx
            .send(EntityInput {
                entity_id,
                kind: InputKind::Batch(commands),
            })
            .await
    );
}

/// Mirror our entity's publishes into the local feed
fn pump(rx: &mut broadcast::Receiver<Outbound>, entity: Uuid, feed: &AuthorityFeed) {
    loop {
        match rx.try_recv() {
            Ok(Outbound::Binary(bytes)) => match decode_server(&bytes) {
                Ok(ServerFrame::Snapshot {
                    entity: e,
                    snapshot,
                }) if e == entity => feed.update(|s| s.snapshot = Some(snapshot)),
                Ok(ServerFrame::Rotation {
                    entity: e,
                    rotation,
                }) if e == entity => feed.update(|s| s.rotation = rotation),
                _ => {}
            },
            Ok(Outbound::Control(_)) => {}
            Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
}

async fn snapshot_for(
    rx: &mut broadcast::Receiver<Outbound>,
    entity: Uuid,
    frame: isle_sync::sync::Frame,
) -> Snapshot {
    loop {
        match rx.recv().await {
            Ok(Outbound::Binary(bytes)) => {
                if let Ok(ServerFrame::Snapshot {
                    entity: e,
                    snapshot,
                }) = decode_server(&bytes)
                {
                    if e == entity && snapshot.frame == frame {
                        return snapshot;
                    }
                }
            }
            Ok(Outbound::Control(_)) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => panic!("session closed"),
        }
    }
}

#[tokio::test]
async fn owner_prediction_matches_running_session() {
    let registry = Arc::new(SessionRegistry::new());
    let session = registry.open(settings());
    let mut broadcasts = session.subscribe();

    let entity = Uuid::new_v4();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    assert_ok!(
        session
            .input_tx
            .send(EntityInput {
                entity_id: entity,
                kind: InputKind::Join {
                    display_name: "owner".to_string(),
                    reply: reply_tx,
                },
            })
            .await
    );

    let joined = timeout(Duration::from_secs(2), reply_rx.recv())
        .await
        .expect("join reply in time")
        .expect("reply channel open");
    let spawn = match joined {
        Outbound::Control(ServerMsg::SessionJoined { entities, .. }) => entities
            .into_iter()
            .find(|e| e.entity_id == entity)
            .expect("own entity listed")
            .position,
        other => panic!("unexpected {other:?}"),
    };

    // The client knows the same island layout the session uses
    let world = World::archipelago(settings().island_count);
    let feed = authority_feed();
    let mut owner = OwnerDriver::new(
        settings().sync,
        PlayerState::new(entity, Vec3::from_array(spawn)),
        &feed,
        Arc::new(FixedLatency(Duration::from_millis(20))),
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(16));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    for i in 0..40 {
        ticker.tick().await;
        if i % 10 < 6 {
            owner.input().request_move_right();
        }
        if i == 20 {
            owner.input().request_jump();
        }
        let out = owner.tick(Instant::now(), &world);
        if let Some(batch) = out.batch {
            send_batch(&session, entity, &batch).await;
        }
        owner.physics_step(1.0 / 60.0);
        pump(&mut broadcasts, entity, &feed);
    }

    // Let the flush interval elapse so the last frame goes out
    tokio::time::sleep(Duration::from_millis(40)).await;
    let out = owner.tick(Instant::now(), &world);
    let batch = out.batch.expect("final flush");
    send_batch(&session, entity, &batch).await;

    let last = owner.frame();
    let published = timeout(
        Duration::from_secs(2),
        snapshot_for(&mut broadcasts, entity, last),
    )
    .await
    .expect("snapshot for the final frame");

    assert!(published.position.distance(owner.state().position) < 1e-4);
    assert_eq!(owner.reconciler().corrections(), 0);
    assert_eq!(registry.total_entities(), 1);
}
