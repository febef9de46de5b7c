//! Snapshot publishing: authority feeds to the session broadcast

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::sync::{AuthorityFeed, AuthorityState, PlayerState};
use crate::ws::protocol::{EntityInfo, Outbound};
use crate::ws::wire::{encode_rotation, encode_snapshot};

/// Forwards every authoritative publish onto the session's outbound channel
#[derive(Clone)]
pub struct SnapshotPublisher {
    outbound: broadcast::Sender<Outbound>,
}

impl SnapshotPublisher {
    pub fn new(outbound: broadcast::Sender<Outbound>) -> Self {
        Self { outbound }
    }

    /// Subscribe to an entity's feed. A new snapshot is sent together with the
    /// rotation; a rotation-only change sends just the rotation.
    pub fn attach(&self, entity: Uuid, feed: &AuthorityFeed) {
        let outbound = self.outbound.clone();
        feed.subscribe(move |old: &AuthorityState, new: &AuthorityState| {
            // No receivers is fine, nobody is watching yet
            if new.snapshot != old.snapshot {
                if let Some(snapshot) = new.snapshot {
                    let _ = outbound.send(Outbound::Binary(encode_snapshot(entity, &snapshot)));
                }
            } else if new.rotation == old.rotation {
                return;
            }
            let _ = outbound.send(Outbound::Binary(encode_rotation(entity, new.rotation)));
        });
    }
}

/// Join-time description of an entity
pub fn entity_info(display_name: &str, state: &PlayerState, health: f32) -> EntityInfo {
    EntityInfo {
        entity_id: state.entity,
        display_name: display_name.to_string(),
        position: state.position.to_array(),
        health,
    }
}
