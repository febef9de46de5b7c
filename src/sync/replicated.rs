//! Replicated authority state with explicit change notification

use std::sync::Arc;

use glam::Quat;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::log::Snapshot;

type Listener<T> = Box<dyn Fn(&T, &T) + Send + Sync>;

/// A value written by one party and read by many.
///
/// Writes happen under a single lock, so readers see either the previous or
/// the new value, never a mix. Listeners run after the write with
/// `(old, new)`, in subscription order.
pub struct ReplicatedVar<T> {
    value: RwLock<T>,
    listeners: RwLock<Vec<Listener<T>>>,
}

impl<T: Clone + Send + Sync + 'static> ReplicatedVar<T> {
    pub fn new(initial: T) -> Self {
        Self {
            value: RwLock::new(initial),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn get(&self) -> T {
        (*self.value.read()).clone()
    }

    pub fn set(&self, new: T) {
        self.update(|value| *value = new);
    }

    /// Mutate in place under the write lock, then notify
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let (old, new) = {
            let mut value = self.value.write();
            let old = (*value).clone();
            f(&mut *value);
            (old, (*value).clone())
        };
        for listener in self.listeners.read().iter() {
            listener(&old, &new);
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&T, &T) + Send + Sync + 'static) {
        self.listeners.write().push(Box::new(listener));
    }

    /// Forward every new value into a channel, to be drained at a safe point
    /// such as the start of a tick.
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(move |_, new| {
            let _ = tx.send(new.clone());
        });
        rx
    }
}

/// What the authority publishes for one entity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuthorityState {
    /// Last simulated frame and the position it produced
    pub snapshot: Option<Snapshot>,
    /// Published separately from the frame-indexed position
    pub rotation: Quat,
}

impl Default for AuthorityState {
    fn default() -> Self {
        Self {
            snapshot: None,
            rotation: Quat::IDENTITY,
        }
    }
}

pub type AuthorityFeed = Arc<ReplicatedVar<AuthorityState>>;

pub fn authority_feed() -> AuthorityFeed {
    Arc::new(ReplicatedVar::new(AuthorityState::default()))
}
