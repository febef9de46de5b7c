//! Outbound command batching with latency-adaptive retention

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::input::InputCommand;
use super::latency::NetworkContext;
use super::log::CommandLog;

/// Batch size thresholds by round-trip latency
pub const BATCH_SIZE_LOW_LATENCY: usize = 10;
pub const BATCH_SIZE_MID_LATENCY: usize = 15;
pub const BATCH_SIZE_HIGH_LATENCY: usize = 20;

const MID_LATENCY: Duration = Duration::from_millis(100);
const HIGH_LATENCY: Duration = Duration::from_millis(200);

/// Pick how many frames must stay replayable for a given round trip.
///
/// Higher latency means more frames are in flight before the authority
/// answers, so the retained window grows with it.
pub fn batch_size_for_latency(latency: Duration) -> usize {
    if latency < MID_LATENCY {
        BATCH_SIZE_LOW_LATENCY
    } else if latency < HIGH_LATENCY {
        BATCH_SIZE_MID_LATENCY
    } else {
        BATCH_SIZE_HIGH_LATENCY
    }
}

/// Batcher tunables
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatcherSettings {
    /// Minimum spacing between two flushes
    pub flush_interval: Duration,
    /// How often the latency estimate is consulted
    pub resize_interval: Duration,
    /// Batch size before the first latency sample
    pub initial_batch_size: usize,
    /// Already-sent commands to repeat at the head of each batch
    pub redundancy: usize,
}

impl Default for BatcherSettings {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(30),
            resize_interval: Duration::from_millis(500),
            initial_batch_size: BATCH_SIZE_HIGH_LATENCY,
            redundancy: 4,
        }
    }
}

/// Accumulates commands, hands out batches on a fixed interval and keeps the
/// replay history used by reconciliation.
pub struct CommandBatcher {
    settings: BatcherSettings,
    network: Arc<dyn NetworkContext>,
    batch_size: usize,
    /// Not yet sent
    pending: CommandLog,
    /// Everything recent, sent or not, for replay
    history: CommandLog,
    /// Recently sent, for redundant resend
    sent: CommandLog,
    last_flush: Option<Instant>,
    last_resize: Option<Instant>,
    /// Unsent commands pushed out of `pending` before a flush
    dropped_unsent: u64,
}

impl CommandBatcher {
    pub fn new(settings: BatcherSettings, network: Arc<dyn NetworkContext>) -> Self {
        let batch_size = settings.initial_batch_size.max(1);
        Self {
            settings,
            network,
            batch_size,
            pending: CommandLog::new(batch_size),
            history: CommandLog::new(batch_size),
            sent: CommandLog::new(settings.redundancy.max(1)),
            last_flush: None,
            last_resize: None,
            dropped_unsent: 0,
        }
    }

    /// Queue a command for sending and keep it for replay
    pub fn record(&mut self, command: InputCommand) {
        if self.pending.len() >= self.pending.capacity() {
            if let Some(oldest) = self.pending.oldest() {
                warn!(
                    frame = %oldest.frame,
                    batch_size = self.batch_size,
                    "Pending buffer full, dropping unsent command"
                );
            }
            self.dropped_unsent += 1;
        }
        self.pending.push(command);
        self.history.push(command);
    }

    /// Return the pending batch if the flush interval elapsed and there is
    /// anything to send. Never blocks; an empty buffer yields `None`.
    pub fn maybe_flush(&mut self, now: Instant) -> Option<Vec<InputCommand>> {
        let due = self
            .last_flush
            .map_or(true, |last| now.duration_since(last) >= self.settings.flush_interval);
        if !due {
            return None;
        }
        self.last_flush = Some(now);

        if self.pending.is_empty() {
            return None;
        }

        let fresh: Vec<InputCommand> = self.pending.iter().copied().collect();
        self.pending.clear();

        let mut batch = Vec::with_capacity(self.batch_size);
        if self.settings.redundancy > 0 {
            let room = self
                .batch_size
                .saturating_sub(fresh.len())
                .min(self.settings.redundancy);
            let skip = self.sent.len().saturating_sub(room);
            batch.extend(self.sent.iter().skip(skip).copied());
            for command in &fresh {
                self.sent.push(*command);
            }
        }
        batch.extend(fresh);

        debug!(
            commands = batch.len(),
            first_frame = %batch[0].frame,
            "Flushing command batch"
        );
        Some(batch)
    }

    /// Consult the latency estimate if the resize cadence elapsed.
    /// Returns the new size when it changed.
    pub fn maybe_resize(&mut self, now: Instant) -> Option<usize> {
        let due = self
            .last_resize
            .map_or(true, |last| now.duration_since(last) >= self.settings.resize_interval);
        if !due {
            return None;
        }
        self.last_resize = Some(now);

        let latency = self.network.latency();
        let size = batch_size_for_latency(latency);
        if size == self.batch_size {
            return None;
        }
        debug!(
            latency_ms = latency.as_millis() as u64,
            from = self.batch_size,
            to = size,
            "Adjusting batch size"
        );
        self.set_batch_size(size);
        Some(size)
    }

    pub fn set_batch_size(&mut self, size: usize) {
        self.batch_size = size.max(1);
        self.pending.set_capacity(self.batch_size);
        self.history.set_capacity(self.batch_size);
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn history(&self) -> &CommandLog {
        &self.history
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn dropped_unsent(&self) -> u64 {
        self.dropped_unsent
    }
}
