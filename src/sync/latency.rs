//! Latency estimates handed to the batcher as an explicit capability

use std::time::Duration;

use parking_lot::Mutex;

/// Capability object for network-derived facts the core needs.
///
/// Passed in at construction; the core never reaches for a global session.
pub trait NetworkContext: Send + Sync {
    /// Current round-trip latency estimate
    fn latency(&self) -> Duration;
}

/// Constant latency, handy for tests and local play
#[derive(Debug, Clone, Copy)]
pub struct FixedLatency(pub Duration);

impl NetworkContext for FixedLatency {
    fn latency(&self) -> Duration {
        self.0
    }
}

/// Smoothed round-trip estimate fed by ping/pong samples
#[derive(Debug)]
pub struct LatencyTracker {
    /// Weight of each new sample
    alpha: f64,
    estimate: Mutex<Option<f64>>,
}

impl LatencyTracker {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.01, 1.0),
            estimate: Mutex::new(None),
        }
    }

    /// Record a round trip measured from a pong carrying `sent_at_millis`
    pub fn record_pong(&self, sent_at_millis: u64, now_millis: u64) {
        let rtt = now_millis.saturating_sub(sent_at_millis);
        self.record(Duration::from_millis(rtt));
    }

    pub fn record(&self, rtt: Duration) {
        let sample = rtt.as_secs_f64();
        let mut estimate = self.estimate.lock();
        *estimate = Some(match *estimate {
            Some(prev) => prev + self.alpha * (sample - prev),
            None => sample,
        });
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new(0.125)
    }
}

impl NetworkContext for LatencyTracker {
    fn latency(&self) -> Duration {
        let estimate = *self.estimate.lock();
        estimate.map(Duration::from_secs_f64).unwrap_or(Duration::ZERO)
    }
}
