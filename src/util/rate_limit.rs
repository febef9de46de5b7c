//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Command batches per second per connection
pub const BATCH_RATE_LIMIT: u32 = 60;

/// JSON control messages per second per connection
pub const CONTROL_RATE_LIMIT: u32 = 10;

/// Per-connection rate limiter state
#[derive(Clone)]
pub struct ConnectionRateLimiter {
    batch_limiter: Arc<Limiter>,
    control_limiter: Arc<Limiter>,
}

impl ConnectionRateLimiter {
    pub fn new() -> Self {
        Self {
            batch_limiter: create_limiter(BATCH_RATE_LIMIT),
            control_limiter: create_limiter(CONTROL_RATE_LIMIT),
        }
    }

    /// Check if a binary command batch is allowed
    pub fn check_batch(&self) -> bool {
        self.batch_limiter.check().is_ok()
    }

    /// Check if a control message is allowed
    pub fn check_control(&self) -> bool {
        self.control_limiter.check().is_ok()
    }
}

impl Default for ConnectionRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_above_quota_is_refused() {
        let limiter = ConnectionRateLimiter::new();
        let allowed = (0..CONTROL_RATE_LIMIT * 2)
            .filter(|_| limiter.check_control())
            .count();
        assert_eq!(allowed, CONTROL_RATE_LIMIT as usize);
        assert!(limiter.check_batch());
    }
}
