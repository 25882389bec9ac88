//! Handshake budget - token bucket on the monotonic clock

use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Capacity `N`, one token back every `refill` (never, when `None`)
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    refill: Option<Duration>,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Starts full
    pub fn new(capacity: u32, refill: Option<Duration>) -> Self {
        Self {
            capacity,
            refill: refill.filter(|d| !d.is_zero()),
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Take one token if available
    pub fn try_take(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        self.refill_locked(&mut state, now);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens currently available
    pub fn available(&self, now: Instant) -> u32 {
        let mut state = self.state.lock();
        self.refill_locked(&mut state, now);
        state.tokens.floor() as u32
    }

    fn refill_locked(&self, state: &mut BucketState, now: Instant) {
        let period = match self.refill {
            Some(p) => p,
            None => return,
        };
        // Older `now` values add nothing
        let elapsed = now.saturating_duration_since(state.last_refill);
        if elapsed.is_zero() {
            return;
        }
        let added = elapsed.as_secs_f64() / period.as_secs_f64();
        state.tokens = (state.tokens + added).min(self.capacity as f64);
        state.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_without_refill() {
        let bucket = TokenBucket::new(3, None);
        let now = Instant::now();

        assert!(bucket.try_take(now));
        assert!(bucket.try_take(now));
        assert!(bucket.try_take(now));
        assert!(!bucket.try_take(now + Duration::from_secs(3600)));
        assert_eq!(bucket.available(now), 0);
    }

    #[test]
    fn test_refill_one_token_per_period() {
        let bucket = TokenBucket::new(2, Some(Duration::from_secs(10)));
        let t0 = Instant::now();

        assert!(bucket.try_take(t0));
        assert!(bucket.try_take(t0));
        assert!(!bucket.try_take(t0 + Duration::from_secs(5)));
        assert!(bucket.try_take(t0 + Duration::from_secs(11)));
        assert!(!bucket.try_take(t0 + Duration::from_secs(12)));
    }

    #[test]
    fn test_refill_capped_at_capacity() {
        let bucket = TokenBucket::new(2, Some(Duration::from_secs(1)));
        let later = Instant::now() + Duration::from_secs(100);
        assert_eq!(bucket.available(later), 2);
    }

    #[test]
    fn test_zero_refill_means_never() {
        let bucket = TokenBucket::new(1, Some(Duration::ZERO));
        let now = Instant::now();
        assert!(bucket.try_take(now));
        assert!(!bucket.try_take(now + Duration::from_secs(1_000)));
    }
}
