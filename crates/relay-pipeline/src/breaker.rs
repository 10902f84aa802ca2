//! Per-backend circuit breaker
//!
//! Stops sending requests to a consistently failing backend for a cooldown
//! period, then lazily resets when the next request is polled.

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use crate::types::CircuitBreakerConfig;

#[derive(Debug, Default)]
struct BreakerState {
    failure_count: u32,
    opened_at: Option<Instant>,
}

/// Two-state (closed/open) time-based circuit breaker
///
/// There is no half-open probe state: once the reset timeout elapses the
/// breaker closes fully and the next request is treated like any other.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Whether a request may proceed
    ///
    /// Resets the breaker when the reset timeout has elapsed since it opened.
    pub fn allow_request(&self) -> bool {
        let mut state = self.lock();
        match state.opened_at {
            None => true,
            Some(opened_at) => {
                if opened_at.elapsed() >= self.config.reset_timeout {
                    state.failure_count = 0;
                    state.opened_at = None;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful request, closing the breaker unconditionally
    pub fn record_success(&self) {
        let mut state = self.lock();
        state.failure_count = 0;
        state.opened_at = None;
    }

    /// Record a failed request
    ///
    /// Returns `true` when this failure tripped the breaker open.
    pub fn record_failure(&self) -> bool {
        let mut state = self.lock();
        state.failure_count += 1;
        if state.failure_count >= self.config.failure_threshold && state.opened_at.is_none() {
            state.opened_at = Some(Instant::now());
            return true;
        }
        false
    }

    /// Current consecutive failure count
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Whether the breaker is currently open (non-mutating peek)
    pub fn is_open(&self) -> bool {
        self.lock().opened_at.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn breaker(threshold: u32, reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout: reset,
        })
    }

    #[test]
    fn closed_breaker_allows_requests() {
        let breaker = breaker(3, Duration::from_secs(30));
        assert!(breaker.allow_request());
        assert!(!breaker.is_open());
    }

    #[test]
    fn failures_below_threshold_stay_closed() {
        let breaker = breaker(3, Duration::from_secs(30));
        assert!(!breaker.record_failure());
        assert!(!breaker.record_failure());
        assert!(breaker.allow_request());
        assert_eq!(breaker.failure_count(), 2);
    }

    #[test]
    fn failures_at_threshold_open_the_breaker() {
        let breaker = breaker(3, Duration::from_secs(30));
        assert!(!breaker.record_failure());
        assert!(!breaker.record_failure());
        assert!(breaker.record_failure());
        assert!(!breaker.allow_request());
        assert!(breaker.is_open());
    }

    #[test]
    fn success_resets_unconditionally() {
        let breaker = breaker(2, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.allow_request());

        breaker.record_success();
        assert!(breaker.allow_request());
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn reset_timeout_lazily_closes_and_clears_count() {
        let breaker = breaker(1, Duration::from_millis(40));
        breaker.record_failure();
        assert!(!breaker.allow_request());

        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.allow_request());
        assert_eq!(breaker.failure_count(), 0);
        assert!(!breaker.is_open());
    }

    #[test]
    fn reopens_on_single_failure_after_reset() {
        // No half-open probe: the first failure after a lazy reset can
        // immediately retrip a threshold-1 breaker.
        let breaker = breaker(1, Duration::from_millis(40));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.allow_request());

        assert!(breaker.record_failure());
        assert!(!breaker.allow_request());
    }
}
