//! Circuit breaker for the remote ANN backend
//!
//! The remote index is a single point of failure for the whole pipeline:
//! after a run of consecutive failures the breaker opens and calls fail
//! fast with a transient error until a cooldown elapses, then one probe is
//! allowed through (half-open). A success closes the breaker.

use ragkit_core::{RagkitError, Result};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            state: Mutex::new(BreakerState {
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Check whether a call may proceed. Fails fast with a transient
    /// `Unavailable` error while the breaker is open; once the cooldown has
    /// elapsed a single caller is let through as a probe.
    pub fn check(&self) -> Result<()> {
        let state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(opened_at) = state.opened_at {
            if opened_at.elapsed() < self.cooldown {
                return Err(RagkitError::Unavailable(format!(
                    "circuit breaker open after {} consecutive failures",
                    state.consecutive_failures
                )));
            }
            tracing::info!("circuit breaker half-open, allowing probe");
        }
        Ok(())
    }

    pub fn record_success(&self) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.opened_at.is_some() {
            tracing::info!("circuit breaker closed after successful probe");
        }
        state.consecutive_failures = 0;
        state.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.failure_threshold {
            if state.opened_at.is_none() {
                tracing::warn!(
                    failures = state.consecutive_failures,
                    "circuit breaker opened"
                );
            }
            state.opened_at = Some(Instant::now());
        }
    }

    pub fn is_open(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.opened_at.map(|t| t.elapsed() < self.cooldown).unwrap_or(false))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(breaker.check().is_ok());

        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.check().is_ok());

        breaker.record_failure();
        assert!(breaker.is_open());
        let err = breaker.check().unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn success_closes_breaker() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.record_failure();
        assert!(breaker.check().is_err());

        breaker.record_success();
        assert!(breaker.check().is_ok());
        assert!(!breaker.is_open());
    }

    #[test]
    fn half_open_probe_after_cooldown() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record_failure();
        // Zero cooldown elapses immediately: a probe is allowed.
        assert!(breaker.check().is_ok());
        // A failed probe re-opens it.
        breaker.record_failure();
        assert!(breaker.check().is_ok()); // still zero cooldown
        breaker.record_success();
        assert!(!breaker.is_open());
    }
}
