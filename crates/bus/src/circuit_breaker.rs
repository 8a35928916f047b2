// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fast-fail gate in front of the remote transport (§4.A).

use std::time::Duration;

use ghost_core::Clock;
use parking_lot::Mutex;

/// Probe outcome to report to [`CircuitBreaker::allowed`] callers so they know
/// whether this call is an ordinary request or the single HalfOpen probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    failure_count: u32,
    open_until_ms: u64,
}

/// Closed → Open after `max_failures` consecutive failures; Open → HalfOpen
/// after `reset_timeout` elapses; HalfOpen's single probe either restores
/// Closed (on success) or re-opens the breaker (on failure).
pub struct CircuitBreaker<C: Clock> {
    clock: C,
    max_failures: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

impl<C: Clock> CircuitBreaker<C> {
    pub fn new(clock: C) -> Self {
        Self::with_params(clock, 3, Duration::from_secs(15))
    }

    pub fn with_params(clock: C, max_failures: u32, reset_timeout: Duration) -> Self {
        Self {
            clock,
            max_failures,
            reset_timeout,
            inner: Mutex::new(Inner { state: BreakerState::Closed, failure_count: 0, open_until_ms: 0 }),
        }
    }

    /// Whether a call should be attempted right now. Transitions Open→HalfOpen
    /// in place when `open_until_ms` has elapsed, per §4.A.
    pub fn allowed(&self) -> bool {
        self.state() != BreakerState::Open
    }

    /// Current state, performing the lazy Open→HalfOpen transition.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::Open && self.clock.epoch_ms() >= inner.open_until_ms {
            inner.state = BreakerState::HalfOpen;
        }
        inner.state
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.state = BreakerState::Closed;
            inner.failure_count = 0;
        }
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.open_until_ms = self.clock.epoch_ms() + self.reset_timeout.as_millis() as u64;
            }
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.max_failures {
                    inner.state = BreakerState::Open;
                    inner.open_until_ms =
                        self.clock.epoch_ms() + self.reset_timeout.as_millis() as u64;
                }
            }
            BreakerState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use ghost_core::FakeClock;

    use super::*;

    #[test]
    fn opens_after_max_failures_and_denies() {
        let clock = FakeClock::new();
        let breaker = CircuitBreaker::with_params(clock, 3, Duration::from_secs(15));
        breaker.on_failure();
        breaker.on_failure();
        assert!(breaker.allowed());
        breaker.on_failure();
        assert!(!breaker.allowed());
    }

    #[test]
    fn half_opens_after_reset_timeout_then_closes_on_success() {
        let clock = FakeClock::new();
        let breaker = CircuitBreaker::with_params(clock.clone(), 1, Duration::from_secs(15));
        breaker.on_failure();
        assert!(!breaker.allowed());

        clock.advance(Duration::from_secs(15));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(breaker.allowed());

        breaker.on_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_and_resets_timer() {
        let clock = FakeClock::new();
        let breaker = CircuitBreaker::with_params(clock.clone(), 1, Duration::from_secs(15));
        breaker.on_failure();
        clock.advance(Duration::from_secs(15));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        clock.advance(Duration::from_secs(14));
        assert_eq!(breaker.state(), BreakerState::Open);
        clock.advance(Duration::from_secs(1));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn closed_success_is_a_no_op() {
        let clock = FakeClock::new();
        let breaker = CircuitBreaker::with_params(clock, 3, Duration::from_secs(15));
        breaker.on_failure();
        breaker.on_success();
        breaker.on_failure();
        breaker.on_failure();
        assert!(!breaker.allowed(), "on_success in Closed must not clear failure_count");
    }
}
