//! # Circuit Breaker Module
//!
//! A three-state guard around each registered provider. Breakers prevent
//! cascading failures by rejecting selection of a provider that keeps
//! failing, then probing it with single trial requests once a recovery
//! timeout elapses.
//!
//! ## States
//!
//! - **Closed**: normal operation; consecutive failures are counted, and
//!   reaching `failure_threshold` opens the circuit
//! - **Open**: selection is rejected until `recovery_timeout` elapses,
//!   then the breaker moves to half-open
//! - **HalfOpen**: one trial request at a time; `success_threshold`
//!   consecutive successes close the circuit, any failure reopens it and
//!   restarts the recovery timer
//!
//! The breaker owns no lock: it lives inside a registry entry, and every
//! mutation happens under the registry's write lock. Cancelled attempts
//! are "dropped" — the trial slot is released without crediting a success
//! or a failure.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Circuit breaker operational states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, requests allowed
    Closed,
    /// Failure detected, requests rejected
    Open,
    /// Testing recovery with single trial requests
    HalfOpen,
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Whether the breaker participates in viability checks
    pub enabled: bool,
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Time the circuit stays open before testing recovery
    #[serde(with = "crate::duration_serde")]
    pub recovery_timeout: Duration,
    /// Consecutive half-open successes required to close
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
        }
    }
}

/// Per-provider circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_count: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl CircuitBreaker {
    /// Create a closed breaker with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            half_open_successes: 0,
            opened_at: None,
            trial_in_flight: false,
        }
    }

    /// Current state, without transitioning.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Consecutive failures observed in the current closed period.
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Whether selection would currently be admitted.
    ///
    /// Does not mutate: an open breaker whose recovery timeout has elapsed
    /// reports `true` here and performs the open → half-open transition in
    /// [`CircuitBreaker::try_acquire`].
    pub fn available(&self) -> bool {
        if !self.config.enabled {
            return true;
        }
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => self
                .opened_at
                .map(|at| at.elapsed() >= self.config.recovery_timeout)
                .unwrap_or(true),
            CircuitState::HalfOpen => !self.trial_in_flight,
        }
    }

    /// Admit one attempt, transitioning open → half-open when the
    /// recovery timeout has elapsed. Returns `false` when the attempt
    /// must be rejected.
    pub fn try_acquire(&mut self) -> bool {
        if !self.config.enabled {
            return true;
        }
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let recovered = self
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true);
                if recovered {
                    self.state = CircuitState::HalfOpen;
                    self.half_open_successes = 0;
                    self.trial_in_flight = true;
                    tracing::info!("circuit breaker transitioning to HALF-OPEN");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    false
                } else {
                    self.trial_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful attempt.
    pub fn on_success(&mut self) {
        match self.state {
            CircuitState::Closed => {
                self.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                self.trial_in_flight = false;
                self.half_open_successes += 1;
                if self.half_open_successes >= self.config.success_threshold {
                    self.state = CircuitState::Closed;
                    self.failure_count = 0;
                    self.half_open_successes = 0;
                    self.opened_at = None;
                    tracing::info!("circuit breaker transitioning to CLOSED");
                }
            }
            CircuitState::Open => {
                // A success can land here when the attempt started before
                // the circuit opened; it carries no credit
            }
        }
    }

    /// Record a failed attempt.
    pub fn on_failure(&mut self) {
        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.config.failure_threshold {
                    self.state = CircuitState::Open;
                    self.opened_at = Some(Instant::now());
                    tracing::warn!(
                        failures = self.failure_count,
                        "circuit breaker transitioning to OPEN"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.opened_at = Some(Instant::now());
                self.trial_in_flight = false;
                self.half_open_successes = 0;
                tracing::warn!("circuit breaker transitioning back to OPEN");
            }
            CircuitState::Open => {
                self.failure_count += 1;
            }
        }
    }

    /// Release an attempt that was cancelled before completing.
    ///
    /// The attempt counts as neither a success nor a failure; a half-open
    /// trial slot is freed so the next attempt can probe.
    pub fn on_dropped(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.trial_in_flight = false;
        }
    }

    /// Manually open the circuit (operational override).
    pub fn force_open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.trial_in_flight = false;
        tracing::info!("circuit breaker manually forced to OPEN");
    }

    /// Manually close the circuit and clear its counters.
    pub fn force_closed(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.half_open_successes = 0;
        self.opened_at = None;
        self.trial_in_flight = false;
        tracing::info!("circuit breaker manually forced to CLOSED");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, recovery: Duration, success_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            enabled: true,
            failure_threshold,
            recovery_timeout: recovery,
            success_threshold,
        })
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let mut cb = breaker(5, Duration::from_secs(60), 3);
        for _ in 0..4 {
            assert!(cb.try_acquire());
            cb.on_failure();
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        assert!(cb.try_acquire());
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire());
    }

    #[test]
    fn success_resets_failure_count_when_closed() {
        let mut cb = breaker(3, Duration::from_secs(60), 1);
        cb.on_failure();
        cb.on_failure();
        cb.on_success();
        assert_eq!(cb.failure_count(), 0);
        cb.on_failure();
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn recovery_timeline_requires_consecutive_successes() {
        // Scaled-down version of the production timeline: threshold 5,
        // 100ms recovery, 3 successes to close
        let mut cb = breaker(5, Duration::from_millis(100), 3);
        for _ in 0..5 {
            cb.on_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);

        // Before the recovery timeout: rejected
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!cb.try_acquire());

        // After the recovery timeout: one trial admitted
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cb.try_acquire());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // Only one trial at a time
        assert!(!cb.try_acquire());

        cb.on_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.try_acquire());
        cb.on_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Third consecutive success closes
        assert!(cb.try_acquire());
        cb.on_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_and_restarts_timer() {
        let mut cb = breaker(1, Duration::from_millis(60), 2);
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cb.try_acquire());
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        // Timer restarted: still rejected shortly after the reopen
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!cb.try_acquire());
    }

    #[tokio::test]
    async fn dropped_trial_frees_the_slot_without_credit() {
        let mut cb = breaker(1, Duration::from_millis(20), 2);
        cb.on_failure();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cb.try_acquire());
        cb.on_dropped();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Slot released, next trial admitted; no success was credited
        assert!(cb.try_acquire());
        cb.on_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn disabled_breaker_always_admits() {
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig {
            enabled: false,
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 1,
        });
        cb.on_failure();
        cb.on_failure();
        assert!(cb.try_acquire());
        assert!(cb.available());
    }

    #[test]
    fn force_transitions() {
        let mut cb = breaker(5, Duration::from_secs(60), 3);
        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire());
        cb.force_closed();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire());
    }
}
