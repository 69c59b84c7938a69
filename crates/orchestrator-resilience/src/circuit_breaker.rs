//! Circuit breaker pattern implementation.
//!
//! One breaker per provider. The state machine follows
//! `closed → open → half_open → closed`: N consecutive failures open the
//! circuit, an exponentially growing cooldown gates the half-open trial, and
//! exactly one in-flight trial call is permitted while half-open. A trial
//! success closes the circuit; a trial failure reopens it with an extended
//! cooldown.

use orchestrator_core::{GatewayError, ProviderId};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CircuitState {
    /// Circuit is closed, calls flow normally.
    Closed = 0,
    /// Circuit is open, calls are rejected without a network attempt.
    Open = 1,
    /// Circuit is half-open, one trial call is testing recovery.
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Initial cooldown before a half-open trial is allowed.
    pub cooldown: Duration,
    /// Cap for the exponentially growing cooldown on repeated trips.
    pub max_cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(600),
        }
    }
}

/// Circuit breaker for a single provider.
pub struct CircuitBreaker {
    provider_id: ProviderId,
    config: CircuitBreakerConfig,
    /// Current state (atomic for lock-free reads).
    state: AtomicU8,
    /// Consecutive failures observed while closed.
    consecutive_failures: AtomicU32,
    /// Times the circuit has opened since it last fully closed.
    trip_count: AtomicU32,
    /// When the circuit opened (milliseconds since epoch).
    opened_at: AtomicU64,
    /// Whether the single half-open trial slot is taken.
    trial_in_flight: AtomicBool,
    /// Lock serializing state transitions.
    transition_lock: RwLock<()>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    #[must_use]
    pub fn new(provider_id: ProviderId, config: CircuitBreakerConfig) -> Self {
        Self {
            provider_id,
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            trip_count: AtomicU32::new(0),
            opened_at: AtomicU64::new(0),
            trial_in_flight: AtomicBool::new(false),
            transition_lock: RwLock::new(()),
        }
    }

    /// Create with default configuration.
    #[must_use]
    pub fn with_defaults(provider_id: ProviderId) -> Self {
        Self::new(provider_id, CircuitBreakerConfig::default())
    }

    /// Get the provider ID.
    #[must_use]
    pub fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Whether routing should consider this provider at all.
    #[must_use]
    pub fn is_open(&self) -> bool {
        match self.state() {
            CircuitState::Open => !self.cooldown_elapsed(),
            _ => false,
        }
    }

    /// Check whether a call may proceed.
    ///
    /// In half-open state only one concurrent caller acquires the trial
    /// slot; everyone else is rejected until the trial resolves.
    ///
    /// # Errors
    /// Returns `GatewayError::CircuitOpen` if the circuit rejects the call.
    pub fn check(&self) -> Result<(), GatewayError> {
        match self.state() {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                if self.cooldown_elapsed() {
                    self.transition_to_half_open();
                    self.try_claim_trial()
                } else {
                    Err(GatewayError::circuit_open(self.provider_id.clone()))
                }
            }
            CircuitState::HalfOpen => self.try_claim_trial(),
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
            }
            CircuitState::HalfOpen => {
                // One trial success closes the circuit.
                debug!(provider = %self.provider_id, "half-open trial succeeded");
                self.transition_to_closed();
            }
            CircuitState::Open => {
                // A call dispatched just before the trip completed late.
                self.consecutive_failures.store(0, Ordering::Relaxed);
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        match self.state() {
            CircuitState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.config.failure_threshold {
                    debug!(
                        provider = %self.provider_id,
                        failures,
                        threshold = self.config.failure_threshold,
                        "failure threshold reached"
                    );
                    self.transition_to_open();
                }
            }
            CircuitState::HalfOpen => {
                debug!(provider = %self.provider_id, "half-open trial failed, reopening");
                self.transition_to_open();
            }
            CircuitState::Open => {}
        }
    }

    /// Cooldown for the current trip count, doubling per trip up to the cap.
    #[must_use]
    pub fn current_cooldown(&self) -> Duration {
        let trips = self.trip_count.load(Ordering::Relaxed).max(1);
        let factor = 2_u32.saturating_pow(trips.saturating_sub(1).min(16));
        self.config
            .cooldown
            .saturating_mul(factor)
            .min(self.config.max_cooldown)
    }

    fn cooldown_elapsed(&self) -> bool {
        let opened_at = self.opened_at.load(Ordering::Acquire);
        if opened_at == 0 {
            return false;
        }
        let elapsed = now_millis().saturating_sub(opened_at);
        elapsed >= self.current_cooldown().as_millis() as u64
    }

    fn try_claim_trial(&self) -> Result<(), GatewayError> {
        if self
            .trial_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Ok(())
        } else {
            Err(GatewayError::circuit_open(self.provider_id.clone()))
        }
    }

    fn transition_to_open(&self) {
        let _guard = self.transition_lock.write();

        let prev_state = self.state.swap(CircuitState::Open as u8, Ordering::Release);
        self.trial_in_flight.store(false, Ordering::Release);

        if prev_state != CircuitState::Open as u8 {
            self.opened_at.store(now_millis(), Ordering::Release);
            let trips = self.trip_count.fetch_add(1, Ordering::Relaxed) + 1;

            warn!(
                provider = %self.provider_id,
                trips,
                cooldown_ms = self.current_cooldown().as_millis() as u64,
                "circuit breaker opened"
            );
        }
    }

    fn transition_to_half_open(&self) {
        let _guard = self.transition_lock.write();

        // Re-check under the lock; a racing caller may have won.
        if self.state.load(Ordering::Acquire) == CircuitState::Open as u8 && self.cooldown_elapsed()
        {
            self.state
                .store(CircuitState::HalfOpen as u8, Ordering::Release);
            self.trial_in_flight.store(false, Ordering::Release);

            info!(provider = %self.provider_id, "circuit breaker half-open, testing");
        }
    }

    fn transition_to_closed(&self) {
        let _guard = self.transition_lock.write();

        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.trip_count.store(0, Ordering::Relaxed);
        self.opened_at.store(0, Ordering::Release);
        self.trial_in_flight.store(false, Ordering::Release);

        info!(provider = %self.provider_id, "circuit breaker closed");
    }

    /// Reset the breaker to closed (manual intervention).
    pub fn reset(&self) {
        self.transition_to_closed();
    }

    /// Current statistics snapshot.
    #[must_use]
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            state: self.state(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            trip_count: self.trip_count.load(Ordering::Relaxed),
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Point-in-time breaker statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures observed while closed.
    pub consecutive_failures: u32,
    /// Times the circuit has opened since last fully closing.
    pub trip_count: u32,
}

/// Registry holding one breaker per provider.
pub struct CircuitBreakerRegistry {
    breakers: dashmap::DashMap<ProviderId, Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    /// Create a registry applying `config` to every breaker it creates.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: dashmap::DashMap::new(),
            config,
        }
    }

    /// Get the breaker for a provider, creating it on first use.
    #[must_use]
    pub fn get_or_create(&self, provider_id: &ProviderId) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(provider_id.clone())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    provider_id.clone(),
                    self.config.clone(),
                ))
            })
            .clone()
    }

    /// Whether the provider's circuit is currently open.
    #[must_use]
    pub fn is_open(&self, provider_id: &ProviderId) -> bool {
        self.breakers
            .get(provider_id)
            .map_or(false, |breaker| breaker.is_open())
    }

    /// Snapshot every registered breaker.
    #[must_use]
    pub fn snapshots(&self) -> Vec<(ProviderId, CircuitBreakerSnapshot)> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }
}
