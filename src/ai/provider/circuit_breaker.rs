//! Circuit Breaker
//!
//! Shared by the generation chain and the search pool: a provider that keeps
//! failing is skipped until its open timeout elapses.
//!
//! ```text
//! Closed --[failure_threshold reached]--> Open
//! Open --[timeout elapsed]--> HalfOpen
//! HalfOpen --[success]--> Closed
//! HalfOpen --[failure]--> Open
//! ```

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::constants::circuit_breaker as cb_constants;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Consecutive half-open successes before closing
    pub success_threshold: u32,
    /// Time spent open before probing
    pub open_timeout: Duration,
    /// Probe requests allowed while half-open
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: cb_constants::FAILURE_THRESHOLD,
            success_threshold: cb_constants::SUCCESS_THRESHOLD,
            open_timeout: Duration::from_secs(cb_constants::RECOVERY_TIMEOUT_SECS),
            half_open_max_requests: cb_constants::HALF_OPEN_MAX_REQUESTS,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            open_timeout,
            ..Default::default()
        }
    }
}

/// All mutable state behind one lock so counts and state move together
#[derive(Debug, Default)]
struct BreakerState {
    open_since: Option<Instant>,
    half_open: bool,
    consecutive_failures: u32,
    probe_successes: u32,
    probes_in_flight: u32,
    total_failures: u64,
    total_successes: u64,
    blocked: u64,
    last_error: Option<String>,
}

impl BreakerState {
    fn circuit(&self) -> CircuitState {
        match (self.open_since, self.half_open) {
            (_, true) => CircuitState::HalfOpen,
            (Some(_), false) => CircuitState::Open,
            (None, false) => CircuitState::Closed,
        }
    }

    fn trip(&mut self) {
        self.open_since = Some(Instant::now());
        self.half_open = false;
        self.probes_in_flight = 0;
        self.probe_successes = 0;
    }

    fn close(&mut self) {
        self.open_since = None;
        self.half_open = false;
        self.consecutive_failures = 0;
        self.probe_successes = 0;
        self.probes_in_flight = 0;
    }
}

/// Thread-safe circuit breaker for one named provider
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: RwLock<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: RwLock::new(BreakerState::default()),
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    fn read(&self) -> RwLockReadGuard<'_, BreakerState> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BreakerState> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open circuits whose timeout elapsed move to half-open
    fn promote_if_due(&self, state: &mut BreakerState) {
        if let Some(since) = state.open_since
            && !state.half_open
            && since.elapsed() >= self.config.open_timeout
        {
            state.half_open = true;
            state.probes_in_flight = 0;
            state.probe_successes = 0;
            tracing::info!("Circuit [{}]: half-open, probing recovery", self.name);
        }
    }

    pub fn state(&self) -> CircuitState {
        let mut state = self.write();
        self.promote_if_due(&mut state);
        state.circuit()
    }

    /// Whether the provider may be tried without consuming a probe slot
    pub fn is_available(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// Admit a request; half-open circuits admit a limited number of probes.
    pub fn allow_request(&self) -> bool {
        let mut state = self.write();
        self.promote_if_due(&mut state);

        let admitted = match state.circuit() {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if state.probes_in_flight < self.config.half_open_max_requests {
                    state.probes_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        };
        if !admitted {
            state.blocked += 1;
            tracing::debug!("Circuit [{}]: request blocked", self.name);
        }
        admitted
    }

    pub fn record_success(&self) {
        let mut state = self.write();
        state.total_successes += 1;
        state.consecutive_failures = 0;

        if state.half_open {
            state.probe_successes += 1;
            if state.probe_successes >= self.config.success_threshold {
                state.close();
                tracing::info!("Circuit [{}]: closed, provider recovered", self.name);
            }
        }
    }

    pub fn record_failure(&self, error: impl Into<String>) {
        let mut state = self.write();
        state.total_failures += 1;
        state.probe_successes = 0;
        state.last_error = Some(error.into());

        match state.circuit() {
            CircuitState::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    state.trip();
                    tracing::warn!(
                        "Circuit [{}]: opened after {} consecutive failures (retry in {:?})",
                        self.name,
                        state.consecutive_failures,
                        self.config.open_timeout
                    );
                }
            }
            CircuitState::HalfOpen => {
                state.trip();
                tracing::warn!("Circuit [{}]: probe failed, re-opened", self.name);
            }
            CircuitState::Open => {}
        }
    }

    /// Close the circuit and clear error counters; returns whether anything changed
    pub fn reset(&self) -> bool {
        let mut state = self.write();
        let dirty = state.circuit() != CircuitState::Closed
            || state.consecutive_failures > 0
            || state.total_failures > 0
            || state.last_error.is_some();
        state.close();
        state.total_failures = 0;
        state.blocked = 0;
        state.last_error = None;
        tracing::info!("Circuit [{}]: manually reset", self.name);
        dirty
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let mut state = self.write();
        self.promote_if_due(&mut state);
        CircuitBreakerStats {
            name: self.name.clone(),
            state: state.circuit(),
            consecutive_failures: state.consecutive_failures,
            total_failures: state.total_failures,
            total_successes: state.total_successes,
            blocked: state.blocked,
            open_for_secs: state
                .open_since
                .filter(|_| !state.half_open)
                .map(|since| since.elapsed().as_secs_f64()),
            last_error: state.last_error.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Snapshot for status endpoints and logs
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub blocked: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_for_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl CircuitBreakerStats {
    pub fn summary(&self) -> String {
        let open = self
            .open_for_secs
            .map(|secs| format!(" for {:.1}s", secs))
            .unwrap_or_default();
        format!(
            "[{}] {}{} | failures={} successes={} blocked={}",
            self.name, self.state, open, self.total_failures, self.total_successes, self.blocked
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            success_threshold: 1,
            open_timeout: Duration::from_millis(1),
            half_open_max_requests: 1,
        }
    }

    #[test]
    fn test_initial_state_is_closed() {
        let cb = CircuitBreaker::with_defaults("serper");
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
        assert!(cb.is_available());
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let cb = CircuitBreaker::new("openai", CircuitBreakerConfig::new(3, Duration::from_secs(60)));
        cb.record_failure("boom");
        cb.record_failure("boom");
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure("boom");
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
        assert!(!cb.is_available());
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let cb = CircuitBreaker::new("openai", CircuitBreakerConfig::new(3, Duration::from_secs(60)));
        cb.record_failure("a");
        cb.record_failure("b");
        cb.record_success();
        cb.record_failure("c");
        cb.record_failure("d");
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().total_failures, 4);
    }

    #[test]
    fn test_half_open_probe_closes_on_success() {
        let cb = CircuitBreaker::new("ollama", quick(1));
        cb.record_failure("down");
        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.allow_request());
        assert!(!cb.allow_request(), "only one probe at a time");

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_probe_failure_reopens() {
        let cb = CircuitBreaker::new("ollama", quick(1));
        cb.record_failure("down");
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure("still down");
        let stats = cb.stats();
        assert!(matches!(stats.state, CircuitState::Open | CircuitState::HalfOpen));
        assert_eq!(stats.last_error.as_deref(), Some("still down"));
    }

    #[test]
    fn test_reset_clears_errors() {
        let cb = CircuitBreaker::new("serper", CircuitBreakerConfig::new(1, Duration::from_secs(60)));
        assert!(!cb.reset(), "nothing to reset on a clean breaker");

        cb.record_failure("quota");
        assert!(!cb.allow_request());
        assert_eq!(cb.stats().blocked, 1);

        assert!(cb.reset());
        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.total_failures, 0);
        assert!(stats.last_error.is_none());
    }

    #[test]
    fn test_stats_serialize_snake_case() {
        let cb = CircuitBreaker::with_defaults("openai");
        let json = serde_json::to_value(cb.stats()).unwrap();
        assert_eq!(json["state"], "closed");
        assert_eq!(json["name"], "openai");
        assert!(cb.stats().summary().contains("closed"));
    }
}
