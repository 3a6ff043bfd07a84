// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Consecutive-failure circuit breaker for the primary endpoint.
//!
//! The dual store consults this breaker before every Save/Fetch. Only
//! transient failures count towards the threshold; a fatal failure or a
//! success resets the counter.
//!
//! States:
//! - Closed: primary is attempted
//! - Open: primary is skipped, callers go straight to the secondary
//!
//! There is no half-open state. Once open, the primary is never attempted
//! again by Save/Fetch, so nothing can record the success that would reset
//! it: the breaker stays open for the lifetime of the store.
//!
//! # Example
//!
//! ```
//! use snapstore::resilience::circuit_breaker::{CircuitConfig, CircuitState, PrimaryCircuit};
//! use snapstore::resilience::classify::ErrorClass;
//!
//! let circuit = PrimaryCircuit::new("primary", CircuitConfig::default());
//! for _ in 0..3 {
//!     circuit.record_failure(ErrorClass::Transient);
//! }
//! assert_eq!(circuit.state(), CircuitState::Open);
//! assert!(circuit.is_disabled());
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::classify::ErrorClass;

/// Circuit breaker state for metrics/monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Configuration for the primary circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Number of consecutive transient failures that disables the primary
    pub failure_threshold: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
        }
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    failed: bool,
    consecutive_failures: u32,
}

/// Failure tracker guarding the primary endpoint of a dual store.
///
/// Reads (the disable check on every Save/Fetch) take a shared lock;
/// failure recording and resets take the exclusive lock.
pub struct PrimaryCircuit {
    name: String,
    config: CircuitConfig,
    state: RwLock<BreakerState>,

    // Metrics
    failures_recorded: AtomicU64,
    resets: AtomicU64,
    skipped_calls: AtomicU64,
}

impl PrimaryCircuit {
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: RwLock::new(BreakerState::default()),
            failures_recorded: AtomicU64::new(0),
            resets: AtomicU64::new(0),
            skipped_calls: AtomicU64::new(0),
        }
    }

    /// Create with default config
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitConfig::default())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the primary should be skipped.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        let state = self.state.read();
        state.failed && state.consecutive_failures >= self.config.failure_threshold
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        if self.is_disabled() {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    /// Current consecutive transient failure count.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.state.read().consecutive_failures
    }

    /// Record a primary failure of the given class.
    ///
    /// Transient failures count towards the threshold. Fatal failures reset
    /// the count without disabling the primary.
    pub fn record_failure(&self, class: ErrorClass) {
        let (count, opened) = {
            let mut state = self.state.write();
            let was_open = state.failed && state.consecutive_failures >= self.config.failure_threshold;
            match class {
                ErrorClass::Transient => {
                    state.failed = true;
                    state.consecutive_failures += 1;
                }
                ErrorClass::Fatal => {
                    state.consecutive_failures = 0;
                }
            }
            let open = state.failed && state.consecutive_failures >= self.config.failure_threshold;
            (state.consecutive_failures, open && !was_open)
        };

        self.failures_recorded.fetch_add(1, Ordering::Relaxed);
        crate::metrics::set_circuit_failures(&self.name, count);

        if class.is_transient() {
            warn!(circuit = %self.name, count, "Primary endpoint failure recorded (count: {})", count);
        } else {
            debug!(circuit = %self.name, "Non-transient primary failure, failure count reset");
        }
        if opened {
            warn!(
                circuit = %self.name,
                threshold = self.config.failure_threshold,
                "Primary endpoint disabled after repeated transient failures"
            );
            crate::metrics::set_circuit_state(&self.name, CircuitState::Open as u8);
        }
    }

    /// Record a primary success: clears the failure state.
    pub fn reset(&self) {
        {
            let mut state = self.state.write();
            if !state.failed && state.consecutive_failures == 0 {
                return;
            }
            state.failed = false;
            state.consecutive_failures = 0;
        }
        self.resets.fetch_add(1, Ordering::Relaxed);
        debug!(circuit = %self.name, "Primary failure state reset");
        crate::metrics::set_circuit_failures(&self.name, 0);
        crate::metrics::set_circuit_state(&self.name, CircuitState::Closed as u8);
    }

    /// Count a call that bypassed the primary because the circuit was open.
    pub fn record_skip(&self) {
        self.skipped_calls.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_circuit_call(&self.name, "skipped");
    }

    /// Total failures recorded (transient and fatal)
    #[must_use]
    pub fn failures_recorded(&self) -> u64 {
        self.failures_recorded.load(Ordering::Relaxed)
    }

    /// Number of resets that cleared a non-empty failure state
    #[must_use]
    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::Relaxed)
    }

    /// Calls that skipped the primary
    #[must_use]
    pub fn skipped_calls(&self) -> u64 {
        self.skipped_calls.load(Ordering::Relaxed)
    }
}
