//! Circuit breaker for downstream dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: a single trial call probes for recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: first call after reset_timeout (that call is the trial)
//! Half-Open → Closed: trial succeeds
//! Half-Open → Open: trial fails (opened_at refreshed)
//! ```
//!
//! # Design Decisions
//! - One breaker per dependency name, held in a registry (not global)
//! - Each breaker has its own mutex; dependencies never contend with each other
//! - Callers hold a `BreakerPermit` for the whole logical call and report one verdict
//! - A permit dropped without a verdict only frees the trial slot

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::call::outcome::{ClassifiedOutcome, FailureCause};
use crate::observability::metrics;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds for a single breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    /// Consecutive failures that trip Closed → Open.
    pub failure_threshold: u32,
    /// Time Open must last before a trial is allowed.
    pub reset_timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Rejection returned while the circuit is open (or a trial is already running).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit for {dependency} is open")]
pub struct CircuitOpenError {
    pub dependency: String,
    /// Remaining cool-down; `None` while a half-open trial is in flight.
    pub retry_after: Option<Duration>,
}

/// Final result of a logical call as seen by the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failure,
    /// The call ended without an outcome (e.g. caller cancelled).
    Abandoned,
}

impl<T> From<&ClassifiedOutcome<T>> for Verdict {
    fn from(outcome: &ClassifiedOutcome<T>) -> Self {
        if outcome.is_success() {
            Verdict::Success
        } else {
            Verdict::Failure
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_in_flight: bool,
    /// Verdicts recorded so far (one per permitted call).
    pub outcomes_recorded: u64,
    /// Calls rejected without reaching the dependency.
    pub rejections: u64,
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_in_flight: bool,
    /// Bumped on every transition to Open; tags permits with the period they were issued in.
    generation: u64,
    outcomes_recorded: u64,
    rejections: u64,
}

/// Breaker guarding one downstream dependency.
pub struct DependencyBreaker {
    name: String,
    settings: BreakerSettings,
    state: Mutex<BreakerState>,
}

impl DependencyBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_in_flight: false,
                generation: 0,
                outcomes_recorded: 0,
                rejections: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> BreakerSettings {
        self.settings
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            half_open_in_flight: state.half_open_in_flight,
            outcomes_recorded: state.outcomes_recorded,
            rejections: state.rejections,
        }
    }

    /// Ask permission for one logical call.
    pub fn try_acquire(self: &Arc<Self>) -> Result<BreakerPermit, CircuitOpenError> {
        let mut state = self.lock();
        let now = Instant::now();

        if state.state == CircuitState::Open {
            let opened_at = state.opened_at.unwrap_or(now);
            let elapsed = now.saturating_duration_since(opened_at);
            if elapsed >= self.settings.reset_timeout {
                self.transition(&mut state, CircuitState::HalfOpen);
            } else {
                state.rejections += 1;
                drop(state);
                metrics::record_breaker_rejection(&self.name);
                return Err(CircuitOpenError {
                    dependency: self.name.clone(),
                    retry_after: Some(self.settings.reset_timeout - elapsed),
                });
            }
        }

        match state.state {
            CircuitState::Closed => Ok(BreakerPermit::new(self.clone(), false, state.generation)),
            CircuitState::HalfOpen if !state.half_open_in_flight => {
                state.half_open_in_flight = true;
                tracing::info!(dependency = %self.name, "Circuit breaker admitting trial call");
                Ok(BreakerPermit::new(self.clone(), true, state.generation))
            }
            _ => {
                state.rejections += 1;
                drop(state);
                metrics::record_breaker_rejection(&self.name);
                Err(CircuitOpenError {
                    dependency: self.name.clone(),
                    retry_after: None,
                })
            }
        }
    }

    /// Run `operation` under the breaker, recording its outcome.
    ///
    /// While open, the operation is not invoked and a permanent
    /// [`FailureCause::CircuitOpen`] outcome is returned.
    pub async fn attempt<T, F, Fut>(self: &Arc<Self>, operation: F) -> ClassifiedOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ClassifiedOutcome<T>>,
    {
        let permit = match self.try_acquire() {
            Ok(permit) => permit,
            Err(open) => return ClassifiedOutcome::PermanentFailure(FailureCause::CircuitOpen(open)),
        };

        let outcome = operation().await;
        permit.record(Verdict::from(&outcome));
        outcome
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_verdict(&self, trial: bool, generation: u64, verdict: Verdict) {
        let mut state = self.lock();
        state.outcomes_recorded += 1;

        if trial {
            state.half_open_in_flight = false;
            match verdict {
                Verdict::Success => {
                    state.consecutive_failures = 0;
                    self.transition(&mut state, CircuitState::Closed);
                }
                Verdict::Failure => {
                    state.opened_at = Some(Instant::now());
                    self.transition(&mut state, CircuitState::Open);
                }
                Verdict::Abandoned => {
                    tracing::debug!(dependency = %self.name, "Trial call abandoned, slot released");
                }
            }
            return;
        }

        // Calls admitted while Closed may finish after another call tripped the breaker,
        // possibly after a trial has closed it again. Only the period they started in counts.
        if state.state != CircuitState::Closed || state.generation != generation {
            return;
        }

        match verdict {
            Verdict::Success => state.consecutive_failures = 0,
            Verdict::Failure => {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                if state.consecutive_failures >= self.settings.failure_threshold {
                    state.opened_at = Some(Instant::now());
                    self.transition(&mut state, CircuitState::Open);
                }
            }
            Verdict::Abandoned => {}
        }
    }

    fn transition(&self, state: &mut BreakerState, to: CircuitState) {
        let from = state.state;
        if from == to {
            return;
        }
        state.state = to;
        if to == CircuitState::Open {
            state.generation += 1;
        }
        match to {
            CircuitState::Open => tracing::warn!(
                dependency = %self.name,
                from = %from,
                consecutive_failures = state.consecutive_failures,
                "Circuit breaker opened"
            ),
            _ => tracing::info!(dependency = %self.name, from = %from, to = %to, "Circuit breaker state changed"),
        }
        metrics::record_breaker_transition(&self.name, to.as_str());
    }
}

impl std::fmt::Debug for DependencyBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyBreaker")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("state", &self.state())
            .finish()
    }
}

/// Admission to call a dependency; reports exactly one verdict.
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: Arc<DependencyBreaker>,
    trial: bool,
    generation: u64,
    recorded: bool,
}

impl BreakerPermit {
    fn new(breaker: Arc<DependencyBreaker>, trial: bool, generation: u64) -> Self {
        Self {
            breaker,
            trial,
            generation,
            recorded: false,
        }
    }

    /// True if this permit is the half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record(mut self, verdict: Verdict) {
        self.recorded = true;
        self.breaker.on_verdict(self.trial, self.generation, verdict);
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.recorded {
            self.breaker.on_verdict(self.trial, self.generation, Verdict::Abandoned);
        }
    }
}

/// Breakers keyed by dependency name.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    defaults: BreakerSettings,
    overrides: DashMap<String, BreakerSettings>,
    breakers: DashMap<String, Arc<DependencyBreaker>>,
}

impl BreakerRegistry {
    pub fn new(defaults: BreakerSettings) -> Self {
        Self {
            defaults,
            overrides: DashMap::new(),
            breakers: DashMap::new(),
        }
    }

    /// Use dedicated settings for `dependency`. Applies to breakers created afterwards.
    pub fn with_override(self, dependency: impl Into<String>, settings: BreakerSettings) -> Self {
        self.overrides.insert(dependency.into(), settings);
        self
    }

    /// The breaker for `dependency`, created on first use.
    pub fn get(&self, dependency: &str) -> Arc<DependencyBreaker> {
        if let Some(existing) = self.breakers.get(dependency) {
            return existing.clone();
        }
        self.breakers
            .entry(dependency.to_string())
            .or_insert_with(|| {
                let settings = self
                    .overrides
                    .get(dependency)
                    .map(|s| *s)
                    .unwrap_or(self.defaults);
                tracing::debug!(
                    dependency = %dependency,
                    failure_threshold = settings.failure_threshold,
                    reset_timeout_ms = settings.reset_timeout.as_millis() as u64,
                    "Circuit breaker created"
                );
                metrics::record_breaker_created(dependency);
                Arc::new(DependencyBreaker::new(dependency, settings))
            })
            .clone()
    }

    /// Run `operation` under the breaker of `dependency`.
    pub async fn attempt<T, F, Fut>(&self, dependency: &str, operation: F) -> ClassifiedOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ClassifiedOutcome<T>>,
    {
        self.get(dependency).attempt(operation).await
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut all: Vec<_> = self.breakers.iter().map(|b| b.value().snapshot()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}
