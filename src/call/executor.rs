//! Resilient call executor.
//!
//! # Responsibilities
//! - Gate each logical call on the dependency's circuit breaker
//! - Run the backoff-driven retry loop within the call deadline
//! - Wrap every attempt in a child span and inject trace headers
//! - Report exactly one verdict per call to the breaker
//!
//! # Data Flow
//! ```text
//! execute(ctx, "auth", op)
//!     → breakers.get("auth").try_acquire()
//!         rejected → rejection span → CallError::CircuitOpen
//!     → for attempt in 1..=max_attempts:
//!         checkpoint (cancel / deadline)
//!         child span + traceparent → op(Attempt) raced against ctx
//!         Success → return | Permanent → return | Retryable → sleep, continue
//!     → permit.record(verdict)
//! ```
//!
//! # Design Decisions
//! - The breaker wraps the whole retry loop; retries never reach an open breaker
//! - Intermediate retryable failures are invisible to the breaker
//! - A call interrupted by its own caller (cancel) leaves breaker counters alone

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use http::HeaderMap;
use tokio::time::Instant;
use tracing::Instrument;

use crate::call::classify::{Classifier, RawOutcome};
use crate::call::context::CallContext;
use crate::call::error::CallError;
use crate::call::outcome::ClassifiedOutcome;
use crate::config::schema::LinkConfig;
use crate::observability::metrics;
use crate::observability::trace::{SpanStatus, TraceContext, TracePropagator};
use crate::resilience::backoff::BackoffPolicy;
use crate::resilience::circuit_breaker::{BreakerRegistry, Verdict};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// What an operation gets to know about the attempt it is running.
#[derive(Debug, Clone)]
pub struct Attempt {
    /// 1-based attempt number.
    pub number: u32,
    /// Delay slept before this attempt; zero for the first.
    pub delay_before: Duration,
    /// Trace context of this attempt's span.
    pub trace: TraceContext,
    /// Headers to send, with trace context already injected.
    pub headers: HeaderMap,
}

/// Composes breaker, retry loop, deadline and tracing around an operation.
#[derive(Debug, Clone)]
pub struct CallExecutor {
    breakers: Arc<BreakerRegistry>,
    max_attempts: u32,
    backoff: BackoffPolicy,
    propagator: TracePropagator,
    default_timeout: Duration,
}

impl CallExecutor {
    pub fn new(breakers: Arc<BreakerRegistry>) -> Self {
        Self {
            breakers,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY),
            propagator: TracePropagator::default(),
            default_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Build the executor and its breaker registry from configuration.
    pub fn from_config(config: &LinkConfig) -> Self {
        let defaults = config.breaker.settings();
        let registry = config
            .downstreams
            .iter()
            .filter(|(_, downstream)| downstream.has_breaker_overrides())
            .fold(BreakerRegistry::new(defaults), |registry, (name, downstream)| {
                registry.with_override(name.clone(), downstream.breaker_settings(defaults))
            });

        Self::new(Arc::new(registry))
            .with_max_attempts(config.retry.max_attempts)
            .with_backoff(config.retry.backoff())
            .with_default_timeout(config.deadline.per_call())
    }

    /// Total attempts per call, including the first. Values below 1 mean 1.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_propagator(mut self, propagator: TracePropagator) -> Self {
        self.propagator = propagator;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn propagator(&self) -> &TracePropagator {
        &self.propagator
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Fresh context bounded by the configured per-call deadline.
    pub fn context(&self, trace: Option<TraceContext>) -> CallContext {
        CallContext::with_timeout(self.default_timeout).with_trace(trace)
    }

    /// Run a raw network operation, classifying each attempt with `classifier`.
    pub async fn execute<T, C, F, Fut>(
        &self,
        ctx: &CallContext,
        dependency: &str,
        classifier: &C,
        mut operation: F,
    ) -> Result<T, CallError>
    where
        C: Classifier<T> + ?Sized,
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = RawOutcome>,
    {
        self.execute_classified(ctx, dependency, move |attempt| {
            let pending = operation(attempt);
            async move { classifier.classify(pending.await) }
        })
        .await
    }

    /// Run an operation that classifies its own outcome.
    pub async fn execute_classified<T, F, Fut>(
        &self,
        ctx: &CallContext,
        dependency: &str,
        mut operation: F,
    ) -> Result<T, CallError>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = ClassifiedOutcome<T>>,
    {
        let started = Instant::now();
        let breaker = self.breakers.get(dependency);

        let permit = match breaker.try_acquire() {
            Ok(permit) => permit,
            Err(rejection) => {
                let (_, mut span) = self.propagator.start_child_span(ctx.trace(), dependency);
                span.set_attribute("outcome", "circuit_open");
                span.finish(SpanStatus::error(&rejection));
                tracing::debug!(dependency = %dependency, "Call short-circuited by open breaker");

                let err = CallError::from(rejection);
                metrics::record_call(dependency, err.label(), started);
                return Err(err);
            }
        };

        let (result, attempts) = self.run_attempts(ctx, dependency, &mut operation).await;

        let verdict = match &result {
            Ok(_) => Verdict::Success,
            Err(CallError::Cancelled) => Verdict::Abandoned,
            Err(CallError::DeadlineExceeded) if attempts == 0 => Verdict::Abandoned,
            Err(_) => Verdict::Failure,
        };
        permit.record(verdict);

        match &result {
            Ok(_) => metrics::record_call(dependency, "success", started),
            Err(err) => {
                tracing::info!(
                    dependency = %dependency,
                    attempts,
                    error = %err,
                    "Downstream call failed"
                );
                metrics::record_call(dependency, err.label(), started);
            }
        }

        result
    }

    /// The retry loop. Returns the call result and the number of attempts started.
    async fn run_attempts<T, F, Fut>(
        &self,
        ctx: &CallContext,
        dependency: &str,
        operation: &mut F,
    ) -> (Result<T, CallError>, u32)
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = ClassifiedOutcome<T>>,
    {
        let delays = self.backoff.delays(self.max_attempts);
        let mut delay_before = Duration::ZERO;
        let mut number = 0;

        loop {
            if let Err(err) = ctx.checkpoint() {
                return (Err(err), number);
            }
            number += 1;

            let (trace, mut span) = self.propagator.start_child_span(ctx.trace(), dependency);
            span.set_attribute("dependency", dependency);
            span.set_attribute("attempt", number);

            let mut headers = HeaderMap::new();
            self.propagator.inject(&trace, &mut headers);

            let attempt = Attempt {
                number,
                delay_before,
                trace,
                headers,
            };
            let pending = operation(attempt).instrument(span.tracing_span().clone());

            let outcome = match ctx.run(pending).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    span.finish(SpanStatus::error(&err));
                    metrics::record_attempt(dependency, "interrupted");
                    return (Err(err), number);
                }
            };
            metrics::record_attempt(dependency, outcome.label());

            match outcome {
                ClassifiedOutcome::Success(value) => {
                    span.finish(SpanStatus::Ok);
                    return (Ok(value), number);
                }
                ClassifiedOutcome::PermanentFailure(cause) => {
                    span.finish(SpanStatus::error(&cause));
                    tracing::debug!(
                        dependency = %dependency,
                        attempt = number,
                        error = %cause,
                        "Permanent failure, not retrying"
                    );
                    return (Err(CallError::PermanentFailure(cause)), number);
                }
                ClassifiedOutcome::RetryableFailure(cause) => {
                    span.finish(SpanStatus::error(&cause));

                    let Some(&delay) = delays.get(number as usize - 1) else {
                        return (
                            Err(CallError::RetriesExhausted {
                                attempts: number,
                                cause,
                            }),
                            number,
                        );
                    };

                    tracing::info!(
                        dependency = %dependency,
                        attempt = number,
                        delay_ms = delay.as_millis() as u64,
                        error = %cause,
                        "Retrying downstream call"
                    );

                    if let Err(err) = ctx.sleep(delay).await {
                        return (Err(err), number);
                    }
                    delay_before = delay;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use http::StatusCode;
    use crate::call::classify::{HttpClassifier, HttpReply};
    use crate::call::outcome::{FailureCause, TransportError};
    use crate::observability::trace::{InMemoryExporter, TRACEPARENT};
    use crate::resilience::circuit_breaker::{BreakerSettings, CircuitState};

    fn executor(threshold: u32) -> (CallExecutor, InMemoryExporter) {
        let exporter = InMemoryExporter::new();
        let registry = BreakerRegistry::new(BreakerSettings {
            failure_threshold: threshold,
            reset_timeout: Duration::from_secs(30),
        });
        let executor = CallExecutor::new(Arc::new(registry))
            .with_max_attempts(3)
            .with_backoff(BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(2)))
            .with_propagator(TracePropagator::new(Arc::new(exporter.clone())));
        (executor, exporter)
    }

    fn timeout() -> ClassifiedOutcome<u32> {
        ClassifiedOutcome::RetryableFailure(FailureCause::Transport(TransportError::Timeout))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let (exec, spans) = executor(5);
        let ctx = exec.context(None);
        let result = exec
            .execute_classified(&ctx, "auth", |_| async { ClassifiedOutcome::Success(7u32) })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(spans.spans().len(), 1);
        assert_eq!(spans.spans()[0].status, SpanStatus::Ok);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_after_two_delays() {
        let (exec, spans) = executor(5);
        let ctx = exec.context(None);
        let delays = Mutex::new(Vec::new());
        let started = Instant::now();

        let result = exec
            .execute_classified(&ctx, "reservations", |attempt| {
                delays.lock().unwrap().push(attempt.delay_before);
                async { timeout() }
            })
            .await;

        assert_eq!(
            result,
            Err(CallError::RetriesExhausted {
                attempts: 3,
                cause: FailureCause::Transport(TransportError::Timeout),
            })
        );
        assert_eq!(
            *delays.lock().unwrap(),
            vec![Duration::ZERO, Duration::from_millis(100), Duration::from_millis(200)]
        );
        assert_eq!(started.elapsed(), Duration::from_millis(300));
        assert_eq!(spans.spans().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_stops_loop() {
        let (exec, _) = executor(5);
        let ctx = exec.context(None);
        let calls = AtomicU32::new(0);

        let result: Result<u32, _> = exec
            .execute_classified(&ctx, "auth", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    ClassifiedOutcome::PermanentFailure(FailureCause::Status {
                        status: StatusCode::NOT_FOUND,
                        body: "User not found".into(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(CallError::PermanentFailure(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let (exec, _) = executor(5);
        let ctx = exec.context(None);
        let calls = AtomicU32::new(0);

        let result = exec
            .execute_classified(&ctx, "auth", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt.number < 3 {
                        timeout()
                    } else {
                        ClassifiedOutcome::Success(attempt.number)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        let snapshot = exec.breakers().get("auth").snapshot();
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.outcomes_recorded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_breaker_update_per_call() {
        let (exec, _) = executor(5);
        let ctx = exec.context(None);

        let _ = exec.execute_classified(&ctx, "notifications", |_| async { timeout() }).await;

        let snapshot = exec.breakers().get("notifications").snapshot();
        assert_eq!(snapshot.outcomes_recorded, 1);
        assert_eq!(snapshot.consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_fails_fast_with_span() {
        let (exec, spans) = executor(1);
        let ctx = exec.context(None);

        let _ = exec.execute_classified(&ctx, "auth", |_| async { timeout() }).await;
        assert_eq!(exec.breakers().get("auth").state(), CircuitState::Open);

        let before = spans.spans().len();
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let result = exec
            .execute_classified(&ctx, "auth", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { ClassifiedOutcome::Success(1u32) }
            })
            .await;

        assert!(matches!(result, Err(CallError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(started.elapsed(), Duration::ZERO);

        let spans = spans.spans();
        assert_eq!(spans.len(), before + 1);
        assert_eq!(spans[before].attribute("outcome"), Some("circuit_open"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_first_delay() {
        let (exec, _) = executor(5);
        let ctx = exec.context(None);
        let cancel = ctx.cancel_token().clone();
        let calls = Arc::new(AtomicU32::new(0));

        let task = {
            let exec = exec.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                exec.execute_classified(&ctx, "auth", |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { timeout() }
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        assert_eq!(task.await.unwrap(), Err(CallError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let snapshot = exec.breakers().get("auth").snapshot();
        assert_eq!(snapshot.consecutive_failures, 0);
        assert!(!snapshot.half_open_in_flight);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cuts_slow_attempt() {
        let (exec, spans) = executor(5);
        let ctx = CallContext::with_timeout(Duration::from_millis(500));

        let result = exec
            .execute_classified(&ctx, "auth", |_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                ClassifiedOutcome::Success(1u32)
            })
            .await;

        assert_eq!(result, Err(CallError::DeadlineExceeded));
        assert_eq!(exec.breakers().get("auth").snapshot().consecutive_failures, 1);
        assert!(matches!(spans.spans()[0].status, SpanStatus::Error(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_past_deadline_is_not_slept() {
        let (exec, _) = executor(5);
        let exec = exec.with_backoff(BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(1)));
        let ctx = CallContext::with_timeout(Duration::from_millis(400));
        let started = Instant::now();

        let result = exec.execute_classified(&ctx, "auth", |_| async { timeout() }).await;

        assert_eq!(result, Err(CallError::DeadlineExceeded));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_expired_context_leaves_breaker_alone() {
        let (exec, _) = executor(1);
        let ctx = CallContext::with_timeout(Duration::ZERO);

        let result = exec
            .execute_classified(&ctx, "auth", |_| async { ClassifiedOutcome::Success(1u32) })
            .await;

        assert_eq!(result, Err(CallError::DeadlineExceeded));
        assert_eq!(exec.breakers().get("auth").state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_share_trace_and_inject_headers() {
        let (exec, spans) = executor(5);
        let parent = TraceContext::new_root();
        let ctx = exec.context(Some(parent.clone()));
        let seen = Mutex::new(Vec::new());

        let _ = exec
            .execute_classified(&ctx, "auth", |attempt| {
                let header = attempt.headers.get(TRACEPARENT).cloned();
                seen.lock().unwrap().push((attempt.trace.clone(), header));
                async { timeout() }
            })
            .await;

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 3);
        for (trace, header) in &seen {
            assert_eq!(trace.trace_id(), parent.trace_id());
            assert_eq!(header.as_ref().unwrap(), trace.to_traceparent().as_str());
        }
        assert_ne!(seen[0].0.span_id(), seen[1].0.span_id());
        assert!(spans
            .spans()
            .iter()
            .all(|s| s.parent_span_id == Some(parent.span_id())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_classifies_raw_outcomes() {
        let (exec, _) = executor(5);
        let ctx = exec.context(None);
        let classifier = HttpClassifier::<u32>::json();
        let calls = AtomicU32::new(0);

        let result = exec
            .execute(&ctx, "auth", &classifier, |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Ok(HttpReply::new(StatusCode::BAD_GATEWAY, "down"))
                    } else {
                        Ok(HttpReply::new(StatusCode::OK, "42"))
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_max_attempts_floor() {
        let exec = CallExecutor::new(Arc::new(BreakerRegistry::default())).with_max_attempts(0);
        assert_eq!(exec.max_attempts(), 1);
    }
}
