//! Generic retry with configurable backoff and jitter.
//!
//! [`RetryManager`] wraps any fallible async operation. Each invocation of
//! [`RetryManager::execute_with_cancel`] is one strictly sequential retry
//! sequence: attempt, wait, attempt, ... until the operation succeeds, the
//! retry budget runs out, or the caller cancels.
//!
//! ```text
//! ATTEMPTING ──ok──> SUCCEEDED
//!     │
//!    err (budget left)            err (budget spent)
//!     v                                 v
//!  WAITING ──delay──> ATTEMPTING     EXHAUSTED
//!     │
//!   cancel ──> CANCELLED
//! ```
//!
//! The manager never inspects failure causes: every error triggers the
//! next attempt while budget remains.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    Fixed,
    /// `initial * (1 + n * multiplier)`.
    Linear,
    /// `initial * multiplier^n`.
    #[default]
    Exponential,
}

impl BackoffStrategy {
    /// Unperturbed delay in milliseconds for retry index `n` (0 = first retry).
    pub fn delay_ms(&self, initial_ms: f64, multiplier: f64, n: u32) -> f64 {
        match self {
            Self::Fixed => fixed_delay_ms(initial_ms),
            Self::Linear => linear_delay_ms(initial_ms, multiplier, n),
            Self::Exponential => exponential_delay_ms(initial_ms, multiplier, n),
        }
    }
}

fn fixed_delay_ms(initial_ms: f64) -> f64 {
    initial_ms
}

fn linear_delay_ms(initial_ms: f64, multiplier: f64, n: u32) -> f64 {
    initial_ms * (1.0 + f64::from(n) * multiplier)
}

fn exponential_delay_ms(initial_ms: f64, multiplier: f64, n: u32) -> f64 {
    initial_ms * multiplier.powi(n.min(i32::MAX as u32) as i32)
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Backoff strategy.
    pub strategy: BackoffStrategy,
    /// Retries after the first attempt. Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds. Must be > 0.
    pub initial_delay_ms: u64,
    /// Growth factor for linear/exponential strategies. Must be >= 1.0.
    pub backoff_multiplier: f64,
    /// Fraction in `[0, 1)` by which each delay is randomly perturbed.
    ///
    /// The actual sleep is `delay * (1 + u)` with `u` uniform in
    /// `(-jitter_ratio, +jitter_ratio)`, clamped at zero.
    pub jitter_ratio: f64,
    /// Optional cap on the unperturbed delay, in milliseconds.
    pub max_delay_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            max_retries: 10,
            initial_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            jitter_ratio: 0.1,
            max_delay_ms: Some(60_000),
        }
    }
}

/// A retry configuration that violates its invariants.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetryConfigError {
    #[error("initial delay must be greater than zero")]
    ZeroInitialDelay,
    #[error("backoff multiplier must be >= 1.0, got {0}")]
    MultiplierTooSmall(f64),
    #[error("jitter ratio must be in [0, 1), got {0}")]
    JitterOutOfRange(f64),
}

impl RetryConfig {
    /// Check the configuration's invariants.
    pub fn validate(&self) -> Result<(), RetryConfigError> {
        if self.initial_delay_ms == 0 {
            return Err(RetryConfigError::ZeroInitialDelay);
        }
        // NaN fails both comparisons and is rejected here too.
        if !(self.backoff_multiplier >= 1.0) {
            return Err(RetryConfigError::MultiplierTooSmall(self.backoff_multiplier));
        }
        if !(self.jitter_ratio >= 0.0 && self.jitter_ratio < 1.0) {
            return Err(RetryConfigError::JitterOutOfRange(self.jitter_ratio));
        }
        Ok(())
    }

    /// Total attempts a sequence may make.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Phase of a single retry sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    Attempting,
    Waiting,
    Succeeded,
    Exhausted,
    Cancelled,
}

/// Transient state of one in-flight retry sequence.
#[derive(Debug)]
pub struct RetryAttemptState<E> {
    /// 0-based index of the current (or next) attempt.
    pub attempt_index: u32,
    /// Most recent failure, if any.
    pub last_error: Option<E>,
    /// Current phase.
    pub phase: RetryPhase,
}

impl<E> RetryAttemptState<E> {
    fn new() -> Self {
        Self {
            attempt_index: 0,
            last_error: None,
            phase: RetryPhase::Attempting,
        }
    }

    /// Whether the sequence has concluded.
    pub fn terminal(&self) -> bool {
        matches!(
            self.phase,
            RetryPhase::Succeeded | RetryPhase::Exhausted | RetryPhase::Cancelled
        )
    }

    fn record_failure(&mut self, err: E) {
        self.last_error = Some(err);
        self.attempt_index += 1;
        self.phase = RetryPhase::Waiting;
    }
}

/// Result of a retry sequence.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded.
    Success {
        /// The successful result.
        result: T,
        /// Total number of attempts made (1 = first try succeeded).
        attempts: u32,
    },
    /// All attempts failed.
    Exhausted {
        /// The error from the last attempt.
        last_error: E,
        /// Total number of attempts made.
        attempts: u32,
    },
    /// The caller cancelled the sequence. Not an error.
    Cancelled {
        /// Attempts started before cancellation.
        attempts: u32,
        /// The most recent failure before cancellation, if any.
        last_error: Option<E>,
    },
}

impl<T, E> RetryOutcome<T, E> {
    /// Number of attempts made.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Collapse into a `Result`, keeping exhaustion and cancellation distinct.
    pub fn into_result(self) -> Result<T, RetryError<E>> {
        match self {
            Self::Success { result, .. } => Ok(result),
            Self::Exhausted {
                last_error,
                attempts,
            } => Err(RetryError::Exhausted {
                attempts,
                last_error,
            }),
            Self::Cancelled { attempts, .. } => Err(RetryError::Cancelled { attempts }),
        }
    }
}

/// Failure form of a [`RetryOutcome`].
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("all {attempts} attempts failed, last error: {last_error}")]
    Exhausted { attempts: u32, last_error: E },
    #[error("retry sequence cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// Sink for retry state transitions (metrics, tracing hooks).
pub trait RetryListener: Send + Sync {
    /// A failed attempt will be retried after `delay`.
    fn on_retry(&self, _attempt: u32, _delay: Duration) {}

    /// The sequence gave up after `attempts` failures.
    fn on_exhausted(&self, _attempts: u32) {}
}

// ---------------------------------------------------------------------------
// Backoff computation
// ---------------------------------------------------------------------------

/// Unperturbed delay before retry `n` (0 = the wait before the second attempt).
///
/// Deterministic given `(strategy, n, config)`; capped by `max_delay_ms`.
pub fn compute_base_delay(config: &RetryConfig, n: u32) -> Duration {
    let mut ms = config.strategy.delay_ms(
        config.initial_delay_ms as f64,
        config.backoff_multiplier,
        n,
    );
    if let Some(cap) = config.max_delay_ms {
        ms = ms.min(cap as f64);
    }
    millis_to_duration(ms)
}

/// Delay before retry `n` with jitter applied.
pub fn compute_delay(config: &RetryConfig, n: u32) -> Duration {
    apply_jitter(compute_base_delay(config, n), config.jitter_ratio)
}

/// Perturb `delay` by a uniform factor in `(1 - ratio, 1 + ratio)`, clamped at zero.
pub fn apply_jitter(delay: Duration, ratio: f64) -> Duration {
    if !(ratio > 0.0) {
        return delay;
    }
    let offset = rand::thread_rng().gen_range(-ratio..ratio);
    let ms = delay.as_secs_f64() * 1_000.0 * (1.0 + offset);
    millis_to_duration(ms.max(0.0))
}

fn millis_to_duration(ms: f64) -> Duration {
    if !ms.is_finite() {
        return Duration::from_millis(u64::MAX);
    }
    // Float-to-int `as` casts saturate.
    Duration::from_micros((ms * 1_000.0).round() as u64)
}

// ---------------------------------------------------------------------------
// Retry manager
// ---------------------------------------------------------------------------

/// Runs async operations under a validated [`RetryConfig`].
#[derive(Clone)]
pub struct RetryManager {
    config: RetryConfig,
    listener: Option<Arc<dyn RetryListener>>,
}

impl std::fmt::Debug for RetryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryManager")
            .field("config", &self.config)
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}

impl RetryManager {
    /// Create a manager, rejecting invalid configurations.
    pub fn new(config: RetryConfig) -> Result<Self, RetryConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            listener: None,
        })
    }

    /// Attach a listener notified on every retry and on exhaustion.
    pub fn with_listener(mut self, listener: Arc<dyn RetryListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute `operation` with retry and no cancellation source.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Debug,
    {
        let (_keep_alive, cancel) = watch::channel(false);
        self.execute_with_cancel(operation, cancel).await
    }

    /// Execute `operation` with retry until success, exhaustion, or until
    /// `cancel` turns `true`.
    ///
    /// Cancellation is honoured both while waiting and while an attempt is
    /// in flight; an in-flight attempt's future is dropped, never resumed.
    pub async fn execute_with_cancel<F, Fut, T, E>(
        &self,
        mut operation: F,
        mut cancel: watch::Receiver<bool>,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Debug,
    {
        let max_attempts = self.config.max_attempts();
        let mut state: RetryAttemptState<E> = RetryAttemptState::new();

        loop {
            if *cancel.borrow() {
                state.phase = RetryPhase::Cancelled;
                debug!(attempts = state.attempt_index, "retry sequence cancelled");
                return RetryOutcome::Cancelled {
                    attempts: state.attempt_index,
                    last_error: state.last_error,
                };
            }

            state.phase = RetryPhase::Attempting;
            let result = tokio::select! {
                biased;
                _ = wait_cancelled(&mut cancel) => None,
                r = operation() => Some(r),
            };
            let attempts = state.attempt_index + 1;

            let err = match result {
                None => {
                    state.phase = RetryPhase::Cancelled;
                    debug!(attempts, "retry sequence cancelled during attempt");
                    return RetryOutcome::Cancelled {
                        attempts,
                        last_error: state.last_error,
                    };
                }
                Some(Ok(result)) => {
                    state.phase = RetryPhase::Succeeded;
                    if attempts > 1 {
                        info!(attempts, "operation succeeded after retries");
                    }
                    return RetryOutcome::Success { result, attempts };
                }
                Some(Err(err)) => err,
            };

            if attempts >= max_attempts {
                state.phase = RetryPhase::Exhausted;
                warn!(
                    attempts,
                    max_attempts, "all retry attempts exhausted: {:?}", err
                );
                if let Some(listener) = &self.listener {
                    listener.on_exhausted(attempts);
                }
                return RetryOutcome::Exhausted {
                    last_error: err,
                    attempts,
                };
            }

            let delay = compute_delay(&self.config, state.attempt_index);
            debug!(
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "retrying after error: {:?}",
                err
            );
            if let Some(listener) = &self.listener {
                listener.on_retry(attempts, delay);
            }
            state.record_failure(err);

            let cancelled = tokio::select! {
                biased;
                _ = wait_cancelled(&mut cancel) => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if cancelled {
                state.phase = RetryPhase::Cancelled;
                debug!(attempts, "retry sequence cancelled while waiting");
                return RetryOutcome::Cancelled {
                    attempts,
                    last_error: state.last_error,
                };
            }
        }
    }
}

/// Resolve once the cancel flag is `true`. Never resolves if the sender is gone.
async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Pre-built configs
// ---------------------------------------------------------------------------

/// Retry config for agents connecting to the gateway.
///
/// Exponential, 10 retries, 500ms initial delay, up to 30s, 20% jitter.
pub fn gateway_connect_retry_config() -> RetryConfig {
    RetryConfig {
        strategy: BackoffStrategy::Exponential,
        max_retries: 10,
        initial_delay_ms: 500,
        backoff_multiplier: 2.0,
        jitter_ratio: 0.2,
        max_delay_ms: Some(30_000),
    }
}

/// Retry config for peer session negotiation.
///
/// Linear, 5 retries, 250ms initial delay, up to 5s, 10% jitter.
pub fn peer_negotiation_retry_config() -> RetryConfig {
    RetryConfig {
        strategy: BackoffStrategy::Linear,
        max_retries: 5,
        initial_delay_ms: 250,
        backoff_multiplier: 1.0,
        jitter_ratio: 0.1,
        max_delay_ms: Some(5_000),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn config(strategy: BackoffStrategy, max_retries: u32, initial_ms: u64, mult: f64) -> RetryConfig {
        RetryConfig {
            strategy,
            max_retries,
            initial_delay_ms: initial_ms,
            backoff_multiplier: mult,
            jitter_ratio: 0.0,
            max_delay_ms: None,
        }
    }

    #[test]
    fn test_retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.strategy, BackoffStrategy::Exponential);
        assert_eq!(config.max_retries, 10);
        assert_eq!(config.max_attempts(), 11);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        let mut c = RetryConfig::default();
        c.initial_delay_ms = 0;
        assert_eq!(c.validate(), Err(RetryConfigError::ZeroInitialDelay));

        let mut c = RetryConfig::default();
        c.backoff_multiplier = 0.5;
        assert!(matches!(
            c.validate(),
            Err(RetryConfigError::MultiplierTooSmall(_))
        ));

        let mut c = RetryConfig::default();
        c.jitter_ratio = 1.0;
        assert!(matches!(c.validate(), Err(RetryConfigError::JitterOutOfRange(_))));

        let mut c = RetryConfig::default();
        c.backoff_multiplier = f64::NAN;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_compute_delay_fixed() {
        let c = config(BackoffStrategy::Fixed, 5, 250, 3.0);
        for n in 0..5 {
            assert_eq!(compute_delay(&c, n), Duration::from_millis(250));
        }
    }

    #[test]
    fn test_compute_delay_linear() {
        let c = config(BackoffStrategy::Linear, 5, 100, 2.0);
        // 100 * (1 + n * 2)
        assert_eq!(compute_delay(&c, 0), Duration::from_millis(100));
        assert_eq!(compute_delay(&c, 1), Duration::from_millis(300));
        assert_eq!(compute_delay(&c, 2), Duration::from_millis(500));
    }

    #[test]
    fn test_compute_delay_exponential() {
        let c = config(BackoffStrategy::Exponential, 5, 100, 2.0);
        assert_eq!(compute_delay(&c, 0), Duration::from_millis(100));
        assert_eq!(compute_delay(&c, 1), Duration::from_millis(200));
        assert_eq!(compute_delay(&c, 2), Duration::from_millis(400));
        assert_eq!(compute_delay(&c, 3), Duration::from_millis(800));
    }

    #[test]
    fn test_compute_delay_capped() {
        let mut c = config(BackoffStrategy::Exponential, 20, 1_000, 2.0);
        c.max_delay_ms = Some(5_000);
        assert_eq!(compute_delay(&c, 2), Duration::from_millis(4_000));
        assert_eq!(compute_delay(&c, 3), Duration::from_millis(5_000));
        assert_eq!(compute_delay(&c, 1_000), Duration::from_millis(5_000));
    }

    #[test]
    fn test_huge_exponent_does_not_panic() {
        let c = config(BackoffStrategy::Exponential, u32::MAX, 1_000, 10.0);
        let _ = compute_delay(&c, u32::MAX);
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let mut c = config(BackoffStrategy::Fixed, 1, 1_000, 1.0);
        c.jitter_ratio = 0.25;
        for _ in 0..200 {
            let d = compute_delay(&c, 0);
            assert!(d >= Duration::from_millis(750), "delay too small: {d:?}");
            assert!(d <= Duration::from_millis(1_250), "delay too large: {d:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_exhaustion_timing() {
        let manager = RetryManager::new(config(BackoffStrategy::Exponential, 3, 100, 2.0)).unwrap();
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let stamps_clone = stamps.clone();

        let outcome = manager
            .execute(move || {
                let stamps = stamps_clone.clone();
                async move {
                    stamps.lock().unwrap().push(Instant::now());
                    Err::<(), &str>("always fails")
                }
            })
            .await;

        match outcome {
            RetryOutcome::Exhausted {
                last_error,
                attempts,
            } => {
                assert_eq!(last_error, "always fails");
                assert_eq!(attempts, 4);
            }
            other => panic!("expected exhausted, got {other:?}"),
        }

        let stamps = stamps.lock().unwrap();
        assert_eq!(stamps.len(), 4);
        let gaps: Vec<u128> = stamps
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis())
            .collect();
        assert_eq!(gaps, vec![100, 200, 400]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_second_attempt() {
        let manager = RetryManager::new(config(BackoffStrategy::Fixed, 10, 50, 1.0)).unwrap();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let outcome = manager
            .execute(move || {
                let c = counter_clone.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err("transient")
                    } else {
                        Ok("connected")
                    }
                }
            })
            .await;

        match outcome {
            RetryOutcome::Success { result, attempts } => {
                assert_eq!(result, "connected");
                assert_eq!(attempts, 2);
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_single_attempt() {
        let manager = RetryManager::new(config(BackoffStrategy::Fixed, 0, 10, 1.0)).unwrap();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let outcome = manager
            .execute(move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("nope")
                }
            })
            .await;
        assert_eq!(outcome.attempts(), 1);
        assert!(!outcome.is_success());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting() {
        let manager = RetryManager::new(config(BackoffStrategy::Fixed, 5, 10_000, 1.0)).unwrap();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let _ = cancel_tx.send(true);
        });

        let outcome = manager
            .execute_with_cancel(
                move || {
                    let c = c.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>("refused")
                    }
                },
                cancel_rx,
            )
            .await;

        match outcome {
            RetryOutcome::Cancelled {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 1);
                assert_eq!(last_error, Some("refused"));
            }
            other => panic!("expected cancelled, got {other:?}"),
        }
        // No attempt after the cancel.
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_attempt_drops_it() {
        let manager = RetryManager::new(config(BackoffStrategy::Fixed, 5, 10, 1.0)).unwrap();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let finished = Arc::new(AtomicU32::new(0));
        let f = finished.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = cancel_tx.send(true);
        });

        let outcome = manager
            .execute_with_cancel(
                move || {
                    let f = f.clone();
                    async move {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        f.fetch_add(1, Ordering::SeqCst);
                        Ok::<(), &str>(())
                    }
                },
                cancel_rx,
            )
            .await;

        assert!(matches!(outcome, RetryOutcome::Cancelled { attempts: 1, .. }));
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_attempt() {
        let manager = RetryManager::new(RetryConfig::default()).unwrap();
        let (_tx, rx) = watch::channel(true);
        let outcome = manager
            .execute_with_cancel(|| async { Ok::<u8, &str>(1) }, rx)
            .await;
        assert!(matches!(
            outcome,
            RetryOutcome::Cancelled {
                attempts: 0,
                last_error: None
            }
        ));
    }

    #[derive(Default)]
    struct CountingListener {
        retries: AtomicU32,
        exhausted: AtomicU32,
    }

    impl RetryListener for CountingListener {
        fn on_retry(&self, _attempt: u32, _delay: Duration) {
            self.retries.fetch_add(1, Ordering::SeqCst);
        }

        fn on_exhausted(&self, _attempts: u32) {
            self.exhausted.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_notified() {
        let listener = Arc::new(CountingListener::default());
        let manager = RetryManager::new(config(BackoffStrategy::Linear, 2, 10, 1.0))
            .unwrap()
            .with_listener(listener.clone());

        let outcome = manager.execute(|| async { Err::<(), _>("down") }).await;
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(listener.retries.load(Ordering::SeqCst), 2);
        assert_eq!(listener.exhausted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_into_result_keeps_cancel_distinct() {
        let exhausted: RetryOutcome<(), &str> = RetryOutcome::Exhausted {
            last_error: "x",
            attempts: 3,
        };
        assert!(matches!(
            exhausted.into_result(),
            Err(RetryError::Exhausted { attempts: 3, .. })
        ));

        let cancelled: RetryOutcome<(), &str> = RetryOutcome::Cancelled {
            attempts: 1,
            last_error: None,
        };
        assert!(matches!(
            cancelled.into_result(),
            Err(RetryError::Cancelled { attempts: 1 })
        ));
    }

    #[test]
    fn test_immediate_success_makes_one_attempt() {
        let manager = RetryManager::new(RetryConfig::default()).unwrap();
        let outcome = tokio_test::block_on(manager.execute(|| async { Ok::<_, &str>(7) }));
        assert!(matches!(outcome, RetryOutcome::Success { result: 7, attempts: 1 }));
    }

    #[test]
    fn test_strategy_serde() {
        let config: RetryConfig =
            serde_json::from_str(r#"{"strategy": "linear", "max_retries": 3}"#).unwrap();
        assert_eq!(config.strategy, BackoffStrategy::Linear);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_delay_ms, 1_000);
    }

    #[test]
    fn test_preset_configs_are_valid() {
        assert!(gateway_connect_retry_config().validate().is_ok());
        assert!(peer_negotiation_retry_config().validate().is_ok());
    }
}
