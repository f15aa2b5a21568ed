//! Provider resilience wrapper with timeouts, retry, and circuit breaking.
//!
//! Every call runs on a helper thread so a hung provider cannot stall a
//! rotation worker past the per-call timeout. Transient failures
//! ([`ProviderError::is_transient`]) are retried `max_retries` times with a
//! fixed backoff; everything else is returned as-is.
//!
//! # Circuit Breaker States
//!
//! ```text
//! +--------+     failures >= threshold     +------+
//! | Closed | --------------------------->  | Open |
//! +--------+                               +------+
//!     ^                                        |
//!     |  success                               | timeout elapsed
//!     |                                        v
//!     +--------------------------------  +-----------+
//!                                        | Half-Open |
//!                                        +-----------+
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use snaprot::provider::{FilesystemProvider, ProviderResilienceConfig, ResilientProvider};
//! use std::sync::Arc;
//!
//! let inner = Arc::new(FilesystemProvider::open("state.json")?);
//! let provider = ResilientProvider::new(inner, ProviderResilienceConfig::from_env());
//! ```

use super::{
    DeleteOutcome, Listing, ProviderClient, ProviderError, ProviderResult, SnapshotFilter,
};
use crate::models::{Snapshot, SnapshotId, Volume};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Resilience configuration for provider calls.
#[derive(Debug, Clone)]
pub struct ProviderResilienceConfig {
    /// Per-call timeout in milliseconds (0 disables the timeout).
    pub call_timeout_ms: u64,
    /// Retries for transient failures.
    pub max_retries: u32,
    /// Backoff between retries in milliseconds.
    pub retry_backoff_ms: u64,
    /// Consecutive failures before opening the circuit.
    pub breaker_failure_threshold: u32,
    /// How long to keep the circuit open before half-open.
    pub breaker_reset_timeout_ms: u64,
    /// Maximum trial calls while half-open.
    pub breaker_half_open_max_calls: u32,
}

impl Default for ProviderResilienceConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 60_000,
            max_retries: 1,
            retry_backoff_ms: 500,
            breaker_failure_threshold: 5,
            breaker_reset_timeout_ms: 30_000,
            breaker_half_open_max_calls: 1,
        }
    }
}

impl ProviderResilienceConfig {
    /// Loads resilience configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `SNAPROT_CALL_TIMEOUT_MS` | Per-call timeout | 60000 |
    /// | `SNAPROT_MAX_RETRIES` | Retries on transient errors | 1 |
    /// | `SNAPROT_RETRY_BACKOFF_MS` | Backoff between retries | 500 |
    /// | `SNAPROT_BREAKER_FAILURE_THRESHOLD` | Failures before opening | 5 |
    /// | `SNAPROT_BREAKER_RESET_MS` | Open duration | 30000 |
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("SNAPROT_CALL_TIMEOUT_MS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.call_timeout_ms = parsed;
        }
        if let Ok(v) = std::env::var("SNAPROT_MAX_RETRIES")
            && let Ok(parsed) = v.parse::<u32>()
        {
            self.max_retries = parsed;
        }
        if let Ok(v) = std::env::var("SNAPROT_RETRY_BACKOFF_MS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.retry_backoff_ms = parsed;
        }
        if let Ok(v) = std::env::var("SNAPROT_BREAKER_FAILURE_THRESHOLD")
            && let Ok(parsed) = v.parse::<u32>()
        {
            self.breaker_failure_threshold = parsed.max(1);
        }
        if let Ok(v) = std::env::var("SNAPROT_BREAKER_RESET_MS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.breaker_reset_timeout_ms = parsed;
        }
        self
    }

    /// Sets the per-call timeout in milliseconds.
    #[must_use]
    pub const fn with_call_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.call_timeout_ms = timeout_ms;
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the retry backoff in milliseconds.
    #[must_use]
    pub const fn with_retry_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.retry_backoff_ms = backoff_ms;
        self
    }

    /// Sets the failure threshold.
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.breaker_failure_threshold = threshold;
        self
    }

    /// Sets the reset timeout in milliseconds.
    #[must_use]
    pub const fn with_reset_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.breaker_reset_timeout_ms = timeout_ms;
        self
    }
}

/// Circuit breaker state machine.
#[derive(Debug)]
enum BreakerState {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { attempts: u32 },
}

#[derive(Debug)]
struct CircuitBreaker {
    state: BreakerState,
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max_calls: u32,
    provider: &'static str,
}

impl CircuitBreaker {
    fn new(config: &ProviderResilienceConfig, provider: &'static str) -> Self {
        Self {
            state: BreakerState::Closed { failures: 0 },
            failure_threshold: config.breaker_failure_threshold.max(1),
            reset_timeout: Duration::from_millis(config.breaker_reset_timeout_ms),
            half_open_max_calls: config.breaker_half_open_max_calls.max(1),
            provider,
        }
    }

    fn allow(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { .. } => true,
            BreakerState::Open { opened_at } => {
                if opened_at.elapsed() >= self.reset_timeout {
                    tracing::info!(
                        provider = self.provider,
                        "Circuit breaker transitioning to half-open"
                    );
                    self.state = BreakerState::HalfOpen { attempts: 1 };
                    true
                } else {
                    false
                }
            },
            BreakerState::HalfOpen { ref mut attempts } => {
                if *attempts >= self.half_open_max_calls {
                    false
                } else {
                    *attempts += 1;
                    true
                }
            },
        }
    }

    fn on_success(&mut self) {
        if !matches!(self.state, BreakerState::Closed { failures: 0 }) {
            tracing::info!(provider = self.provider, "Circuit breaker closing after success");
        }
        self.state = BreakerState::Closed { failures: 0 };
    }

    fn on_failure(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { ref mut failures } => {
                *failures += 1;
                if *failures >= self.failure_threshold {
                    tracing::warn!(
                        provider = self.provider,
                        failures = *failures,
                        threshold = self.failure_threshold,
                        "Circuit breaker opened after consecutive failures"
                    );
                    self.state = BreakerState::Open {
                        opened_at: Instant::now(),
                    };
                    return true;
                }
            },
            BreakerState::HalfOpen { .. } => {
                tracing::warn!(
                    provider = self.provider,
                    "Circuit breaker re-opened after half-open failure"
                );
                self.state = BreakerState::Open {
                    opened_at: Instant::now(),
                };
                return true;
            },
            BreakerState::Open { .. } => {},
        }
        false
    }

    const fn state_value(&self) -> u8 {
        match self.state {
            BreakerState::Closed { .. } => 0,
            BreakerState::Open { .. } => 1,
            BreakerState::HalfOpen { .. } => 2,
        }
    }
}

/// Provider wrapper with per-call timeout, retry, and circuit breaker.
pub struct ResilientProvider<P: ProviderClient + 'static> {
    inner: Arc<P>,
    config: ProviderResilienceConfig,
    breaker: Mutex<CircuitBreaker>,
}

impl<P: ProviderClient + 'static> ResilientProvider<P> {
    /// Creates a new resilient provider wrapper.
    #[must_use]
    pub fn new(inner: Arc<P>, config: ProviderResilienceConfig) -> Self {
        let breaker = CircuitBreaker::new(&config, inner.name());
        Self {
            inner,
            config,
            breaker: Mutex::new(breaker),
        }
    }

    /// Returns the wrapped provider.
    #[must_use]
    pub const fn inner(&self) -> &Arc<P> {
        &self.inner
    }

    /// Runs `call` with retry; returns the result and the number of attempts.
    fn execute<T, F>(&self, operation: &'static str, call: F) -> (ProviderResult<T>, u32)
    where
        T: Send + 'static,
        F: Fn(&P) -> ProviderResult<T> + Clone + Send + 'static,
    {
        let provider = self.inner.name();
        let mut attempts = 0;
        loop {
            attempts += 1;

            let mut breaker = self.breaker.lock().unwrap_or_else(PoisonError::into_inner);
            if !breaker.allow() {
                let state = breaker.state_value();
                drop(breaker);
                Self::record_metrics(provider, operation, "circuit_open", state);
                return (
                    Err(ProviderError::unavailable(operation, "circuit breaker open")),
                    attempts,
                );
            }
            drop(breaker);

            let result = self.call_with_timeout(operation, call.clone());

            let mut breaker = self.breaker.lock().unwrap_or_else(PoisonError::into_inner);
            let transient = result.as_ref().err().is_some_and(ProviderError::is_transient);
            if transient {
                breaker.on_failure();
            } else {
                breaker.on_success();
            }
            let state = breaker.state_value();
            drop(breaker);

            let status = match &result {
                Ok(_) => "success",
                Err(_) if transient => "transient_error",
                Err(_) => "error",
            };
            Self::record_metrics(provider, operation, status, state);

            match result {
                Err(e) if transient && attempts <= self.config.max_retries => {
                    tracing::warn!(
                        provider,
                        operation,
                        attempt = attempts,
                        error = %e,
                        "Transient provider failure, retrying"
                    );
                    metrics::counter!(
                        "provider_retries_total",
                        "provider" => provider,
                        "operation" => operation
                    )
                    .increment(1);
                    std::thread::sleep(Duration::from_millis(self.config.retry_backoff_ms));
                },
                other => return (other, attempts),
            }
        }
    }

    fn call_with_timeout<T, F>(&self, operation: &'static str, call: F) -> ProviderResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&P) -> ProviderResult<T> + Send + 'static,
    {
        if self.config.call_timeout_ms == 0 {
            return call(&self.inner);
        }

        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        std::thread::Builder::new()
            .name(format!("snaprot-{operation}"))
            .spawn(move || {
                // The receiver is gone if the call timed out; nothing to report.
                let _ = tx.send(call(&inner));
            })
            .map_err(|e| ProviderError::unavailable(operation, e.to_string()))?;

        match rx.recv_timeout(Duration::from_millis(self.config.call_timeout_ms)) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ProviderError::Timeout {
                operation: operation.to_string(),
                after_ms: self.config.call_timeout_ms,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(ProviderError::unavailable(
                operation,
                "provider call terminated without a result",
            )),
        }
    }

    /// Finds the snapshot an earlier, seemingly failed create produced.
    fn find_created(&self, volume: &Volume, name: &SnapshotId) -> ProviderResult<Snapshot> {
        let filter = SnapshotFilter::new(volume.provider_id.clone(), name.as_str());
        let (found, _) = self.execute("list_snapshots", move |p: &P| {
            p.list_snapshots(&filter)?
                .collect::<ProviderResult<Vec<Snapshot>>>()
        });
        found?
            .into_iter()
            .find(|snapshot| snapshot.id == *name)
            .ok_or_else(|| ProviderError::AlreadyExists(name.to_string()))
    }

    fn record_metrics(
        provider: &'static str,
        operation: &'static str,
        status: &'static str,
        state: u8,
    ) {
        metrics::counter!(
            "provider_requests_total",
            "provider" => provider,
            "operation" => operation,
            "status" => status
        )
        .increment(1);
        metrics::gauge!(
            "provider_circuit_breaker_state",
            "provider" => provider
        )
        .set(f64::from(state));
    }
}

impl<P: ProviderClient + 'static> ProviderClient for ResilientProvider<P> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn list_volumes(&self) -> ProviderResult<Listing<'_, Volume>> {
        let (result, _) = self.execute("list_volumes", |p: &P| {
            p.list_volumes()?.collect::<ProviderResult<Vec<Volume>>>()
        });
        Ok(Box::new(result?.into_iter().map(Ok)))
    }

    fn list_snapshots(&self, filter: &SnapshotFilter) -> ProviderResult<Listing<'_, Snapshot>> {
        let filter = filter.clone();
        let (result, _) = self.execute("list_snapshots", move |p: &P| {
            p.list_snapshots(&filter)?
                .collect::<ProviderResult<Vec<Snapshot>>>()
        });
        Ok(Box::new(result?.into_iter().map(Ok)))
    }

    fn create_snapshot(&self, volume: &Volume, name: &SnapshotId) -> ProviderResult<Snapshot> {
        let (owned_volume, owned_name) = (volume.clone(), name.clone());
        let (result, attempts) = self.execute("create_snapshot", move |p: &P| {
            p.create_snapshot(&owned_volume, &owned_name)
        });
        match result {
            // A timed-out first attempt may have succeeded on the provider side.
            Err(ProviderError::AlreadyExists(_)) if attempts > 1 => {
                tracing::info!(
                    snapshot = %name,
                    "Create retry found an existing snapshot, resolving it"
                );
                self.find_created(volume, name)
            },
            other => other,
        }
    }

    fn delete_snapshot(&self, snapshot: &Snapshot) -> ProviderResult<DeleteOutcome> {
        let owned = snapshot.clone();
        let (result, _) = self.execute("delete_snapshot", move |p: &P| p.delete_snapshot(&owned));
        match result {
            Err(ProviderError::NotFound(_)) => Ok(DeleteOutcome::NotFound),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{FaultOp, InMemoryProvider, ProviderCall};

    fn fast_config() -> ProviderResilienceConfig {
        ProviderResilienceConfig::default()
            .with_retry_backoff_ms(0)
            .with_call_timeout_ms(2_000)
    }

    #[test]
    fn test_retries_transient_once() {
        let inner = Arc::new(InMemoryProvider::new());
        let volume = inner.add_volume("disk1");
        inner.fail_next(
            FaultOp::Create,
            Some("disk1"),
            ProviderError::unavailable("create", "503"),
        );
        let provider = ResilientProvider::new(Arc::clone(&inner), fast_config());

        let created = provider.create_snapshot(&volume, &SnapshotId::new("disk1-daily-20240101"));
        assert!(created.is_ok());
        assert_eq!(inner.calls().len(), 2);
    }

    #[test]
    fn test_gives_up_after_one_retry() {
        let inner = Arc::new(InMemoryProvider::new());
        let volume = inner.add_volume("disk1");
        inner.fail_times(
            FaultOp::Create,
            Some("disk1"),
            ProviderError::unavailable("create", "503"),
            2,
        );
        let provider = ResilientProvider::new(Arc::clone(&inner), fast_config());

        let created = provider.create_snapshot(&volume, &SnapshotId::new("disk1-daily-20240101"));
        assert!(matches!(created, Err(ProviderError::Unavailable { .. })));
        assert_eq!(inner.calls().len(), 2);
    }

    #[test]
    fn test_no_retry_on_quota() {
        let inner = Arc::new(InMemoryProvider::new());
        let volume = inner.add_volume("disk1");
        inner.fail_next(
            FaultOp::Create,
            None,
            ProviderError::QuotaExceeded("SNAPSHOTS".to_string()),
        );
        let provider = ResilientProvider::new(Arc::clone(&inner), fast_config());

        let created = provider.create_snapshot(&volume, &SnapshotId::new("disk1-daily-20240101"));
        assert!(matches!(created, Err(ProviderError::QuotaExceeded(_))));
        assert_eq!(inner.calls().len(), 1);
    }

    #[test]
    fn test_delete_not_found_error_is_outcome() {
        let inner = Arc::new(InMemoryProvider::new());
        inner.add_volume("disk1");
        let snapshot = inner.insert_snapshot("disk1", "disk1-daily-20240101").unwrap();
        inner.fail_next(
            FaultOp::Delete,
            None,
            ProviderError::NotFound(snapshot.id.to_string()),
        );
        let provider = ResilientProvider::new(Arc::clone(&inner), fast_config());

        assert_eq!(provider.delete_snapshot(&snapshot).unwrap(), DeleteOutcome::NotFound);
        assert_eq!(inner.calls(), vec![ProviderCall::Delete(snapshot.id)]);
    }

    #[test]
    fn test_timeout_then_resolves_existing_snapshot() {
        let inner = Arc::new(InMemoryProvider::new());
        let volume = inner.add_volume("disk1");
        inner.set_latency(Some(Duration::from_millis(200)));
        let config = fast_config()
            .with_call_timeout_ms(50)
            .with_retry_backoff_ms(300);
        let provider = ResilientProvider::new(Arc::clone(&inner), config);

        let clear = {
            let inner = Arc::clone(&inner);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(100));
                inner.set_latency(None);
            })
        };

        // The first attempt times out but still lands; the retry sees
        // AlreadyExists and resolves to the snapshot the first attempt made.
        let name = SnapshotId::new("disk1-daily-20240101");
        let snapshot = provider.create_snapshot(&volume, &name).unwrap();
        clear.join().unwrap();

        assert_eq!(snapshot.id, name);
        assert_eq!(inner.snapshots().len(), 1);
    }

    #[test]
    fn test_circuit_opens_after_threshold() {
        let inner = Arc::new(InMemoryProvider::new());
        let volume = inner.add_volume("disk1");
        inner.fail_times(
            FaultOp::Create,
            None,
            ProviderError::unavailable("create", "503"),
            10,
        );
        let config = fast_config()
            .with_max_retries(0)
            .with_failure_threshold(2)
            .with_reset_timeout_ms(60_000);
        let provider = ResilientProvider::new(Arc::clone(&inner), config);

        for i in 0..4 {
            let name = SnapshotId::new(format!("disk1-daily-2024010{i}"));
            assert!(provider.create_snapshot(&volume, &name).is_err());
        }
        // Two calls tripped the breaker; the rest never reached the provider.
        assert_eq!(inner.calls().len(), 2);
    }
}
