//! Far-tier call resilience: retry with backoff wrapping a circuit breaker.
//!
//! Every far-tier call the coordinator makes flows through
//! [`ResiliencePipeline::run`]. Each attempt is bounded by the configured
//! operation timeout; timeouts and connection failures are the classified
//! transient set, which is retried and counted against the circuit. Server
//! response errors pass through on the first attempt and leave the circuit
//! healthy.

pub mod breaker;
pub mod retry;

use std::future::Future;
use std::time::Duration;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig};
pub use retry::RetryConfig;

use crate::far::{FarResult, FarStoreError};

/// Combined retry and circuit-breaker tuning.
#[derive(Debug, Clone, Default)]
pub struct ResilienceConfig {
    /// Retry policy for transient failures.
    pub retry: RetryConfig,
    /// Circuit-breaker policy over the classified failure set.
    pub breaker: CircuitBreakerConfig,
}

/// Failure escaping the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The breaker rejected the call without touching the backend.
    #[error("circuit breaker is open")]
    CircuitOpen,
    /// The far tier failed: transient after retries were exhausted, or a
    /// server response error on the first attempt.
    #[error(transparent)]
    Store(#[from] FarStoreError),
}

impl PipelineError {
    /// Whether the coordinator may absorb this failure with the near tier.
    #[must_use]
    pub fn is_degradable(&self) -> bool {
        match self {
            Self::CircuitOpen => true,
            Self::Store(err) => err.is_transient(),
        }
    }
}

/// Retry + circuit-breaker pipeline guarding far-tier calls.
pub struct ResiliencePipeline {
    retry: RetryConfig,
    breaker: CircuitBreaker,
    operation_timeout: Duration,
}

impl ResiliencePipeline {
    /// Builds a pipeline from config plus the per-attempt operation timeout.
    #[must_use]
    pub fn new(config: ResilienceConfig, operation_timeout: Duration) -> Self {
        Self {
            retry: config.retry,
            breaker: CircuitBreaker::new(config.breaker),
            operation_timeout,
        }
    }

    /// Runs `operation`, retrying transient failures with jittered backoff.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FarResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if !self.breaker.admit() {
                return Err(PipelineError::CircuitOpen);
            }

            let outcome = match tokio::time::timeout(self.operation_timeout, operation()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(FarStoreError::Timeout(format!(
                    "attempt exceeded {}ms",
                    self.operation_timeout.as_millis()
                ))),
            };

            match outcome {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(err) if err.is_transient() => {
                    self.breaker.record_failure();
                    if attempt >= self.retry.max_retries {
                        return Err(err.into());
                    }
                    attempt += 1;
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                }
                Err(err) => {
                    // The server answered; the circuit stays healthy.
                    self.breaker.record_success();
                    return Err(err.into());
                }
            }
        }
    }
}
