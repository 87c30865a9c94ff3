//! Error taxonomy for cache operations.
//!
//! Validation failures surface immediately. Transient far-tier failures enter
//! the resilience pipeline first; only when retries are exhausted (or the
//! circuit is open) and no near tier can absorb the operation do they surface
//! here.
//!
//! Cancellation has no variant: every suspending operation is a future, and
//! dropping the future is the cancellation signal.

use heytom_core::expiration::ExpirationError;
use heytom_core::keys::InvalidKey;

use crate::far::FarStoreError;
use crate::resilience::PipelineError;

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by the coordinator, the mutex, and the typed helpers.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Empty/whitespace key, missing value, or unusable expiration options.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the input.
        reason: String,
    },

    /// The instance was closed; no further operations are accepted.
    #[error("cache instance has been closed")]
    Disposed,

    /// The resilience pipeline short-circuited without reaching the far tier.
    #[error("far-tier circuit breaker is open")]
    CircuitOpen,

    /// The far tier stayed unreachable through the pipeline and the near tier
    /// was not available to degrade onto.
    #[error("far tier unavailable")]
    BackendUnavailable {
        /// The last transient failure observed by the pipeline.
        #[source]
        source: FarStoreError,
    },

    /// The far tier answered with an error (wrong type, bad command, ...).
    #[error("far tier rejected the operation")]
    Backend {
        /// The server-reported failure.
        #[source]
        source: FarStoreError,
    },

    /// A typed-helper value failed to encode or decode.
    #[error("serialization failed")]
    Serialization(#[from] serde_json::Error),

    /// A local infrastructure failure (e.g. the blocking facade's runtime).
    #[error("internal error: {0}")]
    Internal(String),
}

impl CacheError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }
}

impl From<InvalidKey> for CacheError {
    fn from(err: InvalidKey) -> Self {
        Self::invalid(err.to_string())
    }
}

impl From<ExpirationError> for CacheError {
    fn from(err: ExpirationError) -> Self {
        Self::invalid(err.to_string())
    }
}

impl From<PipelineError> for CacheError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::CircuitOpen => Self::CircuitOpen,
            PipelineError::Store(source) if source.is_transient() => {
                Self::BackendUnavailable { source }
            }
            PipelineError::Store(source) => Self::Backend { source },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_key_maps_to_invalid_argument() {
        let err: CacheError = heytom_core::validate_key("").unwrap_err().into();
        assert!(matches!(err, CacheError::InvalidArgument { .. }));
    }

    #[test]
    fn pipeline_errors_map_by_classification() {
        let err: CacheError = PipelineError::CircuitOpen.into();
        assert!(matches!(err, CacheError::CircuitOpen));

        let err: CacheError = PipelineError::Store(FarStoreError::Timeout("5s".into())).into();
        assert!(matches!(err, CacheError::BackendUnavailable { .. }));

        let err: CacheError =
            PipelineError::Store(FarStoreError::Response("WRONGTYPE".into())).into();
        assert!(matches!(err, CacheError::Backend { .. }));
    }
}
