//! Per-entry expiration options and their resolution to an effective TTL.
//!
//! An entry can carry up to three expiration inputs: an absolute wall-clock
//! deadline, an absolute-relative duration (resolved to a deadline at store
//! time), and a sliding duration (reset on each successful read or refresh).
//! At most one absolute form is meaningful; when both appear, the wall-clock
//! deadline wins. When absolute and sliding coexist, the effective initial
//! TTL is the smaller of the two, and sliding bumps never extend past the
//! remaining absolute budget.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Errors from resolving [`ExpirationOptions`] against a store-time clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ExpirationError {
    /// The absolute wall-clock deadline is at or before the current time.
    #[error("absolute expiration deadline is in the past")]
    AbsoluteInPast,
    /// A duration-typed expiration input was zero.
    #[error("expiration duration must be greater than zero")]
    ZeroDuration,
}

/// Expiration inputs accepted by a cache write.
///
/// The zero value ([`ExpirationOptions::none`]) means "no caller-provided
/// expiration"; stores are free to substitute their configured default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirationOptions {
    /// Absolute wall-clock deadline. Wins over `absolute_after` when both set.
    pub absolute_at: Option<DateTime<Utc>>,
    /// Duration from store time to the absolute deadline.
    pub absolute_after: Option<Duration>,
    /// Sliding window reset on each successful read or refresh.
    pub sliding: Option<Duration>,
}

impl ExpirationOptions {
    /// No caller-provided expiration.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Expire at a fixed wall-clock deadline.
    #[must_use]
    pub fn absolute_at(deadline: DateTime<Utc>) -> Self {
        Self {
            absolute_at: Some(deadline),
            ..Self::default()
        }
    }

    /// Expire a fixed duration after store time.
    #[must_use]
    pub fn absolute_after(duration: Duration) -> Self {
        Self {
            absolute_after: Some(duration),
            ..Self::default()
        }
    }

    /// Expire after a period of inactivity.
    #[must_use]
    pub fn sliding(window: Duration) -> Self {
        Self {
            sliding: Some(window),
            ..Self::default()
        }
    }

    /// Adds a sliding window to an existing option set.
    #[must_use]
    pub fn with_sliding(mut self, window: Duration) -> Self {
        self.sliding = Some(window);
        self
    }

    /// Whether no expiration input was provided at all.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.absolute_at.is_none() && self.absolute_after.is_none() && self.sliding.is_none()
    }

    /// Resolves the options against `now` into store-ready durations.
    ///
    /// A past (or exactly-now) wall-clock deadline is rejected rather than
    /// treated as "already expired": callers passing stale deadlines almost
    /// always hold a bug, not an intent to write a dead entry.
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<ResolvedExpiration, ExpirationError> {
        let absolute = match (self.absolute_at, self.absolute_after) {
            // Wall-clock deadline wins over the relative form.
            (Some(at), _) => {
                let remaining = (at - now)
                    .to_std()
                    .map_err(|_| ExpirationError::AbsoluteInPast)?;
                if remaining.is_zero() {
                    return Err(ExpirationError::AbsoluteInPast);
                }
                Some(remaining)
            }
            (None, Some(after)) => {
                if after.is_zero() {
                    return Err(ExpirationError::ZeroDuration);
                }
                Some(after)
            }
            (None, None) => None,
        };

        if let Some(window) = self.sliding {
            if window.is_zero() {
                return Err(ExpirationError::ZeroDuration);
            }
        }

        Ok(ResolvedExpiration {
            absolute,
            sliding: self.sliding,
        })
    }
}

/// Store-ready expiration: remaining absolute budget plus the sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedExpiration {
    /// Remaining time until the absolute deadline, measured from resolve time.
    pub absolute: Option<Duration>,
    /// Sliding window, bumped on access but capped by `absolute`.
    pub sliding: Option<Duration>,
}

impl ResolvedExpiration {
    /// An entry that never expires.
    #[must_use]
    pub fn never() -> Self {
        Self {
            absolute: None,
            sliding: None,
        }
    }

    /// A plain absolute expiration, `duration` from now.
    #[must_use]
    pub fn absolute(duration: Duration) -> Self {
        Self {
            absolute: Some(duration),
            sliding: None,
        }
    }

    /// Whether the entry carries no expiration at all.
    #[must_use]
    pub fn is_never(&self) -> bool {
        self.absolute.is_none() && self.sliding.is_none()
    }

    /// The effective TTL to attach at store time.
    ///
    /// With both an absolute budget and a sliding window, the earlier
    /// deadline wins.
    #[must_use]
    pub fn initial_ttl(&self) -> Option<Duration> {
        match (self.absolute, self.sliding) {
            (Some(absolute), Some(sliding)) => Some(absolute.min(sliding)),
            (Some(absolute), None) => Some(absolute),
            (None, Some(sliding)) => Some(sliding),
            (None, None) => None,
        }
    }
}
