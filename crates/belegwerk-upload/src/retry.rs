// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Backoff policy for reference resolution and classification of provider
// errors into not-found, transient and permanent.

use std::time::Duration;

use belegwerk_core::UploadConfig;
use belegwerk_core::error::BelegError;
use belegwerk_core::types::UploadErrorClass;
use tracing::{debug, warn};

/// Exponential backoff without jitter, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Attempts per resolution round, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
        }
    }
}

impl From<&UploadConfig> for BackoffPolicy {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: config.initial_delay(),
            max_delay: config.max_delay(),
        }
    }
}

impl BackoffPolicy {
    /// Delay before attempt `attempt` (1-based): none before the first,
    /// `min(initial * 2^(attempt-1), max)` afterwards.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let base_ms = self.initial_delay.as_millis() as u64;
        let exp_ms = base_ms.saturating_mul(1u64 << (attempt - 1).min(32));
        Duration::from_millis(exp_ms.min(self.max_delay.as_millis() as u64))
    }
}

/// Result of evaluating whether to try again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after this delay.
    RetryAfter(Duration),
    /// Attempts used up.
    Exhausted,
}

/// Classify a `BelegError` for tier and retry decisions.
pub fn classify_error(err: &BelegError) -> UploadErrorClass {
    if err.is_not_found() {
        return UploadErrorClass::NotFound;
    }
    match err {
        BelegError::Transport(_) | BelegError::Database(_) | BelegError::ReferenceResolutionTimeout { .. } => {
            UploadErrorClass::Transient
        }
        BelegError::UploadRejected { status, .. } if *status >= 500 || *status == 408 || *status == 429 => {
            UploadErrorClass::Transient
        }
        BelegError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::NotFound => UploadErrorClass::NotFound,
            std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::InvalidInput => {
                UploadErrorClass::Permanent
            }
            _ => UploadErrorClass::Transient,
        },
        _ => UploadErrorClass::Permanent,
    }
}

/// Decide what follows a failed attempt number `attempt` (1-based).
///
/// Every error class is retried until `max_attempts`; the class only bears on
/// which tier runs after the upload itself failed.
pub fn should_retry(err: &BelegError, attempt: u32, policy: &BackoffPolicy) -> RetryDecision {
    let class = classify_error(err);
    if attempt >= policy.max_attempts {
        warn!(attempt, max = policy.max_attempts, ?class, "attempts exhausted");
        return RetryDecision::Exhausted;
    }
    let delay = policy.delay_before(attempt + 1);
    debug!(attempt, ?class, delay_ms = delay.as_millis() as u64, "scheduling retry");
    RetryDecision::RetryAfter(delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_then_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_before(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_before(4), Duration::from_millis(8000));
        assert_eq!(policy.delay_before(5), Duration::from_millis(10_000));
        assert_eq!(policy.delay_before(60), Duration::from_millis(10_000));
    }

    #[test]
    fn not_found_message_is_not_found_class() {
        let err = BelegError::Transport("Object does not exist: Not Found".into());
        assert_eq!(classify_error(&err), UploadErrorClass::NotFound);
    }

    #[test]
    fn server_errors_are_transient_client_errors_permanent() {
        let server = BelegError::UploadRejected { status: 503, detail: "busy".into() };
        let client = BelegError::UploadRejected { status: 403, detail: "denied".into() };
        assert_eq!(classify_error(&server), UploadErrorClass::Transient);
        assert_eq!(classify_error(&client), UploadErrorClass::Permanent);
    }

    #[test]
    fn retry_respects_max() {
        let policy = BackoffPolicy::default();
        let err = BelegError::ObjectNotFound("receipts/a.jpg".into());
        assert_eq!(
            should_retry(&err, 1, &policy),
            RetryDecision::RetryAfter(Duration::from_millis(2000))
        );
        assert_eq!(should_retry(&err, 3, &policy), RetryDecision::Exhausted);
    }

    #[test]
    fn permanent_error_still_retries_until_max() {
        let policy = BackoffPolicy::default();
        let err = BelegError::UploadRejected { status: 403, detail: "denied".into() };
        assert_eq!(
            should_retry(&err, 2, &policy),
            RetryDecision::RetryAfter(Duration::from_millis(4000))
        );
        assert_eq!(should_retry(&err, 3, &policy), RetryDecision::Exhausted);
    }
}
