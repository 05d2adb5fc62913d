//! Remote library access
//!
//! The engine talks to the library through [`RemoteLibrary`]; the HTTP
//! client lives in the CLI crate. Transient failures are retried here with
//! exponential backoff.

use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::lock::CancelFlag;
use crate::models::{RemoteAnnotation, RemoteItem};

/// Errors reported by a remote library
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network failure, rate limiting or a server error; worth retrying
    #[error("transient remote error: {0}")]
    Transient(String),

    /// Credentials rejected; fatal for the run
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The response could not be understood
    #[error("invalid remote response: {0}")]
    Invalid(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

/// Read access to a remote library
pub trait RemoteLibrary {
    /// Current library version
    fn current_version(&self) -> Result<i64, RemoteError>;

    /// Top-level items modified after `version`, including items whose
    /// attachments or annotations changed
    fn items_changed_since(&self, version: i64) -> Result<Vec<RemoteItem>, RemoteError>;

    /// Every top-level item in the library
    fn all_items(&self) -> Result<Vec<RemoteItem>, RemoteError>;

    /// Annotations on one attachment
    fn annotations_for(&self, attachment_key: &str) -> Result<Vec<RemoteAnnotation>, RemoteError>;

    /// Keys of items deleted after `version`
    fn deleted_item_keys(&self, version: i64) -> Result<Vec<String>, RemoteError>;
}

/// Retry schedule for transient errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// No delays, for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (0-based), doubling up to the cap
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op`, retrying transient errors
    ///
    /// Returns the last error once attempts are exhausted. Non-transient
    /// errors are returned immediately. A raised cancel flag stops retrying.
    pub fn run<T>(
        &self,
        operation: &str,
        cancel: Option<&CancelFlag>,
        mut op: impl FnMut() -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match op() {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(operation, attempt, "Remote call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() && attempt + 1 < attempts => {
                    if cancel.is_some_and(|c| c.is_cancelled()) {
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient remote error, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(700),
        };

        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(700));
        assert_eq!(policy.delay_for(40), Duration::from_millis(700));
    }

    #[test]
    fn test_transient_errors_are_retried() {
        let calls = Cell::new(0);
        let result = RetryPolicy::immediate(3).run("version", None, || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(RemoteError::Transient("503".to_string()))
            } else {
                Ok(42)
            }
        });

        assert_eq!(result, Ok(42));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retries_are_bounded() {
        let calls = Cell::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(2).run("version", None, || {
            calls.set(calls.get() + 1);
            Err(RemoteError::Transient("timeout".to_string()))
        });

        assert_eq!(result, Err(RemoteError::Transient("timeout".to_string())));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_auth_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(5).run("items", None, || {
            calls.set(calls.get() + 1);
            Err(RemoteError::Auth("403".to_string()))
        });

        assert!(matches!(result, Err(RemoteError::Auth(_))));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_cancel_stops_retrying() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let calls = Cell::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(5).run("items", Some(&cancel), || {
            calls.set(calls.get() + 1);
            Err(RemoteError::Transient("503".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
