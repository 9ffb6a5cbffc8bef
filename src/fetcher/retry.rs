//! Bounded retry of remote calls
//!
//! [`RetryingCaller::call`] runs an operation under a per-attempt timeout,
//! retries transient failures after a fixed backoff, and on final failure
//! writes exactly one line to the [`FailureLog`]. It never returns an error:
//! callers get a [`CallOutcome`] and decide whether to skip or abort.

use super::failure_log::{FailureLog, FailureRecord};
use super::retry_formatter::RetryContext;
use super::FetchError;
use crate::downloader::config::{DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_BACKOFF, DEFAULT_MAX_ATTEMPTS};
use crate::metrics::{record_exhausted, record_retry_backoff, RemoteCallMetrics};
use crate::remote::{SessionError, SessionResult};
use crate::shutdown::{SharedShutdown, ShutdownCoordinator};
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

/// Attempt limits for remote calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (at least 1)
    pub max_attempts: u32,
    /// Budget for a single attempt
    pub attempt_timeout: Duration,
    /// Fixed wait between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Create a policy; `max_attempts` of 0 is raised to 1
    pub fn new(max_attempts: u32, attempt_timeout: Duration, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempt_timeout,
            backoff,
        }
    }
}

/// What a call was for, used in logs and the failure log
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    /// Remote operation name
    pub operation: &'static str,
    /// Dataset
    pub source_reference: &'a str,
    /// Requested start in microseconds (0 when not a windowed call)
    pub start_usec: i64,
    /// Requested duration in microseconds (0 when not a windowed call)
    pub duration_usec: i64,
}

impl<'a> CallContext<'a> {
    /// Context for a call without a time window
    pub fn new(operation: &'static str, source_reference: &'a str) -> Self {
        Self {
            operation,
            source_reference,
            start_usec: 0,
            duration_usec: 0,
        }
    }

    /// Attach a time window
    pub fn with_window(mut self, start_usec: i64, duration_usec: i64) -> Self {
        self.start_usec = start_usec;
        self.duration_usec = duration_usec;
        self
    }

    fn window(&self) -> Option<(i64, i64)> {
        (self.duration_usec > 0).then_some((self.start_usec, self.duration_usec))
    }
}

/// Result of a retried call
#[derive(Debug)]
pub enum CallOutcome<T> {
    /// An attempt succeeded
    Success(T),
    /// Every allowed attempt failed, or the error was permanent
    Failed {
        /// Attempts made
        attempts: u32,
        /// Last error
        error: SessionError,
    },
    /// Shutdown was requested during a backoff wait
    Interrupted {
        /// Attempts made
        attempts: u32,
        /// Last error before the interruption
        error: SessionError,
    },
}

impl<T> CallOutcome<T> {
    /// Whether an attempt succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success(_))
    }

    /// Number of attempts made; `None` for a success
    pub fn attempts(&self) -> Option<u32> {
        match self {
            CallOutcome::Success(_) => None,
            CallOutcome::Failed { attempts, .. } | CallOutcome::Interrupted { attempts, .. } => {
                Some(*attempts)
            }
        }
    }

    /// The value, or `None` on any failure
    pub fn ok(self) -> Option<T> {
        match self {
            CallOutcome::Success(value) => Some(value),
            _ => None,
        }
    }

    /// Convert into a fetch result for `operation`
    pub fn into_result(self, operation: &'static str) -> Result<T, FetchError> {
        match self {
            CallOutcome::Success(value) => Ok(value),
            CallOutcome::Failed { error, .. } => Err(FetchError::Exhausted {
                operation,
                source: error,
            }),
            CallOutcome::Interrupted { .. } => Err(FetchError::Interrupted),
        }
    }
}

/// Runs remote operations under a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryingCaller {
    policy: RetryPolicy,
    failure_log: FailureLog,
    shutdown: SharedShutdown,
}

impl RetryingCaller {
    /// Create a caller that logs exhausted calls to `failure_log`
    pub fn new(policy: RetryPolicy, failure_log: FailureLog) -> Self {
        Self {
            policy,
            failure_log,
            shutdown: ShutdownCoordinator::shared(),
        }
    }

    /// Observe `shutdown` during backoff waits
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Policy in effect
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Failure log in use
    pub fn failure_log(&self) -> &FailureLog {
        &self.failure_log
    }

    /// Shutdown handle observed by this caller
    pub fn shutdown(&self) -> &SharedShutdown {
        &self.shutdown
    }

    /// Run `operation` until it succeeds or the policy is used up
    ///
    /// `operation` is invoked once per attempt. Each attempt is bounded by
    /// the policy's timeout; an attempt that runs over is dropped and counted
    /// as a [`SessionError::Timeout`]. Permanent errors end the call at once.
    pub async fn call<T, F, Fut>(&self, ctx: &CallContext<'_>, mut operation: F) -> CallOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SessionResult<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        let mut previous: Option<SessionError> = None;

        let last_error = loop {
            attempt += 1;
            let metrics = RemoteCallMetrics::start(ctx.operation, attempt);

            let result = match tokio::time::timeout(self.policy.attempt_timeout, operation()).await
            {
                Ok(result) => result,
                Err(_) => Err(SessionError::Timeout(self.policy.attempt_timeout)),
            };

            let error = match result {
                Ok(value) => {
                    metrics.record_success();
                    if let Some(previous) = &previous {
                        info!("{}", self.retry_context(ctx, attempt, previous).format_success());
                    }
                    return CallOutcome::Success(value);
                }
                Err(error) => error,
            };
            metrics.record_error(error.kind());

            if !error.is_transient() || attempt >= max_attempts {
                break error;
            }

            let retry_ctx = self.retry_context(ctx, attempt, &error);
            warn!(
                source = ctx.source_reference,
                operation = ctx.operation,
                attempt,
                error = %error,
                "{}",
                retry_ctx.format_retry()
            );
            record_retry_backoff(ctx.operation, self.policy.backoff);

            if !self.shutdown.sleep(self.policy.backoff).await {
                warn!(
                    source = ctx.source_reference,
                    operation = ctx.operation,
                    "Shutdown requested during backoff, abandoning call"
                );
                return CallOutcome::Interrupted {
                    attempts: attempt,
                    error,
                };
            }
            previous = Some(error);
        };

        let retry_ctx = self.retry_context(ctx, attempt, &last_error);
        error!("{}", retry_ctx.format_failure());
        record_exhausted(ctx.operation);

        self.failure_log.record(&FailureRecord {
            source_reference: ctx.source_reference.to_string(),
            start_usec: ctx.start_usec,
            duration_usec: ctx.duration_usec,
            error_description: last_error.to_string(),
        });

        CallOutcome::Failed {
            attempts: attempt,
            error: last_error,
        }
    }

    fn retry_context(&self, ctx: &CallContext<'_>, attempt: u32, error: &SessionError) -> RetryContext {
        RetryContext::new(
            attempt,
            self.policy.max_attempts,
            error,
            self.policy.backoff,
            ctx.source_reference,
            ctx.window(),
            ctx.operation,
        )
    }
}
