//! Retry message formatting
//!
//! Keeps the wording of retry, recovery and give-up messages in one place so
//! every remote operation reports the same way.

use crate::remote::SessionError;
use crate::USEC_PER_SEC;
use std::time::Duration;

/// Classification of remote errors for user messaging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Attempt exceeded its time budget
    Timeout,
    /// Connection refused, reset or unreachable
    ConnectionFailed,
    /// Service reported an internal failure
    ServiceError,
    /// Response body could not be decoded
    MalformedResponse,
    /// Request refused by the service
    Rejected,
}

impl From<&SessionError> for RetryErrorType {
    fn from(err: &SessionError) -> Self {
        match err {
            SessionError::Timeout(_) => Self::Timeout,
            SessionError::Connection(_) => Self::ConnectionFailed,
            SessionError::Service(_) => Self::ServiceError,
            SessionError::MalformedResponse(_) => Self::MalformedResponse,
            SessionError::Rejected(_) => Self::Rejected,
        }
    }
}

impl RetryErrorType {
    /// Short description used inside retry messages
    pub fn description(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionFailed => "connection failed",
            Self::ServiceError => "service error",
            Self::MalformedResponse => "malformed response",
            Self::Rejected => "request rejected",
        }
    }

    /// Suggested remediation shown after the final failure
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::Timeout => "Try a longer --timeout-secs or a smaller --chunk-minutes",
            Self::ConnectionFailed => "Verify connectivity to the data service",
            Self::ServiceError => "The service may be overloaded, rerun later",
            Self::MalformedResponse => "Check that --base-url points at the data service API",
            Self::Rejected => "Verify credentials and that the dataset name exists",
        }
    }
}

/// Context for one remote call's retry messages
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Type of error that triggered the retry
    pub error_type: RetryErrorType,
    /// Wait before the next attempt
    pub backoff_duration: Duration,
    /// Dataset being read
    pub source_reference: String,
    /// Requested window (start, duration) in microseconds
    pub window: Option<(i64, i64)>,
    /// Last error message
    pub error_message: String,
    /// Operation name (e.g., "get_data")
    pub operation: &'static str,
}

impl RetryContext {
    /// Build a context from the error of a failed attempt
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        error: &SessionError,
        backoff_duration: Duration,
        source_reference: impl Into<String>,
        window: Option<(i64, i64)>,
        operation: &'static str,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            error_type: RetryErrorType::from(error),
            backoff_duration,
            source_reference: source_reference.into(),
            window,
            error_message: error.to_string(),
            operation,
        }
    }

    /// Message logged before backing off
    pub fn format_retry(&self) -> String {
        let mut message = format!(
            "Retrying {} (attempt {}/{}) after {} - waiting {:.1} seconds...",
            self.operation,
            self.attempt,
            self.max_attempts,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64()
        );
        append_source_and_window(&mut message, &self.source_reference, self.window);
        message
    }

    /// Message logged when a retried call finally succeeds
    pub fn format_success(&self) -> String {
        let mut message = format!(
            "{} succeeded on attempt {}/{}",
            self.operation, self.attempt, self.max_attempts
        );
        append_source_and_window(&mut message, &self.source_reference, self.window);
        message
    }

    /// Multi-line summary logged when the call is abandoned
    pub fn format_failure(&self) -> String {
        let mut lines = vec![
            format!(
                "[FAILED] {} failed after {} attempt(s)",
                self.operation, self.attempt
            ),
            format!("  Last error: {}", self.error_message),
            format!("  Dataset: {}", self.source_reference),
        ];
        if let Some((start, duration)) = self.window {
            lines.push(format!("  Window: {}", format_window(start, duration)));
        }
        lines.push(format!("  Suggestion: {}", self.error_type.suggestion()));
        lines.join("\n")
    }
}

fn append_source_and_window(buffer: &mut String, source: &str, window: Option<(i64, i64)>) {
    if !source.is_empty() {
        buffer.push_str(&format!(" ({source})"));
    }
    if let Some((start, duration)) = window {
        buffer.push(' ');
        buffer.push_str(&format_window(start, duration));
    }
}

fn format_window(start_usec: i64, duration_usec: i64) -> String {
    let secs = |usec: i64| usec as f64 / USEC_PER_SEC as f64;
    format!(
        "{:.3}s to {:.3}s",
        secs(start_usec),
        secs(start_usec + duration_usec)
    )
}
