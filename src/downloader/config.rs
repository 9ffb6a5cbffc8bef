//! Download configuration and defaults

use super::DownloadError;
use crate::fetcher::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Total attempts per remote call, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Wall-clock budget of a single remote call attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Fixed wait between attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

/// Upper bound on one data request (10 minutes, in microseconds).
pub const DEFAULT_MAX_CHUNK_USEC: i64 = 10 * crate::USEC_PER_MINUTE;

/// Layer holding "Clip Start"/"Clip End" markers.
pub const DEFAULT_CLIP_LAYER: &str = "EEG clip times";

/// Layer holding free-text clinical annotations.
pub const DEFAULT_ANNOTATION_LAYER: &str = "Imported Natus ENT annotations";

/// Prefix of session directory labels (`ses-implant001`).
pub const DEFAULT_SESSION_LABEL: &str = "implant";

/// Ledger file name below the output root.
pub const DEFAULT_LEDGER_FILE: &str = "subjects.csv";

/// Failure log file name below the output root.
pub const DEFAULT_FAILURE_LOG_FILE: &str = "failures.csv";

/// Everything a run needs besides the connector and layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Total attempts per remote call
    pub max_attempts: u32,
    /// Budget of one attempt
    pub attempt_timeout: Duration,
    /// Wait between attempts
    pub backoff: Duration,
    /// Upper bound on one data request in microseconds
    pub max_chunk_usec: i64,
    /// Unresolved-lead count above which leads are ECoG
    pub channel_type_threshold: usize,
    /// Download clips and annotations instead of a fixed span
    pub annotation_mode: bool,
    /// Clip marker layer name
    pub clip_layer: String,
    /// Free annotation layer name
    pub annotation_layer: String,
    /// Session directory label
    pub session_label: String,
    /// Span start in microseconds (span mode)
    pub span_start_usec: i64,
    /// Span duration in microseconds (span mode; 0 means whole dataset in
    /// annotation mode or with `span_to_end`)
    pub span_duration_usec: i64,
    /// Span mode reads from the span start to the end of each dataset when
    /// no duration is given
    #[serde(default)]
    pub span_to_end: bool,
    /// Root of the output tree
    pub output_root: PathBuf,
    /// Subject ledger
    pub ledger_path: PathBuf,
    /// Append-only failure log
    pub failure_log: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

impl DownloadConfig {
    /// Defaults with outputs below `output_root`
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        let output_root = output_root.into();
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            backoff: DEFAULT_BACKOFF,
            max_chunk_usec: DEFAULT_MAX_CHUNK_USEC,
            channel_type_threshold: crate::channels::DEFAULT_CHANNEL_TYPE_THRESHOLD,
            annotation_mode: false,
            clip_layer: DEFAULT_CLIP_LAYER.to_string(),
            annotation_layer: DEFAULT_ANNOTATION_LAYER.to_string(),
            session_label: DEFAULT_SESSION_LABEL.to_string(),
            span_start_usec: 0,
            span_duration_usec: 0,
            span_to_end: false,
            ledger_path: output_root.join(DEFAULT_LEDGER_FILE),
            failure_log: output_root.join(DEFAULT_FAILURE_LOG_FILE),
            output_root,
        }
    }

    /// Switch annotation mode on or off
    pub fn with_annotation_mode(mut self, enabled: bool) -> Self {
        self.annotation_mode = enabled;
        self
    }

    /// Set the fixed span for span mode
    pub fn with_span(mut self, start_usec: i64, duration_usec: i64) -> Self {
        self.span_start_usec = start_usec;
        self.span_duration_usec = duration_usec;
        self
    }

    /// Read span-mode items to the end of the dataset when no duration is set
    pub fn with_span_to_end(mut self, enabled: bool) -> Self {
        self.span_to_end = enabled;
        self
    }

    /// Set retry limits
    pub fn with_retry(mut self, max_attempts: u32, attempt_timeout: Duration, backoff: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.attempt_timeout = attempt_timeout;
        self.backoff = backoff;
        self
    }

    /// Set the chunk bound
    pub fn with_max_chunk_usec(mut self, max_chunk_usec: i64) -> Self {
        self.max_chunk_usec = max_chunk_usec;
        self
    }

    /// Set the ECoG/SEEG threshold
    pub fn with_channel_type_threshold(mut self, threshold: usize) -> Self {
        self.channel_type_threshold = threshold;
        self
    }

    /// Set annotation layer names
    pub fn with_layers(mut self, clip_layer: impl Into<String>, annotation_layer: impl Into<String>) -> Self {
        self.clip_layer = clip_layer.into();
        self.annotation_layer = annotation_layer.into();
        self
    }

    /// Set the session label
    pub fn with_session_label(mut self, label: impl Into<String>) -> Self {
        self.session_label = label.into();
        self
    }

    /// Set the ledger location
    pub fn with_ledger_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ledger_path = path.into();
        self
    }

    /// Set the failure log location
    pub fn with_failure_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.failure_log = path.into();
        self
    }

    /// Retry policy for remote calls
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.attempt_timeout, self.backoff)
    }

    /// Check values are usable
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.max_attempts == 0 {
            return Err(DownloadError::ConfigError(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.attempt_timeout.is_zero() {
            return Err(DownloadError::ConfigError(
                "attempt timeout must be positive".to_string(),
            ));
        }
        if self.max_chunk_usec <= 0 {
            return Err(DownloadError::ConfigError(
                "max chunk duration must be positive".to_string(),
            ));
        }
        if self.span_start_usec < 0 || self.span_duration_usec < 0 {
            return Err(DownloadError::ConfigError(
                "span start and duration cannot be negative".to_string(),
            ));
        }
        if self.span_start_usec.checked_add(self.span_duration_usec).is_none() {
            return Err(DownloadError::ConfigError(
                "span end does not fit in microseconds".to_string(),
            ));
        }
        if !self.annotation_mode && !self.span_to_end && self.span_duration_usec == 0 {
            return Err(DownloadError::ConfigError(
                "span mode needs a positive duration".to_string(),
            ));
        }
        if self.annotation_mode && (self.clip_layer.is_empty() || self.annotation_layer.is_empty()) {
            return Err(DownloadError::ConfigError(
                "annotation mode needs clip and annotation layer names".to_string(),
            ));
        }
        if crate::output::path::sanitize_label(&self.session_label).is_empty() {
            return Err(DownloadError::ConfigError(format!(
                "session label {:?} has no alphanumeric characters",
                self.session_label
            )));
        }
        Ok(())
    }
}
