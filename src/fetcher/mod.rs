//! Retrying, chunked retrieval from the remote service
//!
//! - [`retry`] runs one remote operation under a timeout with bounded retries
//! - [`failure_log`] records calls that exhausted their retries
//! - [`chunked`] splits long spans into bounded requests and stitches them
//! - [`retry_formatter`] builds the retry/failure log messages

use crate::remote::SessionError;

pub mod chunked;
pub mod failure_log;
pub mod retry;
pub mod retry_formatter;

pub use chunked::{plan_chunks, ChunkWindow, ChunkedFetcher, FetchedSegment};
pub use failure_log::{FailureLog, FailureRecord};
pub use retry::{CallContext, CallOutcome, RetryPolicy, RetryingCaller};

/// Fetch errors
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// A remote call failed on every attempt (already written to the failure log)
    #[error("{operation} failed after retries: {source}")]
    Exhausted {
        /// Operation that failed
        operation: &'static str,
        /// Last error seen
        source: SessionError,
    },

    /// Channels disagree on sampling rate; the recording cannot be one matrix
    #[error("channels have {} distinct sampling rates: {rates:?}", rates.len())]
    MixedSamplingRates {
        /// Distinct rates found, in first-seen order
        rates: Vec<f64>,
    },

    /// Dataset reports no channels
    #[error("dataset has no channels")]
    NoChannels,

    /// Shutdown was requested while a call was backing off
    #[error("interrupted by shutdown")]
    Interrupted,

    /// Chunks could not be stitched together
    #[error("inconsistent chunk data: {0}")]
    Inconsistent(String),
}

impl FetchError {
    /// Whether the failure is a property of the data rather than the network
    pub fn is_data_inconsistency(&self) -> bool {
        matches!(
            self,
            FetchError::MixedSamplingRates { .. } | FetchError::NoChannels | FetchError::Inconsistent(_)
        )
    }
}

/// Result type for fetch operations
pub type FetchResult<T> = Result<T, FetchError>;
