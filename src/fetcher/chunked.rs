//! Chunked retrieval of long time spans
//!
//! The service bounds the size of a single data request, so a span is split
//! into consecutive windows of at most `max_chunk_usec`, each fetched under
//! its own retry budget and appended in order.

use super::retry::{CallContext, RetryingCaller};
use super::{FetchError, FetchResult};
use crate::remote::{with_session, SessionConnector};
use crate::{Channel, SampleMatrix};
use tracing::{debug, info};

/// Relative tolerance when comparing channel sampling rates
const RATE_TOLERANCE: f64 = 1e-9;

/// One bounded request window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkWindow {
    /// Window start in microseconds
    pub start_usec: i64,
    /// Window length in microseconds
    pub duration_usec: i64,
}

impl ChunkWindow {
    /// Exclusive end of the window
    pub fn end_usec(&self) -> i64 {
        self.start_usec + self.duration_usec
    }
}

/// Split `[start, start + duration)` into windows of at most `max_chunk_usec`
///
/// Windows are contiguous, in order, and cover the span exactly; only the
/// last one may be shorter. A non-positive duration yields no windows and a
/// non-positive chunk size yields a single window.
pub fn plan_chunks(start_usec: i64, duration_usec: i64, max_chunk_usec: i64) -> Vec<ChunkWindow> {
    if duration_usec <= 0 {
        return Vec::new();
    }
    if max_chunk_usec <= 0 {
        return vec![ChunkWindow {
            start_usec,
            duration_usec,
        }];
    }

    let end_usec = start_usec + duration_usec;
    let mut windows = Vec::with_capacity((duration_usec / max_chunk_usec + 1) as usize);
    let mut cursor = start_usec;
    while cursor < end_usec {
        let length = max_chunk_usec.min(end_usec - cursor);
        windows.push(ChunkWindow {
            start_usec: cursor,
            duration_usec: length,
        });
        cursor += length;
    }
    windows
}

/// The single sampling rate shared by all channels
pub fn common_sample_rate(channels: &[Channel]) -> FetchResult<f64> {
    let first = channels.first().ok_or(FetchError::NoChannels)?.sample_rate;

    let mut rates = vec![first];
    for channel in &channels[1..] {
        let rate = channel.sample_rate;
        if !rates
            .iter()
            .any(|seen| (seen - rate).abs() <= RATE_TOLERANCE * seen.abs().max(1.0))
        {
            rates.push(rate);
        }
    }

    if rates.len() > 1 {
        return Err(FetchError::MixedSamplingRates { rates });
    }
    Ok(first)
}

/// Samples for one span, with the channels they belong to
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedSegment {
    /// Channels in column order
    pub channels: Vec<Channel>,
    /// Sampling rate shared by every channel
    pub sample_rate: f64,
    /// Row-major samples
    pub samples: SampleMatrix,
}

impl FetchedSegment {
    /// Channel names in column order
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name.clone()).collect()
    }
}

/// Fetches spans of every channel in bounded chunks
pub struct ChunkedFetcher<'a> {
    connector: &'a dyn SessionConnector,
    caller: &'a RetryingCaller,
    max_chunk_usec: i64,
}

impl<'a> ChunkedFetcher<'a> {
    /// Create a fetcher
    pub fn new(
        connector: &'a dyn SessionConnector,
        caller: &'a RetryingCaller,
        max_chunk_usec: i64,
    ) -> Self {
        Self {
            connector,
            caller,
            max_chunk_usec,
        }
    }

    /// List the dataset's channels under retry
    pub async fn list_channels(&self, source_reference: &str) -> FetchResult<Vec<Channel>> {
        let ctx = CallContext::new("list_channels", source_reference);
        self.caller
            .call(&ctx, || {
                with_session(self.connector, source_reference, |session| {
                    Box::pin(async move { session.list_channels().await })
                })
            })
            .await
            .into_result(ctx.operation)
    }

    /// Fetch every channel over `[start, start + duration)`
    ///
    /// Fails without fetching any data if the channels disagree on sampling
    /// rate. A chunk that exhausts its retries fails the whole span.
    pub async fn fetch(
        &self,
        source_reference: &str,
        start_usec: i64,
        duration_usec: i64,
    ) -> FetchResult<FetchedSegment> {
        let channels = self.list_channels(source_reference).await?;
        let sample_rate = common_sample_rate(&channels)?;
        self.fetch_channels(source_reference, channels, sample_rate, start_usec, duration_usec)
            .await
    }

    /// Fetch a span for channels already listed and rate-checked
    pub async fn fetch_channels(
        &self,
        source_reference: &str,
        channels: Vec<Channel>,
        sample_rate: f64,
        start_usec: i64,
        duration_usec: i64,
    ) -> FetchResult<FetchedSegment> {
        let indices: Vec<usize> = (0..channels.len()).collect();

        let windows = plan_chunks(start_usec, duration_usec, self.max_chunk_usec);
        debug!(
            source = source_reference,
            start_usec,
            duration_usec,
            chunks = windows.len(),
            "Planned chunked fetch"
        );

        let mut samples = SampleMatrix::empty(channels.len());
        for window in &windows {
            let ctx = CallContext::new("get_data", source_reference)
                .with_window(window.start_usec, window.duration_usec);
            let (chunk_start, chunk_duration) = (window.start_usec, window.duration_usec);

            let chunk = self
                .caller
                .call(&ctx, || {
                    let indices = indices.clone();
                    with_session(self.connector, source_reference, move |session| {
                        Box::pin(async move {
                            session.get_data(&indices, chunk_start, chunk_duration).await
                        })
                    })
                })
                .await
                .into_result(ctx.operation)?;

            samples.append(chunk).map_err(FetchError::Inconsistent)?;
        }

        info!(
            source = source_reference,
            channels = channels.len(),
            samples = samples.samples(),
            chunks = windows.len(),
            "Fetched span"
        );

        Ok(FetchedSegment {
            channels,
            sample_rate,
            samples,
        })
    }
}
