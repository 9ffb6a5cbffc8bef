//! Download orchestrator
//!
//! Walks the manifest in order. For each unledgered item it fetches the
//! recording (span mode or annotation mode), persists it through the
//! [`RecordingWriter`], and records the outcome. Per-item state lives only
//! inside [`DownloadOrchestrator::process_item`] and is dropped with it.

use crate::align::{align, annotations_from_layer, markers_from_layer};
use crate::downloader::config::DownloadConfig;
use crate::downloader::job::{Manifest, WorkItem};
use crate::downloader::DownloadError;
use crate::fetcher::chunked::common_sample_rate;
use crate::fetcher::{CallContext, ChunkedFetcher, FailureLog, FetchError, RetryingCaller};
use crate::ledger::{LedgerLock, SessionCounter, SubjectLedger};
use crate::metrics::ItemMetrics;
use crate::output::{
    AnnotationMode, ClipRecording, LayoutWriter, PersistError, PersistReport, Recording,
    RecordingWriter,
};
use crate::remote::{with_session, RawAnnotation, SessionConnector, SessionError};
use crate::shutdown::{self, SharedShutdown, ShutdownCoordinator};
use crate::{Clip, TimeSpan};
use serde::Serialize;
use tracing::{debug, info, warn, Instrument};

/// What happened to one work item
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    /// Already in the ledger; nothing fetched
    AlreadyLedgered,
    /// At least one clip persisted and the item was ledgered
    Completed(PersistReport),
    /// Nothing could be fetched; not ledgered
    Skipped {
        /// Why
        reason: String,
    },
    /// Item cannot be downloaded as-is; not ledgered
    Failed {
        /// Short machine-readable reason
        reason: &'static str,
        /// Error text
        error: String,
    },
    /// Shutdown was requested while the item was in progress
    Interrupted,
}

/// Callback invoked after every item
pub type ItemObserver = Box<dyn Fn(&WorkItem, &ItemOutcome) + Send + Sync>;

/// Totals for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Items processed and ledgered
    pub completed: usize,
    /// Items skipped because nothing was fetched
    pub skipped: usize,
    /// Items that failed
    pub failed: usize,
    /// Items already in the ledger
    pub already_ledgered: usize,
    /// Units written to the layout
    pub units_written: usize,
    /// Units written as raw fallback
    pub units_fallback: usize,
    /// Units lost
    pub units_failed: usize,
    /// Whether the run stopped early on shutdown
    pub interrupted: bool,
}

impl RunSummary {
    fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::AlreadyLedgered => self.already_ledgered += 1,
            ItemOutcome::Completed(report) => {
                self.completed += 1;
                self.units_written += report.units_written;
                self.units_fallback += report.units_fallback;
                self.units_failed += report.units_failed;
            }
            ItemOutcome::Skipped { .. } => self.skipped += 1,
            ItemOutcome::Failed { .. } => self.failed += 1,
            ItemOutcome::Interrupted => self.interrupted = true,
        }
    }
}

/// Downloads every item of a manifest
pub struct DownloadOrchestrator<C: SessionConnector, L: LayoutWriter> {
    config: DownloadConfig,
    connector: C,
    layout: L,
    caller: RetryingCaller,
    shutdown: SharedShutdown,
    observer: Option<ItemObserver>,
}

impl<C: SessionConnector, L: LayoutWriter> DownloadOrchestrator<C, L> {
    /// Create an orchestrator; fails if `config` is invalid
    pub fn new(config: DownloadConfig, connector: C, layout: L) -> Result<Self, DownloadError> {
        config.validate()?;
        let shutdown = shutdown::get_global_shutdown().unwrap_or_else(ShutdownCoordinator::shared);
        let caller = RetryingCaller::new(config.retry_policy(), FailureLog::new(&config.failure_log))
            .with_shutdown(shutdown.clone());

        Ok(Self {
            config,
            connector,
            layout,
            caller,
            shutdown,
            observer: None,
        })
    }

    /// Attach a shared shutdown handle for graceful cancellation.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.caller = self.caller.with_shutdown(shutdown.clone());
        self.shutdown = shutdown;
        self
    }

    /// Call `observer` after every item
    pub fn with_observer(mut self, observer: ItemObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Layout in use
    pub fn layout(&self) -> &L {
        &self.layout
    }

    /// Process every unledgered manifest item in order
    ///
    /// Holds the ledger lock for the whole run. Stops between items once
    /// shutdown is requested.
    pub async fn run(&self, manifest: &Manifest) -> Result<RunSummary, DownloadError> {
        let _lock = LedgerLock::try_acquire(&self.config.ledger_path)?;
        let mut ledger = SubjectLedger::load(&self.config.ledger_path)?;
        let mut sessions = SessionCounter::new(self.layout.root(), self.layout.session_label());
        let mut summary = RunSummary::default();

        let items = manifest.work_items(&self.config);
        info!(
            items = items.len(),
            ledgered = ledger.len(),
            annotation_mode = self.config.annotation_mode,
            "Starting download run"
        );

        for item in &items {
            if self.shutdown.is_shutdown_requested() {
                info!("Shutdown requested - stopping before next item");
                summary.interrupted = true;
                break;
            }

            let outcome = if ledger.contains(&item.source_reference) {
                debug!(source = %item.source_reference, "Already ledgered, skipping");
                ItemOutcome::AlreadyLedgered
            } else {
                let span = tracing::info_span!(
                    "work_item",
                    source = %item.source_reference,
                    uid = %item.uid
                );
                self.process_item(item, &mut ledger, &mut sessions)
                    .instrument(span)
                    .await
            };

            summary.record(&outcome);
            if let Some(observer) = &self.observer {
                observer(item, &outcome);
            }
            if outcome == ItemOutcome::Interrupted {
                break;
            }
        }

        info!(
            completed = summary.completed,
            skipped = summary.skipped,
            failed = summary.failed,
            already_ledgered = summary.already_ledgered,
            units_written = summary.units_written,
            units_fallback = summary.units_fallback,
            interrupted = summary.interrupted,
            "Download run finished"
        );
        Ok(summary)
    }

    /// Fetch, persist and ledger one item
    pub async fn process_item(
        &self,
        item: &WorkItem,
        ledger: &mut SubjectLedger,
        sessions: &mut SessionCounter,
    ) -> ItemOutcome {
        info!("Processing item");
        let metrics = ItemMetrics::start(&item.source_reference);

        let fetched = if self.config.annotation_mode {
            self.fetch_annotated(item).await
        } else {
            self.fetch_span(item).await
        };

        let recording = match fetched {
            Ok(Some(recording)) => recording,
            Ok(None) => {
                metrics.record_skipped();
                return ItemOutcome::Skipped {
                    reason: "dataset metadata could not be fetched".to_string(),
                };
            }
            Err(FetchError::Interrupted) => return ItemOutcome::Interrupted,
            Err(e) => {
                let reason = if e.is_data_inconsistency() {
                    self.record_inconsistency(item, &e);
                    "data_inconsistency"
                } else {
                    "fetch"
                };
                metrics.record_failure(reason, &e.to_string());
                return ItemOutcome::Failed {
                    reason,
                    error: e.to_string(),
                };
            }
        };

        if recording.clips.is_empty() {
            metrics.record_skipped();
            return ItemOutcome::Skipped {
                reason: "no clips were fetched".to_string(),
            };
        }

        let writer = RecordingWriter::new(&self.layout, self.config.channel_type_threshold);
        match writer.persist(&recording, item, ledger, sessions) {
            Ok(report) => {
                metrics.record_success(report.units_written + report.units_fallback);
                ItemOutcome::Completed(report)
            }
            Err(PersistError::Empty) => {
                metrics.record_skipped();
                ItemOutcome::Skipped {
                    reason: "no clips were fetched".to_string(),
                }
            }
            Err(PersistError::Ledger(e)) => {
                metrics.record_failure("ledger", &e.to_string());
                ItemOutcome::Failed {
                    reason: "ledger",
                    error: e.to_string(),
                }
            }
        }
    }

    /// Inconsistent data is not a failed call, but it belongs in the failure log
    fn record_inconsistency(&self, item: &WorkItem, error: &FetchError) {
        self.caller.failure_log().record(&crate::fetcher::FailureRecord {
            source_reference: item.source_reference.clone(),
            start_usec: item.requested_start_usec,
            duration_usec: item.requested_duration_usec,
            error_description: error.to_string(),
        });
    }

    fn fetcher(&self) -> ChunkedFetcher<'_> {
        ChunkedFetcher::new(&self.connector, &self.caller, self.config.max_chunk_usec)
    }

    /// Span mode: one clip over the requested span
    ///
    /// Without a requested duration the clip runs to the end of the dataset.
    async fn fetch_span(&self, item: &WorkItem) -> Result<Option<Recording>, FetchError> {
        let end_usec = if item.requested_duration_usec > 0 {
            item.requested_start_usec + item.requested_duration_usec
        } else {
            let Some(span) = self.fetch_time_span(item).await? else {
                return Ok(None);
            };
            span.duration_usec()
        };
        let clip = Clip {
            index: 0,
            start_usec: item.requested_start_usec,
            end_usec,
        };
        let clips = self.fetch_clips(item, &[clip]).await?;
        Ok(Some(Recording {
            clips,
            annotations: AnnotationMode::Unannotated,
        }))
    }

    /// Annotation mode: clips from the marker layer, annotations aligned to them
    async fn fetch_annotated(&self, item: &WorkItem) -> Result<Option<Recording>, FetchError> {
        let Some((span, clip_layer, annotation_layer)) = self.fetch_layers(item).await? else {
            return Ok(None);
        };

        let markers = markers_from_layer(&clip_layer);
        let annotations = annotations_from_layer(&annotation_layer);
        let alignment = align(&markers, &annotations, span.duration_usec());

        if !alignment.has_clips() {
            let duration = if item.requested_duration_usec > 0 {
                item.requested_duration_usec
            } else {
                span.duration_usec() - item.requested_start_usec
            };
            info!(
                markers = markers.len(),
                "No clips in marker layer, downloading the span unannotated"
            );
            let clip = Clip {
                index: 0,
                start_usec: item.requested_start_usec,
                end_usec: item.requested_start_usec + duration,
            };
            let clips = self.fetch_clips(item, &[clip]).await?;
            return Ok(Some(Recording {
                clips,
                annotations: AnnotationMode::Unannotated,
            }));
        }

        info!(
            clips = alignment.clips.len(),
            annotations = annotations.len(),
            assigned = alignment.annotations.assigned_count(),
            "Aligned annotations to clips"
        );
        let clips = self.fetch_clips(item, &alignment.clips).await?;
        Ok(Some(Recording {
            clips,
            annotations: AnnotationMode::Annotated(alignment.annotations),
        }))
    }

    /// Dataset span on its own
    ///
    /// `None` when the call was exhausted (already in the failure log).
    async fn fetch_time_span(&self, item: &WorkItem) -> Result<Option<TimeSpan>, FetchError> {
        let source = item.source_reference.as_str();
        let ctx = CallContext::new("time_span", source);

        let outcome = self
            .caller
            .call(&ctx, || {
                with_session(&self.connector, source, |session| {
                    Box::pin(async move { Ok::<_, SessionError>(session.time_span()) })
                })
            })
            .await;

        match outcome.into_result(ctx.operation) {
            Ok(span) => Ok(Some(span)),
            Err(FetchError::Exhausted { source, .. }) => {
                warn!(error = %source, "Dataset unavailable, skipping item");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Dataset span plus both annotation layers, in one session
    ///
    /// `None` when the call was exhausted (already in the failure log).
    async fn fetch_layers(
        &self,
        item: &WorkItem,
    ) -> Result<Option<(TimeSpan, Vec<RawAnnotation>, Vec<RawAnnotation>)>, FetchError> {
        let source = item.source_reference.as_str();
        let ctx = CallContext::new("get_annotations", source);

        let outcome = self
            .caller
            .call(&ctx, || {
                let clip_layer = self.config.clip_layer.clone();
                let annotation_layer = self.config.annotation_layer.clone();
                with_session(&self.connector, source, move |session| {
                    Box::pin(async move {
                        let span = session.time_span();
                        let clips = session.get_annotations(&clip_layer).await?;
                        let annotations = session.get_annotations(&annotation_layer).await?;
                        Ok::<_, SessionError>((span, clips, annotations))
                    })
                })
            })
            .await;

        match outcome.into_result(ctx.operation) {
            Ok(layers) => Ok(Some(layers)),
            Err(FetchError::Exhausted { source, .. }) => {
                warn!(error = %source, "Annotation layers unavailable, skipping item");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch each clip; a clip whose retries run out is left out
    ///
    /// Channels are listed and rate-checked once, before any data is fetched.
    async fn fetch_clips(
        &self,
        item: &WorkItem,
        clips: &[Clip],
    ) -> Result<Vec<ClipRecording>, FetchError> {
        let source = item.source_reference.as_str();
        let fetcher = self.fetcher();

        let channels = match fetcher.list_channels(source).await {
            Ok(channels) => channels,
            Err(FetchError::Exhausted { source: error, .. }) => {
                warn!(error = %error, "Channel list unavailable, nothing to fetch");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        let sample_rate = common_sample_rate(&channels)?;

        let mut fetched = Vec::with_capacity(clips.len());
        for clip in clips {
            if clip.duration_usec() <= 0 {
                debug!(clip = clip.index, "Empty clip, skipping");
                continue;
            }
            match fetcher
                .fetch_channels(
                    source,
                    channels.clone(),
                    sample_rate,
                    clip.start_usec,
                    clip.duration_usec(),
                )
                .await
            {
                Ok(segment) => fetched.push(ClipRecording {
                    clip: *clip,
                    segment,
                }),
                Err(FetchError::Exhausted { operation, source: error }) => {
                    warn!(
                        clip = clip.index,
                        operation,
                        error = %error,
                        "Clip could not be fetched, continuing with the next clip"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(fetched)
    }
}
