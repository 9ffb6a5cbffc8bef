//! Remote data service sessions
//!
//! A [`SessionConnector`] opens a [`RemoteSession`] for one dataset. Sessions
//! are short-lived: [`with_session`] opens one, runs a single operation, and
//! closes it again whatever the outcome, so no connection outlives the call
//! that needed it.

use crate::{Channel, SampleMatrix, TimeSpan};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, warn};

pub mod edf;
pub mod http;

pub use edf::EdfConnector;
pub use http::{Credentials, HttpConnector};

/// Errors raised by the remote service
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    /// Connection could not be established or was dropped
    #[error("connection error: {0}")]
    Connection(String),

    /// Service reported an internal failure
    #[error("service error: {0}")]
    Service(String),

    /// Response could not be decoded
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Call exceeded its wall-clock budget
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Request was refused (bad credentials, unknown dataset, ...)
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl SessionError {
    /// Whether another attempt may succeed
    pub fn is_transient(&self) -> bool {
        !matches!(self, SessionError::Rejected(_))
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Connection(_) => "connection",
            SessionError::Service(_) => "service",
            SessionError::MalformedResponse(_) => "malformed",
            SessionError::Timeout(_) => "timeout",
            SessionError::Rejected(_) => "rejected",
        }
    }
}

/// Result type for remote operations
pub type SessionResult<T> = Result<T, SessionError>;

/// An annotation entry as stored in a remote annotation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAnnotation {
    /// Annotation type (e.g., "Clip Start", "Clip End", "Note")
    #[serde(rename = "type")]
    pub kind: String,
    /// Free-text description
    #[serde(default)]
    pub description: String,
    /// Offset from the dataset start in microseconds
    pub start_time_offset_usec: i64,
}

impl RawAnnotation {
    /// Create a raw annotation
    pub fn new(kind: impl Into<String>, description: impl Into<String>, offset_usec: i64) -> Self {
        Self {
            kind: kind.into(),
            description: description.into(),
            start_time_offset_usec: offset_usec,
        }
    }
}

/// An open session on one remote dataset
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Dataset start and end times
    fn time_span(&self) -> TimeSpan;

    /// Channels in service order, with their sampling rates
    async fn list_channels(&self) -> SessionResult<Vec<Channel>>;

    /// Samples for the given channel indices over `[start, start + duration)`
    ///
    /// `start_usec` is relative to the dataset start.
    async fn get_data(
        &self,
        channels: &[usize],
        start_usec: i64,
        duration_usec: i64,
    ) -> SessionResult<SampleMatrix>;

    /// All entries of a named annotation layer
    async fn get_annotations(&self, layer: &str) -> SessionResult<Vec<RawAnnotation>>;

    /// Close the session
    async fn close(self: Box<Self>) -> SessionResult<()>;
}

/// Opens sessions on the remote service
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Open a session on the dataset named `source_reference`
    async fn open(&self, source_reference: &str) -> SessionResult<Box<dyn RemoteSession>>;
}

/// Boxed future borrowing an open session
pub type SessionFuture<'a, T> = Pin<Box<dyn Future<Output = SessionResult<T>> + Send + 'a>>;

/// Owns an open session until it is closed
///
/// If the guard is dropped while the session is still open (an attempt
/// timed out and its future was dropped), `close` is spawned onto the
/// current runtime instead.
struct SessionGuard {
    session: Option<Box<dyn RemoteSession>>,
    source_reference: String,
}

impl SessionGuard {
    fn new(session: Box<dyn RemoteSession>, source_reference: &str) -> Self {
        Self {
            session: Some(session),
            source_reference: source_reference.to_string(),
        }
    }

    async fn close(mut self) {
        if let Some(session) = self.session.take() {
            close_logged(session, &self.source_reference).await;
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let source_reference = std::mem::take(&mut self.source_reference);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(source = %source_reference, "Session dropped while open, closing in background");
                handle.spawn(async move {
                    close_logged(session, &source_reference).await;
                });
            }
            Err(_) => {
                warn!(source = %source_reference, "Session dropped outside a runtime, left open");
            }
        }
    }
}

async fn close_logged(session: Box<dyn RemoteSession>, source_reference: &str) {
    if let Err(e) = session.close().await {
        warn!(source = source_reference, error = %e, "Failed to close session");
    }
}

/// Open a session, run `op` on it, and close it on every exit path
///
/// A failed close is logged and does not mask the operation's result. When
/// the returned future is dropped mid-operation the session is still closed,
/// from a background task.
pub async fn with_session<T, F>(
    connector: &dyn SessionConnector,
    source_reference: &str,
    op: F,
) -> SessionResult<T>
where
    T: Send,
    F: for<'a> FnOnce(&'a dyn RemoteSession) -> SessionFuture<'a, T>,
{
    let guard = SessionGuard::new(connector.open(source_reference).await?, source_reference);
    debug!(source = source_reference, "Session opened");

    let result = match guard.session.as_deref() {
        Some(session) => op(session).await,
        None => Err(SessionError::Connection("session closed before use".to_string())),
    };

    guard.close().await;
    result
}
