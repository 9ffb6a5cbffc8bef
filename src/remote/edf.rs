//! Local EDF files behind the remote session traits
//!
//! A source reference names an `.edf` file, relative to the connector's
//! input directory (absolute paths are used as given). Opening a session
//! reads and checks the header; a file whose header does not parse is
//! rejected and never retried. Reads run on the blocking thread pool.

use super::{RawAnnotation, RemoteSession, SessionConnector, SessionError, SessionResult};
use crate::edf::{EdfError, EdfHeader, EdfResult};
use crate::{Channel, SampleMatrix, TimeSpan};
use async_trait::async_trait;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A local file that fails once fails again, so nothing here is transient
fn rejected(path: &Path, error: EdfError) -> SessionError {
    SessionError::Rejected(format!("{}: {error}", path.display()))
}

fn join_failed(error: tokio::task::JoinError) -> SessionError {
    SessionError::Connection(format!("EDF reader task failed: {error}"))
}

/// Opens sessions on EDF files below a directory
#[derive(Debug, Clone)]
pub struct EdfConnector {
    input_dir: PathBuf,
}

impl EdfConnector {
    /// Resolve source references against `input_dir`
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
        }
    }

    /// File a source reference points at
    pub fn resolve(&self, source_reference: &str) -> PathBuf {
        self.input_dir.join(source_reference)
    }
}

#[async_trait]
impl SessionConnector for EdfConnector {
    async fn open(&self, source_reference: &str) -> SessionResult<Box<dyn RemoteSession>> {
        let path = self.resolve(source_reference);
        debug!(path = %path.display(), "Reading EDF header");

        let header_path = path.clone();
        let header = tokio::task::spawn_blocking(move || EdfHeader::read(&header_path))
            .await
            .map_err(join_failed)?
            .map_err(|e| rejected(&path, e))?;

        Ok(Box::new(EdfSession {
            path,
            header: Arc::new(header),
        }))
    }
}

/// An EDF file with a checked header
#[derive(Debug)]
pub struct EdfSession {
    path: PathBuf,
    header: Arc<EdfHeader>,
}

impl EdfSession {
    /// Parsed header
    pub fn header(&self) -> &EdfHeader {
        &self.header
    }
}

#[async_trait]
impl RemoteSession for EdfSession {
    fn time_span(&self) -> TimeSpan {
        TimeSpan {
            start_usec: 0,
            end_usec: self.header.duration_usec(),
        }
    }

    async fn list_channels(&self) -> SessionResult<Vec<Channel>> {
        Ok(self.header.channels())
    }

    async fn get_data(
        &self,
        channels: &[usize],
        start_usec: i64,
        duration_usec: i64,
    ) -> SessionResult<SampleMatrix> {
        let path = self.path.clone();
        let header = Arc::clone(&self.header);
        let channels = channels.to_vec();

        tokio::task::spawn_blocking(move || -> EdfResult<SampleMatrix> {
            let mut reader = BufReader::new(File::open(&path)?);
            header.read_samples(&mut reader, &channels, start_usec, duration_usec)
        })
        .await
        .map_err(join_failed)?
        .map_err(|e| rejected(&self.path, e))
    }

    async fn get_annotations(&self, layer: &str) -> SessionResult<Vec<RawAnnotation>> {
        Err(SessionError::Rejected(format!(
            "{}: EDF files carry no annotation layer {layer:?}",
            self.path.display()
        )))
    }

    async fn close(self: Box<Self>) -> SessionResult<()> {
        Ok(())
    }
}
