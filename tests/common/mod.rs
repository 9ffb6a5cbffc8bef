//! In-process fake of the remote data service

#![allow(dead_code)]

use async_trait::async_trait;
use ieeg_bids_downloader::remote::{
    RawAnnotation, RemoteSession, SessionConnector, SessionError, SessionResult,
};
use ieeg_bids_downloader::{Channel, SampleMatrix, TimeSpan};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One dataset served by the fake
#[derive(Debug, Clone)]
pub struct FakeDataset {
    pub span: TimeSpan,
    pub channels: Vec<Channel>,
    pub layers: HashMap<String, Vec<RawAnnotation>>,
}

impl FakeDataset {
    /// Dataset of `duration_usec` with the given channels at `rate` Hz
    pub fn new(duration_usec: i64, names: &[&str], rate: f64) -> Self {
        Self {
            span: TimeSpan {
                start_usec: 0,
                end_usec: duration_usec,
            },
            channels: names.iter().map(|n| Channel::new(*n, rate)).collect(),
            layers: HashMap::new(),
        }
    }

    pub fn with_channel(mut self, name: &str, rate: f64) -> Self {
        self.channels.push(Channel::new(name, rate));
        self
    }

    pub fn with_layer(mut self, layer: &str, entries: Vec<RawAnnotation>) -> Self {
        self.layers.insert(layer.to_string(), entries);
        self
    }
}

/// A scripted failure for `get_data`
#[derive(Debug, Clone)]
struct DataFailure {
    source: String,
    start_usec: Option<i64>,
    remaining: u32,
    error: SessionError,
}

#[derive(Debug, Default)]
struct FakeState {
    datasets: HashMap<String, FakeDataset>,
    data_requests: Vec<(String, i64, i64)>,
    opens: usize,
    closes: usize,
    data_failures: Vec<DataFailure>,
    layer_failures: HashMap<String, SessionError>,
    channel_delay: Option<Duration>,
}

/// Connector handing out sessions on in-memory datasets
///
/// Clones share state, so a test can keep one clone to inspect requests.
#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<FakeState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(self, source: &str, dataset: FakeDataset) -> Self {
        self.state
            .lock()
            .unwrap()
            .datasets
            .insert(source.to_string(), dataset);
        self
    }

    /// Fail the next `times` data requests for `source`
    pub fn fail_data(self, source: &str, times: u32, error: SessionError) -> Self {
        self.state.lock().unwrap().data_failures.push(DataFailure {
            source: source.to_string(),
            start_usec: None,
            remaining: times,
            error,
        });
        self
    }

    /// Fail every data request for `source` starting at `start_usec`
    pub fn fail_data_at(self, source: &str, start_usec: i64, error: SessionError) -> Self {
        self.state.lock().unwrap().data_failures.push(DataFailure {
            source: source.to_string(),
            start_usec: Some(start_usec),
            remaining: u32::MAX,
            error,
        });
        self
    }

    /// Fail every annotation request for `source`
    pub fn fail_layers(self, source: &str, error: SessionError) -> Self {
        self.state
            .lock()
            .unwrap()
            .layer_failures
            .insert(source.to_string(), error);
        self
    }

    /// Make every channel listing take `delay`
    pub fn slow_channels(self, delay: Duration) -> Self {
        self.state.lock().unwrap().channel_delay = Some(delay);
        self
    }

    /// `(source, start, duration)` of every data request, in order
    pub fn data_requests(&self) -> Vec<(String, i64, i64)> {
        self.state.lock().unwrap().data_requests.clone()
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn open(&self, source_reference: &str) -> SessionResult<Box<dyn RemoteSession>> {
        let mut state = self.state.lock().unwrap();
        state.opens += 1;
        let dataset = state
            .datasets
            .get(source_reference)
            .cloned()
            .ok_or_else(|| SessionError::Rejected(format!("no dataset {source_reference}")))?;

        Ok(Box::new(FakeSession {
            source: source_reference.to_string(),
            dataset,
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeSession {
    source: String,
    dataset: FakeDataset,
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl RemoteSession for FakeSession {
    fn time_span(&self) -> TimeSpan {
        self.dataset.span
    }

    async fn list_channels(&self) -> SessionResult<Vec<Channel>> {
        let delay = self.state.lock().unwrap().channel_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.dataset.channels.clone())
    }

    async fn get_data(
        &self,
        channels: &[usize],
        start_usec: i64,
        duration_usec: i64,
    ) -> SessionResult<SampleMatrix> {
        let mut state = self.state.lock().unwrap();
        state
            .data_requests
            .push((self.source.clone(), start_usec, duration_usec));

        for failure in state.data_failures.iter_mut() {
            let matches = failure.source == self.source
                && failure.start_usec.map_or(true, |s| s == start_usec)
                && failure.remaining > 0;
            if matches {
                if failure.remaining != u32::MAX {
                    failure.remaining -= 1;
                }
                return Err(failure.error.clone());
            }
        }

        let rate = self.dataset.channels[0].sample_rate;
        let first = start_usec as f64 * rate / 1e6;
        let count = (duration_usec as f64 * rate / 1e6).round() as usize;
        let rows = (0..count)
            .map(|i| {
                channels
                    .iter()
                    .map(|c| (first as usize + i) as f64 + *c as f64 * 1_000_000.0)
                    .collect()
            })
            .collect();
        SampleMatrix::from_rows(channels.len(), rows).map_err(SessionError::MalformedResponse)
    }

    async fn get_annotations(&self, layer: &str) -> SessionResult<Vec<RawAnnotation>> {
        if let Some(error) = self.state.lock().unwrap().layer_failures.get(&self.source) {
            return Err(error.clone());
        }
        self.dataset
            .layers
            .get(layer)
            .cloned()
            .ok_or_else(|| SessionError::Rejected(format!("no layer {layer}")))
    }

    async fn close(self: Box<Self>) -> SessionResult<()> {
        self.state.lock().unwrap().closes += 1;
        Ok(())
    }
}

/// Markers for clips `[(start, end)]`, preceded by the startup end marker
pub fn clip_layer(clips: &[(i64, i64)]) -> Vec<RawAnnotation> {
    let mut layer = vec![RawAnnotation::new("Clip End", "", 2000)];
    for (start, end) in clips {
        layer.push(RawAnnotation::new("Clip Start", "", *start));
        layer.push(RawAnnotation::new("Clip End", "", *end));
    }
    layer
}

/// Free-text annotations at `[(offset, description)]`
pub fn note_layer(notes: &[(i64, &str)]) -> Vec<RawAnnotation> {
    notes
        .iter()
        .map(|(offset, text)| RawAnnotation::new("Note", *text, *offset))
        .collect()
}

/// Configuration with fast retries, writing below `root`
pub fn fast_config(root: &std::path::Path) -> ieeg_bids_downloader::downloader::DownloadConfig {
    ieeg_bids_downloader::downloader::DownloadConfig::new(root).with_retry(
        3,
        std::time::Duration::from_secs(5),
        std::time::Duration::from_millis(1),
    )
}

/// Non-empty lines of a text file
pub fn read_lines(path: &std::path::Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Write an EDF file of one-second records
///
/// `signals` are `(label, samples per record)`. Physical and digital ranges
/// match, so every stored sample reads back as its running sample number.
pub fn write_edf(path: &std::path::Path, signals: &[(&str, usize)], records: usize) {
    fn pad(bytes: &mut Vec<u8>, value: &str, width: usize) {
        let mut field = value.as_bytes().to_vec();
        field.resize(width, b' ');
        bytes.extend(field);
    }

    let ns = signals.len();
    let mut bytes = Vec::new();
    pad(&mut bytes, "0", 8);
    pad(&mut bytes, "X X X X", 80);
    pad(&mut bytes, "Startdate X X X X", 80);
    pad(&mut bytes, "01.01.20", 8);
    pad(&mut bytes, "00.00.00", 8);
    pad(&mut bytes, &(256 + ns * 256).to_string(), 8);
    pad(&mut bytes, "", 44);
    pad(&mut bytes, &records.to_string(), 8);
    pad(&mut bytes, "1", 8);
    pad(&mut bytes, &ns.to_string(), 4);

    for (label, _) in signals {
        pad(&mut bytes, label, 16);
    }
    for _ in signals {
        pad(&mut bytes, "", 80);
    }
    for _ in signals {
        pad(&mut bytes, "uV", 8);
    }
    for value in ["-32768", "32767", "-32768", "32767"] {
        for _ in signals {
            pad(&mut bytes, value, 8);
        }
    }
    for _ in signals {
        pad(&mut bytes, "", 80);
    }
    for (_, per_record) in signals {
        pad(&mut bytes, &per_record.to_string(), 8);
    }
    for _ in signals {
        pad(&mut bytes, "", 32);
    }

    for record in 0..records {
        for (_, per_record) in signals {
            for k in 0..*per_record {
                let value = (record * per_record + k) as i16;
                bytes.extend(value.to_le_bytes());
            }
        }
    }
    std::fs::write(path, bytes).unwrap();
}
