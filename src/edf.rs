//! European Data Format (EDF/EDF+) reader
//!
//! Reads the fixed ASCII header, the per-signal headers and 16-bit
//! little-endian data records, converting samples to physical units.
//! EDF+ `EDF Annotations` signals are kept in the header but never exposed
//! as channels.

use crate::{Channel, SampleMatrix, USEC_PER_SEC};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::str::FromStr;

/// Size of the fixed part of the header
pub const FIXED_HEADER_BYTES: usize = 256;

/// Header bytes per signal
pub const SIGNAL_HEADER_BYTES: usize = 256;

/// Label of EDF+ annotation signals
pub const ANNOTATION_SIGNAL_LABEL: &str = "EDF Annotations";

/// Widths of the per-signal header fields, in file order
const SIGNAL_FIELD_WIDTHS: [usize; 10] = [16, 80, 8, 8, 8, 8, 8, 80, 8, 32];

/// Errors reading an EDF file
#[derive(Debug, thiserror::Error)]
pub enum EdfError {
    /// File could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A header field does not hold a usable value
    #[error("invalid header field {field}: {value:?}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Raw field text
        value: String,
    },

    /// Header is inconsistent with itself or with the file
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Requested channels cannot be read together
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type for EDF reads
pub type EdfResult<T> = Result<T, EdfError>;

/// Header of one signal
#[derive(Debug, Clone, PartialEq)]
pub struct SignalHeader {
    /// Signal label
    pub label: String,
    /// Physical unit (e.g., "uV")
    pub physical_dimension: String,
    /// Physical minimum
    pub physical_min: f64,
    /// Physical maximum
    pub physical_max: f64,
    /// Digital minimum
    pub digital_min: i32,
    /// Digital maximum
    pub digital_max: i32,
    /// Samples of this signal in each data record
    pub samples_per_record: usize,
}

impl SignalHeader {
    /// Whether this is an EDF+ annotation signal
    pub fn is_annotation(&self) -> bool {
        self.label == ANNOTATION_SIGNAL_LABEL
    }

    /// Convert a stored sample to physical units
    pub fn to_physical(&self, digital: i16) -> f64 {
        let gain = (self.physical_max - self.physical_min)
            / f64::from(self.digital_max - self.digital_min);
        self.physical_min + (f64::from(digital) - f64::from(self.digital_min)) * gain
    }
}

/// Parsed EDF header
#[derive(Debug, Clone, PartialEq)]
pub struct EdfHeader {
    /// Local patient identification
    pub patient: String,
    /// Local recording identification
    pub recording: String,
    /// Total header size in bytes
    pub header_bytes: usize,
    /// Number of data records
    pub record_count: usize,
    /// Duration of one data record in seconds
    pub record_duration_sec: f64,
    /// Every signal, annotation signals included
    pub signals: Vec<SignalHeader>,
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

fn number<T: FromStr>(field: &'static str, bytes: &[u8]) -> EdfResult<T> {
    let value = text(bytes);
    value.parse().map_err(|_| EdfError::InvalidField { field, value })
}

impl EdfHeader {
    /// Read and check the header of the file at `path`
    pub fn read(path: &Path) -> EdfResult<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        Self::from_reader(BufReader::new(file), file_len)
    }

    /// Parse a header from `reader`, positioned at the start of the file
    ///
    /// `file_len` is used to count data records when the header leaves the
    /// count open (-1) and to reject truncated files.
    pub fn from_reader<R: Read>(mut reader: R, file_len: u64) -> EdfResult<Self> {
        let mut fixed = [0u8; FIXED_HEADER_BYTES];
        reader.read_exact(&mut fixed)?;

        let version = text(&fixed[0..8]);
        if version != "0" {
            return Err(EdfError::InvalidField {
                field: "version",
                value: version,
            });
        }
        let patient = text(&fixed[8..88]);
        let recording = text(&fixed[88..168]);
        let header_bytes: usize = number("header bytes", &fixed[184..192])?;
        let declared_records: i64 = number("number of data records", &fixed[236..244])?;
        let record_duration_sec: f64 = number("data record duration", &fixed[244..252])?;
        let signal_count: usize = number("number of signals", &fixed[252..256])?;

        if signal_count == 0 {
            return Err(EdfError::InvalidHeader("file declares no signals".to_string()));
        }
        if header_bytes != FIXED_HEADER_BYTES + signal_count * SIGNAL_HEADER_BYTES {
            return Err(EdfError::InvalidHeader(format!(
                "header size {header_bytes} does not match {signal_count} signals"
            )));
        }
        if !(record_duration_sec.is_finite() && record_duration_sec > 0.0) {
            return Err(EdfError::InvalidField {
                field: "data record duration",
                value: record_duration_sec.to_string(),
            });
        }

        let mut raw = vec![0u8; signal_count * SIGNAL_HEADER_BYTES];
        reader.read_exact(&mut raw)?;
        let signals = parse_signals(&raw, signal_count)?;

        let record_bytes = signals.iter().map(|s| s.samples_per_record * 2).sum::<usize>() as u64;
        if record_bytes == 0 {
            return Err(EdfError::InvalidHeader("data records are empty".to_string()));
        }
        let available = file_len.saturating_sub(header_bytes as u64) / record_bytes;
        let record_count = if declared_records < 0 {
            available as usize
        } else {
            let declared = declared_records as u64;
            if declared > available {
                return Err(EdfError::InvalidHeader(format!(
                    "header declares {declared} data records, file holds {available}"
                )));
            }
            declared as usize
        };

        Ok(Self {
            patient,
            recording,
            header_bytes,
            record_count,
            record_duration_sec,
            signals,
        })
    }

    /// Bytes in one data record
    pub fn record_bytes(&self) -> usize {
        self.signals.iter().map(|s| s.samples_per_record * 2).sum()
    }

    /// Recording length in microseconds
    pub fn duration_usec(&self) -> i64 {
        (self.record_count as f64 * self.record_duration_sec * USEC_PER_SEC as f64).round() as i64
    }

    /// Indices into [`EdfHeader::signals`] of the data signals, in file order
    pub fn data_signals(&self) -> Vec<usize> {
        self.signals
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_annotation())
            .map(|(i, _)| i)
            .collect()
    }

    /// Data signals as channels with their sampling rates
    pub fn channels(&self) -> Vec<Channel> {
        self.data_signals()
            .into_iter()
            .map(|i| {
                let signal = &self.signals[i];
                Channel::new(
                    signal.label.clone(),
                    signal.samples_per_record as f64 / self.record_duration_sec,
                )
            })
            .collect()
    }

    /// Samples of data channels `channels` over `[start, start + duration)`
    ///
    /// Channel indices refer to [`EdfHeader::channels`]. Window edges are
    /// rounded to the nearest sample, so adjacent windows neither overlap nor
    /// leave gaps. Every requested channel must share one sampling rate.
    pub fn read_samples<R: Read + Seek>(
        &self,
        reader: &mut R,
        channels: &[usize],
        start_usec: i64,
        duration_usec: i64,
    ) -> EdfResult<SampleMatrix> {
        let data_signals = self.data_signals();
        let signals = channels
            .iter()
            .map(|&c| {
                data_signals.get(c).copied().ok_or_else(|| {
                    EdfError::InvalidRequest(format!("channel {c} is not in the file"))
                })
            })
            .collect::<EdfResult<Vec<_>>>()?;

        let Some(&first_signal) = signals.first() else {
            return Ok(SampleMatrix::empty(0));
        };
        let per_record = self.signals[first_signal].samples_per_record;
        if signals
            .iter()
            .any(|&s| self.signals[s].samples_per_record != per_record)
        {
            return Err(EdfError::InvalidRequest(
                "requested channels have different sampling rates".to_string(),
            ));
        }

        let rate = per_record as f64 / self.record_duration_sec;
        let total = per_record * self.record_count;
        let sample_at = |usec: i64| -> usize {
            let index = (usec as f64 / USEC_PER_SEC as f64 * rate).round();
            if index.is_finite() && index > 0.0 {
                (index as usize).min(total)
            } else {
                0
            }
        };
        let first = sample_at(start_usec);
        let end = sample_at(start_usec.saturating_add(duration_usec));
        if first >= end {
            return Ok(SampleMatrix::empty(channels.len()));
        }

        // Byte offset of each requested signal inside a data record
        let mut signal_offsets = Vec::with_capacity(self.signals.len());
        let mut offset = 0;
        for signal in &self.signals {
            signal_offsets.push(offset);
            offset += signal.samples_per_record * 2;
        }

        let record_bytes = self.record_bytes();
        let mut record = vec![0u8; record_bytes];
        let mut rows = Vec::with_capacity(end - first);

        for index in (first / per_record)..=((end - 1) / per_record) {
            let position = self.header_bytes as u64 + (index * record_bytes) as u64;
            reader.seek(SeekFrom::Start(position))?;
            reader.read_exact(&mut record)?;

            let record_start = index * per_record;
            let lo = first.max(record_start) - record_start;
            let hi = end.min(record_start + per_record) - record_start;
            for k in lo..hi {
                let row = signals
                    .iter()
                    .map(|&s| {
                        let at = signal_offsets[s] + k * 2;
                        self.signals[s].to_physical(i16::from_le_bytes([record[at], record[at + 1]]))
                    })
                    .collect();
                rows.push(row);
            }
        }

        SampleMatrix::from_rows(channels.len(), rows).map_err(EdfError::InvalidRequest)
    }
}

fn parse_signals(raw: &[u8], count: usize) -> EdfResult<Vec<SignalHeader>> {
    // Each field is stored for every signal before the next field starts
    let mut field_starts = [0usize; SIGNAL_FIELD_WIDTHS.len()];
    let mut start = 0;
    for (slot, width) in field_starts.iter_mut().zip(SIGNAL_FIELD_WIDTHS) {
        *slot = start;
        start += width * count;
    }
    let field = |n: usize, signal: usize| -> &[u8] {
        let width = SIGNAL_FIELD_WIDTHS[n];
        let at = field_starts[n] + signal * width;
        &raw[at..at + width]
    };

    (0..count)
        .map(|i| {
            let signal = SignalHeader {
                label: text(field(0, i)),
                physical_dimension: text(field(2, i)),
                physical_min: number("physical minimum", field(3, i))?,
                physical_max: number("physical maximum", field(4, i))?,
                digital_min: number("digital minimum", field(5, i))?,
                digital_max: number("digital maximum", field(6, i))?,
                samples_per_record: number("samples per data record", field(8, i))?,
            };
            if signal.digital_max <= signal.digital_min {
                return Err(EdfError::InvalidHeader(format!(
                    "signal {:?} has digital maximum {} not above minimum {}",
                    signal.label, signal.digital_max, signal.digital_min
                )));
            }
            Ok(signal)
        })
        .collect()
}
