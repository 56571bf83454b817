use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Record-level failures (recovered by skipping the record)
// ---------------------------------------------------------------------------

/// Why a raw record could not become an observation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("sample rate {found} Hz does not match expected {expected} Hz")]
    SampleRate { expected: u32, found: u32 },

    #[error("transform length {found} does not match expected {expected}")]
    TransformLength { expected: u32, found: u32 },

    #[error("channel '{channel}' has {found} bins, expected {expected}")]
    ChannelLength {
        channel: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("excitation channel is zero at bin {0}")]
    ZeroExcitation(usize),

    #[error("descriptor has {0} values, at least 2 are required")]
    DescriptorTooShort(usize),

    #[error("axis of {found} points ({found_end} end) does not match dataset axis of {expected} points ({expected_end} end)")]
    AxisMismatch {
        expected: usize,
        expected_end: f64,
        found: usize,
        found_end: f64,
    },

    #[error("unreadable record: {0}")]
    Unreadable(String),
}

// ---------------------------------------------------------------------------
// Dataset-level failures
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum AssembleError {
    /// Every partition was empty or rejected; nothing downstream is defined.
    #[error("no observations collected from {partitions} partitions")]
    Empty { partitions: usize },
}

// ---------------------------------------------------------------------------
// Persistence failures
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("dataset file is missing column '{0}'")]
    MissingColumn(&'static str),

    #[error("column '{column}' has unexpected type {found}")]
    ColumnType { column: &'static str, found: String },

    #[error("measurement {measurement} does not share the dataset axis")]
    InconsistentAxis { measurement: u32 },

    #[error("dataset file contains no measurements")]
    Empty,

    #[error("invalid tag value in column '{column}': {value}")]
    InvalidTag { column: &'static str, value: String },

    #[error("invalid dataset metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Rating tables
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RatingsError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed rating table: {0}")]
    Csv(#[from] csv::Error),
}
