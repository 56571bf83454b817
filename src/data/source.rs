use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::calibrate::RawRecord;
use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// Record sources – where the raw records of one partition come from
// ---------------------------------------------------------------------------

/// A raw record together with its identity. `record` holds the read/parse
/// failure when the record could not even be decoded.
#[derive(Debug, Clone)]
pub struct RecordEntry {
    pub id: String,
    pub record: Result<RawRecord, ValidationError>,
}

/// Supplies the raw records of one (instrument, condition) partition.
pub trait RecordSource {
    /// Records sorted by identity, or `None` if the partition's location does
    /// not exist.
    fn partition(&self, instrument: &str, condition: u32) -> Option<Vec<RecordEntry>>;

    /// Human-readable location of a partition, for warnings.
    fn location(&self, instrument: &str, condition: u32) -> String;
}

// ---------------------------------------------------------------------------
// Filesystem layout: <root>/phase_<c>/<instrument>/<kind>/*.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    kind: String,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>, kind: impl Into<String>) -> Self {
        DirectorySource {
            root: root.into(),
            kind: kind.into(),
        }
    }

    pub fn partition_dir(&self, instrument: &str, condition: u32) -> PathBuf {
        self.root
            .join(format!("phase_{condition}"))
            .join(instrument)
            .join(&self.kind)
    }
}

fn read_entry(path: &Path) -> RecordEntry {
    let id = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let record = fs::read_to_string(path)
        .map_err(|e| ValidationError::Unreadable(e.to_string()))
        .and_then(|text| RawRecord::from_json(&text));
    RecordEntry { id, record }
}

impl RecordSource for DirectorySource {
    fn partition(&self, instrument: &str, condition: u32) -> Option<Vec<RecordEntry>> {
        let dir = self.partition_dir(instrument, condition);
        if !dir.is_dir() {
            return None;
        }
        let listing = match fs::read_dir(&dir) {
            Ok(listing) => listing,
            Err(e) => {
                log::warn!("Cannot list {}: {e}", dir.display());
                return None;
            }
        };

        let mut paths: Vec<PathBuf> = listing
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
            })
            .collect();
        paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        Some(paths.iter().map(|p| read_entry(p)).collect())
    }

    fn location(&self, instrument: &str, condition: u32) -> String {
        self.partition_dir(instrument, condition).display().to_string()
    }
}

// ---------------------------------------------------------------------------
// In-memory source
// ---------------------------------------------------------------------------

/// Records held in memory, keyed by partition then identity.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    partitions: BTreeMap<(String, u32), BTreeMap<String, Result<RawRecord, ValidationError>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        MemorySource::default()
    }

    pub fn insert(
        &mut self,
        instrument: &str,
        condition: u32,
        id: impl Into<String>,
        record: RawRecord,
    ) -> &mut Self {
        self.insert_entry(instrument, condition, id, Ok(record))
    }

    /// Insert a record that failed to decode.
    pub fn insert_unreadable(
        &mut self,
        instrument: &str,
        condition: u32,
        id: impl Into<String>,
        reason: &str,
    ) -> &mut Self {
        self.insert_entry(
            instrument,
            condition,
            id,
            Err(ValidationError::Unreadable(reason.to_string())),
        )
    }

    fn insert_entry(
        &mut self,
        instrument: &str,
        condition: u32,
        id: impl Into<String>,
        record: Result<RawRecord, ValidationError>,
    ) -> &mut Self {
        self.partitions
            .entry((instrument.to_string(), condition))
            .or_default()
            .insert(id.into(), record);
        self
    }
}

impl RecordSource for MemorySource {
    fn partition(&self, instrument: &str, condition: u32) -> Option<Vec<RecordEntry>> {
        self.partitions
            .get(&(instrument.to_string(), condition))
            .map(|records| {
                records
                    .iter()
                    .map(|(id, record)| RecordEntry {
                        id: id.clone(),
                        record: record.clone(),
                    })
                    .collect()
            })
    }

    fn location(&self, instrument: &str, condition: u32) -> String {
        format!("memory:{instrument}/{condition}")
    }
}
