use std::sync::Arc;

use super::calibrate::calibrate;
use super::model::{Axis, Dataset, Instrument, Observation, Tags};
use super::source::RecordSource;
use crate::config::{CalibrationConfig, DesignConfig};
use crate::error::AssembleError;

/// Build a dataset from every (condition × instrument) partition of `design`.
///
/// Records that fail to decode or validate, or whose axis differs from the
/// first admitted one, are skipped with a warning; so are missing or empty
/// partitions. Only a dataset with no observation at all is an error.
///
/// Sequence indices are the 1-based position of a record in its partition's
/// sorted listing, so they do not shift when a neighbouring record is
/// rejected.
pub fn assemble(
    source: &impl RecordSource,
    design: &DesignConfig,
    cal: &CalibrationConfig,
) -> Result<Dataset, AssembleError> {
    let mut axis: Option<Arc<Axis>> = None;
    let mut observations: Vec<Observation> = Vec::new();
    let mut partitions = 0usize;

    for &condition in &design.conditions {
        for (rank, name) in design.instruments.iter().enumerate() {
            partitions += 1;
            let location = source.location(name, condition);

            let Some(entries) = source.partition(name, condition) else {
                log::warn!("Partition not found: {location}");
                continue;
            };
            if entries.is_empty() {
                log::warn!("No records for {name} in condition {condition} ({location})");
                continue;
            }

            let mut admitted = 0usize;
            for (position, entry) in entries.iter().enumerate() {
                let calibrated = match entry.record.as_ref().map_err(Clone::clone).and_then(
                    |record| calibrate(record, cal),
                ) {
                    Ok(c) => c,
                    Err(e) => {
                        log::warn!("Skipping {location}/{}: {e}", entry.id);
                        continue;
                    }
                };

                let shared = match &axis {
                    Some(existing) if existing.matches(&calibrated.axis) => Arc::clone(existing),
                    Some(existing) => {
                        log::warn!(
                            "Skipping {location}/{}: {}",
                            entry.id,
                            existing.mismatch(&calibrated.axis)
                        );
                        continue;
                    }
                    None => {
                        let first = Arc::new(calibrated.axis);
                        axis = Some(Arc::clone(&first));
                        first
                    }
                };

                let mut tags = Tags::new(Instrument::new(rank as u16, name.clone()), condition)
                    .with_sequence(position as u32 + 1);
                if let Some(subject) = calibrated.subject {
                    tags = tags.with_subject(subject);
                }
                if let Some(scope) = calibrated.scope {
                    tags = tags.with_scope(scope);
                }

                log::debug!("Admitted {location}/{} as {tags}", entry.id);
                observations.push(Observation {
                    tags,
                    axis: shared,
                    response: calibrated.response,
                    source: entry.id.clone(),
                });
                admitted += 1;
            }
            log::info!(
                "{name} / condition {condition}: {admitted} of {} records admitted",
                entries.len()
            );
        }
    }

    let Some(axis) = axis else {
        return Err(AssembleError::Empty { partitions });
    };

    Ok(Dataset::from_admitted(
        axis,
        observations,
        design.instruments.clone(),
        design.conditions.clone(),
    ))
}
