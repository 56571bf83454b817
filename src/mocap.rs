//! Motion-capture takes: the descriptor enumeration, the capability a take
//! provides, and assembly of aligned takes into time-axis datasets.
//!
//! Reading and processing the capture files themselves belongs to an
//! external feature library; this module only sees it through [`Take`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{DesignConfig, MocapConfig};
use crate::data::model::{Axis, AxisKind, Dataset, Instrument, Observation, Tags};
use crate::error::{AssembleError, ValidationError};

/// A bowing descriptor computed per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Descriptor {
    #[serde(alias = "vs")]
    BowVelocity,
    #[serde(alias = "xs")]
    BowPosition,
    #[serde(alias = "hairstring")]
    HairString,
    Tilt,
    Skewness,
    Beta,
}

impl Descriptor {
    pub fn name(self) -> &'static str {
        match self {
            Descriptor::BowVelocity => "bow_velocity",
            Descriptor::BowPosition => "bow_position",
            Descriptor::HairString => "hair_string",
            Descriptor::Tilt => "tilt",
            Descriptor::Skewness => "skewness",
            Descriptor::Beta => "beta",
        }
    }

    /// Display unit; empty for dimensionless descriptors.
    pub fn unit(self) -> &'static str {
        match self {
            Descriptor::BowVelocity => "mm/s",
            Descriptor::BowPosition | Descriptor::HairString | Descriptor::Beta => "mm",
            Descriptor::Tilt | Descriptor::Skewness => "",
        }
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One captured performance.
pub trait Take {
    /// Identity used by the exclusion list (usually the file name).
    fn id(&self) -> &str;

    /// Time-align this take onto `reference`.
    fn align(&mut self, reference: &Self);

    /// Frame numbers of the take's timeline.
    fn frames(&self) -> Vec<f64>;

    /// Map a per-frame sequence of this take onto its aligned timeline.
    fn warp(&self, sequence: &[f64]) -> Vec<f64>;

    fn compute(&self, descriptor: Descriptor) -> Vec<f64>;
}

/// Supplies the takes of one (excerpt, instrument, condition) cell, in listing
/// order. `None` when the cell does not exist.
pub trait TakeSource {
    type Take: Take;

    fn takes(&self, excerpt: &str, instrument: &str, condition: u32) -> Option<Vec<Self::Take>>;
}

/// Build one time-axis dataset per configured excerpt.
///
/// Within an excerpt the first admitted take is the reference and every later
/// take is aligned onto it. The reference's frames decide which positions are
/// kept: strictly inside the excerpt's window, or every frame after 0 when no
/// window is configured. Kept positions are re-indexed from 0 at
/// `frame_rate`. Excerpts with no admitted take are skipped; none at all is
/// fatal.
pub fn assemble_takes<S: TakeSource>(
    source: &S,
    design: &DesignConfig,
    config: &MocapConfig,
) -> Result<Vec<(String, Dataset)>, AssembleError> {
    let mut datasets = Vec::new();
    for excerpt in &config.excerpts {
        let mut admitted: Vec<(Tags, S::Take)> = Vec::new();
        for (rank, instrument) in design.instruments.iter().enumerate() {
            for &condition in &design.conditions {
                let Some(takes) = source.takes(excerpt, instrument, condition) else {
                    log::warn!("No takes for {excerpt}/{instrument}/phase {condition}");
                    continue;
                };
                for (pos, take) in takes.into_iter().enumerate() {
                    if config.excluded.iter().any(|id| id == take.id()) {
                        log::warn!("Excluded take {}", take.id());
                        continue;
                    }
                    let tags = Tags::new(Instrument::new(rank as u16, instrument.clone()), condition)
                        .with_excerpt(excerpt.clone())
                        .with_sequence(pos as u32 + 1);
                    admitted.push((tags, take));
                }
            }
        }

        match excerpt_dataset(excerpt, admitted, design, config) {
            Some(ds) => {
                log::info!("Excerpt {excerpt}: {} takes × {} frames", ds.len(), ds.axis().len());
                datasets.push((excerpt.clone(), ds));
            }
            None => log::warn!("Excerpt {excerpt}: no usable takes"),
        }
    }

    if datasets.is_empty() {
        return Err(AssembleError::Empty {
            partitions: config.excerpts.len() * design.instruments.len() * design.conditions.len(),
        });
    }
    Ok(datasets)
}

fn excerpt_dataset<T: Take>(
    excerpt: &str,
    mut admitted: Vec<(Tags, T)>,
    design: &DesignConfig,
    config: &MocapConfig,
) -> Option<Dataset> {
    let ((_, reference), rest) = admitted.split_first_mut()?;
    for (_, take) in rest.iter_mut() {
        take.align(reference);
    }

    let window = config.windows.get(excerpt);
    let frames = admitted[0].1.frames();
    let keep: Vec<usize> = frames
        .iter()
        .enumerate()
        .filter(|&(_, &f)| match window {
            Some([start, end]) => f > *start && f < *end,
            None => f > 0.0,
        })
        .map(|(i, _)| i)
        .collect();
    let axis = Arc::new(Axis::from_values(
        AxisKind::Time,
        (0..keep.len()).map(|i| i as f64 / config.frame_rate).collect(),
    ));

    let mut observations = Vec::with_capacity(admitted.len());
    for (tags, take) in &admitted {
        let values = take.warp(&take.compute(config.descriptor));
        if values.len() != frames.len() {
            let err = ValidationError::ChannelLength {
                channel: "descriptor",
                expected: frames.len(),
                found: values.len(),
            };
            log::warn!("Skipping take {}: {err}", take.id());
            continue;
        }
        observations.push(Observation {
            tags: tags.clone(),
            axis: Arc::clone(&axis),
            response: keep.iter().map(|&i| values[i] as f32).collect(),
            source: take.id().to_string(),
        });
    }

    if observations.is_empty() {
        return None;
    }
    Some(Dataset::from_admitted(
        axis,
        observations,
        design.instruments.clone(),
        design.conditions.clone(),
    ))
}
