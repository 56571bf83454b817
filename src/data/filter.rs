use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::model::{Dataset, Dimension, Observation, TagValue, Tags};

// ---------------------------------------------------------------------------
// Selection predicate: which tag values are kept per dimension
// ---------------------------------------------------------------------------

/// Per-dimension selection: dimension → set of accepted values.
/// A dimension absent from the map is unconstrained.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection(BTreeMap<Dimension, BTreeSet<TagValue>>);

impl Selection {
    pub fn new() -> Self {
        Selection::default()
    }

    /// Accept `values` for `dim`, in addition to anything already accepted.
    pub fn allow(mut self, dim: Dimension, values: impl IntoIterator<Item = TagValue>) -> Self {
        self.0.entry(dim).or_default().extend(values);
        self
    }

    pub fn conditions(self, levels: impl IntoIterator<Item = u32>) -> Self {
        self.allow(Dimension::Condition, levels.into_iter().map(TagValue::Ordinal))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether a tag set passes every constrained dimension.
    ///
    /// * dimension unconstrained → passes
    /// * accepted set empty → nothing passes
    /// * tag missing on the observation → fails
    pub fn matches(&self, tags: &Tags) -> bool {
        self.0.iter().all(|(dim, accepted)| match tags.get(*dim) {
            Some(val) => accepted.contains(val),
            None => false,
        })
    }
}

/// Indices of observations that pass the selection.
pub fn selected_indices(dataset: &Dataset, selection: &Selection) -> Vec<usize> {
    dataset
        .observations()
        .iter()
        .enumerate()
        .filter(|(_, obs)| selection.matches(&obs.tags))
        .map(|(i, _)| i)
        .collect()
}

impl Dataset {
    /// A derived dataset holding only the selected observations.
    pub fn select(&self, selection: &Selection) -> Dataset {
        let observations = selected_indices(self, selection)
            .into_iter()
            .map(|i| self.observations()[i].clone())
            .collect();
        self.derive(Arc::clone(self.shared_axis()), observations)
    }

    /// A derived dataset restricted to axis values in `[lo, hi]`.
    pub fn select_axis_range(&self, lo: f64, hi: f64) -> Dataset {
        let range = self.axis().index_range(lo, hi);
        let axis = Arc::new(self.axis().slice(range.clone()));
        let observations = self
            .observations()
            .iter()
            .map(|obs| Observation {
                tags: obs.tags.clone(),
                axis: Arc::clone(&axis),
                response: obs.response[range.clone()].to_vec(),
                source: obs.source.clone(),
            })
            .collect();
        self.derive(axis, observations)
    }
}
