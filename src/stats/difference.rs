use std::collections::{BTreeMap, BTreeSet};

use super::reduce::{reduce_rows, Averaging, ReduceOptions, Reduction, Reductions};
use crate::data::model::{ConditionPair, Dimension, Tags};

/// Paired differences keyed by every non-condition tag of the reduction key
/// plus the `difference` tag naming the pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Differences(BTreeMap<Tags, Vec<f64>>);

impl Differences {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &Tags) -> Option<&Vec<f64>> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Tags, &Vec<f64>)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Tags> {
        self.0.keys()
    }

    /// Element-wise magnitude, irrespective of sign.
    pub fn abs(&self) -> Differences {
        Differences(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.iter().map(|x| x.abs()).collect()))
                .collect(),
        )
    }

    pub fn reduce(&self, group_by: &[Dimension], options: ReduceOptions) -> Reductions {
        reduce_differences(self, group_by, options)
    }
}

impl<'a> IntoIterator for &'a Differences {
    type Item = (&'a Tags, &'a Vec<f64>);
    type IntoIter = std::collections::btree_map::Iter<'a, Tags, Vec<f64>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Reductions of one condition level, keyed without the condition tag.
fn level(reductions: &Reductions, condition: u32) -> BTreeMap<Tags, &Reduction> {
    reductions
        .iter()
        .filter(|(k, _)| k.condition() == Some(condition))
        .map(|(k, r)| (k.without(Dimension::Condition), r))
        .collect()
}

fn joined(reductions: &Reductions, pair: ConditionPair) -> BTreeMap<Tags, Vec<f64>> {
    let baseline = level(reductions, pair.baseline);
    let compared = level(reductions, pair.compared);

    compared
        .iter()
        .filter_map(|(key, b)| {
            let a = baseline.get(key)?;
            let values = b
                .center
                .iter()
                .zip(&a.center)
                .map(|(vb, va)| vb - va)
                .collect();
            Some((key.clone(), values))
        })
        .collect()
}

/// `compared − baseline` for every join key present at both levels.
///
/// The join key is the reduction key minus its condition tag; keys found at
/// only one level are dropped.
pub fn difference(reductions: &Reductions, pair: ConditionPair) -> Differences {
    let out: BTreeMap<Tags, Vec<f64>> = joined(reductions, pair)
        .into_iter()
        .map(|(key, values)| (key.with_pair(pair), values))
        .collect();
    log::debug!("Difference {pair}: {} paired keys", out.len());
    Differences(out)
}

/// Several pairs at once, each record tagged with its pair. A join key is
/// kept only when every requested pair can be formed for it.
pub fn difference_many(reductions: &Reductions, pairs: &[ConditionPair]) -> Differences {
    let per_pair: Vec<(ConditionPair, BTreeMap<Tags, Vec<f64>>)> = pairs
        .iter()
        .map(|&pair| (pair, joined(reductions, pair)))
        .collect();

    let complete: BTreeSet<Tags> = match per_pair.split_first() {
        Some(((_, first), rest)) => first
            .keys()
            .filter(|k| rest.iter().all(|(_, other)| other.contains_key(*k)))
            .cloned()
            .collect(),
        None => BTreeSet::new(),
    };

    let mut out = BTreeMap::new();
    for (pair, values) in per_pair {
        for (key, v) in values {
            if complete.contains(&key) {
                out.insert(key.with_pair(pair), v);
            }
        }
    }
    Differences(out)
}

/// Reduce difference records again, e.g. the mean difference across
/// subjects. Values are already in their presentation unit, so the mean is
/// arithmetic.
pub fn reduce_differences(
    differences: &Differences,
    group_by: &[Dimension],
    options: ReduceOptions,
) -> Reductions {
    reduce_rows(differences.iter(), group_by, Averaging::Arithmetic, options)
}
