use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// Dimension – the name of one tag coordinate
// ---------------------------------------------------------------------------

/// A tag dimension. The declaration order is the column order used for group
/// keys and report tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Scope,
    Instrument,
    Subject,
    Excerpt,
    Criterion,
    Condition,
    /// Pair label of a difference record, e.g. `2-1`.
    #[serde(rename = "difference_type")]
    Difference,
    Sequence,
}

impl Dimension {
    pub const ALL: [Dimension; 8] = [
        Dimension::Scope,
        Dimension::Instrument,
        Dimension::Subject,
        Dimension::Excerpt,
        Dimension::Criterion,
        Dimension::Condition,
        Dimension::Difference,
        Dimension::Sequence,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Dimension::Scope => "scope",
            Dimension::Instrument => "instrument",
            Dimension::Subject => "subject",
            Dimension::Excerpt => "excerpt",
            Dimension::Criterion => "criterion",
            Dimension::Condition => "condition",
            Dimension::Difference => "difference_type",
            Dimension::Sequence => "sequence",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Scope, Instrument, ConditionPair – typed tag payloads
// ---------------------------------------------------------------------------

/// Subject population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Control,
    Test,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Control => "control",
            Scope::Test => "test",
        }
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "control" => Ok(Scope::Control),
            "test" => Ok(Scope::Test),
            other => Err(format!("unknown scope '{other}'")),
        }
    }
}

/// One member of the experiment's closed instrument enumeration.
///
/// Ordering follows the declared rank, not the name, so group keys come out
/// in the order the experiment lists its instruments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instrument {
    rank: u16,
    name: String,
}

impl Instrument {
    pub fn new(rank: u16, name: impl Into<String>) -> Self {
        Instrument {
            rank,
            name: name.into(),
        }
    }

    pub fn rank(&self) -> u16 {
        self.rank
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialOrd for Instrument {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Instrument {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank
            .cmp(&other.rank)
            .then_with(|| self.name.cmp(&other.name))
    }
}

/// An ordered pair of condition levels; the difference it labels is
/// `compared - baseline`, written `"compared-baseline"` (e.g. `"2-1"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConditionPair {
    pub compared: u32,
    pub baseline: u32,
}

impl ConditionPair {
    pub fn new(baseline: u32, compared: u32) -> Self {
        ConditionPair { compared, baseline }
    }

    /// The same pair with the roles swapped.
    pub fn reversed(self) -> Self {
        ConditionPair {
            compared: self.baseline,
            baseline: self.compared,
        }
    }
}

impl fmt::Display for ConditionPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.compared, self.baseline)
    }
}

impl FromStr for ConditionPair {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (compared, baseline) = s
            .split_once('-')
            .ok_or_else(|| format!("condition pair '{s}' is not of the form 'b-a'"))?;
        let parse = |t: &str| {
            t.trim()
                .parse::<u32>()
                .map_err(|e| format!("condition pair '{s}': {e}"))
        };
        Ok(ConditionPair {
            compared: parse(compared)?,
            baseline: parse(baseline)?,
        })
    }
}

impl TryFrom<String> for ConditionPair {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ConditionPair> for String {
    fn from(p: ConditionPair) -> String {
        p.to_string()
    }
}

// ---------------------------------------------------------------------------
// TagValue – a single cell in a tag column
// ---------------------------------------------------------------------------

/// The value of one tag dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TagValue {
    Instrument(Instrument),
    /// Condition levels and sequence indices, ordered by value.
    Ordinal(u32),
    Scope(Scope),
    /// Subject, excerpt and criterion labels.
    Text(String),
    Pair(ConditionPair),
}

// -- Manual Ord so mixed variants still sort deterministically --

impl PartialOrd for TagValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TagValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use TagValue::*;
        fn discriminant(v: &TagValue) -> u8 {
            match v {
                Scope(_) => 0,
                Instrument(_) => 1,
                Ordinal(_) => 2,
                Text(_) => 3,
                Pair(_) => 4,
            }
        }
        match (self, other) {
            (Instrument(a), Instrument(b)) => a.cmp(b),
            (Ordinal(a), Ordinal(b)) => a.cmp(b),
            (Scope(a), Scope(b)) => a.cmp(b),
            (Text(a), Text(b)) => a.cmp(b),
            (Pair(a), Pair(b)) => a.cmp(b),
            _ => discriminant(self).cmp(&discriminant(other)),
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Instrument(i) => f.write_str(i.name()),
            TagValue::Ordinal(n) => write!(f, "{n}"),
            TagValue::Scope(s) => f.write_str(s.as_str()),
            TagValue::Text(s) => f.write_str(s),
            TagValue::Pair(p) => write!(f, "{p}"),
        }
    }
}

impl TagValue {
    pub fn as_ordinal(&self) -> Option<u32> {
        match self {
            TagValue::Ordinal(n) => Some(*n),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tags – the categorical coordinates of an observation or a group
// ---------------------------------------------------------------------------

/// A set of tag values keyed by dimension.
///
/// Observations carry a full set; group keys and difference keys are
/// projections of it. Comparison is lexicographic over
/// `(dimension, value)` entries, which gives group keys a stable order:
/// instruments by declared rank, condition levels by value.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tags(BTreeMap<Dimension, TagValue>);

impl Tags {
    /// Tags of one measurement: its instrument and condition level.
    pub fn new(instrument: Instrument, condition: u32) -> Self {
        Tags::default()
            .with(Dimension::Instrument, TagValue::Instrument(instrument))
            .with(Dimension::Condition, TagValue::Ordinal(condition))
    }

    pub fn with(mut self, dim: Dimension, value: TagValue) -> Self {
        self.0.insert(dim, value);
        self
    }

    pub fn with_sequence(self, sequence: u32) -> Self {
        self.with(Dimension::Sequence, TagValue::Ordinal(sequence))
    }

    pub fn with_subject(self, subject: impl Into<String>) -> Self {
        self.with(Dimension::Subject, TagValue::Text(subject.into()))
    }

    pub fn with_scope(self, scope: Scope) -> Self {
        self.with(Dimension::Scope, TagValue::Scope(scope))
    }

    pub fn with_excerpt(self, excerpt: impl Into<String>) -> Self {
        self.with(Dimension::Excerpt, TagValue::Text(excerpt.into()))
    }

    pub fn with_criterion(self, criterion: impl Into<String>) -> Self {
        self.with(Dimension::Criterion, TagValue::Text(criterion.into()))
    }

    pub fn with_pair(self, pair: ConditionPair) -> Self {
        self.with(Dimension::Difference, TagValue::Pair(pair))
    }

    pub fn get(&self, dim: Dimension) -> Option<&TagValue> {
        self.0.get(&dim)
    }

    pub fn instrument(&self) -> Option<&Instrument> {
        match self.get(Dimension::Instrument)? {
            TagValue::Instrument(i) => Some(i),
            _ => None,
        }
    }

    pub fn condition(&self) -> Option<u32> {
        self.get(Dimension::Condition)?.as_ordinal()
    }

    pub fn sequence(&self) -> Option<u32> {
        self.get(Dimension::Sequence)?.as_ordinal()
    }

    pub fn scope(&self) -> Option<Scope> {
        match self.get(Dimension::Scope)? {
            TagValue::Scope(s) => Some(*s),
            _ => None,
        }
    }

    fn text(&self, dim: Dimension) -> Option<&str> {
        match self.get(dim)? {
            TagValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn subject(&self) -> Option<&str> {
        self.text(Dimension::Subject)
    }

    pub fn excerpt(&self) -> Option<&str> {
        self.text(Dimension::Excerpt)
    }

    pub fn criterion(&self) -> Option<&str> {
        self.text(Dimension::Criterion)
    }

    /// Keep only the given dimensions. Dimensions the tags lack are skipped.
    pub fn project(&self, dims: &[Dimension]) -> Tags {
        Tags(
            self.0
                .iter()
                .filter(|(d, _)| dims.contains(d))
                .map(|(d, v)| (*d, v.clone()))
                .collect(),
        )
    }

    /// Drop one dimension.
    pub fn without(&self, dim: Dimension) -> Tags {
        let mut out = self.clone();
        out.0.remove(&dim);
        out
    }

    pub fn dimensions(&self) -> impl Iterator<Item = Dimension> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Dimension, &TagValue)> {
        self.0.iter().map(|(d, v)| (*d, v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (dim, val) in &self.0 {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{dim}={val}")?;
            first = false;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Axis – the shared sampling grid
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisKind {
    Frequency,
    Time,
}

impl AxisKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AxisKind::Frequency => "frequency",
            AxisKind::Time => "time",
        }
    }
}

impl FromStr for AxisKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "frequency" => Ok(AxisKind::Frequency),
            "time" => Ok(AxisKind::Time),
            other => Err(format!("unknown axis kind '{other}'")),
        }
    }
}

/// Ordered axis values (frequency bins or time samples).
#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    kind: AxisKind,
    values: Vec<f64>,
}

impl Axis {
    /// `n` evenly spaced points from `start` to `end`, both included.
    pub fn linear(kind: AxisKind, start: f64, end: f64, n: usize) -> Self {
        let values = match n {
            0 => Vec::new(),
            1 => vec![start],
            _ => {
                let step = (end - start) / (n - 1) as f64;
                let mut v: Vec<f64> = (0..n).map(|i| start + i as f64 * step).collect();
                v[n - 1] = end;
                v
            }
        };
        Axis { kind, values }
    }

    pub fn from_values(kind: AxisKind, values: Vec<f64>) -> Self {
        Axis { kind, values }
    }

    pub fn kind(&self) -> AxisKind {
        self.kind
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn first(&self) -> Option<f64> {
        self.values.first().copied()
    }

    pub fn last(&self) -> Option<f64> {
        self.values.last().copied()
    }

    /// Spacing between the first two points.
    pub fn step(&self) -> Option<f64> {
        match self.values.as_slice() {
            [a, b, ..] => Some(b - a),
            _ => None,
        }
    }

    /// Exact equality of kind and every value. Axes built by the same
    /// calibration pass are bit-identical, so no tolerance is applied.
    pub fn matches(&self, other: &Axis) -> bool {
        self.kind == other.kind
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }

    pub(crate) fn mismatch(&self, other: &Axis) -> ValidationError {
        ValidationError::AxisMismatch {
            expected: self.len(),
            expected_end: self.last().unwrap_or(f64::NAN),
            found: other.len(),
            found_end: other.last().unwrap_or(f64::NAN),
        }
    }

    /// Index range of the points lying in `[lo, hi]`.
    pub fn index_range(&self, lo: f64, hi: f64) -> std::ops::Range<usize> {
        let start = self.values.partition_point(|&v| v < lo);
        let end = self.values.partition_point(|&v| v <= hi);
        start..end.max(start)
    }

    pub fn slice(&self, range: std::ops::Range<usize>) -> Axis {
        Axis {
            kind: self.kind,
            values: self.values[range].to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// Observation – one calibrated measurement
// ---------------------------------------------------------------------------

/// One calibrated measurement, linear units, aligned on its dataset's axis.
#[derive(Debug, Clone)]
pub struct Observation {
    pub tags: Tags,
    pub axis: Arc<Axis>,
    /// Same length as `axis`.
    pub response: Vec<f32>,
    /// Identity of the raw record it was calibrated from.
    pub source: String,
}

// ---------------------------------------------------------------------------
// Dataset – the complete assembled store
// ---------------------------------------------------------------------------

/// Observations sharing one axis, with the experiment's declared orders.
#[derive(Debug, Clone)]
pub struct Dataset {
    axis: Arc<Axis>,
    observations: Vec<Observation>,
    instruments: Vec<String>,
    conditions: Vec<u32>,
}

impl Dataset {
    /// Build a dataset, rejecting any observation whose axis differs from
    /// `axis`. Admitted observations share the dataset's `Arc`.
    pub fn from_parts(
        axis: Arc<Axis>,
        observations: Vec<Observation>,
        instruments: Vec<String>,
        conditions: Vec<u32>,
    ) -> Result<Self, ValidationError> {
        let mut admitted = Vec::with_capacity(observations.len());
        for mut obs in observations {
            if !axis.matches(&obs.axis) {
                return Err(axis.mismatch(&obs.axis));
            }
            if obs.response.len() != axis.len() {
                return Err(ValidationError::ChannelLength {
                    channel: "response",
                    expected: axis.len(),
                    found: obs.response.len(),
                });
            }
            obs.axis = Arc::clone(&axis);
            admitted.push(obs);
        }
        Ok(Dataset {
            axis,
            observations: admitted,
            instruments,
            conditions,
        })
    }

    /// Observations already checked against `axis` by the caller.
    pub(crate) fn from_admitted(
        axis: Arc<Axis>,
        observations: Vec<Observation>,
        instruments: Vec<String>,
        conditions: Vec<u32>,
    ) -> Self {
        Dataset {
            axis,
            observations,
            instruments,
            conditions,
        }
    }

    pub fn axis(&self) -> &Axis {
        &self.axis
    }

    pub fn shared_axis(&self) -> &Arc<Axis> {
        &self.axis
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Instrument names in declared order.
    pub fn instruments(&self) -> &[String] {
        &self.instruments
    }

    /// Condition levels in declared order.
    pub fn conditions(&self) -> &[u32] {
        &self.conditions
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Sorted set of values present for one dimension.
    pub fn unique_values(&self, dim: Dimension) -> BTreeSet<TagValue> {
        self.observations
            .iter()
            .filter_map(|o| o.tags.get(dim).cloned())
            .collect()
    }

    /// Partition by the given dimensions, keys in tag order.
    pub fn group_by(&self, dims: &[Dimension]) -> BTreeMap<Tags, Group<'_>> {
        let mut groups: BTreeMap<Tags, Group<'_>> = BTreeMap::new();
        for obs in &self.observations {
            let key = obs.tags.project(dims);
            groups
                .entry(key.clone())
                .or_insert_with(|| Group {
                    key,
                    axis: &self.axis,
                    members: Vec::new(),
                })
                .members
                .push(obs);
        }
        groups
    }

    /// A copy of the dataset restricted to `observations`, sharing the axis.
    pub(crate) fn derive(&self, axis: Arc<Axis>, observations: Vec<Observation>) -> Dataset {
        Dataset {
            axis,
            observations,
            instruments: self.instruments.clone(),
            conditions: self.conditions.clone(),
        }
    }

    /// Divide each observation's response by its own mean over the axis.
    pub fn normalized_by_mean(&self) -> Dataset {
        let observations = self
            .observations
            .iter()
            .map(|obs| {
                let mean = obs.response.iter().map(|&v| v as f64).sum::<f64>()
                    / obs.response.len().max(1) as f64;
                let response = obs
                    .response
                    .iter()
                    .map(|&v| (v as f64 / mean) as f32)
                    .collect();
                Observation {
                    response,
                    ..obs.clone()
                }
            })
            .collect();
        self.derive(Arc::clone(&self.axis), observations)
    }
}

// ---------------------------------------------------------------------------
// Group – a borrowed partition of a dataset
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Group<'a> {
    pub key: Tags,
    pub axis: &'a Axis,
    pub members: Vec<&'a Observation>,
}

impl Group<'_> {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
