use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::kernel;
use crate::data::model::{Dataset, Dimension, Group, Tags};

// ---------------------------------------------------------------------------
// Series – anything the engine can average position by position
// ---------------------------------------------------------------------------

/// A member of a group: a vector over the axis, or a single scalar.
pub trait Series {
    fn width(&self) -> usize;
    fn at(&self, i: usize) -> f64;
}

impl Series for [f32] {
    fn width(&self) -> usize {
        self.len()
    }
    fn at(&self, i: usize) -> f64 {
        self[i] as f64
    }
}

impl Series for [f64] {
    fn width(&self) -> usize {
        self.len()
    }
    fn at(&self, i: usize) -> f64 {
        self[i]
    }
}

impl Series for Vec<f64> {
    fn width(&self) -> usize {
        self.len()
    }
    fn at(&self, i: usize) -> f64 {
        self[i]
    }
}

impl Series for f64 {
    fn width(&self) -> usize {
        1
    }
    fn at(&self, _i: usize) -> f64 {
        *self
    }
}

// ---------------------------------------------------------------------------
// Averaging modes and options
// ---------------------------------------------------------------------------

/// How a group's central value is formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Averaging {
    /// Mean of `20·log10|v|` over members.
    DecibelMean,
    /// `20·log10(sqrt(mean(v²)))`: energy average in linear units.
    RmsDecibel,
    /// Plain mean, no transform (ratings, differences already in dB).
    Arithmetic,
}

impl Averaging {
    /// The value as shown in envelopes and intervals.
    fn present(self, v: f64) -> f64 {
        match self {
            Averaging::DecibelMean | Averaging::RmsDecibel => kernel::to_decibel(v),
            Averaging::Arithmetic => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReduceOptions {
    pub envelope: bool,
    pub confidence: bool,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        ReduceOptions {
            envelope: true,
            confidence: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Reduction result
// ---------------------------------------------------------------------------

/// Element-wise min/max band across members.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reduction {
    pub center: Vec<f64>,
    pub envelope: Option<Envelope>,
    pub interval: Option<Interval>,
    /// Finite member values per position.
    pub count: Vec<usize>,
}

impl Reduction {
    pub fn width(&self) -> usize {
        self.center.len()
    }

    /// The central value of a scalar reduction.
    pub fn scalar(&self) -> Option<f64> {
        match self.center.as_slice() {
            [v] => Some(*v),
            _ => None,
        }
    }
}

/// Reductions keyed by group, in tag order.
pub type Reductions = BTreeMap<Tags, Reduction>;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Reduce one set of members position by position.
///
/// Envelope and interval are computed over the presented values (decibels
/// for the acoustic modes). Non-finite presented values are left out of
/// that position; a position with none is NaN.
///
/// `RmsDecibel` is the exception: its center is taken over every member,
/// zero magnitudes included, so `count` and the envelope cover those members
/// too (a zero member puts the envelope floor at `-inf`). Its interval has the
/// half-width of the finite decibel levels but is centered on the RMS center.
pub fn reduce_members<S: Series + ?Sized>(
    members: &[&S],
    averaging: Averaging,
    options: ReduceOptions,
) -> Reduction {
    let width = members.iter().map(|m| m.width()).min().unwrap_or(0);

    let mut center = Vec::with_capacity(width);
    let mut count = Vec::with_capacity(width);
    let mut env_min = Vec::new();
    let mut env_max = Vec::new();
    let mut lower = Vec::new();
    let mut upper = Vec::new();

    let mut raw: Vec<f64> = Vec::with_capacity(members.len());
    let mut levels: Vec<f64> = Vec::with_capacity(members.len());
    let mut shown: Vec<f64> = Vec::with_capacity(members.len());
    let rms = averaging == Averaging::RmsDecibel;
    for i in 0..width {
        raw.clear();
        levels.clear();
        shown.clear();
        for m in members {
            let v = m.at(i);
            if v.is_nan() {
                continue;
            }
            raw.push(v);
            let p = averaging.present(v);
            levels.push(p);
            if p.is_finite() {
                shown.push(p);
            }
        }

        let c = if rms {
            if raw.is_empty() {
                f64::NAN
            } else {
                kernel::rms_decibel(&raw)
            }
        } else {
            kernel::mean(&shown)
        };
        center.push(c);
        count.push(if rms { raw.len() } else { shown.len() });

        if options.envelope {
            let (lo, hi) = kernel::min_max(if rms { &levels } else { &shown });
            env_min.push(lo);
            env_max.push(hi);
        }
        if options.confidence {
            let (lo, hi) = kernel::confidence_interval(&shown);
            if rms {
                let half = (hi - lo) / 2.0;
                lower.push(c - half);
                upper.push(c + half);
            } else {
                lower.push(lo);
                upper.push(hi);
            }
        }
    }

    Reduction {
        center,
        envelope: options.envelope.then_some(Envelope {
            min: env_min,
            max: env_max,
        }),
        interval: options.confidence.then_some(Interval { lower, upper }),
        count,
    }
}

/// Group tagged rows by `group_by` and reduce each group.
pub fn reduce_rows<'a, S, I>(
    rows: I,
    group_by: &[Dimension],
    averaging: Averaging,
    options: ReduceOptions,
) -> Reductions
where
    S: Series + ?Sized + 'a,
    I: IntoIterator<Item = (&'a Tags, &'a S)>,
{
    let mut groups: BTreeMap<Tags, Vec<&'a S>> = BTreeMap::new();
    for (tags, series) in rows {
        groups.entry(tags.project(group_by)).or_default().push(series);
    }
    groups
        .into_iter()
        .map(|(key, members)| {
            log::debug!("Reducing {} members of [{key}]", members.len());
            let reduction = reduce_members(&members, averaging, options);
            (key, reduction)
        })
        .collect()
}

/// Reduce a dataset grouped by `group_by`.
pub fn reduce(
    dataset: &Dataset,
    group_by: &[Dimension],
    averaging: Averaging,
    options: ReduceOptions,
) -> Reductions {
    reduce_rows(
        dataset
            .observations()
            .iter()
            .map(|o| (&o.tags, o.response.as_slice())),
        group_by,
        averaging,
        options,
    )
}

/// Reduce one already formed group.
pub fn reduce_group(group: &Group<'_>, averaging: Averaging, options: ReduceOptions) -> Reduction {
    let members: Vec<&[f32]> = group.members.iter().map(|o| o.response.as_slice()).collect();
    reduce_members(&members, averaging, options)
}

/// Reduce one value per row.
pub fn reduce_scalars(
    rows: &[(Tags, f64)],
    group_by: &[Dimension],
    averaging: Averaging,
    options: ReduceOptions,
) -> Reductions {
    reduce_rows(rows.iter().map(|(t, v)| (t, v)), group_by, averaging, options)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::data::model::{Axis, AxisKind, Instrument, Observation};
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    fn dataset(values: &[(u16, u32, Vec<f32>)]) -> Dataset {
        let width = values.first().map(|v| v.2.len()).unwrap_or(0);
        let axis = Arc::new(Axis::linear(AxisKind::Frequency, 0.0, 100.0, width));
        let names = ["klimke", "levaggi", "stoppani"];
        let obs = values
            .iter()
            .enumerate()
            .map(|(i, (rank, cond, response))| Observation {
                tags: Tags::new(Instrument::new(*rank, names[*rank as usize]), *cond)
                    .with_sequence(i as u32 + 1),
                axis: Arc::clone(&axis),
                response: response.clone(),
                source: String::new(),
            })
            .collect();
        Dataset::from_parts(
            axis,
            obs,
            names.iter().map(|s| s.to_string()).collect(),
            vec![1, 2],
        )
        .unwrap()
    }

    #[test]
    fn decibel_mean_and_rms_are_distinct() {
        let ds = dataset(&[(0, 1, vec![1.0, 1.0]), (0, 1, vec![2.0, 2.0])]);
        let by = [Dimension::Instrument, Dimension::Condition];
        let db = reduce(&ds, &by, Averaging::DecibelMean, ReduceOptions::default());
        let rms = reduce(&ds, &by, Averaging::RmsDecibel, ReduceOptions::default());
        let db = db.values().next().unwrap();
        let rms = rms.values().next().unwrap();
        assert_abs_diff_eq!(db.center[0], 3.0103, epsilon = 1e-4);
        assert_abs_diff_eq!(rms.center[0], 3.9794, epsilon = 1e-4);
        assert_ne!(db.center, rms.center);
    }

    #[test]
    fn envelope_is_over_decibel_members() {
        let ds = dataset(&[(0, 1, vec![1.0, 10.0]), (0, 1, vec![10.0, 0.1])]);
        let r = reduce(&ds, &[Dimension::Instrument], Averaging::DecibelMean, ReduceOptions::default());
        let env = r.values().next().unwrap().envelope.clone().unwrap();
        assert_abs_diff_eq!(env.min[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(env.max[0], 20.0, epsilon = 1e-5);
        assert_abs_diff_eq!(env.min[1], -20.0, epsilon = 1e-5);
        assert_abs_diff_eq!(env.max[1], 20.0, epsilon = 1e-5);
    }

    #[test]
    fn output_order_follows_declared_enumeration() {
        let ds = dataset(&[
            (2, 2, vec![1.0]),
            (1, 1, vec![1.0]),
            (0, 2, vec![1.0]),
            (2, 1, vec![1.0]),
            (0, 1, vec![1.0]),
        ]);
        let r = reduce(
            &ds,
            &[Dimension::Instrument, Dimension::Condition],
            Averaging::DecibelMean,
            ReduceOptions::default(),
        );
        let keys: Vec<(u16, u32)> = r
            .keys()
            .map(|k| (k.instrument().unwrap().rank(), k.condition().unwrap()))
            .collect();
        assert_eq!(keys, vec![(0, 1), (0, 2), (1, 1), (2, 1), (2, 2)]);
    }

    #[test]
    fn zero_magnitude_is_left_out_of_decibel_statistics() {
        let ds = dataset(&[(0, 1, vec![0.0]), (0, 1, vec![1.0]), (0, 1, vec![1.0])]);
        let r = reduce(&ds, &[Dimension::Instrument], Averaging::DecibelMean, ReduceOptions::default());
        let red = r.values().next().unwrap();
        assert_eq!(red.count, vec![2]);
        assert_abs_diff_eq!(red.center[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn rms_statistics_cover_zero_magnitude_members() {
        let ds = dataset(&[(0, 1, vec![0.0]), (0, 1, vec![1.0]), (0, 1, vec![1.0])]);
        let r = reduce(&ds, &[Dimension::Instrument], Averaging::RmsDecibel, ReduceOptions::default());
        let red = r.values().next().unwrap();
        // sqrt(2/3) in dB
        assert_abs_diff_eq!(red.center[0], -1.7609, epsilon = 1e-4);
        assert_eq!(red.count, vec![3]);

        let ci = red.interval.clone().unwrap();
        assert!(ci.lower[0] <= red.center[0] && red.center[0] <= ci.upper[0]);
        let env = red.envelope.clone().unwrap();
        assert_eq!(env.min[0], f64::NEG_INFINITY);
        assert_abs_diff_eq!(env.max[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn rms_interval_is_centered_on_the_energy_average() {
        let ds = dataset(&[(0, 1, vec![1.0]), (0, 1, vec![10.0])]);
        let by = [Dimension::Instrument];
        let rms = reduce(&ds, &by, Averaging::RmsDecibel, ReduceOptions::default());
        let db = reduce(&ds, &by, Averaging::DecibelMean, ReduceOptions::default());
        let rms = rms.values().next().unwrap();
        let db = db.values().next().unwrap();
        let (rms_ci, db_ci) = (rms.interval.clone().unwrap(), db.interval.clone().unwrap());
        assert_abs_diff_eq!(
            (rms_ci.upper[0] + rms_ci.lower[0]) / 2.0,
            rms.center[0],
            epsilon = 1e-9
        );
        assert_abs_diff_eq!(
            rms_ci.upper[0] - rms_ci.lower[0],
            db_ci.upper[0] - db_ci.lower[0],
            epsilon = 1e-9
        );
    }

    #[test]
    fn options_disable_envelope_and_interval() {
        let ds = dataset(&[(0, 1, vec![1.0])]);
        let r = reduce(
            &ds,
            &[Dimension::Instrument],
            Averaging::RmsDecibel,
            ReduceOptions {
                envelope: false,
                confidence: false,
            },
        );
        let red = r.values().next().unwrap();
        assert!(red.envelope.is_none());
        assert!(red.interval.is_none());
    }

    #[test]
    fn single_member_group_gives_zero_width_interval() {
        let ds = dataset(&[(0, 1, vec![2.0, 4.0])]);
        let r = reduce(&ds, &[Dimension::Instrument], Averaging::DecibelMean, ReduceOptions::default());
        let ci = r.values().next().unwrap().interval.clone().unwrap();
        assert_eq!(ci.lower, ci.upper);
    }

    #[test]
    fn group_reduction_matches_dataset_reduction() {
        let ds = dataset(&[(0, 1, vec![1.0, 3.0]), (0, 1, vec![2.0, 5.0])]);
        let by = [Dimension::Instrument];
        let groups = ds.group_by(&by);
        let (key, group) = groups.iter().next().unwrap();
        let direct = reduce_group(group, Averaging::RmsDecibel, ReduceOptions::default());
        let all = reduce(&ds, &by, Averaging::RmsDecibel, ReduceOptions::default());
        assert_eq!(all[key], direct);
    }

    #[test]
    fn scalar_rows_reduce_to_scalars() {
        let inst = Instrument::new(0, "klimke");
        let rows = vec![
            (Tags::new(inst.clone(), 1).with_subject("a"), 4.0),
            (Tags::new(inst.clone(), 1).with_subject("b"), 6.0),
            (Tags::new(inst.clone(), 2).with_subject("a"), 7.0),
        ];
        let r = reduce_scalars(
            &rows,
            &[Dimension::Condition],
            Averaging::Arithmetic,
            ReduceOptions::default(),
        );
        let values: Vec<f64> = r.values().map(|red| red.scalar().unwrap()).collect();
        assert_eq!(values, vec![5.0, 7.0]);
        let ci = r.values().next().unwrap().interval.clone().unwrap();
        assert_abs_diff_eq!(ci.upper[0] - ci.lower[0], 2.0 * 1.96 / 2f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn rms_scalar_variant() {
        let rows = vec![
            (Tags::default(), 1.0),
            (Tags::default(), 2.0),
        ];
        let r = reduce_scalars(&rows, &[], Averaging::RmsDecibel, ReduceOptions::default());
        assert_abs_diff_eq!(r[&Tags::default()].scalar().unwrap(), 3.9794, epsilon = 1e-4);
    }

    fn interval_width(values: &[f64]) -> f64 {
        let rows: Vec<(Tags, f64)> = values.iter().map(|&v| (Tags::default(), v)).collect();
        let r = reduce_scalars(&rows, &[], Averaging::Arithmetic, ReduceOptions::default());
        let ci = r[&Tags::default()].interval.clone().unwrap();
        ci.upper[0] - ci.lower[0]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_interval_widens_with_spread(
            center in -50.0f64..50.0,
            spread in 0.01f64..10.0,
            factor in 1.01f64..5.0,
            n in 2usize..20,
        ) {
            // alternating ±spread keeps n fixed and scales the std by `factor`
            let sample = |s: f64| -> Vec<f64> {
                (0..n).map(|i| if i % 2 == 0 { center + s } else { center - s }).collect()
            };
            let narrow = interval_width(&sample(spread));
            let wide = interval_width(&sample(spread * factor));
            prop_assert!(narrow >= 0.0);
            prop_assert!(wide > narrow);
        }

        #[test]
        fn prop_interval_shrinks_with_n(
            spread in 0.01f64..10.0,
            n in 1usize..20,
        ) {
            // ±spread pairs: population std is `spread` for every n
            let sample = |pairs: usize| -> Vec<f64> {
                (0..pairs).flat_map(|_| [spread, -spread]).collect()
            };
            let few = interval_width(&sample(n));
            let many = interval_width(&sample(n + 1));
            prop_assert!(many < few);
            prop_assert!(many >= 0.0);
        }
    }
}
