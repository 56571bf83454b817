//! Scalar rating tables: one perceptual rating per (subject, instrument,
//! criterion, session), compared across sessions with the same difference
//! engine as the acoustic spectra.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::data::model::{ConditionPair, Dimension, Instrument, Scope, Tags};
use crate::error::RatingsError;
use crate::stats::difference::{difference_many, reduce_differences, Differences};
use crate::stats::reduce::{reduce_scalars, Averaging, ReduceOptions, Reductions};

/// One CSV row.
#[derive(Debug, Clone, Deserialize)]
struct RatingRow {
    scope: Scope,
    violin: String,
    player: String,
    criterion: String,
    #[serde(alias = "phase")]
    session: u32,
    rating: f64,
    #[serde(default)]
    condition: Option<String>,
}

/// Tagged ratings: scope, instrument, subject, criterion and the session as
/// the condition level.
#[derive(Debug, Clone, Default)]
pub struct RatingTable {
    rows: Vec<(Tags, f64)>,
}

/// The per-subject differences and their summaries across subjects.
#[derive(Debug, Clone)]
pub struct RatingAnalysis {
    pub differences: Differences,
    /// Mean signed difference per (scope, instrument, criterion, pair).
    pub signed: Reductions,
    /// Mean absolute difference per (scope, instrument, criterion, pair).
    pub absolute: Reductions,
}

const SUBJECT_KEY: [Dimension; 5] = [
    Dimension::Scope,
    Dimension::Instrument,
    Dimension::Subject,
    Dimension::Criterion,
    Dimension::Condition,
];

const SUMMARY_KEY: [Dimension; 4] = [
    Dimension::Scope,
    Dimension::Instrument,
    Dimension::Criterion,
    Dimension::Difference,
];

impl RatingTable {
    pub fn load(
        path: &Path,
        instruments: &[String],
        condition: Option<&str>,
    ) -> Result<Self, RatingsError> {
        let file = File::open(path).map_err(|source| RatingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_reader(file, instruments, condition)?;
        log::info!("Loaded {} ratings from {}", table.len(), path.display());
        Ok(table)
    }

    /// Parse a rating CSV. Instruments are matched case-insensitively against
    /// the declared list; rows naming an undeclared one are skipped. When
    /// `condition` is given, only rows whose `condition` column equals it are
    /// kept.
    pub fn from_reader<R: Read>(
        reader: R,
        instruments: &[String],
        condition: Option<&str>,
    ) -> Result<Self, RatingsError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut rows = Vec::new();
        for result in rdr.deserialize() {
            let row: RatingRow = result?;
            if let Some(wanted) = condition {
                if row.condition.as_deref() != Some(wanted) {
                    continue;
                }
            }
            let Some(rank) = instruments
                .iter()
                .position(|i| i.eq_ignore_ascii_case(&row.violin))
            else {
                log::warn!("Skipping rating for undeclared instrument '{}'", row.violin);
                continue;
            };
            let tags = Tags::new(Instrument::new(rank as u16, instruments[rank].clone()), row.session)
                .with_scope(row.scope)
                .with_subject(row.player)
                .with_criterion(row.criterion);
            rows.push((tags, row.rating));
        }
        Ok(RatingTable { rows })
    }

    pub fn rows(&self) -> &[(Tags, f64)] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Mean rating per subject, instrument, criterion and session; repeated
    /// ratings of one cell collapse to their mean.
    pub fn means(&self) -> Reductions {
        reduce_scalars(
            &self.rows,
            &SUBJECT_KEY,
            Averaging::Arithmetic,
            ReduceOptions {
                envelope: false,
                confidence: false,
            },
        )
    }

    /// Session differences per subject for every pair, keeping only subjects
    /// rated in every session the pairs name.
    pub fn differences(&self, pairs: &[ConditionPair]) -> Differences {
        difference_many(&self.means(), pairs)
    }

    pub fn analyze(&self, pairs: &[ConditionPair], options: ReduceOptions) -> RatingAnalysis {
        let differences = self.differences(pairs);
        let signed = reduce_differences(&differences, &SUMMARY_KEY, options);
        let absolute = reduce_differences(&differences.abs(), &SUMMARY_KEY, options);
        RatingAnalysis {
            differences,
            signed,
            absolute,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const CSV: &str = "\
scope,violin,player,criterion,session,rating,condition
control,Klimke,p1,P,1,5,blind
control,Klimke,p1,P,2,7,blind
control,Klimke,p1,P,3,8,blind
control,Klimke,p2,P,1,4,blind
control,Klimke,p2,P,2,3,blind
control,Klimke,p2,P,3,6,blind
control,Klimke,p3,P,1,4,blind
control,Klimke,p3,P,2,6,blind
test,Stoppani,p9,F,1,2,sighted
test,Stoppani,p9,F,2,3,sighted
control,Guarneri,p1,P,1,1,blind
";

    fn instruments() -> Vec<String> {
        vec!["klimke".into(), "levaggi".into(), "stoppani".into()]
    }

    #[test]
    fn rows_are_tagged_and_filtered() {
        let all = RatingTable::from_reader(CSV.as_bytes(), &instruments(), None).unwrap();
        // Guarneri is not declared
        assert_eq!(all.len(), 10);
        let blind = RatingTable::from_reader(CSV.as_bytes(), &instruments(), Some("blind")).unwrap();
        assert_eq!(blind.len(), 8);
        let (tags, value) = &blind.rows()[0];
        assert_eq!(tags.instrument().unwrap().name(), "klimke");
        assert_eq!(tags.scope(), Some(Scope::Control));
        assert_eq!(tags.subject(), Some("p1"));
        assert_eq!(tags.criterion(), Some("P"));
        assert_eq!(tags.condition(), Some(1));
        assert_eq!(*value, 5.0);
    }

    #[test]
    fn phase_column_is_accepted() {
        let csv = "scope,violin,player,criterion,phase,rating\ncontrol,Levaggi,p1,T,2,6\n";
        let t = RatingTable::from_reader(csv.as_bytes(), &instruments(), None).unwrap();
        assert_eq!(t.rows()[0].0.condition(), Some(2));
    }

    #[test]
    fn incomplete_subjects_are_dropped_from_multi_pair_differences() {
        let t = RatingTable::from_reader(CSV.as_bytes(), &instruments(), Some("blind")).unwrap();
        let pairs = [ConditionPair::new(1, 2), ConditionPair::new(1, 3)];
        let d = t.differences(&pairs);
        // p3 has no session 3
        assert_eq!(d.len(), 4);
        assert!(d.keys().all(|k| k.subject() != Some("p3")));
    }

    #[test]
    fn summary_over_subjects() {
        let t = RatingTable::from_reader(CSV.as_bytes(), &instruments(), Some("blind")).unwrap();
        let a = t.analyze(&[ConditionPair::new(1, 2), ConditionPair::new(1, 3)], ReduceOptions::default());
        let first = a.signed.iter().next().unwrap();
        assert_eq!(
            first.0.get(Dimension::Difference).unwrap().to_string(),
            "2-1"
        );
        // p1: +2, p2: -1
        assert_abs_diff_eq!(first.1.scalar().unwrap(), 0.5, epsilon = 1e-12);
        let abs = a.absolute.values().next().unwrap();
        assert_abs_diff_eq!(abs.scalar().unwrap(), 1.5, epsilon = 1e-12);
        assert_eq!(abs.count, vec![2]);
    }

    #[test]
    fn malformed_rating_is_an_error() {
        let csv = "scope,violin,player,criterion,session,rating\ncontrol,Klimke,p1,P,1,high\n";
        assert!(matches!(
            RatingTable::from_reader(csv.as_bytes(), &instruments(), None),
            Err(RatingsError::Csv(_))
        ));
    }
}
