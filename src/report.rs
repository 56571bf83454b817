//! Orchestration: build and persist the dataset, then write the flat tables
//! an external renderer draws from.
//!
//! Every table is long-form CSV. Key columns come first, one per tag
//! dimension present in any key (in dimension order, blank where a key lacks
//! it), then `axis` for vector tables, then the statistics.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::{ExperimentConfig, ReportConfig};
use crate::data::assemble::assemble;
use crate::data::model::{Axis, ConditionPair, Dataset, Dimension, Tags};
use crate::data::source::DirectorySource;
use crate::data::store;
use crate::ratings::RatingTable;
use crate::stats::difference::{difference, Differences};
use crate::stats::reduce::{reduce, Averaging, ReduceOptions, Reductions};

/// Grouped reductions of one dataset and the differences for each pair.
#[derive(Debug, Clone)]
pub struct Tables {
    pub reductions: Reductions,
    pub differences: Vec<Differences>,
}

impl Tables {
    pub fn compute(
        dataset: &Dataset,
        group_by: &[Dimension],
        averaging: Averaging,
        pairs: &[ConditionPair],
        options: ReduceOptions,
    ) -> Tables {
        let reductions = reduce(dataset, group_by, averaging, options);
        let differences = pairs.iter().map(|&p| difference(&reductions, p)).collect();
        Tables {
            reductions,
            differences,
        }
    }

    /// Write `{prefix}reductions.csv` and `{prefix}differences.csv` into `dir`.
    pub fn write(&self, dir: &Path, prefix: &str, axis: &Axis) -> Result<()> {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        write_reductions(
            &dir.join(format!("{prefix}reductions.csv")),
            &self.reductions,
            Some(axis),
        )?;
        write_differences(
            &dir.join(format!("{prefix}differences.csv")),
            &self.differences,
            Some(axis),
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pipeline steps
// ---------------------------------------------------------------------------

/// Calibrate and assemble the raw tree, then persist the dataset.
pub fn process(config: &ExperimentConfig) -> Result<Dataset> {
    let layout = &config.layout;
    log::info!("Assembling records under {}", layout.raw_dir.display());
    let source = DirectorySource::new(&layout.raw_dir, &layout.record_kind);
    let dataset = assemble(&source, &config.design, &config.calibration)?;
    store::save(&dataset, &layout.dataset_path)
        .with_context(|| format!("saving dataset to {}", layout.dataset_path.display()))?;
    Ok(dataset)
}

/// Reduce the persisted dataset and write the report tables. Returns the
/// files written.
pub fn run(config: &ExperimentConfig) -> Result<Vec<PathBuf>> {
    let layout = &config.layout;
    let report = &config.report;
    let path = &layout.dataset_path;

    let dataset = match report.band {
        Some([lo, hi]) => store::load_range(path, lo, hi),
        None => store::load(path),
    }
    .with_context(|| format!("loading dataset {}", path.display()))?;
    let dataset = if report.normalize {
        dataset.normalized_by_mean()
    } else {
        dataset
    };

    let tables = Tables::compute(
        &dataset,
        &report.group_by,
        report.averaging,
        &report.pairs,
        options(report),
    );
    tables.write(&layout.report_dir, "", dataset.axis())?;
    let mut written = vec![
        layout.report_dir.join("reductions.csv"),
        layout.report_dir.join("differences.csv"),
    ];

    if let Some(ratings) = &config.ratings {
        let table = RatingTable::load(
            &ratings.path,
            &config.design.instruments,
            ratings.condition.as_deref(),
        )?;
        let analysis = table.analyze(&ratings.pairs, options(report));
        let dir = &layout.report_dir;
        let files = [
            dir.join("ratings_differences.csv"),
            dir.join("ratings_summary.csv"),
            dir.join("ratings_summary_abs.csv"),
        ];
        write_differences(&files[0], std::slice::from_ref(&analysis.differences), None)?;
        write_reductions(&files[1], &analysis.signed, None)?;
        write_reductions(&files[2], &analysis.absolute, None)?;
        written.extend(files);
    }

    for file in &written {
        log::info!("Wrote {}", file.display());
    }
    Ok(written)
}

/// Tables for motion-capture datasets, one pair of files per excerpt. The
/// descriptors are not magnitudes, so the mean is arithmetic.
pub fn write_mocap(config: &ExperimentConfig, sets: &[(String, Dataset)]) -> Result<()> {
    let group_by = [Dimension::Instrument, Dimension::Excerpt, Dimension::Condition];
    for (excerpt, dataset) in sets {
        let tables = Tables::compute(
            dataset,
            &group_by,
            Averaging::Arithmetic,
            &config.report.pairs,
            options(&config.report),
        );
        let prefix = format!("mocap_{}_{excerpt}_", config.mocap.descriptor);
        tables.write(&config.layout.report_dir, &prefix, dataset.axis())?;
    }
    Ok(())
}

fn options(report: &ReportConfig) -> ReduceOptions {
    ReduceOptions {
        envelope: report.envelope,
        confidence: report.confidence,
    }
}

// ---------------------------------------------------------------------------
// CSV sinks
// ---------------------------------------------------------------------------

fn key_columns<'a>(keys: impl Iterator<Item = &'a Tags>) -> Vec<Dimension> {
    let present: BTreeSet<Dimension> = keys.flat_map(|k| k.dimensions()).collect();
    present.into_iter().collect()
}

fn key_cells(key: &Tags, columns: &[Dimension]) -> Vec<String> {
    columns
        .iter()
        .map(|&d| key.get(d).map(|v| v.to_string()).unwrap_or_default())
        .collect()
}

fn cell(v: Option<f64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

/// Leading position cell of a row. With an axis this is the axis value.
/// Without one, vector tables carry the position index and tables whose
/// entries are all scalar carry no position column.
#[derive(Debug, Clone, Copy)]
enum Position<'a> {
    Axis(&'a Axis),
    Index,
    Absent,
}

impl<'a> Position<'a> {
    fn new(axis: Option<&'a Axis>, widest: usize) -> Self {
        match axis {
            Some(axis) => Position::Axis(axis),
            None if widest > 1 => Position::Index,
            None => Position::Absent,
        }
    }

    fn push_header(self, header: &mut Vec<&str>) {
        if !matches!(self, Position::Absent) {
            header.push("axis");
        }
    }

    fn push_cell(self, row: &mut Vec<String>, i: usize) {
        match self {
            Position::Axis(axis) => row.push(cell(axis.values().get(i).copied())),
            Position::Index => row.push(i.to_string()),
            Position::Absent => {}
        }
    }
}

/// One row per (group, axis position). Without `axis`, scalar tables have
/// one row per group and vector tables index positions from 0.
pub fn write_reductions(path: &Path, reductions: &Reductions, axis: Option<&Axis>) -> Result<()> {
    let columns = key_columns(reductions.keys());
    let widest = reductions.values().map(|r| r.width()).max().unwrap_or(0);
    let position = Position::new(axis, widest);
    let mut wtr =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;

    let mut header: Vec<&str> = columns.iter().map(|d| d.name()).collect();
    position.push_header(&mut header);
    header.extend([
        "center",
        "envelope_min",
        "envelope_max",
        "ci_lower",
        "ci_upper",
        "n",
    ]);
    wtr.write_record(&header)?;

    for (key, r) in reductions {
        let keys = key_cells(key, &columns);
        for i in 0..r.width() {
            let mut row = keys.clone();
            position.push_cell(&mut row, i);
            row.push(r.center[i].to_string());
            row.push(cell(r.envelope.as_ref().map(|e| e.min[i])));
            row.push(cell(r.envelope.as_ref().map(|e| e.max[i])));
            row.push(cell(r.interval.as_ref().map(|c| c.lower[i])));
            row.push(cell(r.interval.as_ref().map(|c| c.upper[i])));
            row.push(r.count[i].to_string());
            wtr.write_record(&row)?;
        }
    }
    wtr.flush()
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

pub fn write_differences(path: &Path, sets: &[Differences], axis: Option<&Axis>) -> Result<()> {
    let columns = key_columns(sets.iter().flat_map(|d| d.keys()));
    let widest = sets
        .iter()
        .flat_map(|d| d.iter())
        .map(|(_, values)| values.len())
        .max()
        .unwrap_or(0);
    let position = Position::new(axis, widest);
    let mut wtr =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;

    let mut header: Vec<&str> = columns.iter().map(|d| d.name()).collect();
    position.push_header(&mut header);
    header.extend(["difference", "difference_abs"]);
    wtr.write_record(&header)?;

    for (key, values) in sets.iter().flat_map(|d| d.iter()) {
        let keys = key_cells(key, &columns);
        for (i, v) in values.iter().enumerate() {
            let mut row = keys.clone();
            position.push_cell(&mut row, i);
            row.push(v.to_string());
            row.push(v.abs().to_string());
            wtr.write_record(&row)?;
        }
    }
    wtr.flush()
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
