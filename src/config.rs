use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::model::{ConditionPair, Dimension};
use crate::mocap::Descriptor;
use crate::stats::reduce::Averaging;

// ---------------------------------------------------------------------------
// Calibration constants of the acquisition chain
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationConfig {
    /// Expected acquisition sample rate (Hz).
    #[serde(default = "CalibrationConfig::default_sample_rate")]
    pub sample_rate: u32,
    /// Expected transform length (points).
    #[serde(default = "CalibrationConfig::default_transform_length")]
    pub transform_length: u32,
    /// Impact hammer: N per raw unit.
    #[serde(default = "CalibrationConfig::default_force_sensitivity")]
    pub force_sensitivity: f64,
    /// Vibrometer: mm/s per raw unit.
    #[serde(default = "CalibrationConfig::default_velocity_sensitivity")]
    pub velocity_sensitivity: f64,
}

impl CalibrationConfig {
    fn default_sample_rate() -> u32 {
        51_200
    }
    fn default_transform_length() -> u32 {
        32_768
    }
    fn default_force_sensitivity() -> f64 {
        1.0 / (20.41 / 1000.0)
    }
    fn default_velocity_sensitivity() -> f64 {
        125.0 / 1000.0
    }

    /// Number of points every calibrated spectrum carries.
    pub fn bins(&self) -> usize {
        self.transform_length as usize / 2 + 1
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            sample_rate: Self::default_sample_rate(),
            transform_length: Self::default_transform_length(),
            force_sensitivity: Self::default_force_sensitivity(),
            velocity_sensitivity: Self::default_velocity_sensitivity(),
        }
    }
}

// ---------------------------------------------------------------------------
// Experimental design: the closed instrument and condition sets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DesignConfig {
    /// Instruments in report order.
    #[serde(default = "DesignConfig::default_instruments")]
    pub instruments: Vec<String>,
    /// Condition levels, strictly ascending. Levels are ordinal, so reports
    /// order them by value.
    #[serde(default = "DesignConfig::default_conditions")]
    pub conditions: Vec<u32>,
}

impl DesignConfig {
    fn default_instruments() -> Vec<String> {
        vec!["klimke".into(), "levaggi".into(), "stoppani".into()]
    }
    fn default_conditions() -> Vec<u32> {
        vec![1, 2]
    }
}

impl Default for DesignConfig {
    fn default() -> Self {
        Self {
            instruments: Self::default_instruments(),
            conditions: Self::default_conditions(),
        }
    }
}

// ---------------------------------------------------------------------------
// Filesystem layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayoutConfig {
    /// Root of `phase_<n>/<instrument>/<record_kind>/*.json`.
    #[serde(default = "LayoutConfig::default_raw_dir")]
    pub raw_dir: PathBuf,
    #[serde(default = "LayoutConfig::default_record_kind")]
    pub record_kind: String,
    #[serde(default = "LayoutConfig::default_dataset_path")]
    pub dataset_path: PathBuf,
    #[serde(default = "LayoutConfig::default_report_dir")]
    pub report_dir: PathBuf,
}

impl LayoutConfig {
    fn default_raw_dir() -> PathBuf {
        PathBuf::from("data/raw")
    }
    fn default_record_kind() -> String {
        "admittances".into()
    }
    fn default_dataset_path() -> PathBuf {
        PathBuf::from("data/processed/admittances.parquet")
    }
    fn default_report_dir() -> PathBuf {
        PathBuf::from("reports/tables")
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            raw_dir: Self::default_raw_dir(),
            record_kind: Self::default_record_kind(),
            dataset_path: Self::default_dataset_path(),
            report_dir: Self::default_report_dir(),
        }
    }
}

// ---------------------------------------------------------------------------
// Report tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportConfig {
    /// Axis band `[lo, hi]` read from the dataset; whole axis when absent.
    #[serde(default = "ReportConfig::default_band")]
    pub band: Option<[f64; 2]>,
    #[serde(default = "ReportConfig::default_averaging")]
    pub averaging: Averaging,
    #[serde(default = "ReportConfig::default_group_by")]
    pub group_by: Vec<Dimension>,
    #[serde(default = "ReportConfig::default_pairs")]
    pub pairs: Vec<ConditionPair>,
    #[serde(default = "ReportConfig::default_true")]
    pub envelope: bool,
    #[serde(default = "ReportConfig::default_true")]
    pub confidence: bool,
    /// Divide each measurement by its own mean before reducing.
    #[serde(default)]
    pub normalize: bool,
}

impl ReportConfig {
    fn default_band() -> Option<[f64; 2]> {
        Some([180.0, 5000.0])
    }
    fn default_averaging() -> Averaging {
        Averaging::RmsDecibel
    }
    fn default_group_by() -> Vec<Dimension> {
        vec![Dimension::Instrument, Dimension::Condition]
    }
    fn default_pairs() -> Vec<ConditionPair> {
        vec![ConditionPair::new(1, 2)]
    }
    fn default_true() -> bool {
        true
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            band: Self::default_band(),
            averaging: Self::default_averaging(),
            group_by: Self::default_group_by(),
            pairs: Self::default_pairs(),
            envelope: true,
            confidence: true,
            normalize: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Listening / playing ratings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatingsConfig {
    pub path: PathBuf,
    #[serde(default = "RatingsConfig::default_pairs")]
    pub pairs: Vec<ConditionPair>,
    /// Keep only rows whose `condition` column equals this (e.g. `blind`).
    #[serde(default)]
    pub condition: Option<String>,
}

impl RatingsConfig {
    fn default_pairs() -> Vec<ConditionPair> {
        vec![ConditionPair::new(1, 2)]
    }
}

// ---------------------------------------------------------------------------
// Motion-capture takes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MocapConfig {
    #[serde(default = "MocapConfig::default_descriptor")]
    pub descriptor: Descriptor,
    /// Capture rate (frames per second).
    #[serde(default = "MocapConfig::default_frame_rate")]
    pub frame_rate: f64,
    /// Excerpts in report order.
    #[serde(default = "MocapConfig::default_excerpts")]
    pub excerpts: Vec<String>,
    /// Take identities never admitted.
    #[serde(default = "MocapConfig::default_excluded")]
    pub excluded: Vec<String>,
    /// Open frame window `(start, end)` per excerpt; excerpts without one keep
    /// every frame after 0.
    #[serde(default = "MocapConfig::default_windows")]
    pub windows: BTreeMap<String, [f64; 2]>,
}

impl MocapConfig {
    fn default_descriptor() -> Descriptor {
        Descriptor::Skewness
    }
    fn default_frame_rate() -> f64 {
        120.0
    }
    fn default_excerpts() -> Vec<String> {
        ["open_strings", "bach", "tchaikovsky", "glazounov"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
    fn default_excluded() -> Vec<String> {
        [
            "own_P1_open_strings_1.csv",
            "own_P1_glazounov_1.csv",
            "stoppani_P1_tchaikovsky_3.csv",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
    fn default_windows() -> BTreeMap<String, [f64; 2]> {
        BTreeMap::from([
            ("open_strings".to_string(), [170.0, 3000.0]),
            ("bach".to_string(), [100.0, 850.0]),
            ("tchaikovsky".to_string(), [100.0, 1860.0]),
            ("glazounov".to_string(), [170.0, 2600.0]),
        ])
    }
}

impl Default for MocapConfig {
    fn default() -> Self {
        Self {
            descriptor: Self::default_descriptor(),
            frame_rate: Self::default_frame_rate(),
            excerpts: Self::default_excerpts(),
            excluded: Self::default_excluded(),
            windows: Self::default_windows(),
        }
    }
}

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub design: DesignConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub ratings: Option<RatingsConfig>,
    #[serde(default)]
    pub mocap: MocapConfig,
}

impl ExperimentConfig {
    /// Read a TOML config, or fall back to defaults when `path` does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: ExperimentConfig =
            toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.design.instruments.is_empty() {
            bail!("design.instruments must list at least one instrument");
        }
        if self.design.conditions.is_empty() {
            bail!("design.conditions must list at least one condition");
        }
        if let Some(w) = self.design.conditions.windows(2).find(|w| w[0] >= w[1]) {
            bail!(
                "design.conditions must be strictly ascending, found {} before {}",
                w[0],
                w[1]
            );
        }
        if self.calibration.transform_length == 0 {
            bail!("calibration.transform_length must be positive");
        }
        if let Some([lo, hi]) = self.report.band {
            if lo > hi {
                bail!("report.band lower bound {lo} exceeds upper bound {hi}");
            }
        }
        for pair in &self.report.pairs {
            for level in [pair.baseline, pair.compared] {
                if !self.design.conditions.contains(&level) {
                    bail!("report pair {pair} names undeclared condition {level}");
                }
            }
        }
        if let Some(ratings) = &self.ratings {
            if ratings.pairs.is_empty() {
                bail!("ratings.pairs must list at least one pair");
            }
        }
        if self.mocap.frame_rate <= 0.0 {
            bail!("mocap.frame_rate must be positive");
        }
        Ok(())
    }
}
