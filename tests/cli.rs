use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn write_config(dir: &Path, raw: &Path) -> std::path::PathBuf {
    let config = dir.join("phasediff.toml");
    let text = format!(
        r#"
[calibration]
sample_rate = 1000
transform_length = 16
force_sensitivity = 1.0
velocity_sensitivity = 1.0

[design]
instruments = ["klimke", "stoppani"]
conditions = [1, 2]

[layout]
raw_dir = "{raw}"
dataset_path = "{data}"
report_dir = "{reports}"

[report]
band = [100.0, 400.0]
averaging = "decibel-mean"
"#,
        raw = raw.display(),
        data = dir.join("processed/admittances.parquet").display(),
        reports = dir.join("tables").display(),
    );
    fs::write(&config, text).unwrap();
    config
}

fn write_record(raw: &Path, instrument: &str, condition: u32, trial: u32, magnitude: f64) {
    let dir = raw
        .join(format!("phase_{condition}"))
        .join(instrument)
        .join("admittances");
    fs::create_dir_all(&dir).unwrap();
    let bins = 9;
    let record = serde_json::json!({
        "sample_rate": 1000,
        "transform_length": 16,
        "excitation": vec![1.0; bins],
        "response": vec![[magnitude, 0.0]; bins],
    });
    fs::write(
        dir.join(format!("{instrument}_{trial}.json")),
        record.to_string(),
    )
    .unwrap();
}

#[test]
fn empty_raw_tree_fails() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw");
    fs::create_dir_all(&raw).unwrap();
    let config = write_config(dir.path(), &raw);

    Command::cargo_bin("phasediff")
        .unwrap()
        .args(["--process", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no observations"));
}

#[test]
fn process_then_report_writes_tables() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw");
    for inst in ["klimke", "stoppani"] {
        for trial in 1..=2 {
            write_record(&raw, inst, 1, trial, 1.0);
            write_record(&raw, inst, 2, trial, 10.0);
        }
    }
    // unreadable record is skipped, not fatal
    fs::write(
        raw.join("phase_1/klimke/admittances/zz_broken.json"),
        "{ not json",
    )
    .unwrap();
    let config = write_config(dir.path(), &raw);

    Command::cargo_bin("phasediff")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .assert()
        .success();

    assert!(dir.path().join("processed/admittances.parquet").exists());
    let reductions = fs::read_to_string(dir.path().join("tables/reductions.csv")).unwrap();
    assert!(reductions.starts_with("instrument,condition,axis,center"));
    // band 100..=400 Hz on a 62.5 Hz grid: 125, 187.5, 250, 312.5, 375
    assert_eq!(reductions.lines().count(), 1 + 4 * 5);

    let differences = fs::read_to_string(dir.path().join("tables/differences.csv")).unwrap();
    let first = differences.lines().nth(1).unwrap();
    assert!(first.starts_with("klimke,2-1,125,20"));
}
