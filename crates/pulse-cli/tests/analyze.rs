use assert_cmd::cargo::cargo_bin_cmd;
use serde::Deserialize;
use std::{error::Error, io::Write, path::PathBuf};

#[derive(Deserialize)]
struct Assessment {
    heart_rate_bpm: u32,
    rmssd_ms: u32,
    lf_ia: f64,
    hf_ia: f64,
    respiration_rate: serde_json::Value,
    stress_level: String,
    synthetic_rr: bool,
    duration_ms: u64,
}

#[derive(Deserialize)]
struct Point {
    #[serde(rename = "final")]
    is_final: bool,
    color: Option<u32>,
}

#[derive(Deserialize)]
struct Outcome {
    assessment: Assessment,
    scatter: Vec<Point>,
    ppg_samples: usize,
    stop_cause: String,
}

#[test]
fn analyze_steady_pulse_session() -> Result<(), Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("pulse");
    cmd.args([
        "analyze",
        "--ppg",
        &sample_path("test_data/ppg_72bpm.csv"),
        "--audio",
        &sample_path("test_data/breathing_audio.txt"),
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let out: Outcome = serde_json::from_slice(&output)?;

    assert_eq!(out.stop_cause, "auto_stop");
    assert_eq!(out.ppg_samples, 1050);
    assert_eq!(out.assessment.duration_ms, 35_000);
    assert!((67..=77).contains(&out.assessment.heart_rate_bpm));
    assert!(out.assessment.rmssd_ms <= 5);
    assert!(!out.assessment.synthetic_rr);
    assert_eq!(out.assessment.respiration_rate, serde_json::json!(15));
    assert!(out.assessment.lf_ia >= 5.0 && out.assessment.hf_ia >= 5.0);
    assert!(!out.assessment.stress_level.is_empty());

    let last = out.scatter.last().expect("final point");
    assert!(last.is_final);
    assert!(last.color.is_some());
    assert!(out.scatter[..out.scatter.len() - 1].iter().all(|p| !p.is_final));
    Ok(())
}

#[test]
fn analyze_without_pulse_falls_back() -> Result<(), Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("pulse");
    cmd.args([
        "analyze",
        "--ppg",
        &sample_path("test_data/ppg_flat.csv"),
        "--no-scatter",
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let out: Outcome = serde_json::from_slice(&output)?;

    assert!(out.assessment.synthetic_rr);
    assert_eq!(out.assessment.heart_rate_bpm, 70);
    assert_eq!(out.assessment.respiration_rate, serde_json::json!("--"));
    assert!(out.scatter.is_empty());
    Ok(())
}

#[test]
fn analyze_rejects_short_sessions() {
    let mut cmd = cargo_bin_cmd!("pulse");
    cmd.args([
        "analyze",
        "--ppg",
        &sample_path("test_data/ppg_72bpm.csv"),
        "--stop-at-ms",
        "20000",
    ]);
    cmd.assert().failure();
}

#[test]
fn config_file_overrides_minimum_duration() -> Result<(), Box<dyn Error>> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "[session]\nmin_duration_ms = 15000")?;

    let mut cmd = cargo_bin_cmd!("pulse");
    cmd.args([
        "--config",
        file.path().to_str().expect("utf8 path"),
        "analyze",
        "--ppg",
        &sample_path("test_data/ppg_72bpm.csv"),
        "--stop-at-ms",
        "20000",
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let out: Outcome = serde_json::from_slice(&output)?;
    assert_eq!(out.stop_cause, "requested");
    assert_eq!(out.assessment.duration_ms, 20_000);
    Ok(())
}

#[test]
fn swapped_config_range_is_refused() -> Result<(), Box<dyn Error>> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "[respiration]\nrate_range = [30, 6]")?;

    let mut cmd = cargo_bin_cmd!("pulse");
    cmd.args([
        "--config",
        file.path().to_str().expect("utf8 path"),
        "respiration",
        "--input",
        &sample_path("test_data/breathing_audio.txt"),
    ]);
    cmd.assert().failure();
    Ok(())
}

fn workspace_root() -> PathBuf {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .expect("crates dir")
        .parent()
        .expect("workspace root")
        .to_path_buf()
}

fn sample_path(relative: &str) -> String {
    workspace_root()
        .join(relative)
        .to_string_lossy()
        .to_string()
}
