use assert_cmd::cargo::cargo_bin_cmd;
use retrack_lib::output::{OutputFormat, TrackWriter};
use retrack_lib::Block;
use serde::Deserialize;
use std::error::Error;
use std::fs;
use std::path::Path;

#[derive(Deserialize)]
struct InfoSummary {
    channels: usize,
    samples: usize,
    sampling_frequency: Option<f64>,
}

#[derive(Deserialize)]
struct Outcome {
    report: Option<Report>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct Report {
    samples_out: usize,
    channels: usize,
}

fn write_recording(path: &Path, channels: usize, samples: usize) {
    let names: Vec<String> = (0..channels).map(|i| format!("ch{}", i + 1)).collect();
    let mut writer = TrackWriter::create(path, OutputFormat::Sef, &names, 125.0, 0).unwrap();
    let mut block = Block::zeros(channels, samples);
    for c in 0..channels {
        for t in 0..samples {
            block.set(c, t, (c + t) as f64);
        }
    }
    writer.write_block(&block).unwrap();
    writer.close().unwrap();
}

#[test]
fn info_prints_header_summary() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let rec = dir.path().join("rec.sef");
    write_recording(&rec, 4, 200);

    let mut cmd = cargo_bin_cmd!("retrack");
    cmd.args(["info", rec.to_str().expect("utf8 path")]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let summary: InfoSummary = serde_json::from_slice(&output)?;
    assert_eq!(summary.channels, 4);
    assert_eq!(summary.samples, 200);
    assert_eq!(summary.sampling_frequency, Some(125.0));
    Ok(())
}

#[test]
fn reprocess_runs_a_job_end_to_end() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let rec = dir.path().join("rec.sef");
    write_recording(&rec, 2, 400);
    let job = dir.path().join("job.toml");
    fs::write(
        &job,
        r#"
[reference]
policy = "average"

[output]
downsample = 4
format = "sef"
"#,
    )?;

    let mut cmd = cargo_bin_cmd!("retrack");
    cmd.args([
        "reprocess",
        "--job",
        job.to_str().expect("utf8 path"),
        "--out-dir",
        dir.path().to_str().expect("utf8 path"),
        rec.to_str().expect("utf8 path"),
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let line = output.split(|&b| b == b'\n').next().expect("one line");
    let outcome: Outcome = serde_json::from_slice(line)?;
    let report = outcome.report.expect("file succeeded");
    assert_eq!(report.samples_out, 100);
    assert_eq!(report.channels, 2);
    assert!(dir.path().join("rec.reproc.sef").is_file());
    assert!(dir.path().join("rec.reproc.sef.vrb").is_file());
    Ok(())
}

#[test]
fn reprocess_fails_when_every_input_fails() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let rec = dir.path().join("rec.sef");
    write_recording(&rec, 2, 100);
    let job = dir.path().join("job.toml");
    fs::write(
        &job,
        r#"
[time]
policy = "keep-triggers"
triggers = ["missing"]
"#,
    )?;

    let mut cmd = cargo_bin_cmd!("retrack");
    cmd.args([
        "reprocess",
        "--job",
        job.to_str().expect("utf8 path"),
        rec.to_str().expect("utf8 path"),
    ]);
    let output = cmd.assert().failure().get_output().stdout.clone();
    let line = output.split(|&b| b == b'\n').next().expect("one line");
    let outcome: Outcome = serde_json::from_slice(line)?;
    assert!(outcome.error.expect("failure recorded").contains("trigger"));
    Ok(())
}
