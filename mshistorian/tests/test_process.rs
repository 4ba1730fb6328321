use std::{error::Error, fs, process::Command};

use assert_cmd::prelude::*;
use predicates::prelude::*;

mod common;

#[test]
fn test_help() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mshistorian")?;
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--data-root"))
        .stdout(predicate::str::contains("--notify"));
    Ok(())
}

#[test]
fn test_invalid_notify_mode() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mshistorian")?;
    cmd.args(["qeplus", "--notify", "carrier-pigeon"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid value 'carrier-pigeon'"));
    Ok(())
}

#[test]
fn test_config_file_missing() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mshistorian")?;
    cmd.args(["qeplus", "--config-file", "not_real.toml"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("ConfigurationError"));
    Ok(())
}

#[test]
fn test_no_instruments() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let mut cmd = Command::cargo_bin("mshistorian")?;
    cmd.arg("-d").arg(dir.path());
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("NoInstruments"));
    Ok(())
}

#[test]
fn test_missing_instrument_is_skipped() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    common::write_instrument(dir.path(), "qeplus")?;
    let mut cmd = Command::cargo_bin("mshistorian")?;
    cmd.env("RUST_LOG", "info");
    cmd.args(["qeplus", "qeclassic", "--notify", "none", "-d"])
        .arg(dir.path());
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("qeclassic has no directory"))
        .stderr(predicate::str::contains("Instruments: 2 (1 failed)"));
    assert!(dir.path().join("qeplus/web/timepoints.yaml").is_file());
    Ok(())
}

#[test]
fn test_run_instrument() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    common::write_instrument(dir.path(), "qeplus")?;
    fs::write(dir.path().join("instruments.txt"), "qeplus\n")?;
    let log_file = dir.path().join("logs").join("mshistorian.log");

    let mut cmd = Command::cargo_bin("mshistorian")?;
    cmd.env("RUST_LOG", "info");
    cmd.args(["--notify", "log", "-r", "qc@example.org", "-d"])
        .arg(dir.path())
        .arg("--log-file")
        .arg(&log_file);
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Warning: QC for QEPLUS"))
        .stderr(predicate::str::contains("Timepoints Considered: 6 | Outliers: 1"));

    let web_dir = dir.path().join("qeplus").join("web");
    for name in [
        "msms.logs.yaml",
        "psm.logs.yaml",
        "irt_peptides.logs.yaml",
        "timepoints.yaml",
        "load_charts.jsonp",
        "load_title.jsonp",
        "run.log",
    ] {
        assert!(web_dir.join(name).is_file(), "{name} was not written");
    }
    let charts = fs::read_to_string(web_dir.join("load_charts.jsonp"))?;
    assert!(charts.starts_with("load_charts(\n"));
    assert!(charts.contains("Digest Target PSMs"));
    let title = fs::read_to_string(web_dir.join("load_title.jsonp"))?;
    assert!(title.contains("Thermo QExactive Plus"));
    let run_log = fs::read_to_string(web_dir.join("run.log"))?;
    assert!(run_log.contains("Making chart data for qeplus"));
    let shared_log = fs::read_to_string(&log_file)?;
    assert!(shared_log.contains("Timepoints Considered: 6"));

    // Everything is already accumulated and considered
    let mut cmd = Command::cargo_bin("mshistorian")?;
    cmd.env("RUST_LOG", "info");
    cmd.args(["--notify", "log", "-d"]).arg(dir.path());
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("New Records: 0"))
        .stderr(predicate::str::contains("Timepoints Considered: 0 | Outliers: 0"))
        .stderr(predicate::str::contains("Warning: QC").not());
    Ok(())
}

#[test]
fn test_malformed_psms_do_not_block_instrument() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    common::write_instrument(dir.path(), "qeplus")?;
    common::write_malformed_psms(dir.path(), "qeplus")?;

    let mut cmd = Command::cargo_bin("mshistorian")?;
    cmd.env("RUST_LOG", "info");
    cmd.args(["qeplus", "--notify", "log", "-d"]).arg(dir.path());
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Skipping peptides of"))
        .stderr(predicate::str::contains("Failed to update").not())
        .stderr(predicate::str::contains("Timepoints Considered: 6 | Outliers: 1"));

    let web_dir = dir.path().join("qeplus").join("web");
    for name in [
        "timepoints.yaml",
        "irt_peptides.logs.yaml",
        "top_peptides.logs.yaml",
        "load_charts.jsonp",
    ] {
        assert!(web_dir.join(name).is_file(), "{name} was not written");
    }
    Ok(())
}
