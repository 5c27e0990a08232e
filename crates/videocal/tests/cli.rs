use assert_cmd::Command;
use image::RgbImage;
use predicates::prelude::*;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn videocal() -> Command {
    let mut cmd = Command::cargo_bin("videocal").expect("videocal binary");
    cmd.timeout(Duration::from_secs(60));
    cmd
}

fn write_config(dir: &Path, value: serde_json::Value) -> PathBuf {
    let path = dir.join("config.json");
    std::fs::write(&path, value.to_string()).unwrap();
    path
}

/// A few small blank frames: nothing to detect, but a valid source.
fn blank_frames(dir: &Path) -> PathBuf {
    let frames = dir.join("frames");
    std::fs::create_dir(&frames).unwrap();
    for k in 0..3 {
        RgbImage::from_pixel(96, 72, image::Rgb([128, 128, 128]))
            .save(frames.join(format!("{k}.png")))
            .unwrap();
    }
    frames
}

#[test]
fn missing_config_is_a_usage_error() {
    videocal().arg("calibrate").assert().code(2);
    videocal()
        .args(["check", "-d", "."])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--config"));
}

#[test]
fn check_requires_a_calibration_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), json!({}));
    videocal()
        .arg("check")
        .arg("-c")
        .arg(&config)
        .assert()
        .code(2);
}

#[test]
fn unsupported_method_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), json!({"method": "aruco"}));
    let frames = blank_frames(tmp.path());
    videocal()
        .arg("calibrate")
        .arg("-c")
        .arg(&config)
        .arg("-s")
        .arg(&frames)
        .arg("-n")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("only chessboard"));
}

#[test]
fn unknown_source_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), json!({}));
    videocal()
        .args(["calibrate", "-n", "-s", "no/such/video.avi", "-c"])
        .arg(&config)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid video source"));
}

#[test]
fn camera_index_without_backend_fails_to_open() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), json!({}));
    videocal()
        .args(["calibrate", "-n", "-c"])
        .arg(&config)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed to open video source"));
}

#[test]
fn batch_calibration_over_blank_frames_completes() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), json!({"corners": [9, 6], "sample frequency": 1}));
    let frames = blank_frames(tmp.path());
    let out = tmp.path().join("out");
    videocal()
        .arg("calibrate")
        .arg("-c")
        .arg(&config)
        .arg("-s")
        .arg(&frames)
        .arg("-o")
        .arg(&out)
        .arg("--noninteractive")
        .assert()
        .success();
    // Nothing detected, so nothing solved or written.
    assert!(!out.join("intrinsics.txt").exists());
}

#[test]
fn check_rejects_missing_calibration_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), json!({}));
    let frames = blank_frames(tmp.path());
    videocal()
        .arg("check")
        .arg("-c")
        .arg(&config)
        .arg("-s")
        .arg(&frames)
        .arg("-d")
        .arg(tmp.path().join("missing"))
        .arg("-n")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("calibration dir"));
}

#[test]
fn batch_check_over_blank_frames_completes() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), json!({"corners": [9, 6]}));
    let frames = blank_frames(tmp.path());
    let calib = tmp.path().join("calib");
    std::fs::create_dir(&calib).unwrap();
    videocal()
        .arg("check")
        .arg("-c")
        .arg(&config)
        .arg("-s")
        .arg(&frames)
        .arg("-d")
        .arg(&calib)
        .arg("-n")
        .assert()
        .success();
}

#[test]
fn interactive_session_quits_on_q() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), json!({"corners": [9, 6]}));
    let frames = blank_frames(tmp.path());
    let preview = tmp.path().join("preview.png");
    videocal()
        .arg("calibrate")
        .arg("-c")
        .arg(&config)
        .arg("-s")
        .arg(&frames)
        .arg("--preview")
        .arg(&preview)
        .write_stdin("q\n")
        .assert()
        .success();
}
