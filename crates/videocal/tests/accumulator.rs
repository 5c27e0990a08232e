mod support;

use support::{
    board, project_view, render_view, rendered_source, synthetic_source, truth_camera,
    view_poses, RecordingSolver, ScriptedDetector,
};
use videocal::{
    parse_matrix, BatchController, CalibrationConfig, CalibrationDriver, ConfigError, DriverError,
    FrameReport, OutputLocation, PersistError, PointDetection,
};

fn config(min_views: i64) -> CalibrationConfig {
    CalibrationConfig {
        corners: vec![14, 10],
        square_size_mm: 10.0,
        minimum_number_of_views: min_views,
        ..CalibrationConfig::default()
    }
}

fn some_view() -> PointDetection {
    project_view(&truth_camera(), &view_poses()[0], &board(14, 10, 10.0))
}

#[test]
fn solves_at_threshold_and_on_every_later_view() {
    let solver = RecordingSolver::default();
    let calls = solver.calls.clone();
    let mut driver = CalibrationDriver::new(&config(5), synthetic_source(6), None)
        .unwrap()
        .with_detector(ScriptedDetector::repeating(some_view(), 6))
        .with_solver(solver);

    for frame in 0..4 {
        assert!(driver.grab_frame().is_some());
        let outcome = driver.extract_points().unwrap();
        assert_eq!(outcome.num_points, 140, "frame {frame}");
        assert!(outcome.reports.is_empty());
    }
    assert!(calls.borrow().is_empty());

    driver.grab_frame().unwrap();
    let fifth = driver.extract_points().unwrap();
    assert_eq!(*calls.borrow(), vec![5]);
    assert_eq!(
        fifth.reports,
        vec![FrameReport::Calibrated {
            views: 5,
            rms: 0.25
        }]
    );

    driver.grab_frame().unwrap();
    driver.extract_points().unwrap();
    assert_eq!(*calls.borrow(), vec![5, 6]);
    assert_eq!(driver.accumulator().solve_count(), 2);
    let latest = driver.accumulator().latest_result().unwrap();
    assert_eq!(latest.num_views(), 6);
    assert!(latest.rms >= 0.0);
}

#[test]
fn calibrates_from_rendered_chessboard_frames() {
    let camera = truth_camera();
    let frames = view_poses()
        .iter()
        .map(|pose| render_view(&camera, pose, 14, 10, 10.0))
        .collect();
    let mut driver = CalibrationDriver::new(&config(6), rendered_source(frames), None).unwrap();

    let mut counts = Vec::new();
    while driver.grab_frame().is_some() {
        counts.push(driver.extract_points().unwrap().num_points);
    }
    assert_eq!(counts, vec![140; 6]);

    let result = driver.accumulator().latest_result().expect("calibration");
    assert_eq!(result.num_views(), 6);
    assert!(result.rms < 0.5, "rms {}", result.rms);
    let k = result.camera.intrinsics;
    assert!((k.fx - 820.0).abs() < 12.0, "fx {}", k.fx);
    assert!((k.fy - 810.0).abs() < 12.0, "fy {}", k.fy);
    assert!((k.cx - 330.0).abs() < 15.0, "cx {}", k.cx);
    assert!((k.cy - 245.0).abs() < 15.0, "cy {}", k.cy);
}

#[test]
fn frames_without_points_add_no_views() {
    let solver = RecordingSolver::default();
    let calls = solver.calls.clone();
    let script = vec![Some(some_view()), None, Some(PointDetection::default()), Some(some_view())];
    let mut driver = CalibrationDriver::new(&config(2), synthetic_source(4), None)
        .unwrap()
        .with_detector(ScriptedDetector::new(script))
        .with_solver(solver);

    let mut counts = Vec::new();
    while driver.grab_frame().is_some() {
        let outcome = driver.extract_points().unwrap();
        assert_eq!(outcome.num_points > 0, outcome.annotated.is_some());
        counts.push(outcome.num_points);
    }
    assert_eq!(counts, vec![140, 0, 0, 140]);
    assert_eq!(driver.accumulator().num_views(), 2);
    assert_eq!(*calls.borrow(), vec![2]);

    let indices: Vec<usize> = driver.accumulator().views().map(|v| v.index).collect();
    assert_eq!(indices, vec![0, 1]);
    assert!(driver.accumulator().views().all(|v| v.frame.is_none()));
}

#[test]
fn unsupported_method_fails_whatever_else_is_set() {
    let cfg = CalibrationConfig {
        method: "aruco".into(),
        corners: vec![1],
        square_size_mm: -3.0,
        minimum_number_of_views: 0,
        ..CalibrationConfig::default()
    };
    let err = CalibrationDriver::new(&cfg, synthetic_source(1), None).unwrap_err();
    assert!(matches!(
        err,
        DriverError::Config(ConfigError::UnsupportedMethod(ref m)) if m == "aruco"
    ));
}

#[test]
fn end_to_end_writes_calibration_files() {
    let tmp = tempfile::tempdir().unwrap();
    let out_dir = tmp.path().join("calib").join("run1");
    let camera = truth_camera();
    let object = board(14, 10, 10.0);
    let script: Vec<_> = view_poses()
        .iter()
        .map(|pose| Some(project_view(&camera, pose, &object)))
        .collect();

    let output = OutputLocation::new(Some(out_dir.clone()), None);
    let driver = CalibrationDriver::new(&config(5), synthetic_source(6), output)
        .unwrap()
        .with_detector(ScriptedDetector::new(script));
    let mut batch = BatchController::new(driver);
    let summary = batch.run().unwrap();
    assert_eq!(summary.frames_grabbed, 6);
    assert_eq!(summary.frames_with_points, 6);

    let k = std::fs::read_to_string(out_dir.join("intrinsics.txt")).unwrap();
    let k = parse_matrix(&k).unwrap();
    assert_eq!(k.shape(), (3, 3));
    for i in 0..3 {
        assert!(k[(i, i)] > 0.0);
    }
    assert!((k[(0, 0)] - 820.0).abs() < 1.0, "fx {}", k[(0, 0)]);
    assert!((k[(1, 1)] - 810.0).abs() < 1.0, "fy {}", k[(1, 1)]);

    let d = std::fs::read_to_string(out_dir.join("distortion.txt")).unwrap();
    let d = parse_matrix(&d).unwrap();
    assert_eq!(d.shape(), (1, 5));

    for stem in ["handeye.txt", "pattern2marker.txt"] {
        assert!(out_dir.join(stem).is_file(), "{stem}");
    }
    for i in 0..6 {
        for stem in ["extrinsics", "ids", "image_points", "object_points"] {
            assert!(out_dir.join(format!("{stem}.{i}.txt")).is_file(), "{stem}.{i}");
        }
        assert!(out_dir.join(format!("images.{i}.png")).is_file());
    }
    let pts = parse_matrix(&std::fs::read_to_string(out_dir.join("object_points.5.txt")).unwrap())
        .unwrap();
    assert_eq!(pts.shape(), (140, 3));
}

#[test]
fn prefix_is_prepended_to_every_file() {
    let tmp = tempfile::tempdir().unwrap();
    let output = OutputLocation::new(Some(tmp.path().to_path_buf()), Some("left".into()));
    let mut driver = CalibrationDriver::new(&config(1), synthetic_source(1), output)
        .unwrap()
        .with_detector(ScriptedDetector::repeating(some_view(), 1))
        .with_solver(RecordingSolver::default());

    driver.grab_frame().unwrap();
    driver.extract_points().unwrap();

    for name in [
        "left.intrinsics.txt",
        "left.distortion.txt",
        "left.handeye.txt",
        "left.pattern2marker.txt",
        "left.extrinsics.0.txt",
        "left.ids.0.txt",
        "left.image_points.0.txt",
        "left.object_points.0.txt",
        "left.images.0.png",
    ] {
        assert!(tmp.path().join(name).is_file(), "{name}");
    }
    assert!(!tmp.path().join("intrinsics.txt").exists());
}

#[test]
fn persistence_failure_propagates() {
    let tmp = tempfile::tempdir().unwrap();
    let blocker = tmp.path().join("not_a_dir");
    std::fs::write(&blocker, "occupied").unwrap();

    let output = OutputLocation::new(Some(blocker), None);
    let mut driver = CalibrationDriver::new(&config(1), synthetic_source(1), output)
        .unwrap()
        .with_detector(ScriptedDetector::repeating(some_view(), 1))
        .with_solver(RecordingSolver::default());

    driver.grab_frame().unwrap();
    let err = driver.extract_points().unwrap_err();
    assert!(matches!(
        err,
        DriverError::Persist(PersistError::CreateDir { .. })
    ));
}
