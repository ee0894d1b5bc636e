//! Pipeline execution against stand-in engines.
//!
//! `sh -c <script> pdal <pipeline-file>` plays the role of `pdal pipeline
//! <pipeline-file>`: the script sees the pipeline file as `$1`.

#![cfg(unix)]

use lidarhd_pdal::{
    build_pipeline, ClassSelector, ExecutionOutcome, Operation, PdalEngine, ProcessingPipelineSpec,
    Stage,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn shell_engine(script: &str, scratch: &Path) -> PdalEngine {
    PdalEngine::new("sh")
        .with_args(["-c", script, "pdal"])
        .with_scratch_dir(scratch)
}

fn filtered_spec() -> ProcessingPipelineSpec {
    build_pipeline(
        Path::new("/data/LHD_FXX_0600_6800.copc.laz"),
        Path::new("/data"),
        &ClassSelector::explicit([2, 3]).unwrap(),
        1.0,
    )
}

fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir).unwrap().next().is_none()
}

#[test]
fn test_engine_receives_stages_in_order() {
    let scratch = tempfile::tempdir().unwrap();
    let capture = tempfile::tempdir().unwrap();
    let captured = capture.path().join("pipeline.json");
    let recorded_path = capture.path().join("path.txt");
    let script = format!(
        "cp \"$1\" '{}' && printf '%s' \"$1\" > '{}'",
        captured.display(),
        recorded_path.display()
    );

    let spec = filtered_spec();
    let outcome = shell_engine(&script, scratch.path()).execute(&spec);
    assert_eq!(outcome, ExecutionOutcome::Succeeded);

    let consumed = ProcessingPipelineSpec::from_json(&fs::read_to_string(&captured).unwrap()).unwrap();
    assert_eq!(consumed, spec);
    assert!(matches!(consumed.stages()[0], Stage::Input(_)));
    assert!(matches!(
        consumed.stages()[1],
        Stage::Operation(Operation::Expression { .. })
    ));
    assert!(matches!(
        consumed.stages()[2],
        Stage::Operation(Operation::GdalWriter(_))
    ));

    let transient = PathBuf::from(fs::read_to_string(&recorded_path).unwrap());
    assert!(transient.starts_with(scratch.path()));
    assert!(!transient.exists());
    assert!(is_empty_dir(scratch.path()));
}

#[test]
fn test_engine_failure_reports_stderr_and_cleans_up() {
    let scratch = tempfile::tempdir().unwrap();
    let engine = shell_engine("echo 'PDAL: readers.las: Invalid LAS header' >&2; exit 3", scratch.path());

    let outcome = engine.execute(&filtered_spec());

    match outcome {
        ExecutionOutcome::Failed { reason } => {
            assert!(reason.contains("Invalid LAS header"), "{}", reason);
        }
        ExecutionOutcome::Succeeded => panic!("non-zero exit must fail"),
    }
    assert!(is_empty_dir(scratch.path()));
}

#[test]
fn test_run_returns_engine_error() {
    let scratch = tempfile::tempdir().unwrap();
    let engine = shell_engine("exit 1", scratch.path());
    let err = engine.run(&filtered_spec()).unwrap_err();
    assert!(matches!(err, lidarhd_pdal::PdalError::EngineFailed { .. }));
    assert!(is_empty_dir(scratch.path()));
}

#[test]
fn test_timeout_kills_engine() {
    let scratch = tempfile::tempdir().unwrap();
    let engine = shell_engine("sleep 10", scratch.path()).with_timeout(Some(Duration::from_millis(200)));

    let outcome = engine.execute(&filtered_spec());

    match outcome {
        ExecutionOutcome::Failed { reason } => assert!(reason.contains("timed out"), "{}", reason),
        ExecutionOutcome::Succeeded => panic!("timed out run must fail"),
    }
    assert!(is_empty_dir(scratch.path()));
}

#[test]
fn test_timeout_not_reached() {
    let scratch = tempfile::tempdir().unwrap();
    let engine = shell_engine("test -s \"$1\"", scratch.path()).with_timeout(Some(Duration::from_secs(30)));
    assert!(engine.execute(&filtered_spec()).is_success());
    assert!(is_empty_dir(scratch.path()));
}

#[test]
fn test_concurrent_executions_use_distinct_files() {
    let scratch = tempfile::tempdir().unwrap();
    let capture = tempfile::tempdir().unwrap();
    let log = capture.path().join("paths.txt");
    let script = format!("echo \"$1\" >> '{}'; sleep 0.2", log.display());
    let engine = shell_engine(&script, scratch.path());

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| assert!(engine.execute(&filtered_spec()).is_success()));
        }
    });

    let contents = fs::read_to_string(&log).unwrap();
    let mut paths: Vec<&str> = contents.lines().collect();
    assert_eq!(paths.len(), 4);
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 4);
    assert!(is_empty_dir(scratch.path()));
}
