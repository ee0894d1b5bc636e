//! End-to-end runs with shapefile fixtures, a fake fetcher and `sh` standing in for PDAL.

#![cfg(unix)]

use lidarhd_pdal::{ExecutionOutcome, ProcessingPipelineSpec};
use lidarhd_runner::{run_with_fetcher, ClassToken, RunConfig, RunError, RunRequest};
use lidarhd_tiles::{Fetch, FetchResponse, ProgressCallback};
use shapefile::dbase::{FieldName, FieldValue, Record, TableWriterBuilder};
use shapefile::{Point, Polygon, PolygonRing};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const TILE_A: &str = "https://example.org/lidar/LHD_FXX_0600_6801.copc.laz";
const TILE_B: &str = "https://example.org/lidar/LHD_FXX_0601_6801.copc.laz";
const TILE_C: &str = "https://example.org/lidar/LHD_FXX_0605_6801.copc.laz";

fn square(x: f64, y: f64, size: f64) -> Polygon {
    Polygon::new(PolygonRing::Outer(vec![
        Point::new(x, y),
        Point::new(x, y + size),
        Point::new(x + size, y + size),
        Point::new(x + size, y),
        Point::new(x, y),
    ]))
}

fn write_shapefile(path: &Path, polygons: &[(Polygon, &str)]) {
    let table = TableWriterBuilder::new()
        .add_character_field(FieldName::try_from("url_telech").unwrap(), 254);
    let mut writer = shapefile::Writer::from_path(path, table).unwrap();
    for (polygon, url) in polygons {
        let mut record = Record::default();
        record.insert(
            "url_telech".to_string(),
            FieldValue::Character(Some(url.to_string())),
        );
        writer.write_shape_and_record(polygon, &record).unwrap();
    }
}

/// Catalog with tiles A and B side by side and C far to the east; the region
/// straddles A and B.
struct Fixture {
    dir: tempfile::TempDir,
    catalog: PathBuf,
    region: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let catalog = dir.path().join("catalog.shp");
        write_shapefile(
            &catalog,
            &[
                (square(600_000.0, 6_800_000.0, 1000.0), TILE_A),
                (square(601_000.0, 6_800_000.0, 1000.0), TILE_B),
                (square(605_000.0, 6_800_000.0, 1000.0), TILE_C),
            ],
        );
        let region = dir.path().join("region.shp");
        write_shapefile(&region, &[(square(600_800.0, 6_800_400.0, 400.0), "")]);
        Self {
            dir,
            catalog,
            region,
        }
    }

    fn output_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    fn request(&self, rasterize: bool) -> RunRequest {
        RunRequest {
            region: self.region.clone(),
            output_dir: self.output_dir(),
            rasterize,
        }
    }

    /// Config whose engine copies each pipeline file into `capture`.
    fn config(&self, capture: &Path) -> RunConfig {
        self.config_with_script(&format!(
            "cp \"$1\" '{}'/\"$(basename \"$1\")\"",
            capture.display()
        ))
    }

    fn config_with_script(&self, script: &str) -> RunConfig {
        RunConfig {
            catalog: self.catalog.clone(),
            pdal_program: PathBuf::from("sh"),
            pdal_args: vec!["-c".to_string(), script.to_string(), "pdal".to_string()],
            ..RunConfig::default()
        }
    }
}

/// Serves a small payload for the listed URLs and 404 for everything else.
struct FakeFetcher {
    available: Vec<&'static str>,
    requests: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl FakeFetcher {
    fn serving(available: &[&'static str]) -> Self {
        Self {
            available: available.to_vec(),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }
}

impl Fetch for &FakeFetcher {
    fn fetch(&self, url: &str) -> lidarhd_tiles::Result<FetchResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(url.to_string());
        let status = if self.available.iter().any(|a| *a == url) { 200 } else { 404 };
        let body = if status == 200 {
            b"LASF point data".to_vec()
        } else {
            Vec::new()
        };
        Ok(FetchResponse { status, body })
    }
}

fn captured_pipelines(capture: &Path) -> Vec<ProcessingPipelineSpec> {
    fs::read_dir(capture)
        .unwrap()
        .map(|entry| {
            let text = fs::read_to_string(entry.unwrap().path()).unwrap();
            ProcessingPipelineSpec::from_json(&text).unwrap()
        })
        .collect()
}

#[test]
fn test_failed_download_is_skipped_and_rest_rasterized() {
    let fixture = Fixture::new();
    let capture = tempfile::tempdir().unwrap();
    let fetcher = FakeFetcher::serving(&[TILE_A]);

    let summary = run_with_fetcher(
        &fixture.request(true),
        &fixture.config(capture.path()),
        &fetcher,
        None,
    )
    .unwrap();

    assert_eq!(summary.matched, 2);
    let mut requested = fetcher.requests.lock().unwrap().clone();
    requested.sort();
    assert_eq!(requested, vec![TILE_A.to_string(), TILE_B.to_string()]);

    assert_eq!(summary.downloaded_files(), vec!["LHD_FXX_0600_6801.copc.laz".to_string()]);
    assert_eq!(summary.downloads.failed(), 1);
    assert_eq!(summary.stats.files_downloaded, 1);
    let out = fixture.output_dir();
    assert!(out.join("LHD_FXX_0600_6801.copc.laz").exists());
    assert!(!out.join("LHD_FXX_0601_6801.copc.laz").exists());

    assert_eq!(summary.rasters.len(), 1);
    assert_eq!(summary.rasters[0].outcome, ExecutionOutcome::Succeeded);
    assert_eq!(summary.rasters[0].input, out.join("LHD_FXX_0600_6801.copc.laz"));
    assert_eq!(summary.rasters[0].output, out.join("LHD_FXX_0600_6801.tif"));

    let pipelines = captured_pipelines(capture.path());
    assert_eq!(pipelines.len(), 1);
    assert_eq!(pipelines[0].input(), Some(out.join("LHD_FXX_0600_6801.copc.laz").as_path()));
    assert_eq!(
        pipelines[0].filter_expression(),
        Some("Classification == 2 || Classification == 3 || Classification == 4 || Classification == 5")
    );
    assert_eq!(pipelines[0].writer().unwrap().resolution, 0.5);
}

#[test]
fn test_download_only_never_invokes_engine() {
    let fixture = Fixture::new();
    let capture = tempfile::tempdir().unwrap();
    let fetcher = FakeFetcher::serving(&[TILE_A, TILE_B]);

    let summary = run_with_fetcher(
        &fixture.request(false),
        &fixture.config(capture.path()),
        &fetcher,
        None,
    )
    .unwrap();

    assert_eq!(summary.downloaded_files().len(), 2);
    assert!(summary.rasters.is_empty());
    assert!(captured_pipelines(capture.path()).is_empty());
}

#[test]
fn test_raster_failure_does_not_block_other_files() {
    let fixture = Fixture::new();
    let fetcher = FakeFetcher::serving(&[TILE_A, TILE_B]);
    let mut config = fixture.config_with_script(
        "if grep -q LHD_FXX_0600_6801 \"$1\"; then echo 'cannot read tile' >&2; exit 1; fi",
    );
    config.jobs = 2;

    let summary = run_with_fetcher(&fixture.request(true), &config, &fetcher, None).unwrap();

    assert_eq!(summary.rasters.len(), 2);
    assert_eq!(summary.rasters_succeeded(), 1);
    assert_eq!(summary.rasters_failed(), 1);
    let failed = summary
        .rasters
        .iter()
        .find(|r| !r.outcome.is_success())
        .unwrap();
    assert!(failed.input.ends_with("LHD_FXX_0600_6801.copc.laz"));
    match &failed.outcome {
        ExecutionOutcome::Failed { reason } => assert!(reason.contains("cannot read tile")),
        ExecutionOutcome::Succeeded => unreachable!(),
    }
}

#[test]
fn test_all_classes_omits_filter() {
    let fixture = Fixture::new();
    let capture = tempfile::tempdir().unwrap();
    let fetcher = FakeFetcher::serving(&[TILE_A]);
    let mut config = fixture.config(capture.path());
    config.classes = vec![ClassToken::Word("ALL".to_string())];
    config.resolution = 1.0;

    run_with_fetcher(&fixture.request(true), &config, &fetcher, None).unwrap();

    let pipelines = captured_pipelines(capture.path());
    assert_eq!(pipelines.len(), 1);
    assert_eq!(pipelines[0].stages().len(), 2);
    assert_eq!(pipelines[0].filter_expression(), None);
    assert_eq!(pipelines[0].writer().unwrap().resolution, 1.0);
}

#[test]
fn test_progress_messages() {
    let fixture = Fixture::new();
    let capture = tempfile::tempdir().unwrap();
    let fetcher = FakeFetcher::serving(&[TILE_A]);
    let messages = std::sync::Arc::new(Mutex::new(Vec::new()));
    let sink = messages.clone();
    let callback: ProgressCallback = Box::new(move |msg: &str| sink.lock().unwrap().push(msg.to_string()));

    run_with_fetcher(
        &fixture.request(true),
        &fixture.config(capture.path()),
        &fetcher,
        Some(&callback),
    )
    .unwrap();

    let messages = messages.lock().unwrap();
    assert!(messages.iter().any(|m| m.starts_with("Download failed for file")));
    assert!(messages.iter().any(|m| m.starts_with("Download done for file")));
    assert!(messages
        .iter()
        .any(|m| m == "Rasterizing file: LHD_FXX_0600_6801.copc.laz"));
    assert!(messages.iter().any(|m| m.starts_with("Raster done for file")));
}

#[test]
fn test_configuration_errors_stop_before_download() {
    let fixture = Fixture::new();
    let capture = tempfile::tempdir().unwrap();
    let fetcher = FakeFetcher::serving(&[TILE_A, TILE_B]);

    let mut config = fixture.config(capture.path());
    config.resolution = -0.5;
    let err = run_with_fetcher(&fixture.request(true), &config, &fetcher, None).unwrap_err();
    assert!(matches!(err, RunError::InvalidConfig(_)));

    let mut config = fixture.config(capture.path());
    config.engine_timeout_secs = Some(0);
    let err = run_with_fetcher(&fixture.request(true), &config, &fetcher, None).unwrap_err();
    assert!(matches!(err, RunError::InvalidConfig(_)));

    let mut config = fixture.config(capture.path());
    config.classes = Vec::new();
    let err = run_with_fetcher(&fixture.request(true), &config, &fetcher, None).unwrap_err();
    assert!(matches!(err, RunError::Pdal(_)));

    let mut request = fixture.request(true);
    request.region = fixture.dir.path().join("missing.shp");
    let err = run_with_fetcher(&request, &fixture.config(capture.path()), &fetcher, None).unwrap_err();
    assert!(matches!(err, RunError::Tiles(_)));

    let mut config = fixture.config(capture.path());
    config.url_field = "url".to_string();
    let err = run_with_fetcher(&fixture.request(true), &config, &fetcher, None).unwrap_err();
    assert!(matches!(err, RunError::Tiles(_)));

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    assert!(!fixture.output_dir().exists());
}

#[test]
fn test_region_outside_catalog() {
    let fixture = Fixture::new();
    let region = fixture.dir.path().join("far.shp");
    write_shapefile(&region, &[(square(0.0, 0.0, 10.0), "")]);
    let fetcher = FakeFetcher::serving(&[TILE_A]);
    let capture = tempfile::tempdir().unwrap();

    let request = RunRequest {
        region,
        output_dir: fixture.output_dir(),
        rasterize: true,
    };
    let summary = run_with_fetcher(&request, &fixture.config(capture.path()), &fetcher, None).unwrap();

    assert_eq!(summary.matched, 0);
    assert!(summary.downloads.results.is_empty());
    assert!(summary.rasters.is_empty());
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
}
