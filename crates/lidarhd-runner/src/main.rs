//! `lidarhd` command-line tool.

use clap::Parser;
use lidarhd_runner::{run, Cli, RunSummary};
use lidarhd_tiles::ProgressCallback;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_summary(summary: &RunSummary, rasterize: bool) {
    println!("[INFO] Tiles matched: {}", summary.matched);
    println!(
        "[INFO] Files downloaded: {} ({} bytes)",
        summary.stats.files_downloaded, summary.stats.bytes_downloaded
    );
    for failure in summary.downloads.failures() {
        println!("[WARN] Not downloaded: {}", failure.url);
    }
    if rasterize {
        println!(
            "[INFO] Rasters written: {}, failed: {}",
            summary.rasters_succeeded(),
            summary.rasters_failed()
        );
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.is_verbose());

    let (request, config) = match cli.resolve() {
        Ok(resolved) => resolved,
        Err(e) => {
            eprintln!("[ERROR] {}", e);
            return ExitCode::FAILURE;
        }
    };

    let callback: ProgressCallback = Box::new(|msg: &str| println!("[INFO] {}", msg));
    let callback = cli.is_verbose().then_some(&callback);

    println!("[INFO] Downloading LidarHD data...");
    match run(&request, &config, callback) {
        Ok(summary) => {
            print_summary(&summary, request.rasterize);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("[ERROR] {}", e);
            ExitCode::FAILURE
        }
    }
}
