//! PDAL invocation.
//!
//! Each execution writes the pipeline to its own uniquely named JSON file, runs
//! `pdal pipeline <file>` and removes the file again, whatever the outcome.
//! Executions share no state, so several can run at once.

use crate::{PdalError, ProcessingPipelineSpec, Result};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Default PDAL executable, looked up on `PATH`.
pub const DEFAULT_PDAL_PROGRAM: &str = "pdal";

/// PDAL subcommand that runs a pipeline file.
pub const DEFAULT_PDAL_ARGS: [&str; 1] = ["pipeline"];

/// How often a running engine is polled when a timeout is set.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Outcome of one pipeline execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// PDAL exited successfully.
    Succeeded,
    /// PDAL failed or could not be run.
    Failed {
        /// Diagnostic, including PDAL's stderr when available.
        reason: String,
    },
}

impl ExecutionOutcome {
    /// Whether the raster was produced.
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Succeeded)
    }
}

/// Transient pipeline description on disk.
///
/// Removed by [`PipelineFile::remove`], or on drop if an earlier step unwinds.
struct PipelineFile {
    file: Option<NamedTempFile>,
}

impl PipelineFile {
    fn write(spec: &ProcessingPipelineSpec, scratch_dir: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("lidarhd-pipeline-").suffix(".json");
        let mut file = match scratch_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        file.write_all(spec.to_json()?.as_bytes())?;
        file.flush()?;
        Ok(Self { file: Some(file) })
    }

    fn path(&self) -> &Path {
        self.file
            .as_ref()
            .map(|file| file.path())
            .unwrap_or_else(|| Path::new(""))
    }

    /// Delete the file, logging instead of failing when that is not possible.
    fn remove(mut self) {
        if let Some(file) = self.file.take() {
            let path = file.path().to_path_buf();
            if let Err(e) = file.close() {
                warn!(path = %path.display(), error = %e, "failed to remove pipeline file");
            }
        }
    }
}

/// Wrapper around the PDAL command-line engine.
#[derive(Debug, Clone)]
pub struct PdalEngine {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
    scratch_dir: Option<PathBuf>,
}

impl Default for PdalEngine {
    fn default() -> Self {
        Self::new(DEFAULT_PDAL_PROGRAM)
    }
}

impl PdalEngine {
    /// Engine running `<program> pipeline <file>`.
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: DEFAULT_PDAL_ARGS.iter().map(|a| a.to_string()).collect(),
            timeout: None,
            scratch_dir: None,
        }
    }

    /// Replace the arguments placed before the pipeline file.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Kill the engine and fail the item once `timeout` has elapsed.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Directory for the transient pipeline files (system temp dir by default).
    pub fn with_scratch_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Executable that is run.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run the pipeline, absorbing any failure into the outcome.
    pub fn execute(&self, spec: &ProcessingPipelineSpec) -> ExecutionOutcome {
        match self.run(spec) {
            Ok(()) => ExecutionOutcome::Succeeded,
            Err(e) => {
                warn!(
                    input = ?spec.input(),
                    error = %e,
                    "PDAL pipeline failed"
                );
                ExecutionOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Run the pipeline.
    pub fn run(&self, spec: &ProcessingPipelineSpec) -> Result<()> {
        let description = PipelineFile::write(spec, self.scratch_dir.as_deref())?;
        debug!(
            program = %self.program.display(),
            pipeline = %description.path().display(),
            output = ?spec.output_path(),
            "running PDAL pipeline"
        );

        let result = self.invoke(description.path());
        description.remove();
        result
    }

    fn invoke(&self, description: &Path) -> Result<()> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(description)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PdalError::EngineNotFound {
                        program: self.program.clone(),
                    }
                } else {
                    PdalError::Spawn {
                        program: self.program.clone(),
                        source: e,
                    }
                }
            })?;

        let (status, stderr) = match self.timeout {
            Some(limit) => wait_with_timeout(child, limit)?,
            None => {
                let output = child.wait_with_output()?;
                (output.status, output.stderr)
            }
        };

        if status.success() {
            Ok(())
        } else {
            Err(PdalError::EngineFailed {
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            })
        }
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        // A read error only truncates the diagnostic text.
        let _ = reader.read_to_end(&mut buffer);
        buffer
    })
}

/// Wait for `child`, killing it once `limit` has elapsed. Returns the exit status and stderr.
fn wait_with_timeout(mut child: Child, limit: Duration) -> Result<(ExitStatus, Vec<u8>)> {
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);
    let deadline = Instant::now() + limit;

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            if let Err(e) = child.kill() {
                warn!(error = %e, "failed to kill timed out PDAL process");
            }
            child.wait()?;
            return Err(PdalError::Timeout(limit));
        }
        thread::sleep(POLL_INTERVAL);
    };

    if let Some(handle) = stdout {
        let _ = handle.join();
    }
    let stderr = stderr
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();
    Ok((status, stderr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{build_pipeline, ClassSelector};

    fn spec() -> ProcessingPipelineSpec {
        build_pipeline(
            Path::new("tile.copc.laz"),
            Path::new("out"),
            &ClassSelector::default(),
            0.5,
        )
    }

    #[test]
    fn test_pipeline_files_are_unique_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let first = PipelineFile::write(&spec(), Some(dir.path())).unwrap();
        let second = PipelineFile::write(&spec(), Some(dir.path())).unwrap();
        assert_ne!(first.path(), second.path());

        let first_path = first.path().to_path_buf();
        let contents = std::fs::read_to_string(&first_path).unwrap();
        assert_eq!(ProcessingPipelineSpec::from_json(&contents).unwrap(), spec());

        first.remove();
        assert!(!first_path.exists());

        let second_path = second.path().to_path_buf();
        drop(second);
        assert!(!second_path.exists());
    }

    #[test]
    fn test_missing_engine() {
        let dir = tempfile::tempdir().unwrap();
        let engine = PdalEngine::new("/nonexistent/bin/pdal").with_scratch_dir(dir.path());

        let outcome = engine.execute(&spec());

        match outcome {
            ExecutionOutcome::Failed { reason } => assert!(reason.contains("not found"), "{}", reason),
            ExecutionOutcome::Succeeded => panic!("missing engine cannot succeed"),
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_default_engine() {
        let engine = PdalEngine::default();
        assert_eq!(engine.program(), Path::new("pdal"));
        assert_eq!(engine.args, vec!["pipeline".to_string()]);
        assert!(engine.timeout.is_none());
    }
}
