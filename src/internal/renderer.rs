use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use super::error::{HarnessError, RenderFailure};
use super::models::{FixtureInput, Metadata, RenderOutput, RenderRequest};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How a renderer invocation terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderStatus {
    Success,
    Exited { code: Option<i32> },
    TimedOut { after: Duration },
}

impl RenderStatus {
    fn from_exit(status: ExitStatus) -> Self {
        match status.success() {
            true => Self::Success,
            false => Self::Exited {
                code: status.code(),
            },
        }
    }
}

/// Capability to turn a render request into output files.
///
/// Implementations block until the render has finished. An `Err` means the
/// renderer could not be started at all; a render that ran and failed is
/// reported through [`RenderStatus`].
pub trait Renderer {
    fn invoke(&self, request: &RenderRequest) -> Result<RenderStatus>;
}

impl<R: Renderer + ?Sized> Renderer for &R {
    fn invoke(&self, request: &RenderRequest) -> Result<RenderStatus> {
        (**self).invoke(request)
    }
}

/// Runs the renderer binary as a child process.
#[derive(Debug, Clone)]
pub struct ProcessRenderer {
    program: PathBuf,
    prefix_args: Vec<String>,
    timeout: Option<Duration>,
}

impl ProcessRenderer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
            timeout: None,
        }
    }

    /// Arguments placed before the headless subcommand, e.g. `run -p tessera --`.
    pub fn with_prefix_args(mut self, args: Vec<String>) -> Self {
        self.prefix_args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Full argument list for one request, excluding the program itself.
    pub fn args(&self, request: &RenderRequest) -> Vec<String> {
        let mut args = self.prefix_args.clone();
        args.push("headless".to_string());
        match &request.input {
            FixtureInput::Document(path) => {
                args.push("--input".to_string());
                args.push(path.display().to_string());
            }
            FixtureInput::Pattern(name) => {
                args.push("--pattern".to_string());
                args.push(name.clone());
            }
        }
        args.extend([
            "--width".to_string(),
            request.width.to_string(),
            "--height".to_string(),
            request.height.to_string(),
            "--frame".to_string(),
            request.frame_index.to_string(),
            "--out".to_string(),
            request.pixels_out.display().to_string(),
            "--metadata-out".to_string(),
            request.metadata_out.display().to_string(),
        ]);
        args
    }

    fn wait(&self, mut child: Child) -> Result<RenderStatus> {
        let Some(timeout) = self.timeout else {
            let status = child.wait().context("failed to wait for renderer")?;
            return Ok(RenderStatus::from_exit(status));
        };

        let start = Instant::now();
        loop {
            if let Some(status) = child.try_wait().context("failed to poll renderer")? {
                return Ok(RenderStatus::from_exit(status));
            }
            if start.elapsed() >= timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Ok(RenderStatus::TimedOut { after: timeout });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Renderer for ProcessRenderer {
    #[tracing::instrument(skip(self, request), fields(fixture = %request.fixture))]
    fn invoke(&self, request: &RenderRequest) -> Result<RenderStatus> {
        // Captured beside the outputs; the harness keeps it when the render fails.
        let log_path = log_path_for(request);
        let log = File::create(&log_path)
            .with_context(|| format!("failed to create {}", log_path.display()))?;
        let stderr = log
            .try_clone()
            .with_context(|| format!("failed to clone handle for {}", log_path.display()))?;

        let args = self.args(request);
        tracing::debug!(program = %self.program.display(), args = ?args, "spawning renderer");

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr))
            .spawn()
            .with_context(|| format!("failed to launch renderer {}", self.program.display()))?;

        let status = self.wait(child)?;
        tracing::debug!(status = ?status, "renderer finished");
        Ok(status)
    }
}

/// Where the process renderer captures stdout/stderr for a request.
pub fn log_path_for(request: &RenderRequest) -> PathBuf {
    match request.pixels_out.parent() {
        Some(dir) => dir.join("renderer.log"),
        None => PathBuf::from("renderer.log"),
    }
}

/// Invoke the renderer and validate its declared outputs.
///
/// Outputs are only trusted after a successful exit, and both files must exist
/// and be non-empty. Nothing is cleaned up here; the caller owns the work
/// directory.
pub fn render_fixture<R: Renderer + ?Sized>(
    renderer: &R,
    request: &RenderRequest,
) -> Result<RenderOutput, HarnessError> {
    let failure = |reason: RenderFailure| HarnessError::RenderFailure {
        fixture: request.fixture.clone(),
        reason,
    };

    let status = renderer
        .invoke(request)
        .map_err(|err| failure(RenderFailure::Launch(format!("{err:#}"))))?;

    match status {
        RenderStatus::Success => {}
        RenderStatus::Exited { code } => return Err(failure(RenderFailure::Exited { code })),
        RenderStatus::TimedOut { after } => return Err(failure(RenderFailure::TimedOut { after })),
    }

    for path in [&request.pixels_out, &request.metadata_out] {
        if !is_non_empty(path) {
            return Err(failure(RenderFailure::MissingOutput(path.clone())));
        }
    }

    let metadata = read_metadata(&request.metadata_out).map_err(|err| {
        failure(RenderFailure::MalformedMetadata {
            path: request.metadata_out.clone(),
            reason: format!("{err:#}"),
        })
    })?;

    Ok(RenderOutput {
        pixels: request.pixels_out.clone(),
        metadata_path: request.metadata_out.clone(),
        metadata,
    })
}

pub fn read_metadata(path: &Path) -> Result<Metadata> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).context("metadata must be a flat object of ints and strings")
}

fn is_non_empty(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}
