use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the harness before or while processing fixtures.
///
/// `Configuration` aborts the whole run before any rendering starts. The
/// remaining variants are scoped to a single fixture and end up converted
/// into a [`FailureKind`] by the driver.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("render failed for `{fixture}`: {reason}")]
    RenderFailure { fixture: String, reason: RenderFailure },
    #[error("i/o error for `{fixture}`: {message}")]
    Io { fixture: String, message: String },
}

impl HarnessError {
    /// Wraps an error chain from store or report plumbing for one fixture.
    pub fn io(fixture: &str, err: anyhow::Error) -> Self {
        Self::Io {
            fixture: fixture.to_string(),
            message: format!("{err:#}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("no fixtures found in {}", .0.display())]
    NoFixtures(PathBuf),
    #[error("fixture set is empty")]
    EmptyFixtureSet,
    #[error("failed to read fixture directory {}: {reason}", .path.display())]
    UnreadableFixtureDir { path: PathBuf, reason: String },
    #[error("invalid fixture file {}: {reason}", .path.display())]
    InvalidFixtureFile { path: PathBuf, reason: String },
    #[error("invalid fixture name `{0}` (must be a plain file stem)")]
    InvalidName(String),
    #[error("fixture `{name}` has invalid dimensions {width}x{height}")]
    InvalidDimensions { name: String, width: u32, height: u32 },
    #[error("duplicate fixture name `{0}`")]
    DuplicateFixture(String),
    #[error("invalid fixture filter `{pattern}`: {reason}")]
    InvalidFilter { pattern: String, reason: String },
    #[error("failed to load config {}: {reason}", .path.display())]
    InvalidConfig { path: PathBuf, reason: String },
}

/// Why a render step could not be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderFailure {
    #[error("renderer exited {}", exit_code_label(.code))]
    Exited { code: Option<i32> },
    #[error("renderer timed out after {}s", .after.as_secs())]
    TimedOut { after: Duration },
    #[error("renderer did not produce {}", .0.display())]
    MissingOutput(PathBuf),
    #[error("malformed metadata {}: {reason}", .path.display())]
    MalformedMetadata { path: PathBuf, reason: String },
    #[error("could not launch renderer: {0}")]
    Launch(String),
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "by signal".to_string(),
    }
}

/// Per-fixture failure recorded in the harness result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    Render(RenderFailure),
    ContentMismatch,
    MissingBaseline,
    Io(String),
}

impl FailureKind {
    pub fn describe(&self) -> String {
        match self {
            Self::Render(reason) => reason.to_string(),
            Self::ContentMismatch => "content mismatch".to_string(),
            Self::MissingBaseline => "missing baseline, run with update".to_string(),
            Self::Io(message) => format!("i/o error: {message}"),
        }
    }
}

impl From<HarnessError> for FailureKind {
    fn from(err: HarnessError) -> Self {
        match err {
            HarnessError::RenderFailure { reason, .. } => Self::Render(reason),
            HarnessError::Io { message, .. } => Self::Io(message),
            HarnessError::Configuration(config) => Self::Io(config.to_string()),
        }
    }
}
