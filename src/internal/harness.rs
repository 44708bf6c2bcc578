use anyhow::Context;
use clap::ValueEnum;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use strum_macros::{Display, EnumString};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::baseline::{Baseline, BaselineStore};
use super::comparator::{Comparison, MismatchReason, compare};
use super::diff_report::DiffReporter;
use super::error::{ConfigurationError, FailureKind, HarnessError};
use super::fixtures::validate;
use super::hasher::{Digest, digest_file};
use super::models::{Fixture, RenderRequest};
use super::renderer::{Renderer, log_path_for, render_fixture};

/// Whether a run checks baselines or rewrites them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, ValueEnum)]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    #[default]
    Verify,
    Update,
}

#[derive(Debug, Clone, Default)]
pub struct HarnessOptions {
    pub mode: Mode,
    /// In verify mode, store a baseline for fixtures that have none instead of failing.
    pub establish_missing: bool,
    /// Parent for per-fixture scratch directories. System temp when unset.
    pub work_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixtureStatus {
    Passed,
    Updated { digest: Digest, established: bool },
    Failed(FailureKind),
}

/// Result of one fixture's render-compare-report cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureOutcome {
    pub name: String,
    pub status: FixtureStatus,
    /// Diff report written for this failure, if any.
    pub diff: Option<PathBuf>,
    /// Renderer output kept after a failed render.
    pub log: Option<PathBuf>,
}

impl FixtureOutcome {
    fn passed(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: FixtureStatus::Passed,
            diff: None,
            log: None,
        }
    }

    fn updated(name: &str, digest: Digest, established: bool) -> Self {
        Self {
            name: name.to_string(),
            status: FixtureStatus::Updated {
                digest,
                established,
            },
            diff: None,
            log: None,
        }
    }

    fn failed(name: &str, kind: FailureKind, diff: Option<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            status: FixtureStatus::Failed(kind),
            diff,
            log: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, FixtureStatus::Failed(_))
    }

    /// Console line for this fixture.
    pub fn line(&self) -> String {
        let mut line = match (&self.status, &self.diff) {
            (FixtureStatus::Passed, _) => format!("PASS {}", self.name),
            (FixtureStatus::Updated { digest, established }, _) => {
                let suffix = match established {
                    true => " (new baseline)",
                    false => "",
                };
                format!("UPDATED {} => {digest}{suffix}", self.name)
            }
            (FixtureStatus::Failed(FailureKind::ContentMismatch), Some(diff)) => {
                format!("FAIL {} diff={}", self.name, diff.display())
            }
            (FixtureStatus::Failed(kind), Some(diff)) => {
                format!("FAIL {} ({}) diff={}", self.name, kind.describe(), diff.display())
            }
            (FixtureStatus::Failed(kind), None) => {
                format!("FAIL {} ({})", self.name, kind.describe())
            }
        };
        if let Some(log) = &self.log {
            let _ = write!(line, " log={}", log.display());
        }
        line
    }
}

/// Aggregate of a run. Built by merging per-fixture results, so partial results
/// from independent workers combine the same way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarnessResult {
    pub passed: usize,
    pub failed: usize,
    pub updated: usize,
    pub outcomes: Vec<FixtureOutcome>,
    pub diffs: Vec<PathBuf>,
    pub logs: Vec<PathBuf>,
}

impl From<FixtureOutcome> for HarnessResult {
    fn from(outcome: FixtureOutcome) -> Self {
        let mut result = Self::default();
        match &outcome.status {
            FixtureStatus::Passed => result.passed = 1,
            FixtureStatus::Updated { .. } => result.updated = 1,
            FixtureStatus::Failed(_) => result.failed = 1,
        }
        result.diffs.extend(outcome.diff.clone());
        result.logs.extend(outcome.log.clone());
        result.outcomes.push(outcome);
        result
    }
}

impl HarnessResult {
    pub fn merge(mut self, other: Self) -> Self {
        self.passed += other.passed;
        self.failed += other.failed;
        self.updated += other.updated;
        self.outcomes.extend(other.outcomes);
        self.diffs.extend(other.diffs);
        self.logs.extend(other.logs);
        self
    }

    pub fn executed(&self) -> usize {
        self.passed + self.failed + self.updated
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn exit_code(&self) -> u8 {
        match self.is_success() {
            true => 0,
            false => 1,
        }
    }

    /// Final report printed after the per-fixture lines.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Golden report");
        let _ = writeln!(out, "- executed: {}", self.executed());
        let _ = writeln!(out, "- passed: {}", self.passed);
        let _ = writeln!(out, "- updated: {}", self.updated);
        let _ = writeln!(out, "- failed: {}", self.failed);
        for diff in &self.diffs {
            let _ = writeln!(out, "- diff: {}", diff.display());
        }
        for log in &self.logs {
            let _ = writeln!(out, "- log: {}", log.display());
        }
        let verdict = match self.is_success() {
            true => "PASS",
            false => "FAIL",
        };
        let _ = writeln!(out, "Golden tests: {verdict}");
        out
    }
}

/// Drives fixtures through render, digest, compare and report.
pub struct Harness<R> {
    renderer: R,
    baselines: BaselineStore,
    diffs: DiffReporter,
    options: HarnessOptions,
}

impl<R: Renderer> Harness<R> {
    pub fn new(
        renderer: R,
        baselines: BaselineStore,
        diffs: DiffReporter,
        options: HarnessOptions,
    ) -> Self {
        Self {
            renderer,
            baselines,
            diffs,
            options,
        }
    }

    pub fn mode(&self) -> Mode {
        self.options.mode
    }

    pub fn run(&self, fixtures: &[Fixture]) -> Result<HarnessResult, HarnessError> {
        self.run_with(fixtures, |_| {})
    }

    /// Process every fixture in name order, calling `on_outcome` as each finishes.
    ///
    /// Only configuration problems are returned as errors, and they are raised
    /// before any fixture is rendered.
    pub fn run_with<F>(
        &self,
        fixtures: &[Fixture],
        mut on_outcome: F,
    ) -> Result<HarnessResult, HarnessError>
    where
        F: FnMut(&FixtureOutcome),
    {
        if fixtures.is_empty() {
            return Err(ConfigurationError::EmptyFixtureSet.into());
        }
        let mut ordered = fixtures.to_vec();
        validate(&mut ordered)?;

        info!(mode = %self.options.mode, count = ordered.len(), "running golden fixtures");

        let result = ordered
            .iter()
            .map(|fixture| {
                let outcome = self.run_fixture(fixture);
                on_outcome(&outcome);
                HarnessResult::from(outcome)
            })
            .fold(HarnessResult::default(), HarnessResult::merge);

        info!(
            passed = result.passed,
            updated = result.updated,
            failed = result.failed,
            "golden run finished"
        );
        Ok(result)
    }

    /// One full cycle for a fixture. Never fails; errors become a failed outcome.
    #[tracing::instrument(skip(self, fixture), fields(fixture = %fixture.name))]
    pub fn run_fixture(&self, fixture: &Fixture) -> FixtureOutcome {
        match self.cycle(fixture) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "fixture failed");
                FixtureOutcome::failed(&fixture.name, err.into(), None)
            }
        }
    }

    fn cycle(&self, fixture: &Fixture) -> Result<FixtureOutcome, HarnessError> {
        let name = fixture.name.as_str();
        let io = |err: anyhow::Error| HarnessError::io(name, err);

        // Dropped at the end of the cycle; failures copy what they need first.
        let work = self.scratch_dir(name).map_err(io)?;
        let request = fixture.request(
            work.path().join(format!("{name}.rgba")),
            work.path().join(format!("{name}.meta.json")),
        );

        let output = match render_fixture(&self.renderer, &request) {
            Ok(output) => output,
            Err(err) => return Ok(self.render_failed(name, &request, err)),
        };
        let digest = digest_file(&output.pixels)
            .with_context(|| format!("failed to digest {}", output.pixels.display()))
            .map_err(io)?;
        debug!(digest = %digest.short(), "rendered");
        if let Ok(meta) = fs::metadata(&output.pixels)
            && meta.len() != fixture.expected_len()
        {
            warn!(
                expected = fixture.expected_len(),
                actual = meta.len(),
                "pixel buffer size does not match fixture dimensions"
            );
        }

        if self.options.mode == Mode::Update {
            self.baselines.store(name, &output).map_err(io)?;
            return Ok(FixtureOutcome::updated(name, digest, false));
        }

        let baseline = match self.baselines.load(name).map_err(io)? {
            Some(baseline) => Some(baseline),
            None => fixture.inline_digest.clone().map(|digest| {
                debug!("no stored baseline, checking against inline digest");
                Baseline::inline(name, digest, output.metadata.clone())
            }),
        };
        if baseline.is_none() && self.options.establish_missing {
            self.baselines.store(name, &output).map_err(io)?;
            return Ok(FixtureOutcome::updated(name, digest, true));
        }

        match compare(&output, &digest, baseline.as_ref(), fixture.width).map_err(io)? {
            Comparison::Pass => {
                self.diffs.clear(name).map_err(io)?;
                Ok(FixtureOutcome::passed(name))
            }
            Comparison::Fail(mismatch) => {
                let artifact = self.diffs.write(fixture, &mismatch, &output).map_err(io)?;
                let kind = match mismatch.reason {
                    MismatchReason::MissingBaseline => FailureKind::MissingBaseline,
                    _ => FailureKind::ContentMismatch,
                };
                Ok(FixtureOutcome::failed(name, kind, Some(artifact.report)))
            }
        }
    }

    /// Record a render failure, keeping whatever the renderer logged before the
    /// scratch directory goes away.
    fn render_failed(
        &self,
        name: &str,
        request: &RenderRequest,
        err: HarnessError,
    ) -> FixtureOutcome {
        warn!(error = %err, "render failed");
        let log = log_path_for(request);
        let has_output = fs::metadata(&log)
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false);
        let kept = match has_output {
            true => match self.diffs.keep_log(name, &log) {
                Ok(kept) => Some(kept),
                Err(copy_err) => {
                    warn!(error = %format!("{copy_err:#}"), "failed to keep renderer log");
                    None
                }
            },
            false => None,
        };
        FixtureOutcome {
            log: kept,
            ..FixtureOutcome::failed(name, err.into(), None)
        }
    }

    fn scratch_dir(&self, name: &str) -> anyhow::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        let prefix = format!("golden-{name}-");
        builder.prefix(&prefix);
        match &self.options.work_dir {
            Some(dir) => {
                fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create work dir {}", dir.display()))?;
                builder
                    .tempdir_in(dir)
                    .with_context(|| format!("failed to create scratch dir in {}", dir.display()))
            }
            None => builder
                .tempdir()
                .context("failed to create scratch dir in system temp"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::error::RenderFailure;

    fn outcome(name: &str, status: FixtureStatus, diff: Option<&str>) -> FixtureOutcome {
        FixtureOutcome {
            name: name.to_string(),
            status,
            diff: diff.map(PathBuf::from),
            log: None,
        }
    }

    #[test]
    fn test_mode_parses_and_displays_lowercase() {
        assert_eq!("update".parse::<Mode>().unwrap(), Mode::Update);
        assert_eq!(Mode::Verify.to_string(), "verify");
        assert_eq!(Mode::default(), Mode::Verify);
    }

    #[test]
    fn test_merge_sums_counts_and_concatenates() {
        let a = HarnessResult::from(outcome("a", FixtureStatus::Passed, None));
        let b = HarnessResult::from(outcome(
            "b",
            FixtureStatus::Failed(FailureKind::ContentMismatch),
            Some("diffs/b.diff.json"),
        ));
        let merged = a.merge(b);

        assert_eq!(merged.passed, 1);
        assert_eq!(merged.failed, 1);
        assert_eq!(merged.executed(), 2);
        assert_eq!(merged.diffs, vec![PathBuf::from("diffs/b.diff.json")]);
        assert_eq!(merged.outcomes[0].name, "a");
        assert_eq!(merged.exit_code(), 1);
    }

    #[test]
    fn test_empty_result_is_success() {
        assert_eq!(HarnessResult::default().exit_code(), 0);
    }

    #[test]
    fn test_outcome_lines() {
        assert_eq!(outcome("a", FixtureStatus::Passed, None).line(), "PASS a");
        assert_eq!(
            outcome(
                "b",
                FixtureStatus::Failed(FailureKind::Render(RenderFailure::Exited { code: Some(1) })),
                None
            )
            .line(),
            "FAIL b (renderer exited 1)"
        );
        assert_eq!(
            outcome(
                "c",
                FixtureStatus::Failed(FailureKind::ContentMismatch),
                Some("diffs/c.diff.json")
            )
            .line(),
            "FAIL c diff=diffs/c.diff.json"
        );
    }

    #[test]
    fn test_render_failure_line_and_summary_name_the_kept_log() {
        let failed = FixtureOutcome {
            log: Some(PathBuf::from("diffs/crash.renderer.log")),
            ..outcome(
                "crash",
                FixtureStatus::Failed(FailureKind::Render(RenderFailure::Exited {
                    code: Some(101),
                })),
                None,
            )
        };
        assert_eq!(
            failed.line(),
            "FAIL crash (renderer exited 101) log=diffs/crash.renderer.log"
        );

        let result = HarnessResult::from(failed);
        assert_eq!(result.logs, vec![PathBuf::from("diffs/crash.renderer.log")]);
        assert!(result.summary().contains("- log: diffs/crash.renderer.log\n"));
    }

    #[test]
    fn test_unknown_mode_is_strum_parse_error() {
        assert_eq!(
            "rebase".parse::<Mode>(),
            Err(strum::ParseError::VariantNotFound)
        );
    }
}
