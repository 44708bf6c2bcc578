use anyhow::{Context, Result};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::comparator::{Divergence, Mismatch, MismatchReason};
use super::hasher::Digest;
use super::models::{Fixture, Metadata, RenderOutput};
use crate::utils::fs::{copy_atomic, remove_if_exists, write_atomic};

/// Persisted description of one failing comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffReport {
    pub fixture: String,
    pub reason: MismatchReason,
    pub input: String,
    pub width: u32,
    pub height: u32,
    pub frame_index: u64,
    pub expected_digest: Option<Digest>,
    pub actual_digest: Digest,
    pub expected_len: Option<u64>,
    pub actual_len: u64,
    pub divergence: Option<Divergence>,
    /// False when the baseline had no raw buffer to scan against.
    pub localized: bool,
    pub metadata_equal: bool,
    pub metadata_drift: Vec<String>,
    pub expected_metadata: Option<Metadata>,
    pub actual_metadata: Metadata,
    pub actual_pixels: PathBuf,
    pub actual_metadata_path: PathBuf,
    pub generated_at: Timestamp,
}

/// Paths of the artifacts written for a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffArtifact {
    pub report: PathBuf,
    pub pixels: PathBuf,
}

/// Writes and clears per-fixture failure artifacts under one directory.
///
/// The directory is only created when the first failure is written. Each
/// fixture has exactly one set of artifacts; a new failure replaces the old.
#[derive(Debug, Clone)]
pub struct DiffReporter {
    root: PathBuf,
}

impl DiffReporter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn report_path(&self, fixture: &str) -> PathBuf {
        self.root.join(format!("{fixture}.diff.json"))
    }

    pub fn pixels_path(&self, fixture: &str) -> PathBuf {
        self.root.join(format!("{fixture}.actual.rgba"))
    }

    pub fn metadata_path(&self, fixture: &str) -> PathBuf {
        self.root.join(format!("{fixture}.actual.meta.json"))
    }

    pub fn log_path(&self, fixture: &str) -> PathBuf {
        self.root.join(format!("{fixture}.renderer.log"))
    }

    /// Copy the renderer's captured output for a failed render next to the
    /// other artifacts, replacing any earlier copy.
    pub fn keep_log(&self, fixture: &str, log: &Path) -> Result<PathBuf> {
        fs::create_dir_all(&self.root).with_context(|| {
            format!("failed to create diff directory {}", self.root.display())
        })?;
        let kept = self.log_path(fixture);
        copy_atomic(log, &kept)?;
        info!(fixture, log = %kept.display(), "kept renderer log");
        Ok(kept)
    }

    pub fn write(
        &self,
        fixture: &Fixture,
        mismatch: &Mismatch,
        actual: &RenderOutput,
    ) -> Result<DiffArtifact> {
        fs::create_dir_all(&self.root).with_context(|| {
            format!("failed to create diff directory {}", self.root.display())
        })?;

        let pixels = self.pixels_path(&fixture.name);
        copy_atomic(&actual.pixels, &pixels)?;

        let metadata_path = self.metadata_path(&fixture.name);
        let metadata = serde_json::to_string_pretty(&actual.metadata)
            .context("failed to serialize actual metadata")?;
        write_atomic(&metadata_path, format!("{metadata}\n").as_bytes())?;

        let report = DiffReport {
            fixture: fixture.name.clone(),
            reason: mismatch.reason,
            input: fixture.input.to_string(),
            width: fixture.width,
            height: fixture.height,
            frame_index: fixture.frame_index,
            expected_digest: mismatch.expected_digest.clone(),
            actual_digest: mismatch.actual_digest.clone(),
            expected_len: mismatch.expected_len,
            actual_len: mismatch.actual_len,
            divergence: mismatch.divergence,
            localized: mismatch.localized,
            metadata_equal: mismatch.metadata_equal,
            metadata_drift: mismatch.metadata_drift.clone(),
            expected_metadata: mismatch.expected_metadata.clone(),
            actual_metadata: actual.metadata.clone(),
            actual_pixels: pixels.clone(),
            actual_metadata_path: metadata_path,
            generated_at: Timestamp::now(),
        };

        let report_path = self.report_path(&fixture.name);
        let content =
            serde_json::to_string_pretty(&report).context("failed to serialize diff report")?;
        write_atomic(&report_path, format!("{content}\n").as_bytes())?;

        info!(fixture = %fixture.name, report = %report_path.display(), "wrote diff report");

        Ok(DiffArtifact {
            report: report_path,
            pixels,
        })
    }

    /// Remove artifacts left by an earlier failure. Returns whether any existed.
    pub fn clear(&self, fixture: &str) -> Result<bool> {
        let mut removed = false;
        for path in [
            self.report_path(fixture),
            self.pixels_path(fixture),
            self.metadata_path(fixture),
            self.log_path(fixture),
        ] {
            removed |= remove_if_exists(&path)?;
        }
        if removed {
            debug!(fixture, "removed stale diff artifacts");
        }
        Ok(removed)
    }

    pub fn read(&self, fixture: &str) -> Result<Option<DiffReport>> {
        let path = self.report_path(fixture);
        match path.exists() {
            true => {
                let content = fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let report = serde_json::from_str(&content)
                    .with_context(|| format!("failed to parse {}", path.display()))?;
                Ok(Some(report))
            }
            false => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::hasher::digest_bytes;
    use crate::internal::models::{FixtureInput, MetaValue};

    fn fixture() -> Fixture {
        Fixture {
            name: "checker".to_string(),
            input: FixtureInput::Pattern("checker".to_string()),
            width: 4,
            height: 1,
            frame_index: 12,
            inline_digest: None,
        }
    }

    fn mismatch() -> Mismatch {
        Mismatch {
            reason: MismatchReason::Digest,
            expected_digest: Some(digest_bytes(&[0; 16])),
            actual_digest: digest_bytes(&[1; 16]),
            expected_len: Some(16),
            actual_len: 16,
            divergence: Some(Divergence::decode(0, 4)),
            localized: true,
            metadata_equal: true,
            metadata_drift: Vec::new(),
            expected_metadata: Some(Metadata::new()),
        }
    }

    fn output(dir: &Path, fill: u8) -> RenderOutput {
        let pixels = dir.join("checker.rgba");
        fs::write(&pixels, [fill; 16]).unwrap();
        let mut metadata = Metadata::new();
        metadata.insert("width".to_string(), MetaValue::Int(4));
        RenderOutput {
            pixels,
            metadata_path: dir.join("checker.meta.json"),
            metadata,
        }
    }

    #[test]
    fn test_directory_created_lazily() {
        let root = tempfile::tempdir().unwrap();
        let reporter = DiffReporter::new(root.path().join("diffs"));

        assert!(!reporter.clear("checker").unwrap());
        assert!(!reporter.root().exists());
    }

    #[test]
    fn test_write_persists_report_and_buffer() {
        let work = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let reporter = DiffReporter::new(root.path().join("diffs"));

        let artifact = reporter
            .write(&fixture(), &mismatch(), &output(work.path(), 1))
            .unwrap();

        assert_eq!(fs::read(&artifact.pixels).unwrap(), vec![1u8; 16]);
        let report = reporter.read("checker").unwrap().unwrap();
        assert_eq!(report.fixture, "checker");
        assert_eq!(report.input, "pattern:checker");
        assert_eq!(report.frame_index, 12);
        assert_eq!(report.actual_pixels, artifact.pixels);
        assert_eq!(report.divergence.unwrap().pixel.unwrap().x, 0);
        assert!(reporter.metadata_path("checker").exists());
    }

    #[test]
    fn test_rewrite_overwrites_instead_of_accumulating() {
        let work = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let reporter = DiffReporter::new(root.path());

        reporter
            .write(&fixture(), &mismatch(), &output(work.path(), 1))
            .unwrap();
        reporter
            .write(&fixture(), &mismatch(), &output(work.path(), 2))
            .unwrap();

        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 3);
        assert_eq!(
            fs::read(reporter.pixels_path("checker")).unwrap(),
            vec![2u8; 16]
        );
    }

    #[test]
    fn test_clear_removes_all_artifacts() {
        let work = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let reporter = DiffReporter::new(root.path());
        reporter
            .write(&fixture(), &mismatch(), &output(work.path(), 1))
            .unwrap();

        assert!(reporter.clear("checker").unwrap());
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
        assert!(reporter.read("checker").unwrap().is_none());
    }

    #[test]
    fn test_keep_log_copies_and_clear_removes_it() {
        let work = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let reporter = DiffReporter::new(root.path().join("diffs"));
        let log = work.path().join("renderer.log");
        fs::write(&log, "thread 'main' panicked\n").unwrap();

        let kept = reporter.keep_log("checker", &log).unwrap();
        assert_eq!(kept, reporter.log_path("checker"));
        assert_eq!(fs::read_to_string(&kept).unwrap(), "thread 'main' panicked\n");

        assert!(reporter.clear("checker").unwrap());
        assert!(!kept.exists());
    }
}
