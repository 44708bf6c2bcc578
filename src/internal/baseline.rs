use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::fixtures::is_valid_name;
use super::hasher::{Digest, digest_file};
use super::models::{Metadata, RenderOutput};
use crate::utils::fs::{copy_atomic, write_atomic};

/// On-disk record for one accepted baseline.
///
/// `pixels` names the raw buffer file relative to the store root. Records
/// written before raw buffers were kept only carry the digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct BaselineRecord {
    fixture: String,
    digest: Digest,
    #[serde(default)]
    byte_len: Option<u64>,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pixels: Option<String>,
}

/// The accepted-correct output for a fixture.
#[derive(Debug, Clone, PartialEq)]
pub struct Baseline {
    pub fixture: String,
    pub digest: Digest,
    pub byte_len: Option<u64>,
    pub metadata: Metadata,
    /// Raw buffer, when the store still has it.
    pub pixels: Option<PathBuf>,
}

impl Baseline {
    /// Digest-only baseline from a hash kept inline in a case file.
    ///
    /// The inline form never recorded metadata, so the render's own metadata
    /// stands in for the expectation and only the digest decides.
    pub fn inline(fixture: &str, digest: Digest, metadata: Metadata) -> Self {
        Self {
            fixture: fixture.to_string(),
            digest,
            byte_len: None,
            metadata,
            pixels: None,
        }
    }

    pub fn has_pixels(&self) -> bool {
        self.pixels.is_some()
    }
}

/// Directory of baselines keyed by fixture name.
///
/// Each fixture owns `<name>.json` and `<name>.rgba`. The record is written
/// last, so a reader only sees a baseline once its buffer is in place.
#[derive(Debug, Clone)]
pub struct BaselineStore {
    root: PathBuf,
}

impl BaselineStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record_path(&self, fixture: &str) -> PathBuf {
        self.root.join(format!("{fixture}.json"))
    }

    pub fn pixels_path(&self, fixture: &str) -> PathBuf {
        self.root.join(format!("{fixture}.rgba"))
    }

    /// Look up the accepted baseline. `Ok(None)` means none has been stored yet.
    pub fn load(&self, fixture: &str) -> Result<Option<Baseline>> {
        let record_path = self.record_path(fixture);
        if !record_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&record_path)
            .with_context(|| format!("failed to read baseline {}", record_path.display()))?;
        let record: BaselineRecord = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse baseline {}", record_path.display()))?;

        // Only a bare file name inside the store is honoured.
        let pixels = match record.pixels {
            Some(name) if is_valid_name(&name) => Some(self.root.join(name)),
            Some(name) => {
                tracing::warn!(
                    fixture,
                    pixels = %name,
                    "ignoring baseline buffer outside the store"
                );
                None
            }
            None => None,
        }
        .filter(|path| path.is_file());
        if pixels.is_none() {
            tracing::debug!(fixture, "baseline has no raw buffer, diff localization unavailable");
        }

        Ok(Some(Baseline {
            fixture: record.fixture,
            digest: record.digest,
            byte_len: record.byte_len,
            metadata: record.metadata,
            pixels,
        }))
    }

    /// Accept `output` as the new baseline for `fixture`, replacing any previous one.
    pub fn store(&self, fixture: &str, output: &RenderOutput) -> Result<Baseline> {
        fs::create_dir_all(&self.root).with_context(|| {
            format!("failed to create baseline directory {}", self.root.display())
        })?;

        let pixels_path = self.pixels_path(fixture);
        let byte_len = copy_atomic(&output.pixels, &pixels_path)?;
        let digest = digest_file(&pixels_path)
            .with_context(|| format!("failed to digest {}", pixels_path.display()))?;

        let record = BaselineRecord {
            fixture: fixture.to_string(),
            digest: digest.clone(),
            byte_len: Some(byte_len),
            metadata: output.metadata.clone(),
            pixels: Some(format!("{fixture}.rgba")),
        };
        let record_path = self.record_path(fixture);
        let content =
            serde_json::to_string_pretty(&record).context("failed to serialize baseline")?;
        write_atomic(&record_path, format!("{content}\n").as_bytes())?;

        info!(fixture, digest = %digest, bytes = byte_len, "stored baseline");

        Ok(Baseline {
            fixture: fixture.to_string(),
            digest,
            byte_len: Some(byte_len),
            metadata: output.metadata.clone(),
            pixels: Some(pixels_path),
        })
    }
}
