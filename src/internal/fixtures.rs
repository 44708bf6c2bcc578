use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::error::ConfigurationError;
use super::hasher::Digest;
use super::models::{Fixture, FixtureInput};

const DEFAULT_PATTERN: &str = "test-pattern";

/// Width, height and frame applied to fixtures that don't carry their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FixtureDefaults {
    pub width: u32,
    pub height: u32,
    pub frame_index: u64,
}

impl Default for FixtureDefaults {
    fn default() -> Self {
        Self {
            width: 960,
            height: 540,
            frame_index: 0,
        }
    }
}

/// A `*.json` case file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CaseFile {
    name: Option<String>,
    input: Option<PathBuf>,
    pattern: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    frame_index: Option<u64>,
    /// Expected hash kept inline by older tooling, before the baseline store.
    #[serde(default)]
    sha256: Option<String>,
}

/// Scan `dir` for fixtures and return them sorted by name.
///
/// `*.json` files describe a case explicitly; `*.html` files are documents
/// rendered with `defaults`. Anything else is ignored. An empty result, after
/// filtering, is an error.
pub fn discover(
    dir: &Path,
    defaults: FixtureDefaults,
    filter: Option<&Regex>,
) -> Result<Vec<Fixture>, ConfigurationError> {
    let entries = fs::read_dir(dir).map_err(|err| ConfigurationError::UnreadableFixtureDir {
        path: dir.to_path_buf(),
        reason: err.to_string(),
    })?;

    let mut fixtures = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| ConfigurationError::UnreadableFixtureDir {
            path: dir.to_path_buf(),
            reason: err.to_string(),
        })?;
        let path = entry.path();
        let fixture = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => from_case_file(&path, dir, defaults)?,
            Some("html") => from_document(&path, defaults)?,
            _ => {
                debug!(path = %path.display(), "skipping non-fixture file");
                continue;
            }
        };
        fixtures.push(fixture);
    }

    if let Some(filter) = filter {
        fixtures.retain(|fixture| filter.is_match(&fixture.name));
    }

    validate(&mut fixtures)?;
    if fixtures.is_empty() {
        return Err(ConfigurationError::NoFixtures(dir.to_path_buf()));
    }

    info!(count = fixtures.len(), dir = %dir.display(), "discovered fixtures");
    Ok(fixtures)
}

/// Sort by name and enforce unique, file-safe names and nonzero dimensions.
pub fn validate(fixtures: &mut [Fixture]) -> Result<(), ConfigurationError> {
    fixtures.sort_by(|a, b| a.name.cmp(&b.name));

    let mut seen = BTreeSet::new();
    for fixture in fixtures.iter() {
        if !is_valid_name(&fixture.name) {
            return Err(ConfigurationError::InvalidName(fixture.name.clone()));
        }
        if fixture.width == 0 || fixture.height == 0 {
            return Err(ConfigurationError::InvalidDimensions {
                name: fixture.name.clone(),
                width: fixture.width,
                height: fixture.height,
            });
        }
        if !seen.insert(fixture.name.as_str()) {
            return Err(ConfigurationError::DuplicateFixture(fixture.name.clone()));
        }
    }
    Ok(())
}

/// Names become file stems in the baseline and diff directories.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', ':'])
        && !name.chars().any(char::is_control)
}

fn from_case_file(
    path: &Path,
    dir: &Path,
    defaults: FixtureDefaults,
) -> Result<Fixture, ConfigurationError> {
    let invalid = |reason: String| ConfigurationError::InvalidFixtureFile {
        path: path.to_path_buf(),
        reason,
    };

    let content = fs::read_to_string(path).map_err(|err| invalid(err.to_string()))?;
    let case: CaseFile = serde_json::from_str(&content).map_err(|err| invalid(err.to_string()))?;

    let input = match (case.input, case.pattern) {
        (Some(_), Some(_)) => {
            return Err(invalid("set either `input` or `pattern`, not both".to_string()));
        }
        // Document paths in case files are relative to the fixture directory.
        (Some(input), None) => FixtureInput::Document(match input.is_absolute() {
            true => input,
            false => dir.join(input),
        }),
        (None, Some(pattern)) => FixtureInput::Pattern(pattern),
        (None, None) => FixtureInput::Pattern(DEFAULT_PATTERN.to_string()),
    };

    let inline_digest = case
        .sha256
        .as_deref()
        .map(|hex| {
            Digest::parse(hex)
                .ok_or_else(|| invalid(format!("`sha256` is not a SHA-256: {hex}")))
        })
        .transpose()?;

    Ok(Fixture {
        name: match case.name {
            Some(name) => name,
            None => file_stem(path)?,
        },
        input,
        width: case.width.unwrap_or(defaults.width),
        height: case.height.unwrap_or(defaults.height),
        frame_index: case.frame_index.unwrap_or(defaults.frame_index),
        inline_digest,
    })
}

fn from_document(path: &Path, defaults: FixtureDefaults) -> Result<Fixture, ConfigurationError> {
    Ok(Fixture {
        name: file_stem(path)?,
        input: FixtureInput::Document(path.to_path_buf()),
        width: defaults.width,
        height: defaults.height,
        frame_index: defaults.frame_index,
        inline_digest: None,
    })
}

fn file_stem(path: &Path) -> Result<String, ConfigurationError> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .ok_or_else(|| ConfigurationError::InvalidName(path.display().to_string()))
}
