use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use super::hasher::Digest;

/// What the renderer should draw for a fixture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureInput {
    /// A test document on disk.
    Document(PathBuf),
    /// A synthetic pattern built into the renderer.
    Pattern(String),
}

impl fmt::Display for FixtureInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Document(path) => write!(f, "document:{}", path.display()),
            Self::Pattern(name) => write!(f, "pattern:{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixture {
    pub name: String,
    pub input: FixtureInput,
    pub width: u32,
    pub height: u32,
    pub frame_index: u64,
    /// Expected digest kept inline in an older case file. Consulted only when
    /// the baseline store has no record for this fixture.
    pub inline_digest: Option<Digest>,
}

impl Fixture {
    /// Byte length of a complete RGBA8 frame for this fixture.
    pub fn expected_len(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * 4
    }

    pub fn request(&self, pixels_out: PathBuf, metadata_out: PathBuf) -> RenderRequest {
        RenderRequest {
            fixture: self.name.clone(),
            input: self.input.clone(),
            width: self.width,
            height: self.height,
            frame_index: self.frame_index,
            pixels_out,
            metadata_out,
        }
    }
}

/// One renderer invocation: the fixture parameters plus where outputs go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub fixture: String,
    pub input: FixtureInput,
    pub width: u32,
    pub height: u32,
    pub frame_index: u64,
    pub pixels_out: PathBuf,
    pub metadata_out: PathBuf,
}

/// A single metadata value. Renderers only emit integers and strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Int(i64),
    Str(String),
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Str(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

/// Rendering parameters the renderer reports it actually used.
///
/// Keys are kept ordered so serialized metadata is byte-stable.
pub type Metadata = BTreeMap<String, MetaValue>;

/// Keys whose values differ between two metadata maps, including keys present
/// on only one side.
pub fn metadata_drift(expected: &Metadata, actual: &Metadata) -> Vec<String> {
    let keys: BTreeSet<&String> = expected
        .keys()
        .chain(actual.keys())
        .filter(|key| expected.get(*key) != actual.get(*key))
        .collect();
    keys.into_iter().cloned().collect()
}

/// Outputs of a successful render, still living in the cycle's work directory.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutput {
    pub pixels: PathBuf,
    pub metadata_path: PathBuf,
    pub metadata: Metadata,
}
