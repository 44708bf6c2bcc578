//! Pass/fail decision for one fixture and first-divergence localization.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;

use super::baseline::Baseline;
use super::hasher::Digest;
use super::models::{Metadata, RenderOutput, metadata_drift};

const BYTES_PER_PIXEL: u64 = 4;
const SCAN_CHUNK: usize = 64 * 1024;

/// Where in the pixel grid a byte offset lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelCoord {
    pub index: u64,
    pub x: u64,
    pub y: u64,
}

/// First point at which actual output diverges from the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    pub byte_offset: u64,
    /// RGBA channel, 0 through 3.
    pub channel: u8,
    /// Omitted when the row width is unknown or zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel: Option<PixelCoord>,
}

impl Divergence {
    pub fn decode(byte_offset: u64, width: u32) -> Self {
        let index = byte_offset / BYTES_PER_PIXEL;
        let pixel = match width {
            0 => None,
            width => Some(PixelCoord {
                index,
                x: index % u64::from(width),
                y: index / u64::from(width),
            }),
        };
        Self {
            byte_offset,
            channel: (byte_offset % BYTES_PER_PIXEL) as u8,
            pixel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchReason {
    MissingBaseline,
    Digest,
    Metadata,
    DigestAndMetadata,
}

/// Everything known about a failed comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    pub reason: MismatchReason,
    pub expected_digest: Option<Digest>,
    pub actual_digest: Digest,
    pub expected_len: Option<u64>,
    pub actual_len: u64,
    /// `None` when the buffers are identical or when there is nothing to scan.
    pub divergence: Option<Divergence>,
    /// False when only digest-level comparison was possible.
    pub localized: bool,
    pub metadata_equal: bool,
    pub metadata_drift: Vec<String>,
    pub expected_metadata: Option<Metadata>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Pass,
    Fail(Box<Mismatch>),
}

impl Comparison {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Compare a render against its baseline.
///
/// `width` is the fixture's row width in pixels, used to decode the divergence
/// offset into coordinates.
pub fn compare(
    actual: &RenderOutput,
    actual_digest: &Digest,
    baseline: Option<&Baseline>,
    width: u32,
) -> Result<Comparison> {
    let actual_len = fs::metadata(&actual.pixels)
        .with_context(|| format!("failed to stat {}", actual.pixels.display()))?
        .len();

    let Some(baseline) = baseline else {
        return Ok(Comparison::Fail(Box::new(Mismatch {
            reason: MismatchReason::MissingBaseline,
            expected_digest: None,
            actual_digest: actual_digest.clone(),
            expected_len: None,
            actual_len,
            divergence: None,
            localized: false,
            metadata_equal: false,
            metadata_drift: actual.metadata.keys().cloned().collect(),
            expected_metadata: None,
        })));
    };

    let digest_equal = baseline.digest == *actual_digest;
    let metadata_equal = baseline.metadata == actual.metadata;
    let reason = match (digest_equal, metadata_equal) {
        (true, true) => return Ok(Comparison::Pass),
        (false, true) => MismatchReason::Digest,
        (true, false) => MismatchReason::Metadata,
        (false, false) => MismatchReason::DigestAndMetadata,
    };

    let (divergence, expected_len, localized) = match &baseline.pixels {
        Some(expected_pixels) => {
            let expected_len = fs::metadata(expected_pixels)
                .with_context(|| format!("failed to stat {}", expected_pixels.display()))?
                .len();
            let offset = locate_files(expected_pixels, &actual.pixels)?;
            (
                offset.map(|offset| Divergence::decode(offset, width)),
                Some(expected_len),
                true,
            )
        }
        None => {
            // Digest-only baseline: the best we can say is where lengths part.
            let offset = baseline
                .byte_len
                .filter(|len| *len != actual_len)
                .map(|len| len.min(actual_len));
            (
                offset.map(|offset| Divergence::decode(offset, width)),
                baseline.byte_len,
                false,
            )
        }
    };

    Ok(Comparison::Fail(Box::new(Mismatch {
        reason,
        expected_digest: Some(baseline.digest.clone()),
        actual_digest: actual_digest.clone(),
        expected_len,
        actual_len,
        divergence,
        localized,
        metadata_equal,
        metadata_drift: metadata_drift(&baseline.metadata, &actual.metadata),
        expected_metadata: Some(baseline.metadata.clone()),
    })))
}

/// Byte offset of the first difference between two in-memory buffers.
///
/// Returns the shorter length when one buffer is a strict prefix of the other
/// and `None` when they are identical.
pub fn locate_divergence(expected: &[u8], actual: &[u8]) -> Option<u64> {
    let shared = expected.len().min(actual.len());
    expected[..shared]
        .iter()
        .zip(&actual[..shared])
        .position(|(a, b)| a != b)
        .or((expected.len() != actual.len()).then_some(shared))
        .map(|offset| offset as u64)
}

/// Streaming form of [`locate_divergence`] with bounded memory.
pub fn locate_divergence_streams<A: Read, B: Read>(
    mut expected: A,
    mut actual: B,
) -> io::Result<Option<u64>> {
    let mut left = vec![0u8; SCAN_CHUNK];
    let mut right = vec![0u8; SCAN_CHUNK];
    let mut consumed = 0u64;

    loop {
        let got_left = fill(&mut expected, &mut left)?;
        let got_right = fill(&mut actual, &mut right)?;
        let shared = got_left.min(got_right);

        if let Some(offset) = locate_divergence(&left[..shared], &right[..shared]) {
            return Ok(Some(consumed + offset));
        }
        if got_left != got_right {
            return Ok(Some(consumed + shared as u64));
        }
        if got_left == 0 {
            return Ok(None);
        }
        consumed += shared as u64;
    }
}

fn locate_files(expected: &Path, actual: &Path) -> Result<Option<u64>> {
    let open = |path: &Path| {
        File::open(path)
            .map(BufReader::new)
            .with_context(|| format!("failed to open {}", path.display()))
    };
    locate_divergence_streams(open(expected)?, open(actual)?).with_context(|| {
        format!(
            "failed to scan {} against {}",
            actual.display(),
            expected.display()
        )
    })
}

/// Read until `buf` is full or the stream ends. Short reads never end a chunk early.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::hasher::digest_bytes;
    use crate::internal::models::MetaValue;
    use std::path::PathBuf;

    fn metadata(width: i64) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("width".to_string(), MetaValue::Int(width));
        metadata
    }

    fn write_output(dir: &Path, name: &str, pixels: &[u8], width: i64) -> RenderOutput {
        let path = dir.join(format!("{name}.rgba"));
        fs::write(&path, pixels).unwrap();
        RenderOutput {
            pixels: path,
            metadata_path: dir.join(format!("{name}.meta.json")),
            metadata: metadata(width),
        }
    }

    fn baseline_from(output: &RenderOutput, bytes: &[u8], keep_pixels: bool) -> Baseline {
        Baseline {
            fixture: "plasma".to_string(),
            digest: digest_bytes(bytes),
            byte_len: Some(bytes.len() as u64),
            metadata: output.metadata.clone(),
            pixels: keep_pixels.then(|| output.pixels.clone()),
        }
    }

    #[test]
    fn test_locator_decodes_pixel_and_channel() {
        let expected = [0u8; 16];
        let mut actual = [0u8; 16];
        actual[10] = 0xFF;

        let offset = locate_divergence(&expected, &actual).unwrap();
        let divergence = Divergence::decode(offset, 4);
        assert_eq!(divergence.byte_offset, 10);
        assert_eq!(divergence.channel, 2);
        assert_eq!(divergence.pixel, Some(PixelCoord { index: 2, x: 2, y: 0 }));
    }

    #[test]
    fn test_locator_reports_shorter_length_on_truncation() {
        let expected = [0u8; 16];
        let actual = [0u8; 12];
        assert_eq!(locate_divergence(&expected, &actual), Some(12));
        assert_eq!(locate_divergence(&actual, &expected), Some(12));
    }

    #[test]
    fn test_locator_none_for_identical_buffers() {
        assert_eq!(locate_divergence(&[1, 2, 3], &[1, 2, 3]), None);
        assert_eq!(locate_divergence(&[], &[]), None);
    }

    #[test]
    fn test_decode_with_zero_width_keeps_offset_and_channel() {
        let divergence = Divergence::decode(23, 0);
        assert_eq!(divergence.byte_offset, 23);
        assert_eq!(divergence.channel, 3);
        assert_eq!(divergence.pixel, None);
    }

    #[test]
    fn test_decode_second_row() {
        let divergence = Divergence::decode(4 * 4 * 3 + 4 + 1, 4);
        assert_eq!(divergence.pixel, Some(PixelCoord { index: 13, x: 1, y: 3 }));
        assert_eq!(divergence.channel, 1);
    }

    #[test]
    fn test_streaming_locator_matches_slice_locator_past_chunk_boundary() {
        let expected = vec![7u8; SCAN_CHUNK * 2 + 5];
        let mut actual = expected.clone();
        actual[SCAN_CHUNK + 3] = 8;

        assert_eq!(
            locate_divergence_streams(&expected[..], &actual[..]).unwrap(),
            Some(SCAN_CHUNK as u64 + 3)
        );
        assert_eq!(
            locate_divergence_streams(&expected[..], &expected[..SCAN_CHUNK]).unwrap(),
            Some(SCAN_CHUNK as u64)
        );
        assert_eq!(
            locate_divergence_streams(&expected[..], &expected[..]).unwrap(),
            None
        );
    }

    #[test]
    fn test_compare_pass() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = [3u8; 16];
        let output = write_output(dir.path(), "actual", &bytes, 2);
        let baseline = baseline_from(&output, &bytes, true);

        let result = compare(&output, &digest_bytes(&bytes), Some(&baseline), 2).unwrap();
        assert!(result.is_pass());
    }

    #[test]
    fn test_compare_missing_baseline_fails() {
        let dir = tempfile::tempdir().unwrap();
        let output = write_output(dir.path(), "actual", &[3u8; 16], 2);

        let Comparison::Fail(mismatch) =
            compare(&output, &digest_bytes(&[3u8; 16]), None, 2).unwrap()
        else {
            panic!("expected failure");
        };
        assert_eq!(mismatch.reason, MismatchReason::MissingBaseline);
        assert_eq!(mismatch.expected_digest, None);
        assert_eq!(mismatch.actual_len, 16);
    }

    #[test]
    fn test_compare_pixel_mismatch_localizes() {
        let dir = tempfile::tempdir().unwrap();
        let expected_bytes = [0u8; 16];
        let expected = write_output(dir.path(), "expected", &expected_bytes, 4);
        let baseline = baseline_from(&expected, &expected_bytes, true);

        let mut actual_bytes = [0u8; 16];
        actual_bytes[10] = 0xFF;
        let actual = write_output(dir.path(), "actual", &actual_bytes, 4);

        let Comparison::Fail(mismatch) =
            compare(&actual, &digest_bytes(&actual_bytes), Some(&baseline), 4).unwrap()
        else {
            panic!("expected failure");
        };
        assert_eq!(mismatch.reason, MismatchReason::Digest);
        assert!(mismatch.metadata_equal);
        assert!(mismatch.localized);
        assert_eq!(mismatch.divergence, Some(Divergence::decode(10, 4)));
    }

    #[test]
    fn test_compare_metadata_only_mismatch_fails_without_divergence() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = [1u8; 16];
        let expected = write_output(dir.path(), "expected", &bytes, 100);
        let baseline = baseline_from(&expected, &bytes, true);
        let actual = write_output(dir.path(), "actual", &bytes, 99);

        let Comparison::Fail(mismatch) =
            compare(&actual, &digest_bytes(&bytes), Some(&baseline), 2).unwrap()
        else {
            panic!("expected failure");
        };
        assert_eq!(mismatch.reason, MismatchReason::Metadata);
        assert!(!mismatch.metadata_equal);
        assert_eq!(mismatch.divergence, None);
        assert_eq!(mismatch.metadata_drift, vec!["width".to_string()]);
    }

    #[test]
    fn test_compare_truncated_actual() {
        let dir = tempfile::tempdir().unwrap();
        let expected_bytes = [0u8; 16];
        let expected = write_output(dir.path(), "expected", &expected_bytes, 4);
        let baseline = baseline_from(&expected, &expected_bytes, true);
        let actual = write_output(dir.path(), "actual", &[0u8; 12], 4);

        let Comparison::Fail(mismatch) =
            compare(&actual, &digest_bytes(&[0u8; 12]), Some(&baseline), 4).unwrap()
        else {
            panic!("expected failure");
        };
        assert_eq!(mismatch.divergence.map(|d| d.byte_offset), Some(12));
        assert_eq!(mismatch.expected_len, Some(16));
        assert_eq!(mismatch.actual_len, 12);
    }

    #[test]
    fn test_compare_digest_only_baseline_degrades_to_length() {
        let dir = tempfile::tempdir().unwrap();
        let expected = RenderOutput {
            pixels: PathBuf::from("gone.rgba"),
            metadata_path: PathBuf::from("gone.meta.json"),
            metadata: metadata(4),
        };
        let baseline = baseline_from(&expected, &[0u8; 16], false);

        let same_len = write_output(dir.path(), "same", &[9u8; 16], 4);
        let Comparison::Fail(mismatch) =
            compare(&same_len, &digest_bytes(&[9u8; 16]), Some(&baseline), 4).unwrap()
        else {
            panic!("expected failure");
        };
        assert!(!mismatch.localized);
        assert_eq!(mismatch.divergence, None);

        let shorter = write_output(dir.path(), "short", &[0u8; 8], 4);
        let Comparison::Fail(mismatch) =
            compare(&shorter, &digest_bytes(&[0u8; 8]), Some(&baseline), 4).unwrap()
        else {
            panic!("expected failure");
        };
        assert_eq!(mismatch.divergence.map(|d| d.byte_offset), Some(8));
    }
}
