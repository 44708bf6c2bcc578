use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Bytes pulled from the stream per read.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Lowercase hex SHA-256 of a pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Accept a hex SHA-256 written by hand or by older tooling. Case is
    /// normalized; anything other than 64 hex digits is rejected.
    pub fn parse(hex: &str) -> Option<Self> {
        let hex = hex.trim();
        match hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            true => Some(Self(hex.to_ascii_lowercase())),
            false => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for console output.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digest a stream incrementally, never holding more than one chunk in memory.
pub fn digest_reader<R: Read>(mut reader: R) -> io::Result<Digest> {
    let mut hasher = Sha256::new();
    let mut chunk = vec![0u8; CHUNK_SIZE];
    loop {
        let read = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        hasher.update(&chunk[..read]);
    }
    Ok(Digest(format!("{:x}", hasher.finalize())))
}

pub fn digest_file(path: &Path) -> io::Result<Digest> {
    digest_reader(File::open(path)?)
}

pub fn digest_bytes(bytes: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Digest(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reader that hands out at most `step` bytes per call.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_known_vectors() {
        assert_eq!(
            digest_bytes(b"").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            digest_bytes(b"abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_reader_matches_bytes_across_chunk_boundaries() {
        let data: Vec<u8> = (0..CHUNK_SIZE * 2 + 17).map(|i| (i % 251) as u8).collect();
        let streamed = digest_reader(&data[..]).unwrap();
        assert_eq!(streamed, digest_bytes(&data));

        let trickled = digest_reader(Trickle {
            data: &data,
            step: 4093,
        })
        .unwrap();
        assert_eq!(trickled, streamed);
    }

    #[test]
    fn test_digest_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.rgba");
        std::fs::write(&path, [1u8, 2, 3, 4]).unwrap();
        assert_eq!(digest_file(&path).unwrap(), digest_bytes(&[1, 2, 3, 4]));
        assert!(digest_file(&dir.path().join("missing.rgba")).is_err());
    }

    #[test]
    fn test_short_prefix() {
        let digest = digest_bytes(b"abc");
        assert_eq!(digest.short(), "ba7816bf8f01");
        assert_eq!(digest.as_str().len(), 64);
    }

    #[test]
    fn test_parse_normalizes_case_and_rejects_garbage() {
        let digest = digest_bytes(b"abc");
        assert_eq!(Digest::parse(&digest.as_str().to_uppercase()), Some(digest.clone()));
        assert_eq!(Digest::parse(&format!(" {digest}\n")), Some(digest));
        assert_eq!(Digest::parse("abc"), None);
        assert_eq!(Digest::parse(&"g".repeat(64)), None);
    }
}
