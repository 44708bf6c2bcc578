use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Write `bytes` to `path` through a temp file in the same directory so
/// readers never see a partially written file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = temp_beside(path)?;
    tmp.write_all(bytes)
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;
    persist(tmp, path)
}

/// Stream `src` into `dest` atomically. Returns the number of bytes copied.
pub fn copy_atomic(src: &Path, dest: &Path) -> Result<u64> {
    let mut input =
        File::open(src).with_context(|| format!("failed to open {}", src.display()))?;
    let mut tmp = temp_beside(dest)?;
    let copied = io::copy(&mut input, &mut tmp).with_context(|| {
        format!("failed to copy {} to {}", src.display(), dest.display())
    })?;
    persist(tmp, dest)?;
    Ok(copied)
}

/// Remove a file, treating "already gone" as success. Returns whether it existed.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}

fn temp_beside(path: &Path) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))
}

fn persist(tmp: NamedTempFile, path: &Path) -> Result<()> {
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to move temp file into {}", path.display()))?;
    Ok(())
}
