//! tempfile wrappers with error context

use anyhow::Context;
use std::path::{Path, PathBuf};

/// Create a temp directory with a helpful error message.
pub fn create_temp_dir() -> anyhow::Result<tempfile::TempDir> {
    tempfile::tempdir().context("Failed to create temporary directory for test")
}

/// Write a fake bitstream image named `name` into `dir`.
///
/// The sim backend only reads the image, so any bytes will do.
pub fn write_bitstream(dir: &Path, name: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, bytes)
        .with_context(|| format!("Failed to write bitstream fixture {}", path.display()))?;
    Ok(path)
}
