use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Reserves `file_name` inside a fresh temporary directory. The directory, and
/// whatever an external tool writes there, is removed when the `TempDir` drops.
pub fn create_temp_file<P: AsRef<Path>>(file_name: P) -> Result<(TempDir, PathBuf)> {
    let temp_dir = tempfile::Builder::new()
        .prefix("episplit")
        .tempdir()
        .context("Failed to create temporary directory")?;
    let temp_path = temp_dir.path().join(
        file_name
            .as_ref()
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("Invalid temp filename"))?,
    );

    Ok((temp_dir, temp_path))
}
