use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Recursively ensure a directory exists.
pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory {}", path.display()))
}

/// Ensure an empty regular file (and its parent directories) exist, without
/// truncating one that is already there.
pub fn ensure_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    if !path.exists() {
        fs::File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
    }
    Ok(())
}
