//! File system-related utilities.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::Error;

/// Canonicalize the given path if it exists. If it does not exist, returns
/// `Ok(None)`.
pub fn maybe_canonicalize<P>(path: P) -> Result<Option<PathBuf>, Error>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if path.exists() {
        let canonical = path
            .canonicalize()
            .map_err(|e| Error::Io(format!("while canonicalizing {}", path.display()), e))?;
        Ok(Some(canonical))
    } else {
        Ok(None)
    }
}

/// Create the given directory (and its parents) unless it already exists.
pub fn ensure_path_exists(path: &Path) -> std::io::Result<()> {
    if !path.is_dir() {
        fs::create_dir_all(path)?;
        debug!("Created path: {}", path.display());
    }
    Ok(())
}
