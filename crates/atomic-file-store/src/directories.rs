//! Directory creation and path resolution helpers.

use crate::error::{FileStoreError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Permission bits applied to directories this crate creates (Unix only).
pub const DIRECTORY_MODE: u32 = 0o775;

/// Create a directory and all of its parents, like `mkdir -p`.
///
/// Directories created here get [`DIRECTORY_MODE`] (less the process umask).
/// Directories that already exist keep their permissions. Succeeds if the
/// directory already exists.
pub async fn mkdir_p<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();

    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(DIRECTORY_MODE);

    builder
        .create(path)
        .await
        .map_err(|e| FileStoreError::DirectoryCreation {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Resolve `relative` against `base`. Absolute inputs are returned unchanged.
pub fn absolute_path<B: AsRef<Path>, R: AsRef<Path>>(base: B, relative: R) -> PathBuf {
    let relative = relative.as_ref();
    if relative.is_absolute() {
        relative.to_path_buf()
    } else {
        base.as_ref().join(relative)
    }
}

/// Resolve `relative` against `base` and make sure the directory exists.
pub async fn make_absolute_path<B: AsRef<Path>, R: AsRef<Path>>(
    base: B,
    relative: R,
) -> Result<PathBuf> {
    let path = absolute_path(base, relative);
    mkdir_p(&path).await?;
    Ok(path)
}
