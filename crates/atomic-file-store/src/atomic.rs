//! Write-to-temp-then-rename file replacement.

use crate::directories::mkdir_p;
use crate::error::{FileStoreError, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::debug;
use uuid::Uuid;

/// Replaces files atomically using a private scratch area.
///
/// The scratch parent must live on the same filesystem as every destination
/// written through this writer, otherwise the final rename is a copy and the
/// all-or-nothing guarantee is lost.
#[derive(Clone, Debug)]
pub struct AtomicWriter {
    scratch_parent: Arc<PathBuf>,
}

impl AtomicWriter {
    /// Create a writer, creating `scratch_parent` (and its parents) if needed.
    ///
    /// # Errors
    /// Returns an error if the scratch parent cannot be created.
    pub async fn new<P: Into<PathBuf>>(scratch_parent: P) -> Result<Self> {
        let scratch_parent = scratch_parent.into();
        mkdir_p(&scratch_parent).await?;

        debug!("AtomicWriter scratch parent ready at {:?}", scratch_parent);

        Ok(Self {
            scratch_parent: Arc::new(scratch_parent),
        })
    }

    pub fn scratch_parent(&self) -> &Path {
        &self.scratch_parent
    }

    /// Replace `destination` with `contents` in one step.
    ///
    /// # Errors
    /// Returns an error if the destination has no file name, or if creating the
    /// scratch directory, writing, renaming or cleaning up fails.
    pub async fn write_file_atomically<P: AsRef<Path>, C: AsRef<[u8]>>(
        &self,
        destination: P,
        contents: C,
    ) -> Result<()> {
        let destination = destination.as_ref();
        let name = temp_file_name(destination)?;
        let scratch = self.create_scratch_dir().await?;
        let temp_file = scratch.join(name);

        let mut file = File::create(&temp_file).await?;
        file.write_all(contents.as_ref()).await?;
        file.sync_all().await?;
        drop(file);

        self.commit(&scratch, &temp_file, destination).await
    }

    /// Copy `source` to the end of stream, then replace `destination` with it.
    ///
    /// If reading `source` fails part way, the destination is left untouched and
    /// the error is returned. The partial temp file and its scratch directory are
    /// not removed in that case. Returns the number of bytes written.
    pub async fn stream_to_file<R, P>(&self, source: &mut R, destination: P) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
        P: AsRef<Path>,
    {
        let destination = destination.as_ref();
        let name = temp_file_name(destination)?;
        let scratch = self.create_scratch_dir().await?;
        let temp_file = scratch.join(name);

        let mut file = File::create(&temp_file).await?;
        let written = tokio::io::copy(source, &mut file).await?;
        file.sync_all().await?;
        drop(file);

        self.commit(&scratch, &temp_file, destination).await?;
        Ok(written)
    }

    async fn create_scratch_dir(&self) -> Result<PathBuf> {
        // create_dir (not create_dir_all) so a name collision is an error
        // rather than two writers sharing a directory
        let scratch = self.scratch_parent.join(Uuid::new_v4().to_string());
        fs::create_dir(&scratch).await?;
        Ok(scratch)
    }

    async fn commit(&self, scratch: &Path, temp_file: &Path, destination: &Path) -> Result<()> {
        fs::rename(temp_file, destination).await?;
        fs::remove_dir(scratch).await?;

        debug!("Atomically replaced {:?}", destination);
        Ok(())
    }
}

fn temp_file_name(destination: &Path) -> Result<&OsStr> {
    destination
        .file_name()
        .ok_or_else(|| FileStoreError::InvalidDestination {
            path: destination.to_path_buf(),
        })
}
