//! Advisory lock files.
//!
//! Holding the lock on a resource means having created `<resource>.lock`.
//! There is no in-process fast path and no fairness between waiters; whoever
//! wins the exclusive create owns the lock.

use crate::error::{FileStoreError, Result};
use crate::policy::LockPolicy;
use std::ffi::OsString;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tracing::{debug, warn};

const LOCK_SUFFIX: &str = ".lock";

/// Path of the lock token guarding `resource`.
pub fn lock_path_for<P: AsRef<Path>>(resource: P) -> PathBuf {
    let mut lock: OsString = resource.as_ref().as_os_str().to_os_string();
    lock.push(LOCK_SUFFIX);
    PathBuf::from(lock)
}

/// Lock file acquirer with a fixed backoff policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLock {
    policy: LockPolicy,
}

impl FileLock {
    pub fn new(policy: LockPolicy) -> Self {
        Self { policy }
    }

    /// Take the lock on `resource`, waiting with linear backoff while another
    /// holder has it.
    ///
    /// # Errors
    /// - [`FileStoreError::LockTimeout`] once the cumulative wait budget is spent
    /// - [`FileStoreError::Io`] for any create failure other than "already exists"
    pub async fn acquire<P: AsRef<Path>>(&self, resource: P) -> Result<()> {
        let resource = resource.as_ref();
        let lock = lock_path_for(resource);
        let mut sleeps = self.policy.schedule().into_iter();
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock)
                .await
            {
                Ok(_) => {
                    debug!("Acquired lock {:?} after {} attempt(s)", lock, attempts);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => match sleeps.next() {
                    Some(backoff) => {
                        debug!("Lock {:?} is held, retrying in {:?}", lock, backoff);
                        tokio::time::sleep(backoff).await;
                    }
                    None => {
                        warn!(
                            "Giving up on lock {:?} after {} attempts",
                            lock, attempts
                        );
                        return Err(FileStoreError::LockTimeout {
                            path: resource.to_path_buf(),
                        });
                    }
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Drop the lock on `resource` by deleting its token.
    ///
    /// Releasing a lock that is not held is a caller error and surfaces the
    /// underlying removal failure.
    pub async fn release<P: AsRef<Path>>(&self, resource: P) -> Result<()> {
        let lock = lock_path_for(resource);
        fs::remove_file(&lock).await?;
        debug!("Released lock {:?}", lock);
        Ok(())
    }

    /// Run `f` while holding the lock on `resource`.
    ///
    /// The lock is released whether `f` succeeds or fails. An error from `f`
    /// takes precedence over a release failure.
    pub async fn with_lock<P, F, Fut, T, E>(&self, resource: P, f: F) -> std::result::Result<T, E>
    where
        P: AsRef<Path>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<FileStoreError>,
    {
        let resource = resource.as_ref();
        self.acquire(resource).await?;

        let outcome = f().await;
        let released = self.release(resource).await;

        match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), released) => {
                if let Err(release_err) = released {
                    warn!("Failed to release lock on {:?}: {}", resource, release_err);
                }
                Err(e)
            }
        }
    }
}
