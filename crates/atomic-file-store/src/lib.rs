//! # Atomic File Store
//!
//! Crash-safe persistence primitives for background jobs that share files with
//! readers and with each other.
//!
//! Two building blocks are provided:
//!
//! - **Atomic writes**: content is written to a temp file inside a private,
//!   uniquely-named scratch directory and then renamed over the destination.
//!   Readers observe either the previous complete content or the new complete
//!   content, never a partial write, as long as the scratch directory and the
//!   destination live on the same filesystem.
//! - **Lock files**: advisory mutual exclusion over a resource path, represented
//!   by the existence of a sibling `<path>.lock` file. Acquisition uses exclusive
//!   create and retries with a linearly growing backoff until a wait budget is
//!   exhausted.
//!
//! ## Atomic Writes
//!
//! ```rust
//! use atomic_file_store::AtomicWriter;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let writer = AtomicWriter::new("/var/lib/rabbits/atomic").await?;
//!
//! // Replace a file in one step (like std::fs::write, but all-or-nothing)
//! writer.write_file_atomically("/var/lib/rabbits/out/wind.json", b"{}").await?;
//!
//! // Pipe a stream into place; the destination is untouched if the stream fails
//! let mut source = tokio::fs::File::open("/tmp/download.part").await?;
//! writer.stream_to_file(&mut source, "/var/lib/rabbits/out/radar.bin").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Lock Files
//!
//! ```rust
//! use atomic_file_store::{FileLock, LockPolicy};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let lock = FileLock::new(LockPolicy::default());
//!
//! lock.acquire("/var/lib/rabbits/out/inventory.json").await?;
//! // ... read-modify-write the inventory ...
//! lock.release("/var/lib/rabbits/out/inventory.json").await?;
//!
//! // Or scope the critical section, releasing on success and on error
//! let entries = lock
//!     .with_lock("/var/lib/rabbits/out/inventory.json", || async {
//!         Ok::<_, atomic_file_store::FileStoreError>(42)
//!     })
//!     .await?;
//! # let _ = entries;
//! # Ok(())
//! # }
//! ```
//!
//! ## Filesystem Layout
//!
//! - Lock token: `<resource path>.lock`
//! - Scratch parent: chosen by the caller, created once with mode `0o775`
//! - Scratch subdirectories: one per write, named with a random UUID, removed
//!   right after the rename. A write whose source stream fails leaves its
//!   scratch subdirectory behind for a separate sweep.

pub mod atomic;
pub mod directories;
pub mod error;
pub mod lock;
pub mod policy;

pub use atomic::AtomicWriter;
pub use directories::{absolute_path, make_absolute_path, mkdir_p};
pub use error::{FileStoreError, Result};
pub use lock::{FileLock, lock_path_for};
pub use policy::LockPolicy;
