//! Sanctuary type definitions

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// A perpetually re-run unit of background work.
///
/// A rabbit is identified by the reference to its executable logic, normally a
/// path. Two rabbits with the same reference are the same rabbit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rabbit(Arc<str>);

impl Rabbit {
    pub fn new<S: AsRef<str>>(reference: S) -> Self {
        Self(Arc::from(reference.as_ref()))
    }

    /// The full reference, passed to the worker as its only argument
    pub fn reference(&self) -> &str {
        &self.0
    }

    pub fn path(&self) -> &Path {
        Path::new(&*self.0)
    }

    /// Base name without extension, used to prefix every log line
    pub fn name(&self) -> &str {
        self.path()
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(self.reference())
    }
}

impl fmt::Display for Rabbit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Rabbit {
    fn from(reference: &str) -> Self {
        Self::new(reference)
    }
}

impl From<String> for Rabbit {
    fn from(reference: String) -> Self {
        Self(Arc::from(reference))
    }
}

impl From<&String> for Rabbit {
    fn from(reference: &String) -> Self {
        Self::new(reference)
    }
}

impl From<&Path> for Rabbit {
    fn from(path: &Path) -> Self {
        Self::new(path.to_string_lossy())
    }
}

/// What happened to a rabbit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RabbitEventKind {
    /// A run is about to start
    Trying,
    /// The run finished successfully
    Succeeded,
    /// The run failed; `detail` is the full failure text
    Failed { detail: String },
    /// The rabbit will wait `delay` before re-entering the queue
    Retrying { delay: Duration },
    /// The rabbit is back in the queue
    Requeued,
    /// A doomed rabbit was dequeued and forgotten
    Purged,
}

/// Lifecycle notification broadcast by the scheduler
#[derive(Debug, Clone)]
pub struct RabbitEvent {
    pub rabbit: Rabbit,
    pub kind: RabbitEventKind,
    pub at: DateTime<Utc>,
}

impl RabbitEvent {
    pub fn new(rabbit: Rabbit, kind: RabbitEventKind) -> Self {
        Self {
            rabbit,
            kind,
            at: Utc::now(),
        }
    }
}

/// Point-in-time copy of the membership sets
///
/// `queued` is in queue order; the other sets are sorted by reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipSnapshot {
    pub known: Vec<Rabbit>,
    pub queued: Vec<Rabbit>,
    pub running: Vec<Rabbit>,
    pub doomed: Vec<Rabbit>,
    pub taken_at: Option<DateTime<Utc>>,
}

impl MembershipSnapshot {
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}
