//! The sanctuary: keeps every registered rabbit running forever
//!
//! Each rabbit goes round the same cycle independently of the others:
//!
//! 1. It comes off the queue and is marked running.
//! 2. It runs once, bounded by the run timeout.
//! 3. It leaves Running and the queue is drained.
//! 4. After a failure it sleeps for the retry delay.
//! 5. It goes back on the queue and the queue is drained again.
//!
//! Draining is synchronous. It pops the whole queue under the membership lock
//! and spawns one task per launched rabbit, so it never waits on a run.

use super::membership::{Admission, Dequeued, Membership};
use super::runner::{ProcessRunner, RabbitRunner};
use super::types::{MembershipSnapshot, Rabbit, RabbitEvent, RabbitEventKind};
use crate::config::{Config, SanctuaryConfig};
use crate::utils::describe_duration;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, warn};

/// Perpetual scheduler for a set of rabbits.
///
/// Cheap to clone; clones share the same membership. Registering rabbits
/// spawns tasks, so it must happen inside a tokio runtime.
#[derive(Clone)]
pub struct Sanctuary {
    inner: Arc<Inner>,
}

struct Inner {
    membership: Mutex<Membership>,
    runner: Arc<dyn RabbitRunner>,
    config: SanctuaryConfig,
    events: broadcast::Sender<RabbitEvent>,
    shutdown: CancellationToken,
    cycles: TaskTracker,
}

impl Sanctuary {
    pub fn new(config: SanctuaryConfig, runner: Arc<dyn RabbitRunner>) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));

        Self {
            inner: Arc::new(Inner {
                membership: Mutex::new(Membership::new()),
                runner,
                config,
                events,
                shutdown: CancellationToken::new(),
                cycles: TaskTracker::new(),
            }),
        }
    }

    /// Sanctuary that runs rabbits as child processes per `config.worker`,
    /// handing them the configured scratch directory and lock backoff
    pub fn with_process_runner(config: &Config) -> Self {
        let runner = ProcessRunner::from_config(&config.worker)
            .with_scratch_directory(&config.storage.scratch_directory)
            .with_lock_policy(config.lock);
        Self::new(config.sanctuary.clone(), Arc::new(runner))
    }

    /// Add rabbits, in order, then drain the queue.
    ///
    /// Unknown rabbits are queued. Known rabbits are never queued a second
    /// time; a pending removal is cancelled instead.
    pub fn register<I, R>(&self, rabbits: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<Rabbit>,
    {
        {
            let mut membership = self.inner.membership();
            for rabbit in rabbits {
                let rabbit = rabbit.into();
                match membership.admit(rabbit.clone()) {
                    Admission::Queued => debug!("Registered rabbit {}", rabbit),
                    Admission::Revived => info!("Rabbit {} will no longer be removed", rabbit),
                    Admission::AlreadyKnown => debug!("Rabbit {} is already registered", rabbit),
                }
            }
        }

        self.inner.drain();
    }

    pub fn register_one<R: Into<Rabbit>>(&self, rabbit: R) {
        self.register(std::iter::once(rabbit));
    }

    /// Mark a rabbit for removal.
    ///
    /// A run in progress is not interrupted. The rabbit is forgotten the next
    /// time it comes off the queue. Returns false if the rabbit is unknown.
    pub fn deregister(&self, rabbit: &Rabbit) -> bool {
        let doomed = self.inner.membership().doom(rabbit);
        if doomed {
            info!("Rabbit {} will be removed after its current cycle", rabbit);
        } else {
            debug!("Ignoring deregistration of unknown rabbit {}", rabbit);
        }
        doomed
    }

    /// Receive lifecycle events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<RabbitEvent> {
        self.inner.events.subscribe()
    }

    pub fn snapshot(&self) -> MembershipSnapshot {
        self.inner.membership().snapshot()
    }

    /// Log who is known, queued, running and doomed
    pub fn dump_status(&self) {
        let snapshot = self.snapshot();

        info!(
            "Sanctuary status: {} known, {} queued, {} running, {} doomed",
            snapshot.known.len(),
            snapshot.queued.len(),
            snapshot.running.len(),
            snapshot.doomed.len()
        );
        for rabbit in &snapshot.known {
            let state = if snapshot.running.contains(rabbit) {
                "running"
            } else if snapshot.queued.contains(rabbit) {
                "queued"
            } else {
                "waiting to retry"
            };
            let doomed = if snapshot.doomed.contains(rabbit) {
                " (doomed)"
            } else {
                ""
            };
            info!("  {}: {}{}", rabbit, state, doomed);
        }
    }

    /// Stop every cycle and wait for them to end.
    ///
    /// Runs in progress are abandoned, which kills their worker processes.
    /// Rabbits registered afterwards are not launched.
    pub async fn shutdown(&self) {
        info!("Stopping sanctuary");
        self.inner.shutdown.cancel();
        self.inner.cycles.close();
        self.inner.cycles.wait().await;
        info!("Sanctuary stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

impl Inner {
    fn membership(&self) -> MutexGuard<'_, Membership> {
        self.membership
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Pop the whole queue, forgetting doomed rabbits and launching the rest.
    fn drain(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            return;
        }

        let mut membership = self.membership();
        while let Some(dequeued) = membership.pop() {
            match dequeued {
                Dequeued::Purged(rabbit) => {
                    info!(rabbit = %rabbit, "{}: Removed", rabbit.name());
                    self.publish(rabbit, RabbitEventKind::Purged);
                }
                Dequeued::Launch(rabbit) => {
                    let inner = Arc::clone(self);
                    self.cycles.spawn(inner.cycle(rabbit).in_current_span());
                }
            }
        }
    }

    /// One run of one rabbit, ending with it back on the queue
    async fn cycle(self: Arc<Self>, rabbit: Rabbit) {
        info!(rabbit = %rabbit, "{}: Trying...", rabbit.name());
        self.publish(rabbit.clone(), RabbitEventKind::Trying);

        let outcome = tokio::select! {
            outcome = self.runner.run(&rabbit, self.config.run_timeout) => outcome,
            _ = self.shutdown.cancelled() => {
                debug!("Abandoning run of {} for shutdown", rabbit);
                self.membership().finish(&rabbit);
                return;
            }
        };

        let retry = match outcome {
            Ok(()) => {
                info!(rabbit = %rabbit, "{}: Success!", rabbit.name());
                self.publish(rabbit.clone(), RabbitEventKind::Succeeded);
                false
            }
            Err(e) => {
                let detail = e.to_string();
                for line in detail.lines() {
                    warn!(rabbit = %rabbit, "{}: {}", rabbit.name(), line);
                }
                self.publish(rabbit.clone(), RabbitEventKind::Failed { detail });

                let delay = self.config.retry_delay;
                info!(
                    rabbit = %rabbit,
                    "{}: Retrying in {}...",
                    rabbit.name(),
                    describe_duration(&delay)
                );
                self.publish(rabbit.clone(), RabbitEventKind::Retrying { delay });
                true
            }
        };

        self.membership().finish(&rabbit);
        self.drain();

        if retry {
            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_delay) => {}
                _ = self.shutdown.cancelled() => return,
            }
        }

        if self.membership().requeue(rabbit.clone()) {
            debug!("Requeued rabbit {}", rabbit);
            self.publish(rabbit, RabbitEventKind::Requeued);
        }
        self.drain();
    }

    fn publish(&self, rabbit: Rabbit, kind: RabbitEventKind) {
        // no subscribers is fine
        let _ = self.events.send(RabbitEvent::new(rabbit, kind));
    }
}
