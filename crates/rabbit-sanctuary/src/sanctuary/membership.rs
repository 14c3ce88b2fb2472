//! Membership state machine for registered rabbits
//!
//! Every rabbit the sanctuary knows about is in exactly one of three places at
//! any time: waiting in the queue, running, or sleeping off a failed run
//! (known but neither queued nor running). Doomed is a flag on top of that,
//! honoured the next time the rabbit comes off the queue.
//!
//! Nothing here is async or locked; the scheduler owns one `Membership` behind
//! a mutex and every method call is one indivisible step.

use super::types::{MembershipSnapshot, Rabbit};
use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

/// Result of admitting a rabbit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Unknown rabbit, now known and at the back of the queue
    Queued,
    /// Known rabbit that had been doomed; the removal is cancelled
    Revived,
    /// Known rabbit, nothing changed
    AlreadyKnown,
}

/// A rabbit taken off the front of the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dequeued {
    /// The rabbit was doomed and has now been forgotten
    Purged(Rabbit),
    /// The rabbit is now running and its cycle must be started
    Launch(Rabbit),
}

#[derive(Debug, Default)]
pub struct Membership {
    known: HashSet<Rabbit>,
    queued: VecDeque<Rabbit>,
    running: HashSet<Rabbit>,
    doomed: HashSet<Rabbit>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rabbit. Unknown rabbits join the back of the queue; known
    /// rabbits only lose their doomed flag, they are never queued twice.
    pub fn admit(&mut self, rabbit: Rabbit) -> Admission {
        if self.known.contains(&rabbit) {
            if self.doomed.remove(&rabbit) {
                debug!("Revived doomed rabbit {}", rabbit);
                Admission::Revived
            } else {
                Admission::AlreadyKnown
            }
        } else {
            self.known.insert(rabbit.clone());
            self.queued.push_back(rabbit);
            Admission::Queued
        }
    }

    /// Mark a known rabbit for removal. Returns false for unknown rabbits.
    pub fn doom(&mut self, rabbit: &Rabbit) -> bool {
        if self.known.contains(rabbit) {
            self.doomed.insert(rabbit.clone());
            true
        } else {
            false
        }
    }

    /// Take the front of the queue.
    ///
    /// A doomed rabbit is forgotten entirely. Any other rabbit moves straight
    /// into Running.
    pub fn pop(&mut self) -> Option<Dequeued> {
        let rabbit = self.queued.pop_front()?;

        if self.doomed.remove(&rabbit) {
            self.known.remove(&rabbit);
            Some(Dequeued::Purged(rabbit))
        } else {
            self.running.insert(rabbit.clone());
            Some(Dequeued::Launch(rabbit))
        }
    }

    /// A run has ended, successfully or not
    pub fn finish(&mut self, rabbit: &Rabbit) {
        if !self.running.remove(rabbit) {
            warn!("Finished rabbit {} was not running", rabbit);
        }
    }

    /// Put a rabbit back at the end of the queue after its cycle.
    ///
    /// Returns false (and changes nothing) if the rabbit is no longer known,
    /// or is already queued or running.
    pub fn requeue(&mut self, rabbit: Rabbit) -> bool {
        if !self.known.contains(&rabbit) {
            warn!("Ignoring requeue of unknown rabbit {}", rabbit);
            return false;
        }
        if self.running.contains(&rabbit) || self.queued.contains(&rabbit) {
            warn!("Ignoring requeue of rabbit {} that is already scheduled", rabbit);
            return false;
        }

        self.queued.push_back(rabbit);
        true
    }

    pub fn is_known(&self, rabbit: &Rabbit) -> bool {
        self.known.contains(rabbit)
    }

    pub fn is_queued(&self, rabbit: &Rabbit) -> bool {
        self.queued.contains(rabbit)
    }

    pub fn is_running(&self, rabbit: &Rabbit) -> bool {
        self.running.contains(rabbit)
    }

    pub fn is_doomed(&self, rabbit: &Rabbit) -> bool {
        self.doomed.contains(rabbit)
    }

    #[cfg(test)]
    fn queue_len(&self) -> usize {
        self.queued.len()
    }

    pub fn snapshot(&self) -> MembershipSnapshot {
        fn sorted(set: &HashSet<Rabbit>) -> Vec<Rabbit> {
            let mut rabbits: Vec<Rabbit> = set.iter().cloned().collect();
            rabbits.sort();
            rabbits
        }

        MembershipSnapshot {
            known: sorted(&self.known),
            queued: self.queued.iter().cloned().collect(),
            running: sorted(&self.running),
            doomed: sorted(&self.doomed),
            taken_at: Some(Utc::now()),
        }
    }
}
