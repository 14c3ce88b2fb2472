//! Perpetual scheduling of rabbits
//!
//! - `membership`: the Known / Queued / Running / Doomed state machine
//! - `runner`: runs one rabbit in a worker process under a time limit
//! - `scheduler`: the `Sanctuary`, which drains the queue and loops every
//!   rabbit forever

pub mod membership;
pub mod runner;
pub mod scheduler;
pub mod types;

pub use membership::{Admission, Dequeued, Membership};
pub use runner::{ProcessRunner, RabbitRunner};
pub use scheduler::Sanctuary;
pub use types::*;
