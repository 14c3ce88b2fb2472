//! Utility modules for the rabbit-sanctuary application

pub mod time;

pub use time::describe_duration;
