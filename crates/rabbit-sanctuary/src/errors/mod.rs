//! Error handling for the rabbit-sanctuary application
//!
//! - [`RabbitError`] describes why a single rabbit run failed. The scheduler
//!   logs it and retries; it never stops the sanctuary.
//! - [`AppError`] covers startup problems such as bad configuration or an
//!   unusable scratch directory.

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Outcome of one rabbit run
pub type RunResult = Result<(), RabbitError>;
