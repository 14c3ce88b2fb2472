pub mod config;
pub mod errors;
pub mod sanctuary;
pub mod utils;

pub use config::Config;
pub use errors::{AppError, AppResult, RabbitError};
pub use sanctuary::{ProcessRunner, Rabbit, RabbitEvent, RabbitEventKind, RabbitRunner, Sanctuary};
