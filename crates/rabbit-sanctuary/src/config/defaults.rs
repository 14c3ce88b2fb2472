/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Sanctuary defaults
pub const DEFAULT_RETRY_DELAY: &str = "5m";
pub const DEFAULT_RUN_TIMEOUT: &str = "5m";
pub const DEFAULT_EVENT_BUFFER: usize = 256;

// Storage defaults
pub const DEFAULT_SCRATCH_DIRECTORY: &str = "./atomic";

// Environment overrides, e.g. RABBIT_SANCTUARY_SANCTUARY__RETRY_DELAY=30s
pub const ENV_PREFIX: &str = "RABBIT_SANCTUARY_";
pub const ENV_SEPARATOR: &str = "__";

// Exported to every rabbit process
pub const SCRATCH_DIRECTORY_ENV: &str = "RABBIT_SANCTUARY_SCRATCH_DIRECTORY";

// Lock backoff exported to every rabbit process, in the same form as the
// config overrides so a rabbit loading `Config` picks them up
pub const LOCK_INITIAL_BACKOFF_ENV: &str = "RABBIT_SANCTUARY_LOCK__INITIAL_BACKOFF_MS";
pub const LOCK_BACKOFF_STEP_ENV: &str = "RABBIT_SANCTUARY_LOCK__BACKOFF_STEP_MS";
pub const LOCK_MAX_TOTAL_BACKOFF_ENV: &str = "RABBIT_SANCTUARY_LOCK__MAX_TOTAL_BACKOFF_MS";
