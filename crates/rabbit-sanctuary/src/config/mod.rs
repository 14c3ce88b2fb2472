use anyhow::Result;
use atomic_file_store::{AtomicWriter, LockPolicy};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::errors::{AppError, AppResult};

pub mod defaults;
pub mod duration_serde;

use defaults::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Rabbits registered at startup, in order
    #[serde(default)]
    pub rabbits: Vec<String>,
    #[serde(default)]
    pub sanctuary: SanctuaryConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Backoff used by rabbits that take lock files, exported to each rabbit
    /// process as `RABBIT_SANCTUARY_LOCK__*` variables
    #[serde(default)]
    pub lock: LockPolicy,
}

/// Scheduling behaviour shared by every rabbit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanctuaryConfig {
    /// Pause between a failed run and the next attempt
    #[serde(with = "duration_serde::duration", default = "default_retry_delay")]
    pub retry_delay: Duration,
    /// Longest a single run may take before it is killed
    #[serde(with = "duration_serde::duration", default = "default_run_timeout")]
    pub run_timeout: Duration,
    /// Capacity of the lifecycle event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

/// How rabbit processes are launched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Program that runs each rabbit, e.g. an interpreter. When unset the
    /// rabbit reference itself is executed.
    pub launcher: Option<PathBuf>,
    /// Arguments passed to the launcher ahead of the rabbit reference
    #[serde(default)]
    pub launcher_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Parent of the per-write scratch directories used for atomic writes
    #[serde(default = "default_scratch_directory")]
    pub scratch_directory: PathBuf,
}

fn default_retry_delay() -> Duration {
    humantime::parse_duration(DEFAULT_RETRY_DELAY).unwrap_or(Duration::from_secs(300))
}

fn default_run_timeout() -> Duration {
    humantime::parse_duration(DEFAULT_RUN_TIMEOUT).unwrap_or(Duration::from_secs(300))
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

fn default_scratch_directory() -> PathBuf {
    PathBuf::from(DEFAULT_SCRATCH_DIRECTORY)
}

impl Default for SanctuaryConfig {
    fn default() -> Self {
        Self {
            retry_delay: default_retry_delay(),
            run_timeout: default_run_timeout(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl SanctuaryConfig {
    pub fn validate(&self) -> AppResult<()> {
        if self.run_timeout.is_zero() {
            return Err(AppError::configuration(
                "sanctuary.run_timeout must be greater than zero",
            ));
        }
        if self.event_buffer == 0 {
            return Err(AppError::configuration(
                "sanctuary.event_buffer must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            scratch_directory: default_scratch_directory(),
        }
    }
}

impl StorageConfig {
    /// Create the scratch parent and return a writer rooted in it.
    pub async fn scratch_writer(&self) -> AppResult<AtomicWriter> {
        Ok(AtomicWriter::new(&self.scratch_directory).await?)
    }
}

impl Config {
    /// Load configuration from `config_file`, writing a default one first if
    /// it does not exist. Environment variables prefixed with
    /// `RABBIT_SANCTUARY_` override file values, with `__` separating
    /// sections (`RABBIT_SANCTUARY_SANCTUARY__RETRY_DELAY=30s`).
    pub fn load_from_file(config_file: &str) -> Result<Self> {
        if !std::path::Path::new(config_file).exists() {
            let contents = toml::to_string_pretty(&Config::default())?;
            std::fs::write(config_file, contents)?;
            info!("Created default config file: {}", config_file);
        }

        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split(ENV_SEPARATOR))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        self.sanctuary.validate()?;

        if let Some(empty) = self.rabbits.iter().position(|r| r.trim().is_empty()) {
            return Err(AppError::configuration(format!(
                "rabbits[{empty}] is empty"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.sanctuary.retry_delay, Duration::from_secs(300));
        assert_eq!(config.sanctuary.run_timeout, Duration::from_secs(300));
        assert_eq!(config.storage.scratch_directory, PathBuf::from("./atomic"));
        assert_eq!(config.lock, LockPolicy::default());
        assert!(config.worker.launcher.is_none());
        assert!(config.rabbits.is_empty());
    }

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        Jail::expect_with(|jail| {
            let config = Config::load_from_file("config.toml").unwrap();
            assert_eq!(config.sanctuary.retry_delay, Duration::from_secs(300));

            let written = std::fs::read_to_string(jail.directory().join("config.toml")).unwrap();
            assert!(written.contains("[sanctuary]"));
            assert!(written.contains("retry_delay = \"5m\""));
            Ok(())
        });
    }

    #[test]
    fn test_file_values_are_used() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "sanctuary.toml",
                r#"
                rabbits = ["rabbits/wind.js", "rabbits/radar.js"]

                [sanctuary]
                retry_delay = "30s"
                run_timeout = 120

                [worker]
                launcher = "node"
                launcher_args = ["--enable-source-maps"]

                [lock]
                max_total_backoff_ms = 1000
                "#,
            )?;

            let config = Config::load_from_file("sanctuary.toml").unwrap();
            assert_eq!(config.rabbits, vec!["rabbits/wind.js", "rabbits/radar.js"]);
            assert_eq!(config.sanctuary.retry_delay, Duration::from_secs(30));
            assert_eq!(config.sanctuary.run_timeout, Duration::from_secs(120));
            assert_eq!(config.worker.launcher, Some(PathBuf::from("node")));
            assert_eq!(config.worker.launcher_args, vec!["--enable-source-maps"]);
            assert_eq!(config.lock.max_total_backoff_ms, 1000);
            // untouched lock fields keep their defaults
            assert_eq!(config.lock.initial_backoff_ms, 100);
            Ok(())
        });
    }

    #[test]
    fn test_environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [sanctuary]
                retry_delay = "30s"
                "#,
            )?;
            jail.set_env("RABBIT_SANCTUARY_SANCTUARY__RETRY_DELAY", "2m");
            jail.set_env("RABBIT_SANCTUARY_STORAGE__SCRATCH_DIRECTORY", "/tmp/atomic");

            let config = Config::load_from_file("config.toml").unwrap();
            assert_eq!(config.sanctuary.retry_delay, Duration::from_secs(120));
            assert_eq!(
                config.storage.scratch_directory,
                PathBuf::from("/tmp/atomic")
            );
            Ok(())
        });
    }

    #[test]
    fn test_exported_lock_variables_load_back() {
        Jail::expect_with(|jail| {
            jail.set_env(LOCK_INITIAL_BACKOFF_ENV, "50");
            jail.set_env(LOCK_BACKOFF_STEP_ENV, "25");
            jail.set_env(LOCK_MAX_TOTAL_BACKOFF_ENV, "1000");

            let config = Config::load_from_file("config.toml").unwrap();
            assert_eq!(
                config.lock,
                LockPolicy::new()
                    .initial_backoff(Duration::from_millis(50))
                    .backoff_step(Duration::from_millis(25))
                    .max_total_backoff(Duration::from_millis(1_000))
            );
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [sanctuary]
                run_timeout = "0s"
                "#,
            )?;
            assert!(Config::load_from_file("config.toml").is_err());

            jail.create_file("config.toml", "rabbits = [\"ok.js\", \"  \"]")?;
            let err = Config::load_from_file("config.toml").unwrap_err();
            assert!(err.to_string().contains("rabbits[1]"));
            Ok(())
        });
    }

    #[tokio::test]
    async fn test_scratch_writer_creates_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = StorageConfig {
            scratch_directory: temp_dir.path().join("nested/atomic"),
        };

        let writer = storage.scratch_writer().await.unwrap();
        assert!(writer.scratch_parent().is_dir());
    }
}
