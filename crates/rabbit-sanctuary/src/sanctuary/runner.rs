//! Running one rabbit in an isolated worker process

use crate::config::WorkerConfig;
use crate::config::defaults::{
    LOCK_BACKOFF_STEP_ENV, LOCK_INITIAL_BACKOFF_ENV, LOCK_MAX_TOTAL_BACKOFF_ENV,
    SCRATCH_DIRECTORY_ENV,
};
use crate::errors::{RabbitError, RunResult};
use async_trait::async_trait;
use atomic_file_store::LockPolicy;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::types::Rabbit;

/// How long to keep reading stderr after the worker has exited. A worker that
/// left a background process holding its stderr open must not stall the cycle.
const STDERR_GRACE: Duration = Duration::from_secs(1);

/// Executes a single run of a rabbit.
///
/// Implementations produce exactly one outcome per call and must give up once
/// `timeout` has elapsed.
#[async_trait]
pub trait RabbitRunner: Send + Sync {
    async fn run(&self, rabbit: &Rabbit, timeout: Duration) -> RunResult;
}

/// Runs each rabbit as a child process.
///
/// The program is the configured launcher when there is one (an interpreter,
/// say), otherwise the rabbit reference itself. The rabbit reference is always
/// the last argument. The child's stdout goes to ours; its stderr is captured
/// and becomes the failure detail.
///
/// On Unix each worker leads its own process group. A run that times out or
/// is abandoned takes the whole group down with it, including anything the
/// worker started in the background.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    launcher: Option<PathBuf>,
    launcher_args: Vec<String>,
    scratch_directory: Option<PathBuf>,
    lock_policy: Option<LockPolicy>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(worker: &WorkerConfig) -> Self {
        Self {
            launcher: worker.launcher.clone(),
            launcher_args: worker.launcher_args.clone(),
            scratch_directory: None,
            lock_policy: None,
        }
    }

    #[must_use]
    pub fn with_launcher<P, I, S>(mut self, launcher: P, args: I) -> Self
    where
        P: Into<PathBuf>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.launcher = Some(launcher.into());
        self.launcher_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Tell every rabbit where the shared scratch directory is
    #[must_use]
    pub fn with_scratch_directory<P: Into<PathBuf>>(mut self, scratch: P) -> Self {
        self.scratch_directory = Some(scratch.into());
        self
    }

    /// Tell every rabbit how to back off when waiting on lock files
    #[must_use]
    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = Some(policy);
        self
    }

    fn command(&self, rabbit: &Rabbit) -> Command {
        let mut cmd = match &self.launcher {
            Some(launcher) => {
                let mut cmd = Command::new(launcher);
                cmd.args(&self.launcher_args);
                cmd
            }
            None => Command::new(rabbit.path()),
        };

        cmd.arg(rabbit.reference());
        if let Some(scratch) = &self.scratch_directory {
            cmd.env(SCRATCH_DIRECTORY_ENV, scratch);
        }
        if let Some(policy) = &self.lock_policy {
            cmd.env(LOCK_INITIAL_BACKOFF_ENV, policy.initial_backoff_ms.to_string());
            cmd.env(LOCK_BACKOFF_STEP_ENV, policy.backoff_step_ms.to_string());
            cmd.env(LOCK_MAX_TOTAL_BACKOFF_ENV, policy.max_total_backoff_ms.to_string());
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

#[async_trait]
impl RabbitRunner for ProcessRunner {
    async fn run(&self, rabbit: &Rabbit, timeout: Duration) -> RunResult {
        let mut child = self.command(rabbit).spawn().map_err(|e| {
            RabbitError::execution(format!("failed to start {}: {e}", rabbit.reference()))
        })?;

        debug!(
            "Spawned rabbit {} as pid {}",
            rabbit,
            child.id().map_or_else(|| "?".to_string(), |pid| pid.to_string())
        );

        // declared after `child` so the group is killed before the child is dropped
        let mut group = ProcessGroupGuard(child.id());
        let stderr = child.stderr.take().map(collect_output);

        let waited = tokio::time::timeout(timeout, child.wait()).await;
        if matches!(waited, Ok(Ok(_))) {
            // the worker is reaped, anything it left behind is not ours to kill
            group.disarm();
        }

        match waited {
            Ok(Ok(status)) if status.success() => {
                drain_output(stderr).await;
                Ok(())
            }
            Ok(Ok(status)) => Err(RabbitError::NonZeroExit {
                code: status.code(),
                stderr: drain_output(stderr).await,
            }),
            Ok(Err(e)) => {
                abort_output(stderr);
                Err(RabbitError::execution(format!(
                    "failed waiting for {}: {e}",
                    rabbit.reference()
                )))
            }
            Err(_) => {
                group.kill();
                // kill() also reaps the child
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed out rabbit {}: {}", rabbit, e);
                }
                abort_output(stderr);
                Err(RabbitError::TimedOut { limit: timeout })
            }
        }
    }
}

/// Kills the worker's process group when dropped unless disarmed
struct ProcessGroupGuard(Option<u32>);

impl ProcessGroupGuard {
    fn disarm(&mut self) {
        self.0 = None;
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.0.take() {
            kill_process_group(pgid);
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };

    // SAFETY: kill(2) takes plain integers and touches no memory of ours
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(
            "Could not kill process group {}: {}",
            pgid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

fn collect_output<R>(mut reader: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = reader.read_to_end(&mut buf).await {
            debug!("Stopped reading rabbit stderr: {}", e);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

async fn drain_output(handle: Option<JoinHandle<String>>) -> String {
    let Some(mut handle) = handle else {
        return String::new();
    };

    match tokio::time::timeout(STDERR_GRACE, &mut handle).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            debug!("Stderr reader failed: {}", e);
            String::new()
        }
        Err(_) => {
            handle.abort();
            String::new()
        }
    }
}

fn abort_output(handle: Option<JoinHandle<String>>) {
    if let Some(handle) = handle {
        handle.abort();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    /// Rabbits are plain shell scripts run through `sh`, so nothing has to be
    /// made executable
    fn script(dir: &TempDir, name: &str, body: &str) -> Rabbit {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        Rabbit::from(path.as_path())
    }

    fn sh() -> ProcessRunner {
        ProcessRunner::new().with_launcher("/bin/sh", Vec::<String>::new())
    }

    #[tokio::test]
    async fn test_zero_exit_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let rabbit = script(&dir, "ok.sh", "exit 0");

        sh().run(&rabbit, Duration::from_secs(10)).await.unwrap();
    }

    #[test]
    fn test_command_without_launcher_runs_rabbit() {
        let cmd = ProcessRunner::new().command(&Rabbit::new("/srv/rabbits/wind"));
        let cmd = cmd.as_std();

        assert_eq!(cmd.get_program(), "/srv/rabbits/wind");
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, ["/srv/rabbits/wind"]);
    }

    #[test]
    fn test_command_with_launcher_puts_reference_last() {
        let runner = ProcessRunner::from_config(&WorkerConfig {
            launcher: Some(PathBuf::from("node")),
            launcher_args: vec!["--enable-source-maps".to_string()],
        });
        let cmd = runner.command(&Rabbit::new("rabbits/wind.js"));
        let cmd = cmd.as_std();

        assert_eq!(cmd.get_program(), "node");
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, ["--enable-source-maps", "rabbits/wind.js"]);
    }

    #[tokio::test]
    async fn test_worker_receives_reference_as_argument() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("args.txt");
        let runner = ProcessRunner::new().with_launcher(
            "/bin/sh",
            [
                "-c".to_string(),
                format!("echo \"$@\" > {}", out.display()),
                "launcher".to_string(),
            ],
        );
        let rabbit = Rabbit::new("rabbits/wind.js");

        runner.run(&rabbit, Duration::from_secs(10)).await.unwrap();

        let args = std::fs::read_to_string(&out).unwrap();
        assert_eq!(args.trim(), "rabbits/wind.js");
    }

    #[tokio::test]
    async fn test_non_zero_exit_carries_status_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let rabbit = script(&dir, "fail.sh", "echo 'first line' >&2\necho 'second line' >&2\nexit 2");

        let err = sh().run(&rabbit, Duration::from_secs(10)).await.unwrap_err();

        match &err {
            RabbitError::NonZeroExit { code, stderr } => {
                assert_eq!(*code, Some(2));
                assert_eq!(stderr.trim_end(), "first line\nsecond line");
            }
            other => panic!("Expected NonZeroExit, got: {:?}", other),
        }
        assert_eq!(err.to_string().lines().count(), 3);
    }

    #[tokio::test]
    async fn test_missing_program_is_execution_error() {
        let runner = ProcessRunner::new();
        let rabbit = Rabbit::new("/definitely/not/a/rabbit");

        let err = runner.run(&rabbit, Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, RabbitError::Execution { .. }));
        assert!(err.to_string().contains("/definitely/not/a/rabbit"));
    }

    #[tokio::test]
    async fn test_timeout_kills_worker() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let marker = dir.path().join("finished");
        let rabbit = script(
            &dir,
            "slow.sh",
            &format!(
                "echo $$ > {}\nsleep 2\ntouch {}",
                pid_file.display(),
                marker.display()
            ),
        );

        let started = std::time::Instant::now();
        let err = sh()
            .run(&rabbit, Duration::from_millis(300))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            RabbitError::TimedOut {
                limit: Duration::from_millis(300)
            }
        );
        assert!(started.elapsed() < Duration::from_secs(2));

        // the shell itself was killed and reaped
        let pid = std::fs::read_to_string(&pid_file).unwrap();
        #[cfg(target_os = "linux")]
        assert!(!Path::new(&format!("/proc/{}", pid.trim())).exists());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!marker.exists(), "killed rabbit must not finish its work");
    }

    #[tokio::test]
    async fn test_scratch_directory_is_exported() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("env.txt");
        let rabbit = script(
            &dir,
            "env.sh",
            &format!("echo \"${SCRATCH_DIRECTORY_ENV}\" > {}", out.display()),
        );

        sh().with_scratch_directory("/srv/atomic")
            .run(&rabbit, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "/srv/atomic");
    }

    #[tokio::test]
    async fn test_lock_policy_is_exported() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("lock.txt");
        let rabbit = script(
            &dir,
            "lock.sh",
            &format!(
                "echo \"${LOCK_INITIAL_BACKOFF_ENV} ${LOCK_BACKOFF_STEP_ENV} ${LOCK_MAX_TOTAL_BACKOFF_ENV}\" > {}",
                out.display()
            ),
        );
        let policy = LockPolicy::new()
            .initial_backoff(Duration::from_millis(50))
            .backoff_step(Duration::from_millis(25))
            .max_total_backoff(Duration::from_millis(1_000));

        sh().with_lock_policy(policy)
            .run(&rabbit, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "50 25 1000");
    }

    #[test]
    fn test_lock_policy_is_not_exported_unless_set() {
        let cmd = sh().command(&Rabbit::new("rabbits/wind.sh"));
        let exported: Vec<_> = cmd.as_std().get_envs().map(|(key, _)| key).collect();

        assert!(!exported.contains(&std::ffi::OsStr::new(LOCK_MAX_TOTAL_BACKOFF_ENV)));
    }

    #[tokio::test]
    async fn test_timeout_kills_background_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("helper-finished");
        let rabbit = script(
            &dir,
            "helper.sh",
            &format!("(sleep 1; touch {}) &\nwait", marker.display()),
        );

        let err = sh()
            .run(&rabbit, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, RabbitError::TimedOut { .. }));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "helper outlived its timed out rabbit");
    }

    #[tokio::test]
    async fn test_successful_run_leaves_background_helpers_alone() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("helper-finished");
        let rabbit = script(
            &dir,
            "detached.sh",
            &format!("(sleep 0.3; touch {}) >/dev/null 2>&1 &", marker.display()),
        );

        sh().run(&rabbit, Duration::from_secs(10)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(marker.exists());
    }
}
