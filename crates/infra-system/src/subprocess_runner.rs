// Subprocess runner implementation
// reason: tokio::process for async child management, nix for process-group signals
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[cfg(unix)]
use nix::sys::signal::Signal;

use armory_core::application::constants::{GRACEFUL_KILL_TIMEOUT, OUTPUT_DRAIN_TIMEOUT};
use armory_core::port::{
    CancelToken, ExecutionError, ExecutionRequest, ExecutionResult, ProcessRunner, TimeProvider,
    TIMEOUT_EXIT_CODE,
};

/// Subprocess runner
///
/// Spawns each command in its own process group so that a timeout,
/// cancellation or dropped future takes down every descendant, not just the
/// direct child.
pub struct SubprocessRunner {
    time_provider: Arc<dyn TimeProvider>,
    env_allowlist: Option<Vec<String>>,
    kill_grace: Duration,
}

/// How the wait for the child ended
enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    DeadlineExceeded(Duration),
    Cancelled,
}

impl SubprocessRunner {
    /// Create a runner whose children inherit the full environment
    ///
    /// # Arguments
    /// * `time_provider` - Time provider for duration tracking
    ///
    /// # Example
    /// ```ignore
    /// let runner = SubprocessRunner::new(Arc::new(SystemTimeProvider))
    ///     .with_env_allowlist(vec!["PATH".to_string(), "HOME".to_string()]);
    /// ```
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            time_provider,
            env_allowlist: None,
            kill_grace: GRACEFUL_KILL_TIMEOUT,
        }
    }

    /// Only pass these inherited variables through (request overrides still apply)
    pub fn with_env_allowlist(mut self, allowlist: Vec<String>) -> Self {
        self.env_allowlist = Some(allowlist);
        self
    }

    /// Time between SIGTERM and SIGKILL when a cancelled process group is
    /// terminated. Deadlines kill immediately.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Environment for the child when an allowlist is set; `None` means inherit
    fn filter_env(&self, overrides: &BTreeMap<String, String>) -> Option<HashMap<String, String>> {
        let allowlist = self.env_allowlist.as_ref()?;

        let mut env: HashMap<String, String> = std::env::vars()
            .filter(|(k, _)| allowlist.contains(k))
            .collect();
        env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        Some(env)
    }

    fn build_command(&self, request: &ExecutionRequest) -> Command {
        let mut cmd = Command::new(request.command());
        cmd.args(request.arguments())
            .stdin(if request.input().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match self.filter_env(request.env_overrides()) {
            Some(env) => {
                cmd.env_clear().envs(env);
            }
            None => {
                cmd.envs(request.env_overrides());
            }
        }

        if let Some(dir) = request.working_dir() {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        {
            // pgid = child pid
            cmd.process_group(0);
        }

        cmd
    }

    fn spawn(&self, request: &ExecutionRequest) -> Result<Child, ExecutionError> {
        let command = request.command();

        if let Some(dir) = request.working_dir() {
            if !dir.is_dir() {
                return Err(ExecutionError::SpawnFailed {
                    command: command.to_string(),
                    source: std::io::Error::new(
                        ErrorKind::NotFound,
                        format!("working directory {} not found", dir.display()),
                    ),
                });
            }
        }

        self.build_command(request)
            .spawn()
            .map_err(|source| match source.kind() {
                ErrorKind::NotFound => ExecutionError::BinaryNotFound {
                    command: command.to_string(),
                    source,
                },
                ErrorKind::PermissionDenied => ExecutionError::PermissionDenied {
                    command: command.to_string(),
                    source,
                },
                _ => ExecutionError::SpawnFailed {
                    command: command.to_string(),
                    source,
                },
            })
    }

    /// SIGTERM the group, wait out `grace`, then SIGKILL and reap.
    /// A zero grace goes straight to SIGKILL.
    async fn terminate(&self, child: &mut Child, pgid: Option<u32>, grace: Duration) {
        #[cfg(unix)]
        {
            if let Some(pgid) = pgid.filter(|_| !grace.is_zero()) {
                info!(pgid = %pgid, "Sending SIGTERM to process group");
                signal_group(pgid, Signal::SIGTERM);

                match tokio::time::timeout(grace, child.wait()).await {
                    Ok(_) => info!(pgid = %pgid, "Process exited after SIGTERM"),
                    Err(_) => warn!(
                        pgid = %pgid,
                        grace_ms = grace.as_millis() as u64,
                        "Process did not exit after SIGTERM, sending SIGKILL"
                    ),
                }
            }

            // Descendants may outlive the leader
            if let Some(pgid) = pgid {
                signal_group(pgid, Signal::SIGKILL);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = (pgid, grace);
        }

        if let Err(e) = child.start_kill() {
            debug!(error = %e, "start_kill after termination");
        }
        if let Err(e) = child.wait().await {
            warn!(error = %e, "Failed to reap terminated child");
        }
    }

    fn elapsed_since(&self, start_ms: i64) -> Duration {
        let elapsed = self.time_provider.now_millis() - start_ms;
        Duration::from_millis(elapsed.max(0) as u64)
    }
}

async fn wait_for(
    child: &mut Child,
    timeout: Option<Duration>,
    cancel: Option<CancelToken>,
) -> Outcome {
    let deadline = async move {
        match timeout {
            Some(t) => {
                tokio::time::sleep(t).await;
                t
            }
            None => std::future::pending::<Duration>().await,
        }
    };

    let cancelled = async move {
        match cancel {
            Some(mut token) => token.cancelled().await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        status = child.wait() => Outcome::Exited(status),
        t = deadline => Outcome::DeadlineExceeded(t),
        _ = cancelled => Outcome::Cancelled,
    }
}

#[async_trait]
impl ProcessRunner for SubprocessRunner {
    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionResult, ExecutionError> {
        let command = request.command().to_string();

        let mut child = self.spawn(&request)?;
        let start_ms = self.time_provider.now_millis();
        let pgid = child.id();
        let mut guard = GroupGuard { pgid };

        info!(
            command = %command,
            args = ?request.arguments(),
            pid = ?pgid,
            timeout_ms = ?request.deadline().map(|d| d.as_millis()),
            "Starting subprocess execution"
        );

        let mut stdout = Capture::start(child.stdout.take());
        let mut stderr = Capture::start(child.stderr.take());

        if let (Some(input), Some(mut pipe)) = (request.input(), child.stdin.take()) {
            let input = input.to_vec();
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(&input).await {
                    debug!(error = %e, "Child closed stdin early");
                }
                // pipe dropped here: child sees EOF
            });
        }

        let outcome = wait_for(&mut child, request.deadline(), request.cancel_token().cloned()).await;

        let exit_code = match &outcome {
            Outcome::Exited(Ok(status)) => status.code().unwrap_or(TIMEOUT_EXIT_CODE),
            Outcome::Exited(Err(_)) => {
                self.terminate(&mut child, pgid, self.kill_grace).await;
                TIMEOUT_EXIT_CODE
            }
            Outcome::DeadlineExceeded(t) => {
                warn!(command = %command, timeout_ms = t.as_millis() as u64, "Subprocess deadline exceeded");
                // The deadline is a hard bound: no SIGTERM grace
                self.terminate(&mut child, pgid, Duration::ZERO).await;
                TIMEOUT_EXIT_CODE
            }
            Outcome::Cancelled => {
                warn!(command = %command, "Subprocess cancelled");
                self.terminate(&mut child, pgid, self.kill_grace).await;
                TIMEOUT_EXIT_CODE
            }
        };

        let (stdout_done, stderr_done) = tokio::join!(
            stdout.wait(OUTPUT_DRAIN_TIMEOUT),
            stderr.wait(OUTPUT_DRAIN_TIMEOUT)
        );
        if !(stdout_done && stderr_done) {
            warn!(command = %command, "Output pipes held open after exit, killing process group");
            #[cfg(unix)]
            {
                if let Some(pgid) = pgid {
                    signal_group(pgid, Signal::SIGKILL);
                }
            }
        }
        guard.disarm();

        let result = ExecutionResult {
            stdout: stdout.take().await,
            stderr: stderr.take().await,
            exit_code,
            duration: self.elapsed_since(start_ms),
        };

        match outcome {
            Outcome::Exited(Ok(_)) => {
                info!(
                    command = %command,
                    duration_ms = result.duration.as_millis() as u64,
                    exit_code = result.exit_code,
                    "Subprocess execution completed"
                );
                Ok(result)
            }
            Outcome::Exited(Err(source)) => Err(ExecutionError::Io { command, source }),
            Outcome::DeadlineExceeded(timeout) => Err(ExecutionError::DeadlineExceeded {
                timeout,
                partial: Box::new(result),
            }),
            Outcome::Cancelled => Err(ExecutionError::Cancelled {
                partial: Box::new(result),
            }),
        }
    }
}

/// Output pipe drained into a shared buffer, readable even if never closed
struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

impl Capture {
    fn start<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let task = pipe.map(|mut pipe| {
            let buf = buf.clone();
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk).await {
                        Ok(0) => break,
                        Ok(n) => buf.lock().await.extend_from_slice(&chunk[..n]),
                        Err(e) => {
                            debug!(error = %e, "Output pipe read failed");
                            break;
                        }
                    }
                }
            })
        });
        Self { buf, task }
    }

    /// True if the pipe reached EOF within `within`
    async fn wait(&mut self, within: Duration) -> bool {
        match self.task.as_mut() {
            Some(task) => tokio::time::timeout(within, task).await.is_ok(),
            None => true,
        }
    }

    async fn take(self) -> Vec<u8> {
        if let Some(task) = self.task {
            task.abort();
        }
        let mut buf = self.buf.lock().await;
        std::mem::take(&mut *buf)
    }
}

/// Kills the process group if `run` is dropped before the child is reaped
struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            warn!(pgid = %pgid, "Execution dropped mid-flight, killing process group");
            #[cfg(unix)]
            {
                signal_group(pgid, Signal::SIGKILL);
            }
        }
    }
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: Signal) {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pgid as i32), signal) {
        Ok(()) => debug!(pgid = %pgid, signal = ?signal, "Signalled process group"),
        // Group already gone
        Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid = %pgid, signal = ?signal, error = %e, "Failed to signal process group"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armory_core::port::time_provider::SystemTimeProvider;
    use armory_core::port::{cancellation_channel, ExecutionRequest};

    fn runner() -> SubprocessRunner {
        SubprocessRunner::new(Arc::new(SystemTimeProvider))
    }

    #[tokio::test]
    async fn test_execute_success() {
        let result = runner()
            .run(ExecutionRequest::new("echo").arg("hello"))
            .await
            .unwrap();

        assert!(result.success());
        assert!(result.stdout_lossy().contains("hello"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_data() {
        let result = runner()
            .run(ExecutionRequest::new("sh").args(["-c", "echo oops >&2; exit 3"]))
            .await
            .unwrap();

        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stderr_lossy().trim(), "oops");
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let err = runner()
            .run(ExecutionRequest::new("armory-definitely-missing-binary"))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::BinaryNotFound { .. }));
    }

    #[tokio::test]
    async fn test_execute_timeout() {
        let err = runner()
            .with_kill_grace(Duration::from_millis(200))
            .run(
                ExecutionRequest::new("sleep")
                    .arg("10")
                    .timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();

        match err {
            ExecutionError::DeadlineExceeded { timeout, partial } => {
                assert_eq!(timeout, Duration::from_millis(100));
                assert_eq!(partial.exit_code, TIMEOUT_EXIT_CODE);
            }
            other => panic!("expected DeadlineExceeded, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_before_exit() {
        let (handle, token) = cancellation_channel();
        handle.cancel();

        let err = runner()
            .run(ExecutionRequest::new("sleep").arg("10").cancel_on(token))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_stdin_is_forwarded() {
        let result = runner()
            .run(ExecutionRequest::new("cat").stdin("192.168.1.1\n10.0.0.1\n"))
            .await
            .unwrap();

        assert_eq!(result.stdout_lossy(), "192.168.1.1\n10.0.0.1\n");
    }

    #[test]
    fn test_env_filtering() {
        let runner = runner().with_env_allowlist(vec!["PATH".to_string()]);

        let mut overrides = BTreeMap::new();
        overrides.insert("ARMORY_SCAN_ID".to_string(), "42".to_string());

        let env = runner.filter_env(&overrides).unwrap();

        assert!(env.keys().all(|k| k == "PATH" || k == "ARMORY_SCAN_ID"));
        assert_eq!(env.get("ARMORY_SCAN_ID").map(String::as_str), Some("42"));
    }

    #[test]
    fn test_no_allowlist_inherits() {
        assert!(runner().filter_env(&BTreeMap::new()).is_none());
    }

    #[tokio::test]
    async fn test_missing_work_dir() {
        let err = runner()
            .run(ExecutionRequest::new("true").work_dir("/nonexistent/armory/dir"))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::SpawnFailed { .. }));
    }
}
