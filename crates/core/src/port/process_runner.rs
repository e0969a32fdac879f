// Process Runner Port
// Abstraction for launching one external binary with a bounded lifetime

use crate::port::cancellation::CancelToken;
use async_trait::async_trait;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Exit code reported when the process was killed rather than exiting
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// One command to execute. Built once, then handed to a [`ProcessRunner`].
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    command: String,
    args: Vec<String>,
    work_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    stdin: Option<Vec<u8>>,
    timeout: Option<Duration>,
    cancel: Option<CancelToken>,
}

impl ExecutionRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            work_dir: None,
            env: BTreeMap::new(),
            stdin: None,
            timeout: None,
            cancel: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Override (or add) one environment variable for the child
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set a timeout only if none was given
    pub fn timeout_or(mut self, timeout: Duration) -> Self {
        self.timeout.get_or_insert(timeout);
        self
    }

    pub fn cancel_on(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.work_dir.as_deref()
    }

    pub fn env_overrides(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn input(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cancel_token(&self) -> Option<&CancelToken> {
        self.cancel.as_ref()
    }
}

/// Captured output of one finished (or killed) process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Real exit code, or [`TIMEOUT_EXIT_CODE`] when killed
    pub exit_code: i32,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    /// True if stdout carries anything besides whitespace
    pub fn has_output(&self) -> bool {
        self.stdout.iter().any(|b| !b.is_ascii_whitespace())
    }
}

/// Execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("executable `{command}` not found: {source}")]
    BinaryNotFound {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("permission denied executing `{command}`")]
    PermissionDenied {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("execution deadline exceeded after {}ms", .timeout.as_millis())]
    DeadlineExceeded {
        timeout: Duration,
        /// Output captured before the process was killed
        partial: Box<ExecutionResult>,
    },

    #[error("execution cancelled after {}ms", .partial.duration.as_millis())]
    Cancelled { partial: Box<ExecutionResult> },

    #[error("IO error while running `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExecutionError {
    /// Output captured before a killed process died, if any
    pub fn partial(&self) -> Option<&ExecutionResult> {
        match self {
            ExecutionError::DeadlineExceeded { partial, .. }
            | ExecutionError::Cancelled { partial } => Some(partial),
            _ => None,
        }
    }
}

/// Process runner trait
///
/// Implementations:
/// - SubprocessRunner (infra-system): tokio child process in its own group
/// - MockProcessRunner: scripted results for adapter tests
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run one command to completion
    ///
    /// A non-zero exit is NOT an error: the exit code is returned as data.
    ///
    /// # Errors
    /// - BinaryNotFound / PermissionDenied / SpawnFailed if the process cannot start
    /// - DeadlineExceeded if the request timeout elapsed (process group killed)
    /// - Cancelled if the request's cancel token fired (process group killed)
    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionResult, ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Scripted outcome of one mocked run
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Process ran and exited with the given code
        Exit {
            stdout: Vec<u8>,
            stderr: Vec<u8>,
            exit_code: i32,
        },
        /// Binary could not be found
        NotFound,
        /// Binary could not be executed
        PermissionDenied,
        /// Deadline exceeded after N ms
        Timeout(u64),
        /// Cancelled by the caller
        Cancelled,
    }

    impl MockBehavior {
        pub fn stdout(stdout: impl Into<Vec<u8>>) -> Self {
            MockBehavior::Exit {
                stdout: stdout.into(),
                stderr: Vec::new(),
                exit_code: 0,
            }
        }

        pub fn failure(exit_code: i32, stderr: impl Into<Vec<u8>>) -> Self {
            MockBehavior::Exit {
                stdout: Vec::new(),
                stderr: stderr.into(),
                exit_code,
            }
        }
    }

    type Inspector = Arc<dyn Fn(&ExecutionRequest) + Send + Sync>;

    /// Mock process runner; replays behaviors in order, repeating the last one
    pub struct MockProcessRunner {
        behaviors: Mutex<VecDeque<MockBehavior>>,
        requests: Mutex<Vec<ExecutionRequest>>,
        inspector: Option<Inspector>,
    }

    impl MockProcessRunner {
        pub fn new(behavior: MockBehavior) -> Self {
            Self::with_sequence(vec![behavior])
        }

        pub fn with_sequence(behaviors: Vec<MockBehavior>) -> Self {
            Self {
                behaviors: Mutex::new(behaviors.into()),
                requests: Mutex::new(Vec::new()),
                inspector: None,
            }
        }

        /// Run a callback against each request while the "process" is live
        pub fn with_inspector(mut self, f: impl Fn(&ExecutionRequest) + Send + Sync + 'static) -> Self {
            self.inspector = Some(Arc::new(f));
            self
        }

        pub fn requests(&self) -> Vec<ExecutionRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn next_behavior(&self) -> MockBehavior {
            let mut behaviors = self.behaviors.lock().unwrap();
            if behaviors.len() > 1 {
                behaviors.pop_front().unwrap_or(MockBehavior::NotFound)
            } else {
                behaviors.front().cloned().unwrap_or(MockBehavior::NotFound)
            }
        }
    }

    fn killed(duration: Duration) -> Box<ExecutionResult> {
        Box::new(ExecutionResult {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: TIMEOUT_EXIT_CODE,
            duration,
        })
    }

    #[async_trait]
    impl ProcessRunner for MockProcessRunner {
        async fn run(&self, request: ExecutionRequest) -> Result<ExecutionResult, ExecutionError> {
            if let Some(inspect) = &self.inspector {
                inspect(&request);
            }
            let command = request.command().to_string();
            self.requests.lock().unwrap().push(request);

            match self.next_behavior() {
                MockBehavior::Exit {
                    stdout,
                    stderr,
                    exit_code,
                } => Ok(ExecutionResult {
                    stdout,
                    stderr,
                    exit_code,
                    duration: Duration::from_millis(10),
                }),
                MockBehavior::NotFound => Err(ExecutionError::BinaryNotFound {
                    command,
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "No such file or directory (os error 2)",
                    ),
                }),
                MockBehavior::PermissionDenied => Err(ExecutionError::PermissionDenied {
                    command,
                    source: std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        "Permission denied (os error 13)",
                    ),
                }),
                MockBehavior::Timeout(ms) => Err(ExecutionError::DeadlineExceeded {
                    timeout: Duration::from_millis(ms),
                    partial: killed(Duration::from_millis(ms)),
                }),
                MockBehavior::Cancelled => Err(ExecutionError::Cancelled {
                    partial: killed(Duration::from_millis(5)),
                }),
            }
        }
    }
}
