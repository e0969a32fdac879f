// Tool invocation pipeline
//
// Runs one ExecutionRequest through the ProcessRunner port and turns every
// way it can go wrong into a classified ToolError. Adapters own argument
// building and parsing; this owns the part in between.

use crate::application::classifier::classify_message;
use crate::application::constants::{DEFAULT_EXECUTION_TIMEOUT, STDERR_DETAIL_LIMIT};
use crate::error::{ErrorCode, Operation, Result, ToolError};
use crate::port::{ExecutionError, ExecutionRequest, ExecutionResult, ProcessRunner};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How a non-zero exit of a process that did run is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPolicy {
    /// Any non-zero exit is a failure
    RequireSuccess,
    /// Non-zero exit is accepted when stdout carries output
    AcceptWithOutput,
    /// Exit code is ignored
    AcceptAny,
}

impl ExitPolicy {
    pub fn accepts(&self, result: &ExecutionResult) -> bool {
        match self {
            ExitPolicy::RequireSuccess => result.success(),
            ExitPolicy::AcceptWithOutput => result.success() || result.has_output(),
            ExitPolicy::AcceptAny => true,
        }
    }
}

/// Invoker configuration
#[derive(Debug, Clone)]
pub struct InvokerConfig {
    /// Applied when a request carries no timeout of its own
    pub default_timeout: Duration,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_EXECUTION_TIMEOUT,
        }
    }
}

/// Shared execution step of every adapter
#[derive(Clone)]
pub struct ToolInvoker {
    runner: Arc<dyn ProcessRunner>,
    config: InvokerConfig,
}

impl ToolInvoker {
    pub fn new(runner: Arc<dyn ProcessRunner>, config: InvokerConfig) -> Self {
        Self { runner, config }
    }

    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    /// Run `request` on behalf of `tool`
    ///
    /// # Errors
    /// - Spawn failures, deadline expiry and cancellation, classified from the
    ///   runner error
    /// - `EXECUTION_FAILED` when `policy` rejects the exit code; classified
    ///   from stderr
    pub async fn invoke(
        &self,
        tool: &str,
        request: ExecutionRequest,
        policy: ExitPolicy,
    ) -> Result<ExecutionResult> {
        let request = request.timeout_or(self.config.default_timeout);
        let command = request.command().to_string();

        info!(
            tool = %tool,
            command = %command,
            args = ?request.arguments(),
            timeout_ms = ?request.deadline().map(|d| d.as_millis()),
            "Invoking tool"
        );

        let result = self
            .runner
            .run(request)
            .await
            .map_err(|e| execution_error(tool, &command, e))?;

        if !policy.accepts(&result) {
            let stderr = result.stderr_lossy();
            let class = classify_message(&stderr);

            warn!(
                tool = %tool,
                command = %command,
                exit_code = result.exit_code,
                class = %class,
                "Tool exited with failure"
            );

            return Err(ToolError::new(
                tool,
                Operation::Execute,
                ErrorCode::ExecutionFailed,
                class,
                format!("`{}` exited with code {}", command, result.exit_code),
            )
            .with_detail("command", command.clone())
            .with_detail("exit_code", result.exit_code)
            .with_detail("stderr", truncate(stderr.trim(), STDERR_DETAIL_LIMIT)));
        }

        if !result.success() {
            debug!(
                tool = %tool,
                exit_code = result.exit_code,
                policy = ?policy,
                "Non-zero exit accepted"
            );
        }

        info!(
            tool = %tool,
            exit_code = result.exit_code,
            duration_ms = result.duration.as_millis() as u64,
            stdout_bytes = result.stdout.len(),
            "Tool finished"
        );

        Ok(result)
    }
}

fn execution_error(tool: &str, command: &str, err: ExecutionError) -> ToolError {
    let class = err.class();
    let code = match &err {
        ExecutionError::BinaryNotFound { .. } => ErrorCode::BinaryNotFound,
        ExecutionError::PermissionDenied { .. } => ErrorCode::PermissionDenied,
        ExecutionError::DeadlineExceeded { .. } => ErrorCode::Timeout,
        ExecutionError::Cancelled { .. } => ErrorCode::Cancelled,
        ExecutionError::SpawnFailed { .. } | ExecutionError::Io { .. } => {
            ErrorCode::ExecutionFailed
        }
    };

    warn!(
        tool = %tool,
        command = %command,
        code = %code,
        class = %class,
        error = %err,
        "Tool execution failed"
    );

    let mut tool_err = ToolError::new(tool, Operation::Execute, code, class, err.to_string())
        .with_detail("command", command);

    if let ExecutionError::DeadlineExceeded { timeout, .. } = &err {
        tool_err = tool_err.with_detail("timeout_ms", timeout.as_millis() as u64);
    }
    if let Some(partial) = err.partial() {
        tool_err = tool_err.with_detail("partial_stdout_bytes", partial.stdout.len());
    }

    tool_err.with_source(err)
}

/// Cut `s` to at most `limit` bytes on a char boundary
fn truncate(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        return s.to_string();
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
