// Health probe implementation
// reason: probes run short-lived commands through the ProcessRunner port and
// open TCP sockets with tokio, so they stay async and bounded
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tracing::debug;

use armory_core::application::constants::{
    CAPABILITY_PROBE_TIMEOUT, DEFAULT_CAPABILITY_TOOL, NETWORK_PROBE_TIMEOUT,
    VERSION_PROBE_TIMEOUT,
};
use armory_core::domain::HealthStatus;
use armory_core::port::{ExecutionRequest, HealthProbe, ProcessRunner};

/// Health probes against the local system
pub struct SystemHealthProbe {
    runner: Arc<dyn ProcessRunner>,
    capability_tool: String,
}

impl SystemHealthProbe {
    /// Create a new system probe
    ///
    /// # Example
    /// ```ignore
    /// let runner = Arc::new(SubprocessRunner::new(Arc::new(SystemTimeProvider)));
    /// let probe = SystemHealthProbe::new(runner);
    /// ```
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            capability_tool: DEFAULT_CAPABILITY_TOOL.to_string(),
        }
    }

    /// Use another capability introspection tool instead of `getcap`
    pub fn with_capability_tool(mut self, tool: impl Into<String>) -> Self {
        self.capability_tool = tool.into();
        self
    }
}

/// Resolve `name` the way a shell would: paths are taken as-is, bare names
/// are searched on `PATH`.
pub fn resolve_binary(name: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }

    if name.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(name);
        return is_executable(&path).then_some(path);
    }

    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths).find_map(|dir| {
            let full = dir.join(name);
            if is_executable(&full) {
                Some(full)
            } else {
                None
            }
        })
    })
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}

fn first_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl HealthProbe for SystemHealthProbe {
    async fn binary(&self, name: &str) -> HealthStatus {
        match resolve_binary(name) {
            Some(path) => HealthStatus::healthy(format!(
                "{} is available at {}",
                name,
                path.display()
            ))
            .with_detail("path", path.display().to_string()),
            None => HealthStatus::unhealthy(format!("{} binary not found in PATH", name))
                .with_detail("binary", name),
        }
    }

    async fn version(&self, name: &str, version_flag: &str) -> HealthStatus {
        let binary = self.binary(name).await;
        if !binary.is_healthy() {
            return binary;
        }

        let request = ExecutionRequest::new(name)
            .arg(version_flag)
            .timeout(VERSION_PROBE_TIMEOUT);

        let failure = match self.runner.run(request).await {
            Ok(result) if result.success() || result.has_output() => {
                let version = first_line(&result.stdout);
                debug!(binary = %name, version = %version, "Version probe succeeded");
                return HealthStatus::healthy(format!("binary {:?} found with version info", name))
                    .with_detail("binary", name)
                    .with_detail("version", version);
            }
            Ok(result) => format!("exited with code {} and no output", result.exit_code),
            Err(e) => e.to_string(),
        };

        HealthStatus::degraded(format!("binary {:?} found but version check failed", name))
            .with_detail("binary", name)
            .with_detail("version_flag", version_flag)
            .with_detail("error", failure)
    }

    async fn capabilities(&self, binary: &str, required: &[String]) -> HealthStatus {
        let status = self.binary(binary).await;
        if !status.is_healthy() {
            return status;
        }
        let Some(path) = resolve_binary(binary) else {
            return HealthStatus::unhealthy(format!("{} binary not found in PATH", binary));
        };
        let path = path.display().to_string();

        let request = ExecutionRequest::new(self.capability_tool.clone())
            .arg(path.clone())
            .timeout(CAPABILITY_PROBE_TIMEOUT);

        let output = match self.runner.run(request).await {
            Ok(result) if result.success() => result.stdout_lossy().into_owned(),
            Ok(result) => {
                return self.unverifiable(
                    binary,
                    &path,
                    required,
                    format!("exited with code {}", result.exit_code),
                )
            }
            Err(e) => return self.unverifiable(binary, &path, required, e.to_string()),
        };

        let lowered = output.to_lowercase();
        let missing: Vec<&String> = required
            .iter()
            .filter(|cap| !lowered.contains(&cap.to_lowercase()))
            .collect();

        if !missing.is_empty() {
            return HealthStatus::unhealthy(format!(
                "binary {:?} missing required capabilities",
                binary
            ))
            .with_detail("binary", binary)
            .with_detail("path", path)
            .with_detail("required_caps", serde_json::json!(required))
            .with_detail("missing_caps", serde_json::json!(missing))
            .with_detail("current_caps", output.trim());
        }

        HealthStatus::healthy(format!("binary {:?} has required capabilities", binary))
            .with_detail("binary", binary)
            .with_detail("path", path)
            .with_detail("required_caps", serde_json::json!(required))
            .with_detail("current_caps", output.trim())
    }

    async fn network(&self, host: &str, port: u16, deadline: Option<Instant>) -> HealthStatus {
        // Bare IPv6 literals need brackets once a port is appended
        let address = if host.contains(':') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };
        let budget = deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
            .unwrap_or(NETWORK_PROBE_TIMEOUT);

        if budget.is_zero() {
            return HealthStatus::unhealthy(format!(
                "cannot connect to {}: deadline already expired",
                address
            ));
        }

        match tokio::time::timeout(budget, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => {
                HealthStatus::healthy(format!("successfully connected to {}", address))
            }
            Ok(Err(e)) => HealthStatus::unhealthy(format!("cannot connect to {}: {}", address, e)),
            Err(_) => HealthStatus::unhealthy(format!(
                "cannot connect to {}: timed out after {}ms",
                address,
                budget.as_millis()
            )),
        }
    }

    async fn file(&self, path: &Path) -> HealthStatus {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => {
                HealthStatus::healthy(format!("directory {} exists", path.display()))
            }
            Ok(_) => HealthStatus::healthy(format!("file {} exists", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HealthStatus::unhealthy(
                format!("file or directory {} does not exist", path.display()),
            ),
            Err(e) => {
                HealthStatus::unhealthy(format!("cannot access {}: {}", path.display(), e))
            }
        }
    }
}

impl SystemHealthProbe {
    fn unverifiable(&self, binary: &str, path: &str, required: &[String], error: String) -> HealthStatus {
        HealthStatus::degraded(format!(
            "cannot verify capabilities for {:?} ({} not available or failed)",
            binary, self.capability_tool
        ))
        .with_detail("binary", binary)
        .with_detail("path", path)
        .with_detail("required_caps", serde_json::json!(required))
        .with_detail("capability_tool_error", error)
        .with_detail("note", "capability check skipped - may need root privileges")
    }
}
