// Subfinder adapter (passive subdomain enumeration)
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use armory_core::application::{ExitPolicy, ToolInvoker};
use armory_core::domain::HealthStatus;
use armory_core::port::{
    Executable, ExecutionRequest, HealthCheckable, HealthProbe, ToolDescriptor,
};
use armory_core::{Result, ToolError};

pub const TOOL_NAME: &str = "subfinder";

#[derive(Debug, Clone)]
pub struct SubfinderConfig {
    pub binary: String,
}

impl Default for SubfinderConfig {
    fn default() -> Self {
        Self {
            binary: TOOL_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubfinderRequest {
    pub domain: String,
    #[serde(default)]
    pub silent: bool,
    #[serde(default)]
    pub recursive: bool,
    /// Use every configured source (slower, more results)
    #[serde(default = "default_all")]
    pub all: bool,
    #[serde(default, alias = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_all() -> bool {
    true
}

impl SubfinderRequest {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            silent: false,
            recursive: false,
            all: true,
            timeout_secs: None,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        let domain = self.domain.trim();
        if domain.is_empty() {
            return Err("domain is required".to_string());
        }
        if domain.starts_with('-') {
            return Err(format!("domain must not start with '-': {}", domain));
        }
        if self.timeout_secs == Some(0) {
            return Err("timeout must be at least one second".to_string());
        }
        Ok(())
    }

    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["-d".to_string(), self.domain.trim().to_string()];

        if self.silent {
            args.push("-silent".to_string());
        }
        if self.recursive {
            args.push("-recursive".to_string());
        }
        if self.all {
            args.push("-all".to_string());
        }

        args
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubfinderResponse {
    pub domain: String,
    pub subdomains: Vec<String>,
    pub count: usize,
    pub scan_time_ms: u64,
}

/// One subdomain per line: trimmed, blank lines dropped, first occurrence kept
pub fn parse_output(data: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(data);
    let mut seen = HashSet::new();

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(line.to_string()))
        .map(str::to_string)
        .collect()
}

pub struct SubfinderTool {
    config: SubfinderConfig,
    invoker: ToolInvoker,
    probe: Arc<dyn HealthProbe>,
}

impl SubfinderTool {
    pub fn new(config: SubfinderConfig, invoker: ToolInvoker, probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            config,
            invoker,
            probe,
        }
    }
}

#[async_trait]
impl Executable for SubfinderTool {
    type Request = SubfinderRequest;
    type Response = SubfinderResponse;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: TOOL_NAME,
            version: crate::ADAPTER_VERSION,
            description: "Fast passive subdomain enumeration using multiple online sources",
            tags: &["reconnaissance", "subdomain", "osint", "T1595", "T1592"],
        }
    }

    async fn execute(&self, request: SubfinderRequest) -> Result<SubfinderResponse> {
        request
            .validate()
            .map_err(|msg| ToolError::invalid_input(TOOL_NAME, msg))?;

        let mut exec = ExecutionRequest::new(self.config.binary.clone()).args(request.to_args());
        if let Some(secs) = request.timeout_secs {
            exec = exec.timeout(Duration::from_secs(secs));
        }

        // Some sources failing makes subfinder exit non-zero with partial results
        let result = self
            .invoker
            .invoke(TOOL_NAME, exec, ExitPolicy::AcceptWithOutput)
            .await?;

        let subdomains = parse_output(&result.stdout);

        info!(
            domain = %request.domain,
            count = subdomains.len(),
            "Subdomain enumeration finished"
        );

        Ok(SubfinderResponse {
            domain: request.domain,
            count: subdomains.len(),
            subdomains,
            scan_time_ms: result.duration.as_millis() as u64,
        })
    }
}

#[async_trait]
impl HealthCheckable for SubfinderTool {
    async fn health(&self) -> HealthStatus {
        self.probe.binary(&self.config.binary).await
    }
}
