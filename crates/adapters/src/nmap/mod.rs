// Nmap adapter
//
// request -> validate -> build_args -> ToolInvoker -> parse_output -> response

pub mod args;
pub mod parser;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use armory_core::application::{combine, ExitPolicy, ToolInvoker};
use armory_core::domain::{DiscoveryResult, HealthStatus, HostSummary, RunStats};
use armory_core::port::{
    Executable, ExecutionRequest, HealthCheckable, HealthProbe, ToolDescriptor,
};
use armory_core::{Result, ToolError};

pub use args::{build_args, ArgsError, ScanType, MAX_TIMING};
pub use parser::{parse_output, ParseError, ParsedScan};

pub const TOOL_NAME: &str = "nmap";

const DEFAULT_PORTS: &str = "1-1000";
const DEFAULT_TIMING: u8 = 3;

/// Nmap adapter configuration
#[derive(Debug, Clone)]
pub struct NmapConfig {
    /// Binary name or path
    pub binary: String,
    pub version_flag: String,
    /// File capabilities the binary must carry (e.g. for unprivileged SYN scans).
    /// Empty means capabilities are not checked.
    pub required_capabilities: Vec<String>,
}

impl Default for NmapConfig {
    fn default() -> Self {
        Self {
            binary: TOOL_NAME.to_string(),
            version_flag: "--version".to_string(),
            required_capabilities: Vec::new(),
        }
    }
}

impl NmapConfig {
    /// Capabilities needed for raw-socket scans without root
    pub fn privileged() -> Self {
        Self {
            required_capabilities: vec!["cap_net_raw".to_string(), "cap_net_admin".to_string()],
            ..Self::default()
        }
    }
}

/// Nmap scan request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NmapRequest {
    /// Host, IP or CIDR range
    pub target: String,
    #[serde(default = "default_ports")]
    pub ports: String,
    #[serde(default)]
    pub scan_type: ScanType,
    #[serde(default = "default_true")]
    pub service_detection: bool,
    #[serde(default)]
    pub os_detection: bool,
    #[serde(default)]
    pub scripts: Vec<String>,
    /// Timing template 0..=5
    #[serde(default = "default_timing")]
    pub timing: u8,
    #[serde(default, alias = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_ports() -> String {
    DEFAULT_PORTS.to_string()
}

fn default_true() -> bool {
    true
}

fn default_timing() -> u8 {
    DEFAULT_TIMING
}

impl NmapRequest {
    /// Request with every option at its default
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ports: default_ports(),
            scan_type: ScanType::default(),
            service_detection: true,
            os_detection: false,
            scripts: Vec::new(),
            timing: DEFAULT_TIMING,
            timeout_secs: None,
        }
    }

    /// Reject values nmap would misinterpret; nothing is spawned on failure
    pub fn validate(&self) -> std::result::Result<(), ArgsError> {
        let target = self.target.trim();
        if target.is_empty() {
            return Err(ArgsError::EmptyTarget);
        }
        if target.starts_with('-') {
            return Err(ArgsError::OptionLike {
                field: "target",
                value: self.target.clone(),
            });
        }

        if self.scan_type.scans_ports() {
            let ports = self.ports.trim();
            if ports.is_empty() {
                return Err(ArgsError::EmptyPorts(self.scan_type));
            }
            if ports.starts_with('-') {
                return Err(ArgsError::OptionLike {
                    field: "ports",
                    value: self.ports.clone(),
                });
            }
        }

        for script in &self.scripts {
            let script = script.trim();
            if script.is_empty() {
                return Err(ArgsError::EmptyScript);
            }
            if script.starts_with('-') {
                return Err(ArgsError::OptionLike {
                    field: "scripts",
                    value: script.to_string(),
                });
            }
        }

        if self.timing > MAX_TIMING {
            return Err(ArgsError::TimingOutOfRange(self.timing));
        }

        if self.timeout_secs == Some(0) {
            return Err(ArgsError::ZeroTimeout);
        }

        Ok(())
    }

    /// Full argv: XML to stdout, then the scan arguments
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["-oX".to_string(), "-".to_string()];
        args.extend(build_args(
            self.target.trim(),
            self.ports.trim(),
            self.scan_type,
            self.service_detection,
            self.os_detection,
            &self.scripts,
            self.timing,
        ));
        args
    }
}

/// Nmap scan response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NmapResponse {
    pub target: String,
    pub hosts: Vec<HostSummary>,
    pub total_hosts: u32,
    pub hosts_up: u32,
    pub scan_time_ms: u64,
    /// Flat keyed records for graph ingestion
    pub discovery: DiscoveryResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<RunStats>,
}

impl NmapResponse {
    fn from_scan(target: String, scan: ParsedScan, scan_time_ms: u64) -> Self {
        // Ping sweeps only list live hosts; runstats knows the real totals
        let (total_hosts, hosts_up) = match &scan.stats {
            Some(stats) => (stats.hosts_total, stats.hosts_up),
            None => (
                scan.hosts.len() as u32,
                scan.hosts
                    .iter()
                    .filter(|h| h.state.as_deref() == Some("up"))
                    .count() as u32,
            ),
        };

        Self {
            target,
            hosts: scan.hosts,
            total_hosts,
            hosts_up,
            scan_time_ms,
            discovery: scan.discovery,
            stats: scan.stats,
        }
    }
}

/// Nmap adapter
pub struct NmapTool {
    config: NmapConfig,
    invoker: ToolInvoker,
    probe: Arc<dyn HealthProbe>,
}

impl NmapTool {
    pub fn new(config: NmapConfig, invoker: ToolInvoker, probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            config,
            invoker,
            probe,
        }
    }
}

#[async_trait]
impl Executable for NmapTool {
    type Request = NmapRequest;
    type Response = NmapResponse;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: TOOL_NAME,
            version: crate::ADAPTER_VERSION,
            description: "Network scanner: host discovery, port scanning, service and OS detection",
            tags: &["discovery", "network", "port-scan", "T1046"],
        }
    }

    async fn execute(&self, request: NmapRequest) -> Result<NmapResponse> {
        request
            .validate()
            .map_err(|e| ToolError::invalid_input(TOOL_NAME, e.to_string()).with_source(e))?;

        let mut exec = ExecutionRequest::new(self.config.binary.clone()).args(request.to_args());
        if let Some(secs) = request.timeout_secs {
            exec = exec.timeout(Duration::from_secs(secs));
        }

        let result = self
            .invoker
            .invoke(TOOL_NAME, exec, ExitPolicy::RequireSuccess)
            .await?;

        let scan = parse_output(&result.stdout).map_err(|e| ToolError::parse(TOOL_NAME, e))?;

        let response = NmapResponse::from_scan(
            request.target,
            scan,
            result.duration.as_millis() as u64,
        );

        info!(
            target = %response.target,
            hosts = response.hosts.len(),
            hosts_up = response.hosts_up,
            ports = response.discovery.ports.len(),
            "Nmap scan parsed"
        );

        Ok(response)
    }
}

#[async_trait]
impl HealthCheckable for NmapTool {
    async fn health(&self) -> HealthStatus {
        let binary = &self.config.binary;

        let mut checks = vec![
            self.probe.binary(binary).await,
            self.probe.version(binary, &self.config.version_flag).await,
        ];
        if !self.config.required_capabilities.is_empty() {
            checks.push(
                self.probe
                    .capabilities(binary, &self.config.required_capabilities)
                    .await,
            );
        }

        combine(&checks)
    }
}
