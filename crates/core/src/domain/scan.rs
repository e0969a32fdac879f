// Scan Result Domain Model
//
// Flat, keyed records produced by one parse pass over one scanner document.
// Keys are deterministic so repeated parses of identical input compare equal.

use serde::{Deserialize, Serialize};

/// Discovered host (key = ip)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub ip: String,
    pub hostname: Option<String>,
    pub state: Option<String>,
    pub os: Option<String>,
}

impl Host {
    pub fn key(&self) -> &str {
        &self.ip
    }
}

/// Port on a discovered host (key = host:port:protocol)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    /// Address of the owning [`Host`]
    pub host_id: String,
    pub number: u16,
    pub protocol: String,
    pub state: Option<String>,
}

impl Port {
    pub fn key(&self) -> String {
        port_key(&self.host_id, self.number, &self.protocol)
    }
}

/// Identified service behind a port. Only exists when the scanner named it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Key of the owning [`Port`]
    pub port_id: String,
    pub name: String,
    pub version: Option<String>,
}

impl Service {
    pub fn key(&self) -> &str {
        &self.port_id
    }
}

/// Composite port key shared by [`Port`] and [`Service`]
pub fn port_key(host: &str, port: u16, protocol: &str) -> String {
    format!("{}:{}:{}", host, port, protocol)
}

/// All entities discovered by one scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub hosts: Vec<Host>,
    pub ports: Vec<Port>,
    pub services: Vec<Service>,
}

impl DiscoveryResult {
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.ports.is_empty() && self.services.is_empty()
    }
}

/// Output of one NSE-style script run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptOutput {
    pub id: String,
    pub output: String,
}

/// Port as reported to callers, nested under its host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSummary {
    pub port: u16,
    pub protocol: String,
    pub state: Option<String>,
    pub service: Option<String>,
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<ScriptOutput>,
}

/// Host as reported to callers, with its ports nested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSummary {
    pub ip: String,
    pub hostname: Option<String>,
    pub state: Option<String>,
    pub os: Option<String>,
    pub ports: Vec<PortSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<ScriptOutput>,
}

/// Run statistics reported by the scanner itself
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub hosts_up: u32,
    pub hosts_down: u32,
    pub hosts_total: u32,
    pub elapsed_secs: Option<f64>,
    pub exit: Option<String>,
}
