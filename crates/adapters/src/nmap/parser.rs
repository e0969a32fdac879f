// Nmap XML output parser
//
// One pass over an `<nmaprun>` document produces flat keyed records
// (DiscoveryResult) plus the nested per-host view returned to callers.
// Either the whole document parses or nothing is returned.

use armory_core::domain::scan::port_key;
use armory_core::domain::{
    DiscoveryResult, Host, HostSummary, Port, PortSummary, RunStats, ScriptOutput, Service,
};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

const ROOT_ELEMENT: &str = "nmaprun";

/// Why a scanner document was rejected
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("scanner output is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("scanner output has no XML root element")]
    NoRoot,

    #[error("unexpected root element <{0}>, expected <nmaprun>")]
    UnexpectedRoot(String),

    #[error("content after the closing </{0}> tag")]
    TrailingContent(String),

    #[error("malformed scanner XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("unexpected scanner XML structure: {0}")]
    Structure(#[from] quick_xml::DeError),
}

/// Everything extracted from one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedScan {
    pub discovery: DiscoveryResult,
    pub hosts: Vec<HostSummary>,
    /// Present when the document carried `<runstats>`
    pub stats: Option<RunStats>,
}

// ============================================================================
// XML document shape (only what we read; everything else is ignored)
// ============================================================================

#[derive(Debug, Deserialize)]
struct XmlRun {
    #[serde(rename = "host", default)]
    hosts: Vec<XmlHost>,
    #[serde(default)]
    runstats: Option<XmlRunStats>,
}

#[derive(Debug, Deserialize)]
struct XmlHost {
    #[serde(default)]
    status: Option<XmlState>,
    #[serde(rename = "address", default)]
    addresses: Vec<XmlAddress>,
    #[serde(default)]
    hostnames: Option<XmlHostnames>,
    #[serde(default)]
    ports: Option<XmlPorts>,
    #[serde(default)]
    os: Option<XmlOs>,
    #[serde(default)]
    hostscript: Option<XmlScripts>,
}

#[derive(Debug, Deserialize)]
struct XmlState {
    #[serde(rename = "@state", default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct XmlAddress {
    #[serde(rename = "@addr", default)]
    addr: String,
    #[serde(rename = "@addrtype", default)]
    addrtype: String,
}

#[derive(Debug, Deserialize)]
struct XmlHostnames {
    #[serde(rename = "hostname", default)]
    names: Vec<XmlHostname>,
}

#[derive(Debug, Deserialize)]
struct XmlHostname {
    #[serde(rename = "@name", default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct XmlPorts {
    #[serde(rename = "port", default)]
    ports: Vec<XmlPort>,
}

#[derive(Debug, Deserialize)]
struct XmlPort {
    #[serde(rename = "@protocol", default)]
    protocol: String,
    #[serde(rename = "@portid", default)]
    portid: String,
    #[serde(default)]
    state: Option<XmlState>,
    #[serde(default)]
    service: Option<XmlService>,
    #[serde(rename = "script", default)]
    scripts: Vec<XmlScript>,
}

#[derive(Debug, Deserialize)]
struct XmlService {
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@product", default)]
    product: Option<String>,
    #[serde(rename = "@version", default)]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct XmlScript {
    #[serde(rename = "@id", default)]
    id: String,
    #[serde(rename = "@output", default)]
    output: String,
}

#[derive(Debug, Deserialize)]
struct XmlScripts {
    #[serde(rename = "script", default)]
    scripts: Vec<XmlScript>,
}

#[derive(Debug, Deserialize)]
struct XmlOs {
    #[serde(rename = "osmatch", default)]
    matches: Vec<XmlOsMatch>,
}

#[derive(Debug, Deserialize)]
struct XmlOsMatch {
    #[serde(rename = "@name", default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct XmlRunStats {
    #[serde(default)]
    finished: Option<XmlFinished>,
    #[serde(default)]
    hosts: Option<XmlHostCounts>,
}

#[derive(Debug, Deserialize)]
struct XmlFinished {
    #[serde(rename = "@elapsed", default)]
    elapsed: Option<String>,
    #[serde(rename = "@exit", default)]
    exit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct XmlHostCounts {
    #[serde(rename = "@up", default)]
    up: u32,
    #[serde(rename = "@down", default)]
    down: u32,
    #[serde(rename = "@total", default)]
    total: u32,
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse raw scanner stdout
///
/// # Errors
/// Non-UTF-8 input, a document without a root element, a root other than
/// `<nmaprun>`, or malformed XML. No partial result is returned.
pub fn parse_output(data: &[u8]) -> Result<ParsedScan, ParseError> {
    let xml = std::str::from_utf8(data)?;

    let root = root_element(xml)?;
    if root != ROOT_ELEMENT {
        return Err(ParseError::UnexpectedRoot(root));
    }

    let run: XmlRun = quick_xml::de::from_str(xml)?;

    let mut builder = ScanBuilder::default();
    for host in run.hosts {
        builder.add_host(host);
    }

    let stats = run.runstats.map(|rs| {
        let counts = rs.hosts.unwrap_or(XmlHostCounts {
            up: 0,
            down: 0,
            total: 0,
        });
        let finished = rs.finished;
        RunStats {
            hosts_up: counts.up,
            hosts_down: counts.down,
            hosts_total: counts.total,
            elapsed_secs: finished
                .as_ref()
                .and_then(|f| f.elapsed.as_deref())
                .and_then(|e| e.trim().parse().ok()),
            exit: finished.and_then(|f| non_empty(f.exit)),
        }
    });

    let scan = builder.finish(stats);
    debug!(
        hosts = scan.discovery.hosts.len(),
        ports = scan.discovery.ports.len(),
        services = scan.discovery.services.len(),
        "Parsed scanner output"
    );
    Ok(scan)
}

/// Name of the root element.
///
/// Reads the whole document: text before the root, or any element or text
/// after it closes, rejects it.
fn root_element(xml: &str) -> Result<String, ParseError> {
    let mut reader = Reader::from_str(xml);
    let mut root: Option<String> = None;
    let mut depth = 0usize;

    loop {
        let event = reader.read_event()?;
        let closed = root.is_some() && depth == 0;

        match event {
            Event::Start(_) | Event::Empty(_) | Event::CData(_) if closed => {
                return Err(ParseError::TrailingContent(root.unwrap_or_default()))
            }
            Event::Text(t) if t.iter().any(|b| !b.is_ascii_whitespace()) => match &root {
                None => return Err(ParseError::NoRoot),
                Some(name) if closed => return Err(ParseError::TrailingContent(name.clone())),
                Some(_) => {}
            },
            Event::Start(e) => {
                if root.is_none() {
                    root = Some(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                }
                depth += 1;
            }
            Event::Empty(e) => {
                if root.is_none() {
                    root = Some(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                }
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Eof => return root.ok_or(ParseError::NoRoot),
            // declaration, doctype, comments, stylesheet PIs
            _ => {}
        }
    }
}

/// Accumulates records; duplicates collapse onto the first position with
/// the last occurrence's data.
#[derive(Default)]
struct ScanBuilder {
    hosts: Vec<Host>,
    summaries: Vec<HostSummary>,
    host_index: HashMap<String, usize>,
    ports: Vec<Port>,
    /// Parallel to `ports`
    services: Vec<Option<Service>>,
    /// port key -> (index in `ports`, index in the owning summary's ports)
    port_index: HashMap<String, (usize, usize)>,
}

impl ScanBuilder {
    fn add_host(&mut self, xml: XmlHost) {
        let Some(ip) = preferred_address(&xml.addresses) else {
            warn!("Skipping scanned host without an address");
            return;
        };

        let host = Host {
            ip: ip.clone(),
            hostname: xml
                .hostnames
                .as_ref()
                .and_then(|h| h.names.iter().find(|n| !n.name.trim().is_empty()))
                .map(|n| n.name.trim().to_string()),
            state: xml.status.and_then(|s| non_empty(Some(s.state))),
            os: xml
                .os
                .and_then(|os| os.matches.into_iter().next())
                .and_then(|m| non_empty(Some(m.name))),
        };

        let scripts = xml
            .hostscript
            .map(|h| h.scripts.into_iter().map(script_output).collect())
            .unwrap_or_default();

        let host_idx = match self.host_index.get(&ip) {
            Some(&idx) => {
                debug!(ip = %ip, "Duplicate host in scanner output, keeping last");
                let summary = &mut self.summaries[idx];
                summary.hostname = host.hostname.clone();
                summary.state = host.state.clone();
                summary.os = host.os.clone();
                summary.scripts = scripts;
                self.hosts[idx] = host;
                idx
            }
            None => {
                let idx = self.hosts.len();
                self.summaries.push(HostSummary {
                    ip: ip.clone(),
                    hostname: host.hostname.clone(),
                    state: host.state.clone(),
                    os: host.os.clone(),
                    ports: Vec::new(),
                    scripts,
                });
                self.hosts.push(host);
                self.host_index.insert(ip.clone(), idx);
                idx
            }
        };

        for port in xml.ports.map(|p| p.ports).unwrap_or_default() {
            self.add_port(host_idx, &ip, port);
        }
    }

    fn add_port(&mut self, host_idx: usize, ip: &str, xml: XmlPort) {
        let Ok(number) = xml.portid.trim().parse::<u16>() else {
            warn!(ip = %ip, portid = %xml.portid, "Skipping port with invalid id");
            return;
        };
        let protocol = xml.protocol.trim().to_string();
        let key = port_key(ip, number, &protocol);

        let state = xml.state.and_then(|s| non_empty(Some(s.state)));
        let (service_name, version) = match xml.service {
            Some(svc) => (
                non_empty(Some(svc.name)),
                service_version(svc.product.as_deref(), svc.version.as_deref()),
            ),
            None => (None, None),
        };

        let port = Port {
            host_id: ip.to_string(),
            number,
            protocol: protocol.clone(),
            state: state.clone(),
        };
        let service = service_name.clone().map(|name| Service {
            port_id: key.clone(),
            name,
            version: version.clone(),
        });
        let summary = PortSummary {
            port: number,
            protocol,
            state,
            service: service_name,
            version,
            scripts: xml.scripts.into_iter().map(script_output).collect(),
        };

        match self.port_index.get(&key) {
            Some(&(port_idx, slot)) => {
                debug!(port = %key, "Duplicate port in scanner output, keeping last");
                self.ports[port_idx] = port;
                self.services[port_idx] = service;
                self.summaries[host_idx].ports[slot] = summary;
            }
            None => {
                let slot = self.summaries[host_idx].ports.len();
                self.port_index.insert(key, (self.ports.len(), slot));
                self.ports.push(port);
                self.services.push(service);
                self.summaries[host_idx].ports.push(summary);
            }
        }
    }

    fn finish(self, stats: Option<RunStats>) -> ParsedScan {
        ParsedScan {
            discovery: DiscoveryResult {
                hosts: self.hosts,
                ports: self.ports,
                services: self.services.into_iter().flatten().collect(),
            },
            hosts: self.summaries,
            stats,
        }
    }
}

/// ipv4, else ipv6, else the first non-empty address
fn preferred_address(addresses: &[XmlAddress]) -> Option<String> {
    let usable = || addresses.iter().filter(|a| !a.addr.trim().is_empty());

    usable()
        .find(|a| a.addrtype == "ipv4")
        .or_else(|| usable().find(|a| a.addrtype == "ipv6"))
        .or_else(|| usable().next())
        .map(|a| a.addr.trim().to_string())
}

/// `"<product> <version>"` when a product is named, else the bare version
fn service_version(product: Option<&str>, version: Option<&str>) -> Option<String> {
    let product = product.map(str::trim).unwrap_or_default();
    let version = version.map(str::trim).unwrap_or_default();

    let combined = if product.is_empty() {
        version.to_string()
    } else {
        format!("{} {}", product, version).trim().to_string()
    };

    non_empty(Some(combined))
}

fn script_output(script: XmlScript) -> ScriptOutput {
    ScriptOutput {
        id: script.id,
        output: script.output.trim().to_string(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
