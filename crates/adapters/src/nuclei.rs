// Nuclei adapter (template-based vulnerability scanning)
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use armory_core::application::{ExitPolicy, ToolInvoker};
use armory_core::domain::{ErrorClass, HealthStatus};
use armory_core::error::{ErrorCode, Operation};
use armory_core::port::{
    Executable, ExecutionRequest, HealthCheckable, HealthProbe, ToolDescriptor,
};
use armory_core::{Result, ToolError};

use crate::scratch::ScratchDir;

pub const TOOL_NAME: &str = "nuclei";

const DEFAULT_RATE_LIMIT: u32 = 150;
const TARGET_LIST_FILE: &str = "targets.txt";

#[derive(Debug, Clone)]
pub struct NucleiConfig {
    pub binary: String,
}

impl Default for NucleiConfig {
    fn default() -> Self {
        Self {
            binary: TOOL_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NucleiRequest {
    /// URLs or hosts; a single string is accepted as one target
    #[serde(alias = "target", deserialize_with = "one_or_many")]
    pub targets: Vec<String>,
    #[serde(default)]
    pub templates: Vec<String>,
    #[serde(default)]
    pub severity: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Requests per second; 0 leaves nuclei's own default
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    #[serde(default, alias = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_rate_limit() -> u32 {
    DEFAULT_RATE_LIMIT
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(target) => vec![target],
        OneOrMany::Many(targets) => targets,
    })
}

impl NucleiRequest {
    pub fn new<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
            templates: Vec::new(),
            severity: Vec::new(),
            tags: Vec::new(),
            rate_limit: DEFAULT_RATE_LIMIT,
            timeout_secs: None,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.targets.is_empty() {
            return Err("at least one target is required".to_string());
        }
        for target in &self.targets {
            let target = target.trim();
            if target.is_empty() {
                return Err("targets must not be empty".to_string());
            }
            if target.starts_with('-') {
                return Err(format!("target must not start with '-': {}", target));
            }
        }
        if self.timeout_secs == Some(0) {
            return Err("timeout must be at least one second".to_string());
        }
        Ok(())
    }

    /// Argv after the target selector (`-u <t>` or `-l <file>`)
    fn filter_args(&self) -> Vec<String> {
        let mut args = vec!["-jsonl".to_string(), "-silent".to_string()];

        if !self.templates.is_empty() {
            args.push("-t".to_string());
            args.push(self.templates.join(","));
        }
        if !self.severity.is_empty() {
            args.push("-severity".to_string());
            args.push(self.severity.join(","));
        }
        if !self.tags.is_empty() {
            args.push("-tags".to_string());
            args.push(self.tags.join(","));
        }
        if self.rate_limit > 0 {
            args.push("-rate-limit".to_string());
            args.push(self.rate_limit.to_string());
        }

        args
    }
}

/// One reported match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub template_id: String,
    pub template_name: String,
    pub severity: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub matched_at: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extracted: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NucleiResponse {
    pub targets: Vec<String>,
    pub findings: Vec<Finding>,
    pub total_findings: usize,
    /// Non-blank lines that were not JSON objects
    pub skipped_lines: usize,
    pub scan_time_ms: u64,
}

/// Shape of one nuclei JSON line (only what we read)
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFinding {
    #[serde(rename = "template-id")]
    template_id: String,
    info: RawInfo,
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "matched-at")]
    matched_at: String,
    #[serde(rename = "extracted-results")]
    extracted: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawInfo {
    name: String,
    severity: String,
}

/// Parse a JSON-lines stream; returns findings and the count of skipped lines
pub fn parse_output(data: &[u8]) -> (Vec<Finding>, usize) {
    let text = String::from_utf8_lossy(data);
    let mut findings = Vec::new();
    let mut skipped = 0;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        // Structs also deserialize from arrays, so insist on an object
        let parsed = serde_json::from_str::<serde_json::Value>(line).and_then(|value| {
            if value.is_object() {
                serde_json::from_value::<RawFinding>(value)
            } else {
                Err(serde::de::Error::custom("not a JSON object"))
            }
        });
        match parsed {
            Ok(raw) if raw.template_id.is_empty() => {
                debug!("Skipping JSON line without a template id");
                skipped += 1;
            }
            Ok(raw) => findings.push(Finding {
                template_id: raw.template_id,
                template_name: raw.info.name,
                severity: raw.info.severity,
                kind: raw.kind,
                matched_at: raw.matched_at,
                extracted: raw.extracted,
            }),
            Err(e) => {
                debug!(error = %e, "Skipping non-JSON output line");
                skipped += 1;
            }
        }
    }

    (findings, skipped)
}

pub struct NucleiTool {
    config: NucleiConfig,
    invoker: ToolInvoker,
    probe: Arc<dyn HealthProbe>,
}

impl NucleiTool {
    pub fn new(config: NucleiConfig, invoker: ToolInvoker, probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            config,
            invoker,
            probe,
        }
    }
}

#[async_trait]
impl Executable for NucleiTool {
    type Request = NucleiRequest;
    type Response = NucleiResponse;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: TOOL_NAME,
            version: crate::ADAPTER_VERSION,
            description: "Fast vulnerability scanner using customizable templates",
            tags: &["reconnaissance", "vulnerability", "scanner", "T1595", "T1190"],
        }
    }

    async fn execute(&self, request: NucleiRequest) -> Result<NucleiResponse> {
        request
            .validate()
            .map_err(|msg| ToolError::invalid_input(TOOL_NAME, msg))?;

        // Lives until the end of this call, whichever way it ends
        let scratch;
        let mut args = Vec::new();

        if let [target] = request.targets.as_slice() {
            args.push("-u".to_string());
            args.push(target.trim().to_string());
        } else {
            scratch = ScratchDir::new(TOOL_NAME).map_err(scratch_error)?;
            let list = scratch
                .write_lines(TARGET_LIST_FILE, request.targets.iter().map(|t| t.trim()))
                .map_err(scratch_error)?;
            args.push("-l".to_string());
            args.push(list.display().to_string());
        }
        args.extend(request.filter_args());

        let mut exec = ExecutionRequest::new(self.config.binary.clone()).args(args);
        if let Some(secs) = request.timeout_secs {
            exec = exec.timeout(Duration::from_secs(secs));
        }

        let result = self
            .invoker
            .invoke(TOOL_NAME, exec, ExitPolicy::AcceptWithOutput)
            .await?;

        let (findings, skipped_lines) = parse_output(&result.stdout);

        info!(
            targets = request.targets.len(),
            findings = findings.len(),
            skipped_lines,
            "Nuclei scan finished"
        );

        Ok(NucleiResponse {
            targets: request.targets,
            total_findings: findings.len(),
            findings,
            skipped_lines,
            scan_time_ms: result.duration.as_millis() as u64,
        })
    }
}

fn scratch_error(err: std::io::Error) -> ToolError {
    ToolError::new(
        TOOL_NAME,
        Operation::Execute,
        ErrorCode::ExecutionFailed,
        ErrorClass::Infrastructure,
        format!("failed to prepare target list: {}", err),
    )
    .with_source(err)
}

#[async_trait]
impl HealthCheckable for NucleiTool {
    async fn health(&self) -> HealthStatus {
        self.probe.binary(&self.config.binary).await
    }
}
