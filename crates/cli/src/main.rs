//! Armory CLI - run one security tool adapter and print its typed result
//!
//! Results go to stdout as JSON. Failures go to stderr as the `ToolError`
//! JSON, and the exit code tells the caller what kind of failure it was.

mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tabled::{Table, Tabled};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use armory_adapters::{
    NmapConfig, NmapRequest, NmapTool, NucleiConfig, NucleiRequest, NucleiTool,
    SubfinderConfig, SubfinderRequest, SubfinderTool,
};
use armory_adapters::nmap::ScanType;
use armory_core::application::constants::{
    DEFAULT_RETRY_BACKOFF_FACTOR, DEFAULT_RETRY_BASE_DELAY_MS,
};
use armory_core::application::{
    combine, InvokerConfig, RetryDecision, RetryPolicy, ToolInvoker,
};
use armory_core::domain::{ErrorClass, HealthState, HealthStatus};
use armory_core::port::time_provider::SystemTimeProvider;
use armory_core::port::{Executable, HealthCheckable, ProcessRunner};
use armory_core::ToolError;
use armory_infra_system::{SubprocessRunner, SystemHealthProbe};

use logging::LogFormat;

// sysexits(3)
const EX_DATAERR: u8 = 65;
const EX_UNAVAILABLE: u8 = 69;
const EX_SOFTWARE: u8 = 70;
const EX_TEMPFAIL: u8 = 75;
const EX_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "armory")]
#[command(about = "Run security tools behind typed, classified adapters", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Timeout applied when a request carries none
    #[arg(long, global = true, env = "ARMORY_DEFAULT_TIMEOUT_SECS", default_value = "300")]
    timeout_secs: u64,

    /// Extra attempts for transient failures
    #[arg(long, global = true, env = "ARMORY_RETRIES", default_value = "0")]
    retries: u32,

    #[arg(long, global = true, env = "ARMORY_LOG_FORMAT", value_enum, default_value = "pretty")]
    log_format: LogFormat,

    /// Environment variables passed to tools (comma-separated). Unset inherits everything.
    #[arg(long, global = true, env = "ARMORY_ENV_ALLOWLIST", value_delimiter = ',')]
    env_allowlist: Option<Vec<String>>,

    #[arg(long, global = true, env = "ARMORY_NMAP_BIN", default_value = "nmap")]
    nmap_bin: String,

    /// Require cap_net_raw/cap_net_admin on the nmap binary
    #[arg(long, global = true, env = "ARMORY_NMAP_PRIVILEGED")]
    nmap_privileged: bool,

    #[arg(long, global = true, env = "ARMORY_SUBFINDER_BIN", default_value = "subfinder")]
    subfinder_bin: String,

    #[arg(long, global = true, env = "ARMORY_NUCLEI_BIN", default_value = "nuclei")]
    nuclei_bin: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Port scan and service discovery
    Nmap {
        /// Host, IP or CIDR range
        target: String,

        #[arg(short, long, default_value = "1-1000")]
        ports: String,

        /// ping, connect, syn, udp, ack, window or maimon
        #[arg(short = 's', long, default_value = "connect")]
        scan_type: ScanType,

        /// Skip service/version detection
        #[arg(long)]
        no_service_detection: bool,

        #[arg(short = 'O', long)]
        os_detection: bool,

        /// NSE script (repeatable)
        #[arg(long = "script")]
        scripts: Vec<String>,

        /// Timing template 0-5
        #[arg(short = 'T', long, default_value = "3")]
        timing: u8,

        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Passive subdomain enumeration
    Subfinder {
        domain: String,

        #[arg(long)]
        silent: bool,

        #[arg(long)]
        recursive: bool,

        /// Only use default sources
        #[arg(long)]
        no_all: bool,

        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Template-based vulnerability scan
    Nuclei {
        #[arg(required = true)]
        targets: Vec<String>,

        #[arg(short, long = "template")]
        templates: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        severity: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Requests per second (0 = nuclei default)
        #[arg(long, default_value = "150")]
        rate_limit: u32,

        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Run a tool from a JSON request (argument, or stdin when omitted or "-")
    Run {
        #[arg(value_enum)]
        tool: ToolKind,

        request: Option<String>,
    },

    /// Check that tools are installed and usable
    Health {
        /// Tools to check (default: all)
        #[arg(value_enum)]
        tools: Vec<ToolKind>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ToolKind {
    Nmap,
    Subfinder,
    Nuclei,
}

impl ToolKind {
    const ALL: [ToolKind; 3] = [ToolKind::Nmap, ToolKind::Subfinder, ToolKind::Nuclei];
}

/// Adapters wired to the real OS
struct Toolbox {
    nmap: NmapTool,
    subfinder: SubfinderTool,
    nuclei: NucleiTool,
}

impl Toolbox {
    fn new(cli: &Cli) -> Self {
        let time_provider = Arc::new(SystemTimeProvider);

        let mut runner = SubprocessRunner::new(time_provider);
        if let Some(allowlist) = &cli.env_allowlist {
            runner = runner.with_env_allowlist(allowlist.clone());
        }
        let runner: Arc<dyn ProcessRunner> = Arc::new(runner);

        let probe = Arc::new(SystemHealthProbe::new(runner.clone()));
        let invoker = ToolInvoker::new(
            runner,
            InvokerConfig {
                default_timeout: Duration::from_secs(cli.timeout_secs),
            },
        );

        let nmap_config = NmapConfig {
            binary: expand(&cli.nmap_bin),
            ..if cli.nmap_privileged {
                NmapConfig::privileged()
            } else {
                NmapConfig::default()
            }
        };

        Self {
            nmap: NmapTool::new(nmap_config, invoker.clone(), probe.clone()),
            subfinder: SubfinderTool::new(
                SubfinderConfig {
                    binary: expand(&cli.subfinder_bin),
                },
                invoker.clone(),
                probe.clone(),
            ),
            nuclei: NucleiTool::new(
                NucleiConfig {
                    binary: expand(&cli.nuclei_bin),
                },
                invoker,
                probe,
            ),
        }
    }

    async fn health(&self, tool: ToolKind) -> HealthStatus {
        match tool {
            ToolKind::Nmap => self.nmap.health().await,
            ToolKind::Subfinder => self.subfinder.health().await,
            ToolKind::Nuclei => self.nuclei.health().await,
        }
    }

    async fn execute_value(
        &self,
        tool: ToolKind,
        input: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ToolError> {
        match tool {
            ToolKind::Nmap => self.nmap.execute_value(input).await,
            ToolKind::Subfinder => self.subfinder.execute_value(input).await,
            ToolKind::Nuclei => self.nuclei.execute_value(input).await,
        }
    }
}

fn expand(path: &str) -> String {
    shellexpand::tilde(path).into_owned()
}

#[derive(Serialize, Tabled)]
struct HealthRow {
    tool: String,
    state: String,
    message: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.log_format) {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        return ExitCode::from(EX_SOFTWARE);
    }

    // Dropping the command future on Ctrl-C kills any running tool
    tokio::select! {
        result = run(&cli) => match result {
            Ok(code) => code,
            Err(e) => ExitCode::from(report_error(&e)),
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping running tool");
            ExitCode::from(EX_INTERRUPTED)
        }
    }
}

async fn run(cli: &Cli) -> Result<ExitCode> {
    let tools = Toolbox::new(cli);
    let policy = RetryPolicy::new(
        cli.retries.saturating_add(1),
        DEFAULT_RETRY_BASE_DELAY_MS,
        DEFAULT_RETRY_BACKOFF_FACTOR,
    );

    let output = match &cli.command {
        Commands::Nmap {
            target,
            ports,
            scan_type,
            no_service_detection,
            os_detection,
            scripts,
            timing,
            timeout,
        } => {
            let request = NmapRequest {
                target: target.clone(),
                ports: ports.clone(),
                scan_type: *scan_type,
                service_detection: !no_service_detection,
                os_detection: *os_detection,
                scripts: scripts.clone(),
                timing: *timing,
                timeout_secs: *timeout,
            };
            let response = with_retry(&policy, || tools.nmap.execute(request.clone())).await?;
            serde_json::to_value(response)?
        }

        Commands::Subfinder {
            domain,
            silent,
            recursive,
            no_all,
            timeout,
        } => {
            let request = SubfinderRequest {
                domain: domain.clone(),
                silent: *silent,
                recursive: *recursive,
                all: !no_all,
                timeout_secs: *timeout,
            };
            let response =
                with_retry(&policy, || tools.subfinder.execute(request.clone())).await?;
            serde_json::to_value(response)?
        }

        Commands::Nuclei {
            targets,
            templates,
            severity,
            tags,
            rate_limit,
            timeout,
        } => {
            let request = NucleiRequest {
                targets: targets.clone(),
                templates: templates.clone(),
                severity: severity.clone(),
                tags: tags.clone(),
                rate_limit: *rate_limit,
                timeout_secs: *timeout,
            };
            let response = with_retry(&policy, || tools.nuclei.execute(request.clone())).await?;
            serde_json::to_value(response)?
        }

        Commands::Run { tool, request } => {
            let raw = match request.as_deref() {
                None | Some("-") => {
                    let mut buf = String::new();
                    tokio::io::stdin()
                        .read_to_string(&mut buf)
                        .await
                        .context("Failed to read request from stdin")?;
                    buf
                }
                Some(inline) => inline.to_string(),
            };
            let input: serde_json::Value =
                serde_json::from_str(&raw).context("Request is not valid JSON")?;

            with_retry(&policy, || tools.execute_value(*tool, input.clone())).await?
        }

        Commands::Health { tools: selected, json } => {
            return health(&tools, selected, *json).await;
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(ExitCode::SUCCESS)
}

/// Re-run `attempt` while the policy says the failure is worth retrying
async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut attempt: F) -> std::result::Result<T, ToolError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, ToolError>>,
{
    let mut n = 1;
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) => match policy.should_retry(&e, n) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        tool = %e.tool,
                        attempt = n,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    n += 1;
                }
                RetryDecision::GiveUp => return Err(e),
            },
        }
    }
}

async fn health(tools: &Toolbox, selected: &[ToolKind], json: bool) -> Result<ExitCode> {
    let selected = if selected.is_empty() {
        ToolKind::ALL.to_vec()
    } else {
        selected.to_vec()
    };

    let mut statuses = Vec::with_capacity(selected.len());
    for tool in selected {
        let status = tools.health(tool).await;
        info!(tool = ?tool, state = %status.state, "Health check finished");
        statuses.push((tool, status));
    }

    let overall = combine(
        &statuses
            .iter()
            .map(|(_, status)| status.clone())
            .collect::<Vec<_>>(),
    );

    let rows: Vec<HealthRow> = statuses
        .iter()
        .map(|(tool, status)| HealthRow {
            tool: tool_name(*tool).to_string(),
            state: status.state.to_string(),
            message: status.message.clone(),
        })
        .collect();

    if json {
        let report = serde_json::json!({
            "state": overall.state,
            "tools": statuses
                .iter()
                .map(|(tool, status)| (tool_name(*tool).to_string(), status))
                .collect::<std::collections::BTreeMap<_, _>>(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", Table::new(rows));
        println!();
        let summary = format!("Overall: {}", overall.state);
        match overall.state {
            HealthState::Healthy => println!("{}", summary.green().bold()),
            HealthState::Degraded => println!("{}", summary.yellow().bold()),
            HealthState::Unhealthy => println!("{}", summary.red().bold()),
        }
    }

    Ok(match overall.state {
        HealthState::Unhealthy => ExitCode::from(EX_UNAVAILABLE),
        HealthState::Healthy | HealthState::Degraded => ExitCode::SUCCESS,
    })
}

fn tool_name(tool: ToolKind) -> &'static str {
    match tool {
        ToolKind::Nmap => armory_adapters::nmap::TOOL_NAME,
        ToolKind::Subfinder => armory_adapters::subfinder::TOOL_NAME,
        ToolKind::Nuclei => armory_adapters::nuclei::TOOL_NAME,
    }
}

/// Print the failure to stderr and map its class to an exit code
fn report_error(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ToolError>() {
        Some(tool_err) => {
            match serde_json::to_string_pretty(tool_err) {
                Ok(json) => eprintln!("{}", json),
                Err(_) => eprintln!("{} {}", "error:".red().bold(), tool_err),
            }
            exit_code(tool_err.class)
        }
        None => {
            eprintln!("{} {:#}", "error:".red().bold(), err);
            EX_SOFTWARE
        }
    }
}

fn exit_code(class: ErrorClass) -> u8 {
    match class {
        ErrorClass::Infrastructure => EX_UNAVAILABLE,
        ErrorClass::Transient => EX_TEMPFAIL,
        ErrorClass::Semantic => EX_DATAERR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armory_core::application::constants::DEFAULT_MAX_ATTEMPTS;
    use armory_core::error::{ErrorCode, Operation};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> ToolError {
        ToolError::new(
            "nmap",
            Operation::Execute,
            ErrorCode::Timeout,
            ErrorClass::Transient,
            "timed out",
        )
    }

    #[test]
    fn test_cli_parses_nmap_command() {
        let cli = Cli::try_parse_from([
            "armory", "--retries", "2", "nmap", "10.0.0.1", "-s", "syn", "-p", "22,80", "--script",
            "banner",
        ])
        .unwrap();

        assert_eq!(cli.retries, 2);
        match cli.command {
            Commands::Nmap {
                target,
                scan_type,
                ports,
                scripts,
                ..
            } => {
                assert_eq!(target, "10.0.0.1");
                assert_eq!(scan_type, ScanType::Syn);
                assert_eq!(ports, "22,80");
                assert_eq!(scripts, ["banner"]);
            }
            _ => panic!("expected nmap command"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_scan_type() {
        assert!(Cli::try_parse_from(["armory", "nmap", "10.0.0.1", "-s", "xmas"]).is_err());
    }

    #[test]
    fn test_cli_nuclei_requires_target() {
        assert!(Cli::try_parse_from(["armory", "nuclei"]).is_err());

        let cli = Cli::try_parse_from([
            "armory", "nuclei", "https://a.example.com", "https://b.example.com", "--severity",
            "high,critical",
        ])
        .unwrap();
        match cli.command {
            Commands::Nuclei {
                targets, severity, ..
            } => {
                assert_eq!(targets.len(), 2);
                assert_eq!(severity, ["high", "critical"]);
            }
            _ => panic!("expected nuclei command"),
        }
    }

    #[test]
    fn test_exit_codes_follow_sysexits() {
        assert_eq!(exit_code(ErrorClass::Infrastructure), 69);
        assert_eq!(exit_code(ErrorClass::Transient), 75);
        assert_eq!(exit_code(ErrorClass::Semantic), 65);
    }

    #[tokio::test]
    async fn test_with_retry_stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(DEFAULT_MAX_ATTEMPTS, 1, 1.0);

        let result: std::result::Result<(), ToolError> = with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), DEFAULT_MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_with_retry_does_not_retry_semantic() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, 1, 1.0);

        let result: std::result::Result<(), ToolError> = with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ToolError::invalid_input("nmap", "target is required")) }
        })
        .await;

        assert_eq!(result.unwrap_err().code, ErrorCode::InvalidInput);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_returns_first_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, 1, 1.0);

        let result = with_retry(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(transient())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
    }

    #[test]
    fn test_report_error_maps_tool_error_class() {
        let err = anyhow::Error::new(transient());
        assert_eq!(report_error(&err), EX_TEMPFAIL);

        let other = anyhow::anyhow!("stdin closed");
        assert_eq!(report_error(&other), EX_SOFTWARE);
    }
}
