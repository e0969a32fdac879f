//! Full adapter pipelines: validation, real subprocess, parsing
//!
//! The scanners are replaced with shell scripts that print canned output, so
//! these run without nmap, subfinder or nuclei installed.

mod common;

use std::path::Path;

use armory_adapters::{
    NmapConfig, NmapRequest, NmapTool, NucleiConfig, NucleiRequest, NucleiTool, SubfinderConfig,
    SubfinderRequest, SubfinderTool,
};
use armory_core::domain::{ErrorClass, HealthState};
use armory_core::error::{ErrorCode, Operation};
use armory_core::port::{Executable, HealthCheckable};

use common::{invoker, probe, runner, serial, write_script};

const NMAP_SCRIPT: &str = r#"if [ "$1" = "--version" ]; then
  echo "Nmap version 7.94 ( https://nmap.org )"
  exit 0
fi
cat <<'XML'
<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<nmaprun scanner="nmap" args="nmap -sT -oX - 192.168.1.0/30" start="1700000000" version="7.94">
<host><status state="up" reason="syn-ack"/>
<address addr="192.168.1.1" addrtype="ipv4"/>
<hostnames><hostname name="gw.local" type="PTR"/></hostnames>
<ports>
<port protocol="tcp" portid="22"><state state="open" reason="syn-ack"/><service name="ssh" product="OpenSSH" version="8.9p1"/></port>
<port protocol="tcp" portid="80"><state state="open" reason="syn-ack"/><service name="http" product="nginx" version="1.20.0"/></port>
</ports>
</host>
<host><status state="down" reason="no-response"/>
<address addr="192.168.1.2" addrtype="ipv4"/>
</host>
<runstats><finished time="1700000003" elapsed="3.10" exit="success"/><hosts up="1" down="3" total="4"/></runstats>
</nmaprun>
XML"#;

fn nmap_tool(binary: &Path) -> NmapTool {
    let runner = runner();
    NmapTool::new(
        NmapConfig {
            binary: binary.display().to_string(),
            ..NmapConfig::default()
        },
        invoker(runner.clone()),
        probe(runner),
    )
}

fn subfinder_tool(binary: &Path) -> SubfinderTool {
    let runner = runner();
    SubfinderTool::new(
        SubfinderConfig {
            binary: binary.display().to_string(),
        },
        invoker(runner.clone()),
        probe(runner),
    )
}

fn nuclei_tool(binary: &Path) -> NucleiTool {
    let runner = runner();
    NucleiTool::new(
        NucleiConfig {
            binary: binary.display().to_string(),
        },
        invoker(runner.clone()),
        probe(runner),
    )
}

#[tokio::test]
async fn test_nmap_scan_pipeline() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let nmap = write_script(dir.path(), "nmap", NMAP_SCRIPT);
    let tool = nmap_tool(&nmap);

    let response = tool.execute(NmapRequest::new("192.168.1.0/30")).await.unwrap();

    assert_eq!(response.target, "192.168.1.0/30");
    assert_eq!(response.total_hosts, 4);
    assert_eq!(response.hosts_up, 1);
    assert_eq!(response.hosts.len(), 2);
    assert_eq!(response.discovery.hosts.len(), 2);
    assert_eq!(response.discovery.ports.len(), 2);
    assert_eq!(response.discovery.services.len(), 2);

    let http = &response.discovery.services[1];
    assert_eq!(http.port_id, "192.168.1.1:80:tcp");
    assert_eq!(http.version.as_deref(), Some("nginx 1.20.0"));
    assert_eq!(response.hosts[0].hostname.as_deref(), Some("gw.local"));

    let health = tool.health().await;
    assert_eq!(health.state, HealthState::Healthy, "{:?}", health);
}

#[tokio::test]
async fn test_nmap_through_json_boundary() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let nmap = write_script(dir.path(), "nmap", NMAP_SCRIPT);
    let tool = nmap_tool(&nmap);

    let output = tool
        .execute_value(serde_json::json!({
            "target": "192.168.1.0/30",
            "scan_type": "connect",
            "ports": "22,80"
        }))
        .await
        .unwrap();

    assert_eq!(output["hosts_up"], 1);
    assert_eq!(output["discovery"]["ports"][0]["number"], 22);

    let err = tool
        .execute_value(serde_json::json!({"target": "192.168.1.1", "scan_type": "xmas"}))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);
    assert_eq!(err.class, ErrorClass::Semantic);
}

#[tokio::test]
async fn test_nmap_garbage_output_is_semantic() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let nmap = write_script(dir.path(), "nmap", "echo 'Starting Nmap 7.94'; echo 'not xml'");
    let tool = nmap_tool(&nmap);

    let err = tool.execute(NmapRequest::new("10.0.0.1")).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::ParseError);
    assert_eq!(err.operation, Operation::Parse);
    assert_eq!(err.class, ErrorClass::Semantic);
}

#[tokio::test]
async fn test_nmap_privilege_failure_is_infrastructure() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let nmap = write_script(
        dir.path(),
        "nmap",
        "echo 'dnet: Failed to open device eth0: Permission denied' >&2; exit 1",
    );
    let tool = nmap_tool(&nmap);

    let err = tool.execute(NmapRequest::new("10.0.0.1")).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::ExecutionFailed);
    assert_eq!(err.class, ErrorClass::Infrastructure);
    assert_eq!(err.details["exit_code"], 1);
}

#[tokio::test]
async fn test_nmap_timeout_is_transient() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let nmap = write_script(dir.path(), "nmap", "sleep 10");
    let tool = nmap_tool(&nmap);

    let mut request = NmapRequest::new("10.0.0.1");
    request.timeout_secs = Some(1);
    let err = tool.execute(request).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::Timeout);
    assert_eq!(err.class, ErrorClass::Transient);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_missing_binary_is_infrastructure() {
    let _guard = serial();
    let tool = nmap_tool(Path::new("/nonexistent/armory/nmap"));

    let err = tool.execute(NmapRequest::new("10.0.0.1")).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::BinaryNotFound);
    assert_eq!(err.class, ErrorClass::Infrastructure);

    assert_eq!(tool.health().await.state, HealthState::Unhealthy);
}

#[tokio::test]
async fn test_subfinder_partial_results() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let subfinder = write_script(
        dir.path(),
        "subfinder",
        r#"[ "$1" = "-d" ] || exit 9
echo "api.$2"
echo ""
echo "www.$2  "
echo "api.$2"
echo "[ERR] source crtsh failed" >&2
exit 1"#,
    );
    let tool = subfinder_tool(&subfinder);

    let response = tool.execute(SubfinderRequest::new("example.com")).await.unwrap();

    assert_eq!(response.subdomains, ["api.example.com", "www.example.com"]);
    assert_eq!(response.count, 2);
    assert_eq!(tool.health().await.state, HealthState::Healthy);
}

#[tokio::test]
async fn test_subfinder_failure_without_output() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let subfinder = write_script(
        dir.path(),
        "subfinder",
        "echo 'could not connect: network unreachable' >&2; exit 1",
    );
    let tool = subfinder_tool(&subfinder);

    let err = tool.execute(SubfinderRequest::new("example.com")).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::ExecutionFailed);
    assert_eq!(err.class, ErrorClass::Transient);
}

/// Emits one finding per target, and records where the target list lived
fn nuclei_script(list_log: &Path) -> String {
    r#"targets=""
while [ $# -gt 0 ]; do
  case "$1" in
    -u) targets="$2"; shift ;;
    -l) targets=$(cat "$2"); echo "$2" > "LIST_LOG"; shift ;;
  esac
  shift
done
echo "[INF] Templates loaded"
for t in $targets; do
  printf '{"template-id":"tech-detect","info":{"name":"Tech Detect","severity":"info"},"type":"http","matched-at":"%s"}\n' "$t"
done"#
        .replace("LIST_LOG", &list_log.display().to_string())
}

#[tokio::test]
async fn test_nuclei_single_target() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let list_log = dir.path().join("list-path");
    let nuclei = write_script(dir.path(), "nuclei", &nuclei_script(&list_log));
    let tool = nuclei_tool(&nuclei);

    let response = tool
        .execute(NucleiRequest::new(["https://example.com"]))
        .await
        .unwrap();

    assert_eq!(response.total_findings, 1);
    assert_eq!(response.skipped_lines, 1);
    assert_eq!(response.findings[0].matched_at, "https://example.com");
    assert_eq!(response.findings[0].template_name, "Tech Detect");
    assert!(!list_log.exists());
}

#[tokio::test]
async fn test_nuclei_target_list_is_cleaned_up() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let list_log = dir.path().join("list-path");
    let nuclei = write_script(dir.path(), "nuclei", &nuclei_script(&list_log));
    let tool = nuclei_tool(&nuclei);

    let response = tool
        .execute(NucleiRequest::new([
            "https://a.example.com",
            "https://b.example.com",
            "https://c.example.com",
        ]))
        .await
        .unwrap();

    assert_eq!(response.total_findings, 3);
    let matched: Vec<&str> = response
        .findings
        .iter()
        .map(|f| f.matched_at.as_str())
        .collect();
    assert_eq!(
        matched,
        ["https://a.example.com", "https://b.example.com", "https://c.example.com"]
    );

    let list_path = std::fs::read_to_string(&list_log).unwrap();
    assert!(!Path::new(list_path.trim()).exists());
}

#[tokio::test]
async fn test_nuclei_timeout_cleans_up() {
    let _guard = serial();
    let dir = tempfile::tempdir().unwrap();
    let list_log = dir.path().join("list-path");
    let nuclei = write_script(
        dir.path(),
        "nuclei",
        &format!("echo \"$2\" > {}; sleep 10", list_log.display()),
    );
    let tool = nuclei_tool(&nuclei);

    let mut request = NucleiRequest::new(["a.example.com", "b.example.com"]);
    request.timeout_secs = Some(1);
    let err = tool.execute(request).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::Timeout);
    let list_path = std::fs::read_to_string(&list_log).unwrap();
    assert!(!Path::new(list_path.trim()).exists());
}
