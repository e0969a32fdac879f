// Nmap argument construction
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Highest nmap timing template (`-T5`, "insane")
pub const MAX_TIMING: u8 = 5;

/// Scan technique
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ScanType {
    /// Host discovery only, no port scan
    Ping,
    /// TCP connect, no root needed
    #[default]
    Connect,
    Syn,
    Udp,
    Ack,
    Window,
    Maimon,
}

impl ScanType {
    pub const ALL: [ScanType; 7] = [
        ScanType::Ping,
        ScanType::Connect,
        ScanType::Syn,
        ScanType::Udp,
        ScanType::Ack,
        ScanType::Window,
        ScanType::Maimon,
    ];

    pub fn flag(&self) -> &'static str {
        match self {
            ScanType::Ping => "-sn",
            ScanType::Connect => "-sT",
            ScanType::Syn => "-sS",
            ScanType::Udp => "-sU",
            ScanType::Ack => "-sA",
            ScanType::Window => "-sW",
            ScanType::Maimon => "-sM",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::Ping => "ping",
            ScanType::Connect => "connect",
            ScanType::Syn => "syn",
            ScanType::Udp => "udp",
            ScanType::Ack => "ack",
            ScanType::Window => "window",
            ScanType::Maimon => "maimon",
        }
    }

    /// Ping scans never take a port specification
    pub fn scans_ports(&self) -> bool {
        !matches!(self, ScanType::Ping)
    }

    /// Raw-socket techniques need root or `cap_net_raw`
    pub fn requires_privileges(&self) -> bool {
        !matches!(self, ScanType::Ping | ScanType::Connect)
    }
}

impl std::fmt::Display for ScanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanType {
    type Err = ArgsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScanType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ArgsError::UnknownScanType(s.to_string()))
    }
}

impl TryFrom<String> for ScanType {
    type Error = ArgsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ScanType> for String {
    fn from(scan_type: ScanType) -> Self {
        scan_type.as_str().to_string()
    }
}

/// Request values nmap would reject or misinterpret
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgsError {
    #[error("unknown scan type '{0}' (expected one of: ping, connect, syn, udp, ack, window, maimon)")]
    UnknownScanType(String),

    #[error("target is required")]
    EmptyTarget,

    #[error("port specification is required for {0} scans")]
    EmptyPorts(ScanType),

    #[error("timing must be between 0 and {}, got {0}", MAX_TIMING)]
    TimingOutOfRange(u8),

    #[error("{field} must not start with '-': {value}")]
    OptionLike { field: &'static str, value: String },

    #[error("script names must not be empty")]
    EmptyScript,

    #[error("timeout must be at least one second")]
    ZeroTimeout,
}

/// Build nmap arguments (without output flags)
///
/// Order: scan flag, `-sV`, `-O`, `--script`, `-p` (never for ping), `-T<n>`,
/// target last.
///
/// # Example
/// ```
/// use armory_adapters::nmap::args::{build_args, ScanType};
///
/// let args = build_args("10.0.0.1", "22,80", ScanType::Connect, true, false, &[], 4);
/// assert_eq!(args, ["-sT", "-sV", "-p", "22,80", "-T4", "10.0.0.1"]);
/// ```
pub fn build_args(
    target: &str,
    ports: &str,
    scan_type: ScanType,
    service_detection: bool,
    os_detection: bool,
    scripts: &[String],
    timing: u8,
) -> Vec<String> {
    let mut args = vec![scan_type.flag().to_string()];

    if service_detection {
        args.push("-sV".to_string());
    }

    if os_detection {
        args.push("-O".to_string());
    }

    if !scripts.is_empty() {
        args.push("--script".to_string());
        args.push(scripts.join(","));
    }

    if scan_type.scans_ports() && !ports.is_empty() {
        args.push("-p".to_string());
        args.push(ports.to_string());
    }

    args.push(format!("-T{}", timing));
    args.push(target.to_string());

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scripts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_ping_scan_has_no_ports() {
        let args = build_args("192.168.1.1", "80", ScanType::Ping, false, false, &[], 3);

        assert!(args.contains(&"-sn".to_string()));
        assert!(args.contains(&"-T3".to_string()));
        assert!(args.contains(&"192.168.1.1".to_string()));
        assert!(!args.contains(&"-p".to_string()));
        assert!(!args.contains(&"80".to_string()));
    }

    #[test]
    fn test_connect_scan_with_service_detection() {
        let args = build_args("192.168.1.1", "22,80,443", ScanType::Connect, true, false, &[], 4);
        assert_eq!(
            args,
            ["-sT", "-sV", "-p", "22,80,443", "-T4", "192.168.1.1"]
        );
    }

    #[test]
    fn test_syn_scan_with_os_detection() {
        let args = build_args("192.168.1.1", "1-1000", ScanType::Syn, false, true, &[], 3);
        assert_eq!(args, ["-sS", "-O", "-p", "1-1000", "-T3", "192.168.1.1"]);
    }

    #[test]
    fn test_scripts_are_comma_joined() {
        let args = build_args(
            "192.168.1.1",
            "80",
            ScanType::Connect,
            false,
            false,
            &scripts(&["http-enum", "http-headers"]),
            3,
        );
        assert_eq!(
            args,
            ["-sT", "--script", "http-enum,http-headers", "-p", "80", "-T3", "192.168.1.1"]
        );
    }

    #[test]
    fn test_target_is_always_last() {
        for scan_type in ScanType::ALL {
            let args = build_args("scanme.nmap.org", "1-100", scan_type, true, true, &[], 2);
            assert_eq!(args.first().map(String::as_str), Some(scan_type.flag()));
            assert_eq!(args.last().map(String::as_str), Some("scanme.nmap.org"));
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = build_args("10.0.0.0/24", "443", ScanType::Udp, true, false, &scripts(&["ssl-cert"]), 5);
        let b = build_args("10.0.0.0/24", "443", ScanType::Udp, true, false, &scripts(&["ssl-cert"]), 5);
        assert_eq!(a, b);
    }

    #[test]
    fn test_scan_type_from_str() {
        assert_eq!("syn".parse::<ScanType>(), Ok(ScanType::Syn));
        assert_eq!(" Maimon ".parse::<ScanType>(), Ok(ScanType::Maimon));
        assert_eq!(
            "xmas".parse::<ScanType>(),
            Err(ArgsError::UnknownScanType("xmas".to_string()))
        );
    }

    #[test]
    fn test_scan_type_serde_matches_from_str() {
        let parsed: ScanType = serde_json::from_value(serde_json::json!("SYN")).unwrap();
        assert_eq!(parsed, ScanType::Syn);
        assert_eq!(serde_json::to_value(ScanType::Syn).unwrap(), serde_json::json!("syn"));

        let err = serde_json::from_value::<ScanType>(serde_json::json!("xmas")).unwrap_err();
        assert!(err.to_string().contains("unknown scan type 'xmas'"), "{}", err);
    }

    #[test]
    fn test_privileged_scan_types() {
        assert!(!ScanType::Connect.requires_privileges());
        assert!(!ScanType::Ping.requires_privileges());
        assert!(ScanType::Syn.requires_privileges());
        assert!(ScanType::Udp.requires_privileges());
    }
}
