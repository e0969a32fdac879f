// Adapter constants (no magic values in adapters or probes)
use std::time::Duration;

/// Default wall-clock bound for one tool invocation (5 minutes)
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Timeout for `<binary> --version` style probes (5s)
pub const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for capability introspection (5s)
pub const CAPABILITY_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP connect budget when the caller gives no deadline (5s)
pub const NETWORK_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Grace period between SIGTERM and SIGKILL for a cancelled process group
pub const GRACEFUL_KILL_TIMEOUT: Duration = Duration::from_millis(2000);

/// How long output pipes may stay open after the child itself exited
pub const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Default capability introspection tool
pub const DEFAULT_CAPABILITY_TOOL: &str = "getcap";

/// Max bytes of stderr copied into error details
pub const STDERR_DETAIL_LIMIT: usize = 2048;

/// Default retry base delay (1000ms = 1s)
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;

/// Default exponential backoff factor
pub const DEFAULT_RETRY_BACKOFF_FACTOR: f64 = 2.0;

/// Default number of attempts including the first one
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
