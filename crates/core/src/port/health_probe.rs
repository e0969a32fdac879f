// Health probe port
// reason: async-trait, probes may spawn processes or open sockets
use crate::domain::HealthStatus;
use async_trait::async_trait;
use std::path::Path;
use std::time::Instant;

/// Independent checks against one environmental precondition each.
///
/// Probes never mutate state; each returns a [`HealthStatus`] and never fails.
/// Several results are reduced with `application::health::combine`.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Healthy if `name` resolves on the executable search path
    async fn binary(&self, name: &str) -> HealthStatus;

    /// Runs `name <version_flag>` with a short fixed timeout.
    ///
    /// Degraded (not Unhealthy) when the binary exists but the version call
    /// fails: the binary may still work for its primary function.
    async fn version(&self, name: &str, version_flag: &str) -> HealthStatus;

    /// Checks file capabilities (e.g. `cap_net_raw`) on the resolved binary.
    ///
    /// Degraded when the introspection tool itself is unavailable, since the
    /// capability may be granted through privilege escalation we cannot see.
    async fn capabilities(&self, binary: &str, required: &[String]) -> HealthStatus;

    /// Healthy iff a TCP connection completes before `deadline`
    /// (default: 5 seconds from now)
    async fn network(&self, host: &str, port: u16, deadline: Option<Instant>) -> HealthStatus;

    /// Healthy if the path exists (file or directory)
    async fn file(&self, path: &Path) -> HealthStatus;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Mock HealthProbe: every check is healthy unless overridden by name
    #[derive(Default)]
    pub struct MockHealthProbe {
        overrides: Mutex<HashMap<String, HealthStatus>>,
        calls: Mutex<Vec<String>>,
    }

    impl MockHealthProbe {
        pub fn new() -> Self {
            Self::default()
        }

        /// Override the result for a probe, keyed `"<kind>:<subject>"`,
        /// e.g. `"binary:nmap"` or `"version:nmap"`.
        pub fn set(&self, key: impl Into<String>, status: HealthStatus) {
            self.overrides.lock().unwrap().insert(key.into(), status);
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn answer(&self, key: String) -> HealthStatus {
            self.calls.lock().unwrap().push(key.clone());
            self.overrides
                .lock()
                .unwrap()
                .get(&key)
                .cloned()
                .unwrap_or_else(|| HealthStatus::healthy(format!("{} ok", key)))
        }
    }

    #[async_trait]
    impl HealthProbe for MockHealthProbe {
        async fn binary(&self, name: &str) -> HealthStatus {
            self.answer(format!("binary:{}", name))
        }

        async fn version(&self, name: &str, _version_flag: &str) -> HealthStatus {
            self.answer(format!("version:{}", name))
        }

        async fn capabilities(&self, binary: &str, _required: &[String]) -> HealthStatus {
            self.answer(format!("capabilities:{}", binary))
        }

        async fn network(&self, host: &str, port: u16, _deadline: Option<Instant>) -> HealthStatus {
            self.answer(format!("network:{}:{}", host, port))
        }

        async fn file(&self, path: &Path) -> HealthStatus {
            self.answer(format!("file:{}", path.display()))
        }
    }
}
