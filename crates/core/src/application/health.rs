// Health aggregation
use crate::domain::{HealthState, HealthStatus};
use std::collections::BTreeMap;

/// Reduce several probe results to one.
///
/// Worst state wins (Unhealthy > Degraded > Healthy). Non-empty messages
/// are joined with `"; "` and details are merged under `check_{index}_{key}`.
pub fn combine(checks: &[HealthStatus]) -> HealthStatus {
    if checks.is_empty() {
        return HealthStatus::healthy("no checks to perform");
    }

    let worst = checks
        .iter()
        .map(|c| c.state)
        .max()
        .unwrap_or(HealthState::Healthy);

    let mut details = BTreeMap::new();
    for (i, check) in checks.iter().enumerate() {
        for (key, value) in &check.details {
            details.insert(format!("check_{}_{}", i, key), value.clone());
        }
    }

    let message = checks
        .iter()
        .map(|c| c.message.as_str())
        .filter(|m| !m.is_empty())
        .collect::<Vec<_>>()
        .join("; ");

    let status = match worst {
        HealthState::Unhealthy => {
            HealthStatus::unhealthy(format!("health check failed: {}", message))
        }
        HealthState::Degraded => {
            HealthStatus::degraded(format!("health check degraded: {}", message))
        }
        HealthState::Healthy => HealthStatus::healthy(message),
    };

    status.with_details(details)
}
