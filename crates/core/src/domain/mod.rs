// Domain Layer - Pure data types shared by every adapter

pub mod error_class;
pub mod health;
pub mod scan;

// Re-exports
pub use error_class::ErrorClass;
pub use health::{HealthState, HealthStatus};
pub use scan::{
    DiscoveryResult, Host, HostSummary, Port, PortSummary, RunStats, ScriptOutput, Service,
};
