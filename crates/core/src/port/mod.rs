// Port Layer - Interfaces for external dependencies

pub mod cancellation;
pub mod health_probe;
pub mod process_runner;
pub mod time_provider; // For deterministic testing
pub mod tool;

// Re-exports
pub use cancellation::{cancellation_channel, CancelHandle, CancelToken};
pub use health_probe::HealthProbe;
pub use process_runner::{
    ExecutionError, ExecutionRequest, ExecutionResult, ProcessRunner, TIMEOUT_EXIT_CODE,
};
pub use time_provider::TimeProvider;
pub use tool::{Executable, HealthCheckable, ToolDescriptor};
