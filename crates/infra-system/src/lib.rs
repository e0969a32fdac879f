// Armory Infrastructure - System Adapters
// Implements: ProcessRunner, HealthProbe

pub mod health_probe_impl;
pub mod subprocess_runner;

pub use health_probe_impl::{resolve_binary, SystemHealthProbe};
pub use subprocess_runner::SubprocessRunner;
