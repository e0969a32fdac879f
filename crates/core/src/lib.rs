// Armory Core - Domain Types, Ports & Pure Logic
// NO process spawning or filesystem probing here (infra-system owns the OS)

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use error::{ErrorCode, Result, ToolError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
