// Application Layer - Pure logic shared by every adapter

pub mod classifier;
pub mod constants;
pub mod health;
pub mod invoker;
pub mod retry;

// Re-exports
pub use classifier::{classify, classify_message};
pub use health::combine;
pub use invoker::{ExitPolicy, InvokerConfig, ToolInvoker};
pub use retry::{RetryDecision, RetryPolicy};
