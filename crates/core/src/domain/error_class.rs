// Error Class - coarse failure taxonomy driving retry decisions

use serde::{Deserialize, Serialize};

/// Semantic class of a failed tool invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClass {
    /// Execution environment is broken (binary missing, permission denied).
    /// Needs operator intervention; retrying will not help.
    Infrastructure,
    /// Likely to succeed on retry (timeout, network, cancellation)
    Transient,
    /// Tool ran but its output could not be interpreted
    Semantic,
}

impl ErrorClass {
    /// Only transient failures are worth retrying automatically
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Infrastructure => write!(f, "INFRASTRUCTURE"),
            ErrorClass::Transient => write!(f, "TRANSIENT"),
            ErrorClass::Semantic => write!(f, "SEMANTIC"),
        }
    }
}
