// Central Error Type for tool adapters

use crate::domain::ErrorClass;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Machine-readable error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BinaryNotFound,
    ExecutionFailed,
    Timeout,
    Cancelled,
    ParseError,
    InvalidInput,
    DependencyMissing,
    PermissionDenied,
    NetworkError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BinaryNotFound => "BINARY_NOT_FOUND",
            ErrorCode::ExecutionFailed => "EXECUTION_FAILED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::DependencyMissing => "DEPENDENCY_MISSING",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::NetworkError => "NETWORK_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adapter operation during which an error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Validate,
    Execute,
    Parse,
    Health,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Validate => write!(f, "validate"),
            Operation::Execute => write!(f, "execute"),
            Operation::Parse => write!(f, "parse"),
            Operation::Health => write!(f, "health"),
        }
    }
}

/// Failure of a tool invocation, carrying everything a caller needs to
/// decide what to do next (class), and what to show an operator.
#[derive(Error, Debug, Serialize)]
#[error("{tool} [{operation}/{code}]: {message}")]
pub struct ToolError {
    pub tool: String,
    pub operation: Operation,
    pub code: ErrorCode,
    pub class: ErrorClass,
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
    #[source]
    #[serde(skip)]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ToolError {
    pub fn new(
        tool: impl Into<String>,
        operation: Operation,
        code: ErrorCode,
        class: ErrorClass,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tool: tool.into(),
            operation,
            code,
            class,
            message: message.into(),
            details: BTreeMap::new(),
            source: None,
        }
    }

    /// Request rejected before anything was spawned
    pub fn invalid_input(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            tool,
            Operation::Validate,
            ErrorCode::InvalidInput,
            ErrorClass::Semantic,
            message,
        )
    }

    /// Tool output could not be interpreted. Always Semantic: the process ran.
    pub fn parse<E>(tool: impl Into<String>, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::new(
            tool,
            Operation::Parse,
            ErrorCode::ParseError,
            ErrorClass::Semantic,
            err.to_string(),
        )
        .with_source(err)
    }

    pub fn with_source<E>(mut self, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(err));
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.class.is_retryable()
    }
}

/// Result type alias using ToolError
pub type Result<T> = std::result::Result<T, ToolError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_display_format() {
        let err = ToolError::invalid_input("nmap", "target is required");
        assert_eq!(
            err.to_string(),
            "nmap [validate/INVALID_INPUT]: target is required"
        );
    }

    #[test]
    fn test_parse_error_is_semantic_and_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad xml");
        let err = ToolError::parse("nmap", io);

        assert_eq!(err.class, ErrorClass::Semantic);
        assert_eq!(err.code, ErrorCode::ParseError);
        assert!(err.source().is_some());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_serializes_without_source() {
        let err = ToolError::new(
            "subfinder",
            Operation::Execute,
            ErrorCode::Timeout,
            ErrorClass::Transient,
            "execution deadline exceeded after 1000ms",
        )
        .with_detail("timeout_ms", 1000);

        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "TIMEOUT");
        assert_eq!(json["class"], "TRANSIENT");
        assert_eq!(json["operation"], "execute");
        assert_eq!(json["details"]["timeout_ms"], 1000);
        assert!(json.get("source").is_none());
    }
}
