// Execution failure classifier
//
// Ordered, case-insensitive substring rules over the error text; first match
// wins. Anything unrecognised is Transient so the caller's retry policy, not
// this table, decides the final fate.

use crate::domain::ErrorClass;
use crate::port::ExecutionError;

const RULES: &[(&[&str], ErrorClass)] = &[
    (
        &["not found", "executable file not found", "no such file"],
        ErrorClass::Infrastructure,
    ),
    (
        &["permission denied", "access denied"],
        ErrorClass::Infrastructure,
    ),
    (
        &["timed out", "deadline exceeded", "cancel"],
        ErrorClass::Transient,
    ),
    (
        &[
            "network unreachable",
            "connection refused",
            "host unreachable",
            "no route to host",
        ],
        ErrorClass::Transient,
    ),
];

/// Classify a free-form error message
pub fn classify_message(message: &str) -> ErrorClass {
    let lowered = message.to_lowercase();

    RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| lowered.contains(n)))
        .map(|(_, class)| *class)
        .unwrap_or(ErrorClass::Transient)
}

/// Classify an error, including the text of its whole source chain.
///
/// `None` should not reach this in normal flow; it maps to Transient.
pub fn classify(error: Option<&(dyn std::error::Error + 'static)>) -> ErrorClass {
    let Some(error) = error else {
        return ErrorClass::Transient;
    };

    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }

    classify_message(&text)
}

impl ExecutionError {
    /// Semantic class of this execution failure
    pub fn class(&self) -> ErrorClass {
        classify(Some(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{ExecutionResult, TIMEOUT_EXIT_CODE};
    use std::time::Duration;

    #[derive(Debug)]
    struct TextError(&'static str);

    impl std::fmt::Display for TextError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.0)
        }
    }

    impl std::error::Error for TextError {}

    #[test]
    fn test_classify_table() {
        let cases = [
            (
                "exec: \"nmap\": executable file not found in $PATH",
                ErrorClass::Infrastructure,
            ),
            ("nmap not found", ErrorClass::Infrastructure),
            ("No such file or directory", ErrorClass::Infrastructure),
            ("permission denied: requires root", ErrorClass::Infrastructure),
            ("Access Denied", ErrorClass::Infrastructure),
            ("command timed out after 30s", ErrorClass::Transient),
            ("context deadline exceeded", ErrorClass::Transient),
            ("command cancelled", ErrorClass::Transient),
            ("context canceled", ErrorClass::Transient),
            ("network unreachable", ErrorClass::Transient),
            ("Connection refused", ErrorClass::Transient),
            ("host unreachable", ErrorClass::Transient),
            ("no route to host", ErrorClass::Transient),
            ("some unknown error occurred", ErrorClass::Transient),
        ];

        for (message, expected) in cases {
            let err = TextError(message);
            assert_eq!(classify(Some(&err)), expected, "message: {}", message);
        }
    }

    #[test]
    fn test_classify_none_is_transient() {
        assert_eq!(classify(None), ErrorClass::Transient);
    }

    #[test]
    fn test_first_rule_wins() {
        // Mentions both a missing file and a timeout: the earlier rule decides
        assert_eq!(
            classify_message("wordlist not found, request timed out"),
            ErrorClass::Infrastructure
        );
    }

    #[test]
    fn test_source_chain_is_considered() {
        let err = ExecutionError::SpawnFailed {
            command: "hydra".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "Access denied by policy"),
        };
        assert_eq!(err.class(), ErrorClass::Infrastructure);
    }

    #[test]
    fn test_execution_error_classes() {
        let not_found = ExecutionError::BinaryNotFound {
            command: "nmap".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(not_found.class(), ErrorClass::Infrastructure);

        let denied = ExecutionError::PermissionDenied {
            command: "nmap".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert_eq!(denied.class(), ErrorClass::Infrastructure);

        let partial = Box::new(ExecutionResult {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: TIMEOUT_EXIT_CODE,
            duration: Duration::from_secs(1),
        });
        let timeout = ExecutionError::DeadlineExceeded {
            timeout: Duration::from_secs(1),
            partial: partial.clone(),
        };
        assert_eq!(timeout.class(), ErrorClass::Transient);

        let cancelled = ExecutionError::Cancelled { partial };
        assert_eq!(cancelled.class(), ErrorClass::Transient);
    }
}
