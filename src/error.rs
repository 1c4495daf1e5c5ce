//! Error types for flowd.
//!
//! Every error carries a stable machine-readable code so callers can act
//! on failures without parsing messages.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for flowd operations.
pub type Result<T> = std::result::Result<T, Error>;

/// flowd error types.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Node error: {0}")]
    Node(String),

    #[error("Credential missing: {0}")]
    CredentialMissing(String),

    #[error("Execution stalled, unexecuted nodes: {0:?}")]
    Stall(Vec<String>),

    #[error("Auth error ({provider}): {reason}")]
    Auth { provider: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Expression error: {0}")]
    Expression(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the error code for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Workflow(_) => "WORKFLOW_ERROR",
            Error::Node(_) => "NODE_ERROR",
            Error::CredentialMissing(_) => "CREDENTIAL_MISSING",
            Error::Stall(_) => "STALL",
            Error::Auth { .. } => "AUTH_ERROR",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Expression(_) => "EXPRESSION_ERROR",
            Error::Http(_) => "HTTP_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// Whether this failure is the credential-missing case that executions
    /// recover from locally (the structural dry-run mode).
    ///
    /// Executors built in this crate raise `CredentialMissing` directly;
    /// the message pattern covers foreign executors that only surface text.
    pub fn is_credential_missing(&self) -> bool {
        match self {
            Error::CredentialMissing(_) => true,
            Error::Node(msg) => credential_missing_message(msg),
            _ => false,
        }
    }
}

/// Match the token / API-key / access-token absence pattern in an error
/// message from an arbitrary executor.
pub fn credential_missing_message(message: &str) -> bool {
    let re = regex_lite::Regex::new(
        r"(?i)(api[_ ]?key|access[_ ]?token|token|credential)[^.]{0,40}(not provided|missing|absent|not found|not set)",
    )
    .expect("static regex");
    re.is_match(message)
}

/// A per-node failure recorded during an execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeFailure {
    pub node: String,
    pub message: String,
}

impl NodeFailure {
    pub fn new(node: &str, message: &str) -> Self {
        Self {
            node: node.to_string(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_missing_message() {
        assert!(credential_missing_message("OPENAI_API_KEY not provided"));
        assert!(credential_missing_message("access token missing for Google Drive"));
        assert!(credential_missing_message("API key not found in credentials"));
        assert!(!credential_missing_message("connection refused"));
        assert!(!credential_missing_message("HTTP 500 from upstream"));
    }

    #[test]
    fn test_is_credential_missing_variant() {
        assert!(Error::CredentialMissing("anything".into()).is_credential_missing());
        assert!(Error::Node("slack token not set".into()).is_credential_missing());
        assert!(!Error::Node("timeout after 30s".into()).is_credential_missing());
        assert!(!Error::Workflow("no entry".into()).is_credential_missing());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Workflow("x".into()).code(), "WORKFLOW_ERROR");
        assert_eq!(Error::Stall(vec![]).code(), "STALL");
        assert_eq!(
            Error::Auth {
                provider: "google".into(),
                reason: "revoked".into()
            }
            .code(),
            "AUTH_ERROR"
        );
    }
}
