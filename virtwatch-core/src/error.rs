//! Error types for virtwatch.
//!
//! All errors use `thiserror` so they carry proper error chains. The four
//! hypervisor-facing variants map onto how far a failure is allowed to spread:
//! `Connection` and `Dispatch` end the process (or the event loop), `Query` and
//! `Registration` only cost the affected domain, volume or event kind.

use crate::types::{DomainField, EventKind};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for virtwatch operations.
pub type Result<T> = std::result::Result<T, VirtwatchError>;

/// Main error type for virtwatch.
#[derive(Error, Debug)]
pub enum VirtwatchError {
    // Hypervisor errors
    #[error("Hypervisor connection failed ({uri}): {reason}")]
    Connection { uri: String, reason: String },

    #[error("Query of {field} for domain '{domain}' failed: {reason}")]
    Query { domain: String, field: DomainField, reason: String },

    #[error("Failed to register {kind} events for domain '{domain}': {reason}")]
    Registration { domain: String, kind: EventKind, reason: String },

    #[error("Event dispatch failed: {reason}")]
    Dispatch { reason: String },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Platform errors
    #[error("Hypervisor backend '{backend}' is not available: {reason}")]
    Unsupported { backend: String, reason: String },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VirtwatchError {
    /// Create an Internal error from any error type.
    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(err.to_string())
    }

    /// Shorthand for a per-domain query failure.
    pub fn query(domain: &str, field: DomainField, reason: impl std::fmt::Display) -> Self {
        Self::Query { domain: domain.to_string(), field, reason: reason.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_names_domain_and_field() {
        let err = VirtwatchError::query("web-1", DomainField::Uuid, "domain vanished");
        assert_eq!(err.to_string(), "Query of uuid for domain 'web-1' failed: domain vanished");
    }

    #[test]
    fn test_registration_error_names_kind() {
        let reg = VirtwatchError::Registration {
            domain: "db".to_string(),
            kind: EventKind::BlockJob,
            reason: "unsupported".to_string(),
        };
        assert!(reg.to_string().contains("block-job"));
    }
}
