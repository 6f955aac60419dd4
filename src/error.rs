//! Crate-level error type.
//!
//! Every variant names the stage or source that failed so a caller can tell
//! a broken include apart from a broken primary source, or a DNS failure
//! apart from a rule failure, without parsing messages.

use thiserror::Error;

use crate::codec::CodecError;
use crate::config::validation::ValidationError;
use crate::storage::StorageError;

/// Boxed error returned by collaborator hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while loading, applying, or persisting configuration.
#[derive(Debug, Error)]
pub enum Error {
    /// No backend registered under this identifier.
    #[error("unknown {registry} backend: {name}")]
    UnknownBackend {
        registry: &'static str,
        name: String,
    },

    /// The backend rejected its parameters.
    #[error("failed to construct {registry} backend {name}: {reason}")]
    BackendConstruction {
        registry: &'static str,
        name: String,
        reason: String,
    },

    /// Reading raw bytes from a storage source failed.
    #[error("[{stage}] load failed: {source}")]
    Load {
        stage: String,
        #[source]
        source: StorageError,
    },

    /// Decoding raw bytes into a structured value failed.
    #[error("[{stage}] decode failed: {source}")]
    Decode {
        stage: String,
        #[source]
        source: CodecError,
    },

    /// Registering a change callback against a source failed.
    #[error("[{stage}] notify registration failed: {source}")]
    NotifyRegistration {
        stage: String,
        #[source]
        source: StorageError,
    },

    /// A downstream apply stage failed.
    #[error("[{stage}] apply failed: {source}")]
    Apply {
        stage: &'static str,
        #[source]
        source: BoxError,
    },

    /// Encoding a structured value failed.
    #[error("[{stage}] encode failed: {source}")]
    Encode {
        stage: String,
        #[source]
        source: CodecError,
    },

    /// Writing bytes back to storage failed.
    #[error("[{stage}] persist failed: {source}")]
    Persist {
        stage: String,
        #[source]
        source: StorageError,
    },

    /// Semantic validation of a decoded configuration failed.
    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

impl Error {
    /// Wrap a collaborator failure with the stage that produced it.
    pub fn apply(stage: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Apply {
            stage,
            source: source.into(),
        }
    }

    /// Returns true if this is a load failure caused by a missing source.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Load {
                source: StorageError::NotFound(_),
                ..
            }
        )
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
