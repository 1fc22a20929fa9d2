//! Error types for corral-core operations.
//!
//! Conflicts are deliberately NOT an error variant: a held lease is a normal
//! outcome of `acquire` and carries its own data type (`model::Conflict`).

use crate::store::StoreError;

/// All errors that can occur in corral-core operations.
#[derive(Debug, thiserror::Error)]
pub enum CoordError {
    // ─────────────────────────────────────────────────────────────────────
    // Store Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("coordination store unreachable: {source}")]
    StoreUnavailable {
        #[source]
        source: StoreError,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Lease Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("not the owner of {resource_id} (held by {owner})")]
    NotOwner { resource_id: String, owner: String },

    #[error("no lease exists on {resource_id}")]
    NoSuchLease { resource_id: String },

    // ─────────────────────────────────────────────────────────────────────
    // Environment Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("home directory not found")]
    HomeDirNotFound,

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parsing error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<StoreError> for CoordError {
    fn from(source: StoreError) -> Self {
        CoordError::StoreUnavailable { source }
    }
}

/// Convenience type alias for Results using CoordError.
pub type Result<T> = std::result::Result<T, CoordError>;
