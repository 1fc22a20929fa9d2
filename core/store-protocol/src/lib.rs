//! Record contract for the shared coordination store.
//!
//! This crate is shared by corral-core and every store backend to prevent
//! schema drift. Backends remain the authority on persistence, but all
//! participants construct and validate records through the same types.
//!
//! The store itself is deliberately loose: an entity is a named record with
//! a type tag and an append-only list of free-text attributes. Coordination
//! records (sessions, leases) are serialized into attributes at this boundary
//! and parsed back latest-wins by readers.

use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// Upper bound on a single attribute payload. Large blobs indicate a caller
/// serializing something that does not belong in the coordination store.
pub const MAX_ATTRIBUTE_BYTES: usize = 16 * 1024;

pub const ENTITY_TYPE_SESSION: &str = "session";
pub const ENTITY_TYPE_LEASE: &str = "lease";
pub const RELATION_HOLDS: &str = "holds";

const SESSION_NAME_PREFIX: &str = "sid:";
const LEASE_NAME_PREFIX: &str = "res:";

/// A named record in the shared store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Entity {
    pub name: String,
    pub entity_type: String,
    #[serde(default)]
    pub attributes: Vec<String>,
}

/// A directed, typed edge between two entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Relation {
    pub from: String,
    pub to: String,
    pub relation_type: String,
}

/// Queries a backend must answer. Kept intentionally small; anything richer
/// belongs in the caller, not the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    /// All entities with the given type tag.
    ByType(String),
    /// The entity with exactly this name, if present.
    ByName(String),
    /// All entities whose name contains the given fragment.
    NameContains(String),
}

/// A rejected record, with a stable machine-readable code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractViolation {
    pub code: String,
    pub message: String,
}

impl ContractViolation {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl Entity {
    pub fn validate(&self) -> Result<(), ContractViolation> {
        if self.name.trim().is_empty() {
            return Err(ContractViolation::new("invalid_name", "name is required"));
        }
        if self.name.len() > 512 {
            return Err(ContractViolation::new(
                "invalid_name",
                "name must be 512 characters or fewer",
            ));
        }
        if self.entity_type.trim().is_empty() {
            return Err(ContractViolation::new(
                "invalid_entity_type",
                "entity_type is required",
            ));
        }
        for attribute in &self.attributes {
            if attribute.len() > MAX_ATTRIBUTE_BYTES {
                return Err(ContractViolation::new(
                    "attribute_too_large",
                    format!("attribute exceeds {} bytes", MAX_ATTRIBUTE_BYTES),
                ));
            }
        }
        Ok(())
    }
}

impl Relation {
    pub fn validate(&self) -> Result<(), ContractViolation> {
        for (field, value) in [
            ("from", &self.from),
            ("to", &self.to),
            ("relation_type", &self.relation_type),
        ] {
            if value.trim().is_empty() {
                return Err(ContractViolation::new(
                    "invalid_relation",
                    format!("{} is required", field),
                ));
            }
        }
        Ok(())
    }
}

/// Checks that a timestamp attribute is RFC3339 before it reaches a backend.
pub fn validate_timestamp(value: &str) -> Result<(), ContractViolation> {
    if DateTime::parse_from_rfc3339(value).is_err() {
        return Err(ContractViolation::new(
            "invalid_timestamp",
            "timestamps must be RFC3339",
        ));
    }
    Ok(())
}

/// Store name for a session record.
pub fn session_entity_name(session_id: &str) -> String {
    format!("{}{}", SESSION_NAME_PREFIX, session_id)
}

/// Store name for a lease record.
pub fn lease_entity_name(resource_id: &str) -> String {
    format!("{}{}", LEASE_NAME_PREFIX, resource_id)
}

/// Inverse of [`session_entity_name`].
pub fn session_id_from_name(name: &str) -> Option<&str> {
    name.strip_prefix(SESSION_NAME_PREFIX)
}

/// Inverse of [`lease_entity_name`].
pub fn resource_id_from_name(name: &str) -> Option<&str> {
    name.strip_prefix(LEASE_NAME_PREFIX)
}
