//! The shared coordination store contract and record mapping.
//!
//! The store engine is an external capability: corral consumes five
//! operations (create, search, add_attributes, delete, create_relation) and
//! nothing else. Two backends ship here: a SQLite file for shared-filesystem
//! deployments and an in-process map for tests and single-daemon setups.
//!
//! Record mapping: a session is the entity `sid:<session_id>`, a lease the
//! entity `res:<resource_id>`. Every state change appends one JSON snapshot
//! attribute (the store's attribute list is append-only); readers take the
//! latest attribute that parses. A `holds` relation links a session to each
//! lease it acquired.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use store_protocol::{
    lease_entity_name, session_entity_name, Entity, Relation, SearchQuery, ENTITY_TYPE_LEASE,
    ENTITY_TYPE_SESSION, RELATION_HOLDS,
};

use crate::model::{Lease, Session};

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("no such entity: {name}")]
    NotFound { name: String },

    #[error("rejected record: {0}")]
    Rejected(store_protocol::ContractViolation),
}

/// The consumed capability. Implementations must be safe to share across
/// threads; every call is synchronous and latency-bound by the backend.
pub trait CoordinationStore: Send + Sync {
    /// Creates the entity, replacing any existing entity of the same name
    /// (leases are overwritten on expiry takeover, sessions on re-register).
    fn create(&self, entity: Entity) -> Result<(), StoreError>;

    fn search(&self, query: &SearchQuery) -> Result<Vec<Entity>, StoreError>;

    /// Appends attributes to an existing entity.
    fn add_attributes(&self, name: &str, attributes: Vec<String>) -> Result<(), StoreError>;

    /// Deletes the named entities and their relations. Unknown names are
    /// ignored; double-deletion is a no-op.
    fn delete(&self, names: &[String]) -> Result<(), StoreError>;

    fn create_relation(&self, relation: Relation) -> Result<(), StoreError>;
}

fn encode_snapshot<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|err| {
        StoreError::Rejected(store_protocol::ContractViolation::new(
            "unserializable_snapshot",
            err.to_string(),
        ))
    })
}

/// Latest-wins read over the append-only attribute list. Attributes that do
/// not parse (older schema, partial writes) are skipped, newest first.
pub fn decode_latest<T: DeserializeOwned>(entity: &Entity) -> Option<T> {
    for attribute in entity.attributes.iter().rev() {
        match serde_json::from_str::<T>(attribute) {
            Ok(value) => return Some(value),
            Err(err) => {
                debug!(name = %entity.name, error = %err, "Skipping unparseable attribute");
            }
        }
    }
    None
}

// ─────────────────────────────────────────────────────────────────────────────
// Typed record accessors
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn find_session(
    store: &dyn CoordinationStore,
    session_id: &str,
) -> Result<Option<Session>, StoreError> {
    let name = session_entity_name(session_id);
    let entities = store.search(&SearchQuery::ByName(name))?;
    Ok(entities.first().and_then(decode_latest))
}

pub(crate) fn find_lease(
    store: &dyn CoordinationStore,
    resource_id: &str,
) -> Result<Option<Lease>, StoreError> {
    let name = lease_entity_name(resource_id);
    let entities = store.search(&SearchQuery::ByName(name))?;
    Ok(entities.first().and_then(decode_latest))
}

pub(crate) fn load_sessions(store: &dyn CoordinationStore) -> Result<Vec<Session>, StoreError> {
    let entities = store.search(&SearchQuery::ByType(ENTITY_TYPE_SESSION.to_string()))?;
    Ok(entities.iter().filter_map(decode_latest).collect())
}

pub(crate) fn load_leases(store: &dyn CoordinationStore) -> Result<Vec<Lease>, StoreError> {
    let entities = store.search(&SearchQuery::ByType(ENTITY_TYPE_LEASE.to_string()))?;
    Ok(entities.iter().filter_map(decode_latest).collect())
}

/// Writes a session as a fresh entity (create-or-replace).
pub(crate) fn put_session(
    store: &dyn CoordinationStore,
    session: &Session,
) -> Result<(), StoreError> {
    store.create(Entity {
        name: session_entity_name(&session.session_id),
        entity_type: ENTITY_TYPE_SESSION.to_string(),
        attributes: vec![encode_snapshot(session)?],
    })
}

/// Appends an updated session snapshot (heartbeat, completion).
pub(crate) fn append_session(
    store: &dyn CoordinationStore,
    session: &Session,
) -> Result<(), StoreError> {
    store.add_attributes(
        &session_entity_name(&session.session_id),
        vec![encode_snapshot(session)?],
    )
}

/// Writes a lease as a fresh entity and links it to its owner.
pub(crate) fn put_lease(store: &dyn CoordinationStore, lease: &Lease) -> Result<(), StoreError> {
    store.create(Entity {
        name: lease_entity_name(&lease.resource_id),
        entity_type: ENTITY_TYPE_LEASE.to_string(),
        attributes: vec![encode_snapshot(lease)?],
    })?;
    store.create_relation(Relation {
        from: session_entity_name(&lease.owner_session_id),
        to: lease_entity_name(&lease.resource_id),
        relation_type: RELATION_HOLDS.to_string(),
    })
}

/// Appends a renewed lease snapshot (reentrant acquire, explicit renew).
pub(crate) fn append_lease(store: &dyn CoordinationStore, lease: &Lease) -> Result<(), StoreError> {
    store.add_attributes(
        &lease_entity_name(&lease.resource_id),
        vec![encode_snapshot(lease)?],
    )
}

pub(crate) fn delete_lease(
    store: &dyn CoordinationStore,
    resource_id: &str,
) -> Result<(), StoreError> {
    store.delete(&[lease_entity_name(resource_id)])
}
