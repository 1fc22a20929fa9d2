//! In-process store backend.
//!
//! Used by tests and by deployments where all sessions run under one
//! supervising daemon, which makes every contract call atomic behind the
//! mutex and closes the cross-process acquire race for that topology.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use store_protocol::{Entity, Relation, SearchQuery};

use super::{CoordinationStore, StoreError};

#[derive(Default)]
struct Inner {
    entities: BTreeMap<String, Entity>,
    relations: BTreeSet<(String, String, String)>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an unreachable store; every subsequent call fails with
    /// `StoreError::Unavailable` until cleared.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn has_relation(&self, from: &str, to: &str, relation_type: &str) -> bool {
        let inner = self.inner.lock().expect("store mutex");
        inner.relations.contains(&(
            from.to_string(),
            to.to_string(),
            relation_type.to_string(),
        ))
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }
}

impl CoordinationStore for MemoryStore {
    fn create(&self, entity: Entity) -> Result<(), StoreError> {
        self.check_online()?;
        entity.validate().map_err(StoreError::Rejected)?;
        let mut inner = self.inner.lock().expect("store mutex");
        inner.entities.insert(entity.name.clone(), entity);
        Ok(())
    }

    fn search(&self, query: &SearchQuery) -> Result<Vec<Entity>, StoreError> {
        self.check_online()?;
        let inner = self.inner.lock().expect("store mutex");
        let matches = inner
            .entities
            .values()
            .filter(|entity| match query {
                SearchQuery::ByType(entity_type) => entity.entity_type == *entity_type,
                SearchQuery::ByName(name) => entity.name == *name,
                SearchQuery::NameContains(fragment) => entity.name.contains(fragment),
            })
            .cloned()
            .collect();
        Ok(matches)
    }

    fn add_attributes(&self, name: &str, attributes: Vec<String>) -> Result<(), StoreError> {
        self.check_online()?;
        let mut inner = self.inner.lock().expect("store mutex");
        let entity = inner
            .entities
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound {
                name: name.to_string(),
            })?;
        entity.attributes.extend(attributes);
        entity.validate().map_err(StoreError::Rejected)
    }

    fn delete(&self, names: &[String]) -> Result<(), StoreError> {
        self.check_online()?;
        let mut inner = self.inner.lock().expect("store mutex");
        for name in names {
            inner.entities.remove(name);
        }
        inner
            .relations
            .retain(|(from, to, _)| !names.contains(from) && !names.contains(to));
        Ok(())
    }

    fn create_relation(&self, relation: Relation) -> Result<(), StoreError> {
        self.check_online()?;
        relation.validate().map_err(StoreError::Rejected)?;
        let mut inner = self.inner.lock().expect("store mutex");
        inner
            .relations
            .insert((relation.from, relation.to, relation.relation_type));
        Ok(())
    }
}
