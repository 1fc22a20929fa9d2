//! SQLite store backend.
//!
//! The production backend for shared-filesystem deployments: one database
//! file reachable by every session. The schema mirrors the store contract
//! directly: an entities table, an append-only attributes table, and a
//! relations table. Each contract call runs in its own transaction, which
//! narrows (but does not close) the cross-process check-then-act window in
//! `acquire`; the locking contract stays advisory either way.

use std::path::PathBuf;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};

use store_protocol::{Entity, Relation, SearchQuery};

use super::{CoordinationStore, StoreError};

const BUSY_TIMEOUT_MS: u64 = 2_000;

pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn new(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent).map_err(|err| {
                StoreError::Unavailable(format!("failed to create store directory: {}", err))
            })?;
        }
        let store = Self { path };
        store.init_schema()?;
        Ok(store)
    }

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = Connection::open(&self.path)
            .map_err(|err| StoreError::Unavailable(format!("failed to open store: {}", err)))?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))
            .map_err(|err| StoreError::Unavailable(format!("failed to set busy timeout: {}", err)))?;
        f(&conn)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS entities (\
                    name TEXT PRIMARY KEY,\
                    entity_type TEXT NOT NULL,\
                    created_at TEXT NOT NULL\
                 );\
                 CREATE TABLE IF NOT EXISTS attributes (\
                    id INTEGER PRIMARY KEY AUTOINCREMENT,\
                    entity_name TEXT NOT NULL,\
                    value TEXT NOT NULL,\
                    recorded_at TEXT NOT NULL\
                 );\
                 CREATE INDEX IF NOT EXISTS idx_attributes_entity \
                    ON attributes(entity_name);\
                 CREATE TABLE IF NOT EXISTS relations (\
                    from_name TEXT NOT NULL,\
                    to_name TEXT NOT NULL,\
                    relation_type TEXT NOT NULL,\
                    created_at TEXT NOT NULL,\
                    PRIMARY KEY (from_name, to_name, relation_type)\
                 );",
            )
            .map_err(|err| StoreError::Unavailable(format!("failed to initialize schema: {}", err)))
        })
    }

    fn load_attributes(conn: &Connection, name: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = conn
            .prepare("SELECT value FROM attributes WHERE entity_name = ?1 ORDER BY id ASC")
            .map_err(|err| StoreError::Unavailable(format!("failed to prepare attributes query: {}", err)))?;
        let rows = stmt
            .query_map(params![name], |row| row.get::<_, String>(0))
            .map_err(|err| StoreError::Unavailable(format!("failed to read attributes: {}", err)))?;

        let mut attributes = Vec::new();
        for row in rows {
            attributes.push(row.map_err(|err| {
                StoreError::Unavailable(format!("failed to decode attribute row: {}", err))
            })?);
        }
        Ok(attributes)
    }

    fn load_entities(
        conn: &Connection,
        sql: &str,
        arg: &str,
    ) -> Result<Vec<Entity>, StoreError> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|err| StoreError::Unavailable(format!("failed to prepare entity query: {}", err)))?;
        let rows = stmt
            .query_map(params![arg], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|err| StoreError::Unavailable(format!("failed to read entities: {}", err)))?;

        let mut headers = Vec::new();
        for row in rows {
            headers.push(row.map_err(|err| {
                StoreError::Unavailable(format!("failed to decode entity row: {}", err))
            })?);
        }

        let mut entities = Vec::new();
        for (name, entity_type) in headers {
            let attributes = Self::load_attributes(conn, &name)?;
            entities.push(Entity {
                name,
                entity_type,
                attributes,
            });
        }
        Ok(entities)
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl CoordinationStore for SqliteStore {
    fn create(&self, entity: Entity) -> Result<(), StoreError> {
        entity.validate().map_err(StoreError::Rejected)?;
        self.with_connection(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|err| StoreError::Unavailable(format!("failed to begin transaction: {}", err)))?;

            tx.execute(
                "INSERT INTO entities (name, entity_type, created_at) \
                 VALUES (?1, ?2, ?3) \
                 ON CONFLICT(name) DO UPDATE SET \
                    entity_type = excluded.entity_type, \
                    created_at = excluded.created_at",
                params![entity.name, entity.entity_type, now_rfc3339()],
            )
            .map_err(|err| StoreError::Unavailable(format!("failed to upsert entity: {}", err)))?;

            // create-or-replace: earlier attribute history belongs to the
            // replaced incarnation and must not win a latest-wins read.
            tx.execute(
                "DELETE FROM attributes WHERE entity_name = ?1",
                params![entity.name],
            )
            .map_err(|err| StoreError::Unavailable(format!("failed to clear attributes: {}", err)))?;

            for value in &entity.attributes {
                tx.execute(
                    "INSERT INTO attributes (entity_name, value, recorded_at) VALUES (?1, ?2, ?3)",
                    params![entity.name, value, now_rfc3339()],
                )
                .map_err(|err| {
                    StoreError::Unavailable(format!("failed to insert attribute: {}", err))
                })?;
            }

            tx.commit()
                .map_err(|err| StoreError::Unavailable(format!("failed to commit: {}", err)))
        })
    }

    fn search(&self, query: &SearchQuery) -> Result<Vec<Entity>, StoreError> {
        self.with_connection(|conn| match query {
            SearchQuery::ByType(entity_type) => Self::load_entities(
                conn,
                "SELECT name, entity_type FROM entities WHERE entity_type = ?1 ORDER BY name ASC",
                entity_type,
            ),
            SearchQuery::ByName(name) => Self::load_entities(
                conn,
                "SELECT name, entity_type FROM entities WHERE name = ?1",
                name,
            ),
            SearchQuery::NameContains(fragment) => {
                let pattern = format!(
                    "%{}%",
                    fragment.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
                );
                Self::load_entities(
                    conn,
                    "SELECT name, entity_type FROM entities \
                     WHERE name LIKE ?1 ESCAPE '\\' ORDER BY name ASC",
                    &pattern,
                )
            }
        })
    }

    fn add_attributes(&self, name: &str, attributes: Vec<String>) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM entities WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|err| StoreError::Unavailable(format!("failed to check entity: {}", err)))?;
            if exists.is_none() {
                return Err(StoreError::NotFound {
                    name: name.to_string(),
                });
            }

            for value in &attributes {
                conn.execute(
                    "INSERT INTO attributes (entity_name, value, recorded_at) VALUES (?1, ?2, ?3)",
                    params![name, value, now_rfc3339()],
                )
                .map_err(|err| {
                    StoreError::Unavailable(format!("failed to append attribute: {}", err))
                })?;
            }
            Ok(())
        })
    }

    fn delete(&self, names: &[String]) -> Result<(), StoreError> {
        if names.is_empty() {
            return Ok(());
        }
        self.with_connection(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|err| StoreError::Unavailable(format!("failed to begin transaction: {}", err)))?;

            for name in names {
                tx.execute("DELETE FROM attributes WHERE entity_name = ?1", params![name])
                    .map_err(|err| {
                        StoreError::Unavailable(format!("failed to delete attributes: {}", err))
                    })?;
                tx.execute(
                    "DELETE FROM relations WHERE from_name = ?1 OR to_name = ?1",
                    params![name],
                )
                .map_err(|err| {
                    StoreError::Unavailable(format!("failed to delete relations: {}", err))
                })?;
                tx.execute("DELETE FROM entities WHERE name = ?1", params![name])
                    .map_err(|err| {
                        StoreError::Unavailable(format!("failed to delete entity: {}", err))
                    })?;
            }

            tx.commit()
                .map_err(|err| StoreError::Unavailable(format!("failed to commit: {}", err)))
        })
    }

    fn create_relation(&self, relation: Relation) -> Result<(), StoreError> {
        relation.validate().map_err(StoreError::Rejected)?;
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO relations (from_name, to_name, relation_type, created_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(from_name, to_name, relation_type) DO NOTHING",
                params![
                    relation.from,
                    relation.to,
                    relation.relation_type,
                    now_rfc3339()
                ],
            )
            .map_err(|err| StoreError::Unavailable(format!("failed to insert relation: {}", err)))?;
            Ok(())
        })
    }
}
