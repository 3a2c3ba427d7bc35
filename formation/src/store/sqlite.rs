use super::{ProvisionedCollection, Record, StoreAdapter, StoredCollection};
use crate::error::{FormationError, Result};
use crate::schema::{self, CollectionDescriptor, FieldKind};
use crate::validation;
use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use ulid::Ulid;

/// SQLite-backed record store. Collections are rows holding their
/// descriptor as JSON; records are rows holding their field values as
/// JSON, keyed by (collection_id, id).
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create the store database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = SqliteStore { conn };
        store.initialize_tables()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = SqliteStore { conn };
        store.initialize_tables()?;
        Ok(store)
    }

    fn initialize_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS collections (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                descriptor_json TEXT NOT NULL,
                relations_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS records (
                id TEXT NOT NULL,
                collection_id TEXT NOT NULL,
                data_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (collection_id, id)
            );

            CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection_id);
            ",
        )?;
        Ok(())
    }

    /// All collections currently in the store, in name order.
    pub fn list_collections(&self) -> Result<Vec<StoredCollection>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, descriptor_json, relations_json FROM collections ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut collections = Vec::new();
        for row in rows {
            collections.push(parse_collection_row(row?)?);
        }
        Ok(collections)
    }

    /// Number of records in a collection.
    pub fn count_records(&self, collection_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE collection_id = ?1",
            params![collection_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Store summary for operator output: every collection with its
    /// field count and record count.
    pub fn status(&self) -> Result<Value> {
        let mut out = serde_json::Map::new();
        for collection in self.list_collections()? {
            out.insert(
                collection.name().to_string(),
                serde_json::json!({
                    "id": collection.id,
                    "fields": collection.descriptor.fields.len(),
                    "records": self.count_records(&collection.id)?,
                }),
            );
        }
        Ok(Value::Object(out))
    }

    fn get_collection(&self, id: &str) -> Result<StoredCollection> {
        self.find_collection(id)?
            .ok_or_else(|| FormationError::CollectionNotFound(id.to_string()))
    }

    fn all_records(&self, collection_id: &str) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, collection_id, data_json, created_at, updated_at
             FROM records WHERE collection_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![collection_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(parse_record_row(row?)?);
        }
        Ok(records)
    }

    /// Find the record an upsert should update: the existing record
    /// matching the new values on a unique field, if any. Matches on
    /// two different records are a uniqueness conflict.
    fn find_unique_match(
        &self,
        collection: &StoredCollection,
        values: &serde_json::Map<String, Value>,
    ) -> Result<Option<Record>> {
        let mut existing: Option<Record> = None;
        for field in collection.descriptor.fields.iter().filter(|f| f.unique) {
            let value = match values.get(&field.name) {
                Some(v) if !v.is_null() => v,
                _ => continue,
            };
            let matches = self.query_records(&collection.id, &field.name, value)?;
            if matches.len() > 1 {
                return Err(FormationError::Validation(format!(
                    "Unique field '{}' matches {} records in '{}'",
                    field.name,
                    matches.len(),
                    collection.name()
                )));
            }
            if let Some(found) = matches.into_iter().next() {
                match &existing {
                    Some(prev) if prev.id != found.id => {
                        return Err(FormationError::Validation(format!(
                            "Unique fields match different records in '{}'",
                            collection.name()
                        )));
                    }
                    _ => existing = Some(found),
                }
            }
        }
        Ok(existing)
    }
}

impl StoreAdapter for SqliteStore {
    fn find_collection(&self, name_or_id: &str) -> Result<Option<StoredCollection>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, descriptor_json, relations_json FROM collections
                 WHERE name = ?1 OR id = ?1",
                params![name_or_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some(row) => Ok(Some(parse_collection_row(row)?)),
            None => Ok(None),
        }
    }

    fn create_collection(
        &self,
        descriptor: &CollectionDescriptor,
        relation_ids: &BTreeMap<String, String>,
    ) -> Result<ProvisionedCollection> {
        schema::validate_collection(descriptor)?;

        if self.find_collection(&descriptor.name)?.is_some() {
            return Err(FormationError::DuplicateCollection(descriptor.name.clone()));
        }

        // Every relation field needs a resolved target that exists.
        for field in &descriptor.fields {
            if field.kind != FieldKind::Relation {
                continue;
            }
            let target_id = relation_ids.get(&field.name).ok_or_else(|| {
                FormationError::InvalidField {
                    collection: descriptor.name.clone(),
                    field: field.name.clone(),
                    message: "relation target is not resolved".into(),
                }
            })?;
            if self.find_collection(target_id)?.is_none() {
                return Err(FormationError::InvalidField {
                    collection: descriptor.name.clone(),
                    field: field.name.clone(),
                    message: format!("relation target collection '{target_id}' does not exist"),
                });
            }
        }

        let id = Ulid::new().to_string();
        self.conn.execute(
            "INSERT INTO collections (id, name, descriptor_json, relations_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                descriptor.name,
                serde_json::to_string(descriptor)?,
                serde_json::to_string(relation_ids)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        debug!("created collection '{}' ({id})", descriptor.name);

        Ok(ProvisionedCollection {
            id,
            descriptor: descriptor.clone(),
            relation_ids: relation_ids.clone(),
        })
    }

    fn delete_collection(&self, id: &str) -> Result<()> {
        let collection = self.get_collection(id)?;

        for other in self.list_collections()? {
            if other.id == collection.id {
                continue;
            }
            if other.relation_ids.values().any(|t| t == &collection.id) {
                return Err(FormationError::HasDependents {
                    collection: collection.name().to_string(),
                    dependent: other.name().to_string(),
                });
            }
        }

        self.conn.execute(
            "DELETE FROM records WHERE collection_id = ?1",
            params![collection.id],
        )?;
        self.conn.execute(
            "DELETE FROM collections WHERE id = ?1",
            params![collection.id],
        )?;
        debug!("deleted collection '{}' ({})", collection.name(), collection.id);
        Ok(())
    }

    fn query_records(
        &self,
        collection_id: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Record>> {
        let records = self.all_records(collection_id)?;
        Ok(records
            .into_iter()
            .filter(|r| match r.values.get(field) {
                // Multi-valued fields match when they contain the value.
                Some(Value::Array(items)) => items.contains(value),
                Some(v) => v == value,
                None => false,
            })
            .collect())
    }

    fn upsert_validated(
        &self,
        collection_id: &str,
        values: serde_json::Map<String, Value>,
    ) -> Result<Record> {
        let collection = self.get_collection(collection_id)?;
        validation::validate_values(&collection.descriptor, &values).into_result()?;

        let now = Utc::now();
        match self.find_unique_match(&collection, &values)? {
            Some(mut record) => {
                for (key, value) in values {
                    record.values.insert(key, value);
                }
                record.updated_at = now;
                self.conn.execute(
                    "UPDATE records SET data_json = ?1, updated_at = ?2
                     WHERE collection_id = ?3 AND id = ?4",
                    params![
                        serde_json::to_string(&record.values)?,
                        now.to_rfc3339(),
                        record.collection_id,
                        record.id,
                    ],
                )?;
                Ok(record)
            }
            None => {
                let record = Record {
                    id: Ulid::new().to_string(),
                    collection_id: collection.id.clone(),
                    values,
                    created_at: now,
                    updated_at: now,
                };
                self.conn.execute(
                    "INSERT INTO records (id, collection_id, data_json, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        record.id,
                        record.collection_id,
                        serde_json::to_string(&record.values)?,
                        now.to_rfc3339(),
                        now.to_rfc3339(),
                    ],
                )?;
                Ok(record)
            }
        }
    }
}

fn parse_collection_row(
    (id, descriptor_json, relations_json): (String, String, String),
) -> Result<StoredCollection> {
    Ok(StoredCollection {
        id,
        descriptor: serde_json::from_str(&descriptor_json)?,
        relation_ids: serde_json::from_str(&relations_json)?,
    })
}

fn parse_record_row(
    (id, collection_id, data_json, created_at, updated_at): (
        String,
        String,
        String,
        String,
        String,
    ),
) -> Result<Record> {
    Ok(Record {
        id,
        collection_id,
        values: serde_json::from_str(&data_json)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FormationError::Other(format!("Invalid stored timestamp '{s}': {e}")))
}
