mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::schema::CollectionDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A collection as it exists in the store: the opaque store-assigned id,
/// the descriptor it was created from, and the resolved relation target
/// ids (field name -> target collection id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCollection {
    pub id: String,
    pub descriptor: CollectionDescriptor,
    pub relation_ids: BTreeMap<String, String>,
}

impl StoredCollection {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

/// Result of a successful reconciliation for one descriptor. Owned by
/// the provisioner during a run, consumed read-only by the seed loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionedCollection {
    pub id: String,
    pub descriptor: CollectionDescriptor,
    pub relation_ids: BTreeMap<String, String>,
}

impl ProvisionedCollection {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

impl From<StoredCollection> for ProvisionedCollection {
    fn from(c: StoredCollection) -> Self {
        ProvisionedCollection {
            id: c.id,
            descriptor: c.descriptor,
            relation_ids: c.relation_ids,
        }
    }
}

/// A stored record with its implicit fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub collection_id: String,
    pub values: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Thin interface over the external record store. The provisioner and
/// seed loader only ever talk to the store through this trait, which
/// keeps them testable against a mock adapter.
pub trait StoreAdapter {
    /// Find a collection by name or opaque id.
    fn find_collection(&self, name_or_id: &str) -> Result<Option<StoredCollection>>;

    /// Create a collection in a single atomic request. `relation_ids`
    /// maps each relation field name to an already-existing target
    /// collection id; the caller resolves these.
    fn create_collection(
        &self,
        descriptor: &CollectionDescriptor,
        relation_ids: &BTreeMap<String, String>,
    ) -> Result<ProvisionedCollection>;

    /// Delete a collection and its records. Fails when another stored
    /// collection still holds a relation pointing at it.
    fn delete_collection(&self, id: &str) -> Result<()>;

    /// All records in a collection whose `field` equals `value`.
    fn query_records(
        &self,
        collection_id: &str,
        field: &str,
        value: &serde_json::Value,
    ) -> Result<Vec<Record>>;

    /// Validated upsert: applies the collection's field validation,
    /// then updates the record matching on a unique field value, or
    /// inserts a new one when no unique match exists.
    fn upsert_validated(
        &self,
        collection_id: &str,
        values: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Record>;
}
