use crate::error::{FormationError, Result};
use crate::schema::FieldKind;
use crate::store::{ProvisionedCollection, Record, StoreAdapter};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// An ordered seed plan parsed from a plan.yaml document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedPlan {
    #[serde(default)]
    pub records: Vec<SeedRecord>,
}

/// One record to seed: literal field values plus relation fields
/// expressed as natural-key lookups, resolved against the store before
/// the upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedRecord {
    pub collection: String,
    #[serde(default)]
    pub values: serde_json::Map<String, Value>,
    #[serde(default)]
    pub refs: BTreeMap<String, NaturalKey>,
}

/// A human-meaningful lookup key for a record whose opaque id is
/// unknown at plan-authoring time, e.g. `username = TEST_USER_1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NaturalKey {
    pub field: String,
    pub value: String,
}

/// Parse a plan.yaml file into a SeedPlan.
pub fn parse_plan(path: &Path) -> Result<SeedPlan> {
    let content = std::fs::read_to_string(path)?;
    parse_plan_str(&content)
}

/// Parse a plan YAML string into a SeedPlan.
pub fn parse_plan_str(content: &str) -> Result<SeedPlan> {
    let plan: SeedPlan = serde_yaml::from_str(content)?;
    Ok(plan)
}

/// Run a seed plan: resolve each record's natural-key references, then
/// submit it through the store's validated upsert. Fail-fast; a
/// resolution failure aborts the record before any upsert. Returns the
/// stored records in plan order.
pub fn seed(
    store: &dyn StoreAdapter,
    provisioned: &BTreeMap<String, ProvisionedCollection>,
    plan: &[SeedRecord],
) -> Result<Vec<Record>> {
    let mut seeded = Vec::with_capacity(plan.len());
    for record in plan {
        seeded.push(seed_record(store, provisioned, record)?);
    }
    info!("seeded {} records", seeded.len());
    Ok(seeded)
}

fn seed_record(
    store: &dyn StoreAdapter,
    provisioned: &BTreeMap<String, ProvisionedCollection>,
    record: &SeedRecord,
) -> Result<Record> {
    let collection = lookup_collection(store, provisioned, &record.collection)?;

    let mut values = record.values.clone();
    for (field_name, key) in &record.refs {
        let resolved = resolve_reference(store, &collection, field_name, key)?;
        values.insert(field_name.clone(), Value::String(resolved));
    }

    store.upsert_validated(&collection.id, values)
}

fn lookup_collection(
    store: &dyn StoreAdapter,
    provisioned: &BTreeMap<String, ProvisionedCollection>,
    name: &str,
) -> Result<ProvisionedCollection> {
    if let Some(collection) = provisioned.get(name) {
        return Ok(collection.clone());
    }
    store
        .find_collection(name)?
        .map(Into::into)
        .ok_or_else(|| FormationError::CollectionNotFound(name.to_string()))
}

/// Resolve one natural-key reference to a record id. Exactly one match
/// is required: zero is a dangling reference, more than one means the
/// chosen key is not actually unique in the store.
fn resolve_reference(
    store: &dyn StoreAdapter,
    collection: &ProvisionedCollection,
    field_name: &str,
    key: &NaturalKey,
) -> Result<String> {
    let field = collection.descriptor.field(field_name).ok_or_else(|| {
        FormationError::InvalidField {
            collection: collection.name().to_string(),
            field: field_name.to_string(),
            message: "not in the schema".into(),
        }
    })?;
    if field.kind != FieldKind::Relation {
        return Err(FormationError::InvalidField {
            collection: collection.name().to_string(),
            field: field_name.to_string(),
            message: "refs can only target relation fields".into(),
        });
    }

    let target_name = field.options.target.clone().unwrap_or_default();
    let target_id = collection
        .relation_ids
        .get(field_name)
        .cloned()
        .ok_or_else(|| FormationError::CollectionNotFound(target_name.clone()))?;

    let matches = store.query_records(&target_id, &key.field, &Value::String(key.value.clone()))?;
    match matches.as_slice() {
        [] => Err(FormationError::ReferenceNotFound {
            collection: target_name,
            field: key.field.clone(),
            value: key.value.clone(),
        }),
        [record] => Ok(record.id.clone()),
        _ => Err(FormationError::AmbiguousReference {
            collection: target_name,
            field: key.field.clone(),
            value: key.value.clone(),
            count: matches.len(),
        }),
    }
}
