use crate::error::{FormationError, Result};
use crate::schema::{self, CollectionDescriptor, FieldKind, Formation};
use crate::store::{ProvisionedCollection, StoreAdapter};
use log::info;
use std::collections::{BTreeMap, HashSet};

/// How reconciliation treats collections that already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Skip descriptors whose name already exists in the store. The
    /// existing schema is not diffed against the descriptor.
    CreateOnly,
    /// Delete every existing collection named in the formation before
    /// recreating it. Destructive; never a default.
    RecreateAll,
}

/// Reconcile a formation against the store: validate the descriptor
/// set, order it by relation dependency, and create (or recreate) each
/// collection. Relation targets outside the formation must already
/// exist in the store. Fail-fast: the first store error aborts the run
/// with no rollback of already-created collections.
pub fn reconcile(
    store: &dyn StoreAdapter,
    formation: &Formation,
    mode: ReconcileMode,
) -> Result<BTreeMap<String, ProvisionedCollection>> {
    schema::validate_formation(formation)?;
    let ordered = dependency_order(&formation.collections)?;

    if mode == ReconcileMode::RecreateAll {
        // Reverse dependency order so dependents go before their targets.
        for descriptor in ordered.iter().rev() {
            if let Some(existing) = store.find_collection(&descriptor.name)? {
                store.delete_collection(&existing.id)?;
                info!("deleted existing collection '{}'", descriptor.name);
            }
        }
    }

    let mut provisioned: BTreeMap<String, ProvisionedCollection> = BTreeMap::new();
    for descriptor in ordered {
        if mode == ReconcileMode::CreateOnly {
            if let Some(existing) = store.find_collection(&descriptor.name)? {
                info!("collection '{}' already exists, skipping", descriptor.name);
                provisioned.insert(descriptor.name.clone(), existing.into());
                continue;
            }
        }

        let relation_ids = resolve_relation_targets(store, descriptor, &provisioned)?;
        let collection = store.create_collection(descriptor, &relation_ids)?;
        info!("provisioned collection '{}'", descriptor.name);
        provisioned.insert(descriptor.name.clone(), collection);
    }

    Ok(provisioned)
}

/// Map each relation field of a descriptor to a target collection id,
/// preferring collections provisioned earlier in this run over
/// store-existing ones.
fn resolve_relation_targets(
    store: &dyn StoreAdapter,
    descriptor: &CollectionDescriptor,
    provisioned: &BTreeMap<String, ProvisionedCollection>,
) -> Result<BTreeMap<String, String>> {
    let mut relation_ids = BTreeMap::new();
    for field in &descriptor.fields {
        if field.kind != FieldKind::Relation {
            continue;
        }
        let target = field.options.target.as_deref().unwrap_or("");
        let target_id = match provisioned.get(target) {
            Some(collection) => collection.id.clone(),
            None => match store.find_collection(target)? {
                Some(collection) => collection.id,
                None => {
                    return Err(FormationError::InvalidField {
                        collection: descriptor.name.clone(),
                        field: field.name.clone(),
                        message: format!(
                            "relation target '{target}' is neither in the formation nor in the store"
                        ),
                    })
                }
            },
        };
        relation_ids.insert(field.name.clone(), target_id);
    }
    Ok(relation_ids)
}

/// Order descriptors so every relation target inside the set comes
/// before its referents (Kahn's algorithm). Targets outside the set are
/// ignored here; they are resolved against the store later. Declaration
/// order is preserved among descriptors with no ordering constraint.
pub fn dependency_order(
    descriptors: &[CollectionDescriptor],
) -> Result<Vec<&CollectionDescriptor>> {
    let in_set: HashSet<&str> = descriptors.iter().map(|d| d.name.as_str()).collect();

    // Remaining in-set dependencies per descriptor.
    let mut pending: Vec<(&CollectionDescriptor, HashSet<&str>)> = descriptors
        .iter()
        .map(|d| {
            // A self-reference is a cycle of length one.
            let deps: HashSet<&str> = d
                .relation_targets()
                .into_iter()
                .filter(|t| in_set.contains(t))
                .collect();
            (d, deps)
        })
        .collect();

    let mut ordered = Vec::with_capacity(descriptors.len());
    let mut resolved: HashSet<&str> = HashSet::new();

    while !pending.is_empty() {
        let ready = pending
            .iter()
            .position(|(_, deps)| deps.iter().all(|d| resolved.contains(d)));

        match ready {
            Some(index) => {
                let (descriptor, _) = pending.remove(index);
                resolved.insert(descriptor.name.as_str());
                ordered.push(descriptor);
            }
            None => {
                let mut stuck: Vec<&str> =
                    pending.iter().map(|(d, _)| d.name.as_str()).collect();
                stuck.sort_unstable();
                return Err(FormationError::CyclicDependency(stuck.join(", ")));
            }
        }
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_formation_str;
    use crate::store::{Record, SqliteStore, StoredCollection};
    use serde_json::Value;
    use std::cell::Cell;
    use std::collections::BTreeMap;

    fn formation(content: &str) -> Formation {
        parse_formation_str(content).unwrap()
    }

    fn project_formation() -> Formation {
        // memberOf declared first on purpose: reconcile must reorder it
        // after projects.
        formation(
            r#"
collections:
  - name: memberOf
    fields:
      - { name: user_, type: relation, required: true, options: { target: users, cascade_delete: true } }
      - { name: _project, type: relation, required: true, options: { target: projects, cascade_delete: true } }
      - { name: role, type: text, options: { max: 50 } }
      - { name: contacts, type: json }
  - name: projects
    fields:
      - { name: name, type: text, required: true, unique: true, options: { max: 50 } }
      - { name: description, type: editor, required: true }
"#,
        )
    }

    fn store_with_users() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        let users = formation(
            r#"
collections:
  - name: users
    fields:
      - { name: username, type: text, required: true, unique: true }
"#,
        );
        reconcile(&store, &users, ReconcileMode::CreateOnly).unwrap();
        store
    }

    #[test]
    fn test_dependency_order() {
        let f = project_formation();
        let ordered = dependency_order(&f.collections).unwrap();
        let names: Vec<&str> = ordered.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["projects", "memberOf"]);
    }

    #[test]
    fn test_dependency_order_preserves_declaration_order() {
        let f = formation(
            r#"
collections:
  - name: a
  - name: b
  - name: c
"#,
        );
        let ordered = dependency_order(&f.collections).unwrap();
        let names: Vec<&str> = ordered.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cycle_detected() {
        let f = formation(
            r#"
collections:
  - name: a
    fields:
      - { name: b_ref, type: relation, options: { target: b } }
  - name: b
    fields:
      - { name: a_ref, type: relation, options: { target: a } }
"#,
        );
        let err = dependency_order(&f.collections).unwrap_err();
        assert!(matches!(err, FormationError::CyclicDependency(_)));
        assert!(err.to_string().contains("a, b"));
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let f = formation(
            r#"
collections:
  - name: comments
    fields:
      - { name: parent, type: relation, options: { target: comments } }
"#,
        );
        let err = dependency_order(&f.collections).unwrap_err();
        assert!(matches!(err, FormationError::CyclicDependency(_)));
    }

    /// Adapter that fails the test if any mutating call is made.
    struct ReadOnlyStore {
        touched: Cell<bool>,
    }

    impl StoreAdapter for ReadOnlyStore {
        fn find_collection(&self, _: &str) -> crate::Result<Option<StoredCollection>> {
            Ok(None)
        }
        fn create_collection(
            &self,
            _: &CollectionDescriptor,
            _: &BTreeMap<String, String>,
        ) -> crate::Result<crate::store::ProvisionedCollection> {
            self.touched.set(true);
            Err(FormationError::Other("unexpected create".into()))
        }
        fn delete_collection(&self, _: &str) -> crate::Result<()> {
            self.touched.set(true);
            Err(FormationError::Other("unexpected delete".into()))
        }
        fn query_records(&self, _: &str, _: &str, _: &Value) -> crate::Result<Vec<Record>> {
            Ok(Vec::new())
        }
        fn upsert_validated(
            &self,
            _: &str,
            _: serde_json::Map<String, Value>,
        ) -> crate::Result<Record> {
            self.touched.set(true);
            Err(FormationError::Other("unexpected upsert".into()))
        }
    }

    #[test]
    fn test_cycle_creates_nothing() {
        let f = formation(
            r#"
collections:
  - name: a
    fields:
      - { name: b_ref, type: relation, options: { target: b } }
  - name: b
    fields:
      - { name: a_ref, type: relation, options: { target: a } }
"#,
        );
        let store = ReadOnlyStore {
            touched: Cell::new(false),
        };
        let err = reconcile(&store, &f, ReconcileMode::RecreateAll).unwrap_err();
        assert!(matches!(err, FormationError::CyclicDependency(_)));
        assert!(!store.touched.get());
    }

    #[test]
    fn test_reconcile_against_empty_store_with_users() {
        let store = store_with_users();
        let provisioned =
            reconcile(&store, &project_formation(), ReconcileMode::CreateOnly).unwrap();

        assert_eq!(provisioned.len(), 2);
        let member_of = &provisioned["memberOf"];
        let projects = &provisioned["projects"];
        assert_eq!(member_of.relation_ids["_project"], projects.id);
        assert_eq!(
            member_of.relation_ids["user_"],
            store.find_collection("users").unwrap().unwrap().id
        );
    }

    #[test]
    fn test_unknown_relation_target_fails() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = reconcile(&store, &project_formation(), ReconcileMode::CreateOnly).unwrap_err();
        // users is neither in the formation nor in the store
        assert!(matches!(err, FormationError::InvalidField { .. }));
        assert!(err.to_string().contains("users"));
    }

    #[test]
    fn test_create_only_is_idempotent() {
        let store = store_with_users();
        let first = reconcile(&store, &project_formation(), ReconcileMode::CreateOnly).unwrap();
        let second = reconcile(&store, &project_formation(), ReconcileMode::CreateOnly).unwrap();

        assert_eq!(first.len(), second.len());
        for (name, collection) in &first {
            // Second run reuses the same store collections.
            assert_eq!(second[name].id, collection.id);
        }
    }

    #[test]
    fn test_recreate_all_replaces_collections() {
        let store = store_with_users();
        let first = reconcile(&store, &project_formation(), ReconcileMode::CreateOnly).unwrap();
        let second = reconcile(&store, &project_formation(), ReconcileMode::RecreateAll).unwrap();

        assert_ne!(first["projects"].id, second["projects"].id);

        // RecreateAll followed by CreateOnly leaves the recreated set.
        let third = reconcile(&store, &project_formation(), ReconcileMode::CreateOnly).unwrap();
        for (name, collection) in &second {
            assert_eq!(third[name].id, collection.id);
        }
    }

    #[test]
    fn test_recreate_all_drops_existing_records() {
        let store = store_with_users();
        let first = reconcile(&store, &project_formation(), ReconcileMode::CreateOnly).unwrap();
        store
            .upsert_validated(
                &first["projects"].id,
                serde_json::json!({ "name": "Projective", "description": "d" })
                    .as_object()
                    .unwrap()
                    .clone(),
            )
            .unwrap();

        let second = reconcile(&store, &project_formation(), ReconcileMode::RecreateAll).unwrap();
        assert_eq!(store.count_records(&second["projects"].id).unwrap(), 0);
    }

    #[test]
    fn test_recreate_does_not_touch_external_collections() {
        let store = store_with_users();
        let users_id = store.find_collection("users").unwrap().unwrap().id;
        reconcile(&store, &project_formation(), ReconcileMode::RecreateAll).unwrap();
        assert_eq!(store.find_collection("users").unwrap().unwrap().id, users_id);
    }
}
