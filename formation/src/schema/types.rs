use serde::{Deserialize, Serialize};

/// Top-level formation definition parsed from a formation.yaml document.
/// Collections are kept in declaration order; the provisioner reorders
/// them by relation dependency at reconcile time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formation {
    #[serde(default)]
    pub collections: Vec<CollectionDescriptor>,
}

impl Formation {
    /// Look up a collection descriptor by name.
    pub fn collection(&self, name: &str) -> Option<&CollectionDescriptor> {
        self.collections.iter().find(|c| c.name == name)
    }
}

/// Declarative description of a single collection: its name, ordered
/// field list, and optional access-rule predicate strings. The rule
/// strings are stored opaquely; their query language belongs to the
/// record store, not to this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    #[serde(default)]
    pub list_rule: Option<String>,
    #[serde(default)]
    pub view_rule: Option<String>,
    #[serde(default)]
    pub create_rule: Option<String>,
    #[serde(default)]
    pub update_rule: Option<String>,
    #[serde(default)]
    pub delete_rule: Option<String>,
}

impl CollectionDescriptor {
    /// Look up a field descriptor by name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Names of all collections this descriptor's relation fields target.
    pub fn relation_targets(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::Relation))
            .filter_map(|f| f.options.target.as_deref())
            .collect()
    }

    /// All access-rule strings paired with a label, for validation.
    pub fn rules(&self) -> [(&'static str, Option<&str>); 5] {
        [
            ("list_rule", self.list_rule.as_deref()),
            ("view_rule", self.view_rule.as_deref()),
            ("create_rule", self.create_rule.as_deref()),
            ("update_rule", self.update_rule.as_deref()),
            ("delete_rule", self.delete_rule.as_deref()),
        ]
    }
}

/// Definition of a single field in a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub options: FieldOptions,
}

/// Field type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Editor,
    File,
    Relation,
    Select,
    Json,
}

/// Kind-specific constraints, flattened into one struct of optional
/// knobs. Which knobs are legal for which kind is checked by
/// `schema::validate_formation`, not by the type system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldOptions {
    /// Maximum string length (Text).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<usize>,
    /// Maximum number of selected values (Relation, Select, File).
    /// Defaults to 1 when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_select: Option<usize>,
    /// Maximum file size in bytes (File).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
    /// Accepted MIME types (File).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mime_types: Vec<String>,
    /// Target collection name (Relation).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Delete referencing records when the target is deleted (Relation).
    #[serde(default)]
    pub cascade_delete: bool,
    /// Enumerated value set (Select).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl FieldOptions {
    /// Effective selection cap for multi-valued kinds.
    pub fn effective_max_select(&self) -> usize {
        self.max_select.unwrap_or(1)
    }
}
