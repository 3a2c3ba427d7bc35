use thiserror::Error;

#[derive(Error, Debug)]
pub enum FormationError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Cyclic relation dependency involving: {0}")]
    CyclicDependency(String),

    #[error("Collection already exists: {0}")]
    DuplicateCollection(String),

    #[error("Invalid rule on collection '{collection}': {message}")]
    InvalidRule { collection: String, message: String },

    #[error("Invalid field '{field}' on collection '{collection}': {message}")]
    InvalidField {
        collection: String,
        field: String,
        message: String,
    },

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Collection '{collection}' has dependent collection '{dependent}'")]
    HasDependents { collection: String, dependent: String },

    #[error("Reference not found: {collection}.{field} = '{value}'")]
    ReferenceNotFound {
        collection: String,
        field: String,
        value: String,
    },

    #[error("Ambiguous reference: {collection}.{field} = '{value}' matched {count} records")]
    AmbiguousReference {
        collection: String,
        field: String,
        value: String,
        count: usize,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, FormationError>;
