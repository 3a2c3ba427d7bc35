mod parser;
mod types;

pub use parser::{parse_formation, parse_formation_str};
pub use types::{CollectionDescriptor, FieldDescriptor, FieldKind, FieldOptions, Formation};

use crate::error::{FormationError, Result};
use std::collections::HashSet;

/// Field names assigned by the store itself and therefore reserved.
const RESERVED_FIELDS: &[&str] = &["id", "created_at", "updated_at"];

/// Check the structural invariants of a formation before it touches the
/// store: globally unique collection names, per-collection unique field
/// names, options that match each field's kind, and balanced rule
/// strings. Relation cycle detection is the provisioner's job.
pub fn validate_formation(formation: &Formation) -> Result<()> {
    let mut names = HashSet::new();
    for collection in &formation.collections {
        if collection.name.is_empty() {
            return Err(FormationError::Schema(
                "Collection name must not be empty".into(),
            ));
        }
        if !names.insert(collection.name.as_str()) {
            return Err(FormationError::Schema(format!(
                "Duplicate collection name '{}'",
                collection.name
            )));
        }
        validate_collection(collection)?;
    }
    Ok(())
}

pub(crate) fn validate_collection(collection: &CollectionDescriptor) -> Result<()> {
    let mut field_names = HashSet::new();
    for field in &collection.fields {
        if RESERVED_FIELDS.contains(&field.name.as_str()) {
            return Err(invalid_field(collection, field, "name is reserved"));
        }
        if !field_names.insert(field.name.as_str()) {
            return Err(invalid_field(collection, field, "duplicate field name"));
        }
        validate_options(collection, field)?;
    }

    for (label, rule) in collection.rules() {
        if let Some(rule) = rule {
            check_rule_balance(&collection.name, label, rule)?;
        }
    }
    Ok(())
}

fn validate_options(collection: &CollectionDescriptor, field: &FieldDescriptor) -> Result<()> {
    let opts = &field.options;
    match field.kind {
        FieldKind::Relation => {
            if opts.target.as_deref().unwrap_or("").is_empty() {
                return Err(invalid_field(
                    collection,
                    field,
                    "relation requires a target collection",
                ));
            }
        }
        FieldKind::Select => {
            if opts.values.is_empty() {
                return Err(invalid_field(
                    collection,
                    field,
                    "select requires a non-empty value set",
                ));
            }
            let max_select = opts.effective_max_select();
            if max_select == 0 || max_select > opts.values.len() {
                return Err(invalid_field(
                    collection,
                    field,
                    "max_select must be between 1 and the number of values",
                ));
            }
        }
        _ => {}
    }

    // Clear the knobs this kind accepts; whatever remains set is
    // foreign to the kind.
    let mut residual = opts.clone();
    match field.kind {
        FieldKind::Text | FieldKind::Editor => {
            residual.max = None;
        }
        FieldKind::File => {
            residual.max_select = None;
            residual.max_size = None;
            residual.mime_types.clear();
        }
        FieldKind::Relation => {
            residual.target = None;
            residual.max_select = None;
            residual.cascade_delete = false;
        }
        FieldKind::Select => {
            residual.max_select = None;
            residual.values.clear();
        }
        FieldKind::Json => {}
    }
    if residual != FieldOptions::default() {
        return Err(invalid_field(
            collection,
            field,
            "options do not match the field type",
        ));
    }
    Ok(())
}

/// Rule strings belong to the store's query language; the only check
/// performed here is that parentheses and quotes balance, which catches
/// truncated rules before they are submitted.
fn check_rule_balance(collection: &str, label: &str, rule: &str) -> Result<()> {
    let mut depth: i64 = 0;
    let mut in_quote: Option<char> = None;
    let mut chars = rule.chars();
    while let Some(ch) = chars.next() {
        match in_quote {
            // A backslash escapes the next character inside a quote,
            // so an escaped closing quote does not end the segment.
            Some(_) if ch == '\\' => {
                chars.next();
            }
            Some(q) if ch == q => in_quote = None,
            Some(_) => {}
            None => match ch {
                '\'' | '"' => in_quote = Some(ch),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth < 0 {
                        break;
                    }
                }
                _ => {}
            },
        }
    }
    if depth != 0 || in_quote.is_some() {
        return Err(FormationError::InvalidRule {
            collection: collection.to_string(),
            message: format!("unbalanced {label}: {rule}"),
        });
    }
    Ok(())
}

fn invalid_field(
    collection: &CollectionDescriptor,
    field: &FieldDescriptor,
    message: &str,
) -> FormationError {
    FormationError::InvalidField {
        collection: collection.name.clone(),
        field: field.name.clone(),
        message: message.to_string(),
    }
}
