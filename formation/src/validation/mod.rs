use crate::error::{FormationError, Result};
use crate::schema::{CollectionDescriptor, FieldDescriptor, FieldKind};
use serde_json::Value;

/// Result of validating a record's field values against its collection
/// descriptor. Errors accumulate so the caller sees every problem at
/// once rather than the first.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Collapse into a Result, joining all errors into one message.
    pub fn into_result(self) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(FormationError::Validation(format!(
                "Record validation failed:\n  - {}",
                self.errors.join("\n  - ")
            )))
        }
    }
}

/// Validate a record's field values against a collection descriptor.
/// Checks required presence, per-kind value shape, and rejects fields
/// the descriptor does not declare. Uniqueness needs store access and
/// is enforced by the store adapter's upsert.
pub fn validate_values(
    collection: &CollectionDescriptor,
    values: &serde_json::Map<String, Value>,
) -> ValidationResult {
    let mut result = ValidationResult::default();

    for field in &collection.fields {
        let value = values.get(&field.name);

        if field.required && value.map_or(true, Value::is_null) {
            result
                .errors
                .push(format!("Required field '{}' is missing", field.name));
            continue;
        }

        if let Some(value) = value {
            if !value.is_null() {
                validate_field_value(field, value, &mut result);
            }
        }
    }

    for key in values.keys() {
        if collection.field(key).is_none() {
            result
                .errors
                .push(format!("Unknown field '{key}' is not in the schema"));
        }
    }

    result
}

fn validate_field_value(field: &FieldDescriptor, value: &Value, result: &mut ValidationResult) {
    let name = &field.name;
    match field.kind {
        FieldKind::Text | FieldKind::Editor => match value.as_str() {
            Some(s) => {
                if let Some(max) = field.options.max {
                    if s.chars().count() > max {
                        result.errors.push(format!(
                            "Field '{name}' exceeds maximum length of {max}"
                        ));
                    }
                }
            }
            None => result.errors.push(format!(
                "Field '{name}' expected string, got {}",
                type_name(value)
            )),
        },
        FieldKind::Select => {
            let selected = match string_list(value) {
                Some(s) => s,
                None => {
                    result.errors.push(format!(
                        "Field '{name}' expected string or list of strings, got {}",
                        type_name(value)
                    ));
                    return;
                }
            };
            let max_select = field.options.effective_max_select();
            if selected.len() > max_select {
                result.errors.push(format!(
                    "Field '{name}' selects {} values, maximum is {max_select}",
                    selected.len()
                ));
            }
            for s in &selected {
                if !field.options.values.iter().any(|v| v == s) {
                    result.errors.push(format!(
                        "Field '{name}' value '{s}' is not in: {:?}",
                        field.options.values
                    ));
                }
            }
        }
        FieldKind::Relation => {
            let ids = match string_list(value) {
                Some(ids) => ids,
                None => {
                    result.errors.push(format!(
                        "Field '{name}' (relation) expected record id or list of ids, got {}",
                        type_name(value)
                    ));
                    return;
                }
            };
            let max_select = field.options.effective_max_select();
            if ids.len() > max_select {
                result.errors.push(format!(
                    "Field '{name}' references {} records, maximum is {max_select}",
                    ids.len()
                ));
            }
            if ids.iter().any(|id| id.is_empty()) {
                result
                    .errors
                    .push(format!("Field '{name}' contains an empty record id"));
            }
        }
        FieldKind::File => {
            let files = match string_list(value) {
                Some(f) => f,
                None => {
                    result.errors.push(format!(
                        "Field '{name}' (file) expected file name or list of names, got {}",
                        type_name(value)
                    ));
                    return;
                }
            };
            let max_select = field.options.effective_max_select();
            if files.len() > max_select {
                result.errors.push(format!(
                    "Field '{name}' attaches {} files, maximum is {max_select}",
                    files.len()
                ));
            }
        }
        FieldKind::Json => {
            // Any JSON value is acceptable.
        }
    }
}

/// Interpret a value as one string or a list of strings; multi-valued
/// kinds (select, relation, file) accept both shapes.
fn string_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
