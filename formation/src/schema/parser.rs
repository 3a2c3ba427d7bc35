use super::types::Formation;
use crate::error::Result;
use std::path::Path;

/// Parse a formation.yaml file into a Formation.
pub fn parse_formation(path: &Path) -> Result<Formation> {
    let content = std::fs::read_to_string(path)?;
    parse_formation_str(&content)
}

/// Parse a formation YAML string into a Formation.
pub fn parse_formation_str(content: &str) -> Result<Formation> {
    let formation: Formation = serde_yaml::from_str(content)?;
    Ok(formation)
}
