//! Entity dictionary file
//!
//! Loads entity definitions from a TOML document into an [`EntityRegistry`],
//! along with per-application key values.
//!
//! ```toml
//! [app_keys.crm]
//! TenantId = 7
//!
//! [[entity]]
//! name = "Customer"
//! description = "Name"
//! procs = ["Recalc"]
//! views = ["Active"]
//! insert_ignore = [3]
//! public_access = ["get", "view"]
//! public_members = ["Active"]
//!
//! [[entity.column]]
//! name = "Id"
//! type = "integer"
//! flags = ["autonum_key"]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use dictum_core::{
    AccessFlags, ColumnDescriptor, ColumnFlags, ConfigError, EntityDefinition, EntityRegistry,
    IgnorePolicy, LogicalType, Operation, ValueMap,
};
use dictum_storage::{AppKeyStore, InMemoryAppKeyStore};

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DictionaryFile {
    #[serde(default)]
    app_keys: BTreeMap<String, ValueMap>,
    #[serde(default, rename = "entity")]
    entities: Vec<EntityEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EntityEntry {
    name: String,
    #[serde(default, rename = "column")]
    columns: Vec<ColumnEntry>,
    #[serde(default)]
    procs: Vec<String>,
    #[serde(default)]
    views: Vec<String>,
    #[serde(default)]
    actions: Vec<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    insert_ignore: Vec<i32>,
    #[serde(default)]
    public_access: Vec<String>,
    #[serde(default)]
    public_members: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ColumnEntry {
    name: String,
    #[serde(rename = "type")]
    logical_type: LogicalType,
    flags: Vec<String>,
    #[serde(default)]
    not_null: bool,
    #[serde(default)]
    array: bool,
    #[serde(default)]
    default: Option<Value>,
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Flag names are the `ColumnFlags` constants, case-insensitive.
fn column_flags(entity: &str, column: &ColumnEntry) -> Result<ColumnFlags, ConfigError> {
    column.flags.iter().try_fold(ColumnFlags::empty(), |acc, name| {
        ColumnFlags::from_name(&name.to_ascii_uppercase())
            .map(|flag| acc | flag)
            .ok_or_else(|| {
                invalid(
                    &format!("{}.{}.flags", entity, column.name),
                    name,
                    "unknown column flag",
                )
            })
    })
}

/// Public access is listed by operation name.
fn access_flags(entry: &EntityEntry) -> Result<AccessFlags, ConfigError> {
    entry.public_access.iter().try_fold(AccessFlags::empty(), |acc, name| {
        name.parse::<Operation>()
            .map(|op| acc | op.access_flag())
            .map_err(|e| invalid(&format!("{}.public_access", entry.name), name, &e.to_string()))
    })
}

fn definition(entry: EntityEntry) -> Result<EntityDefinition, ConfigError> {
    if entry.name.trim().is_empty() {
        return Err(ConfigError::MissingRequired {
            field: "entity.name".to_string(),
        });
    }

    let mut definition = EntityDefinition::new(&entry.name)
        .insert_policy(IgnorePolicy::ignoring(entry.insert_ignore.iter().copied()));
    definition.public_access = access_flags(&entry)?;
    definition.public_members = entry.public_members.iter().cloned().collect();

    for column in &entry.columns {
        let mut descriptor =
            ColumnDescriptor::new(&column.name, column.logical_type, column_flags(&entry.name, column)?);
        if let Some(default) = &column.default {
            descriptor = descriptor.with_default(default.clone());
        }
        if column.not_null {
            descriptor = descriptor.not_null();
        }
        if column.array {
            descriptor = descriptor.array();
        }
        definition = definition.column(descriptor);
    }

    if let Some(description) = &entry.description {
        if !entry.columns.iter().any(|c| c.name.eq_ignore_ascii_case(description)) {
            return Err(invalid(
                &format!("{}.description", entry.name),
                description,
                "not a column of the entity",
            ));
        }
        definition = definition.description(description);
    }
    for name in entry.procs {
        definition = definition.proc(name);
    }
    for name in entry.views {
        definition = definition.view(name);
    }
    for name in entry.actions {
        definition = definition.action(name);
    }
    Ok(definition)
}

/// A loaded dictionary.
pub struct Dictionary {
    pub registry: EntityRegistry,
    pub app_keys: InMemoryAppKeyStore,
}

/// Parse a dictionary document.
pub fn parse_dictionary(contents: &str) -> ApiResult<Dictionary> {
    let file: DictionaryFile = toml::from_str(contents)
        .map_err(|e| ApiError::invalid_input(format!("Invalid entity dictionary: {}", e)))?;

    let mut registry = EntityRegistry::new();
    for entry in file.entities {
        let name = entry.name.clone();
        let definition = definition(entry).map_err(|e| ApiError::invalid_input(e.to_string()))?;
        if registry.contains(&name) {
            return Err(ApiError::invalid_input(format!(
                "Entity {} is defined twice",
                name
            )));
        }
        registry.register(definition);
    }

    let app_keys = InMemoryAppKeyStore::new();
    for (app_id, keys) in file.app_keys {
        app_keys.replace(&app_id, keys);
    }
    Ok(Dictionary { registry, app_keys })
}

/// Load the dictionary at `path`.
pub fn load_dictionary(path: &Path) -> ApiResult<Dictionary> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        ApiError::invalid_input(format!(
            "Failed to read entity dictionary {}: {}",
            path.display(),
            e
        ))
    })?;
    let dictionary = parse_dictionary(&contents)?;
    tracing::info!(path = %path.display(), "Entity dictionary loaded");
    Ok(dictionary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CUSTOMER: &str = r#"
        [app_keys.crm]
        TenantId = 7

        [[entity]]
        name = "Customer"
        description = "Name"
        procs = ["Recalc"]
        views = ["Active"]
        insert_ignore = [3]
        public_access = ["get", "view"]
        public_members = ["Active"]

        [[entity.column]]
        name = "Id"
        type = "integer"
        flags = ["autonum_key"]

        [[entity.column]]
        name = "Name"
        type = "string"
        flags = ["data"]
        not_null = true

        [[entity.column]]
        name = "Status"
        type = "string"
        flags = ["get", "add", "edit"]
        default = "new"
    "#;

    #[test]
    fn test_parse_customer() {
        let dictionary = parse_dictionary(CUSTOMER).unwrap();
        let instance = dictionary.registry.resolve("Customer").unwrap();
        let definition = instance.definition();

        assert_eq!(definition.description_column.as_deref(), Some("Name"));
        assert!(definition.procs.contains("Recalc"));
        assert!(definition.insert_policy.ignores(3));
        assert!(definition.allows_public(Operation::View, Some("Active")));
        assert!(!definition.allows_public(Operation::Insert, None));

        let id = instance.columns().get("Id").unwrap();
        assert_eq!(id.flags, ColumnFlags::AUTONUM_KEY);
        assert_eq!(instance.columns().value("Status"), Some(&json!("new")));
        assert!(!instance.columns().get("Name").unwrap().nullable);
        assert_eq!(dictionary.app_keys.keys("crm").get("TenantId"), Some(&json!(7)));
    }

    #[test]
    fn test_unknown_flag_rejected() {
        let doc = r#"
            [[entity]]
            name = "Broken"
            [[entity.column]]
            name = "Id"
            type = "integer"
            flags = ["sortable"]
        "#;
        assert!(parse_dictionary(doc).is_err());
    }

    #[test]
    fn test_description_must_name_a_column() {
        let doc = r#"
            [[entity]]
            name = "Broken"
            description = "Title"
        "#;
        assert!(parse_dictionary(doc).is_err());
    }

    #[test]
    fn test_duplicate_entity_rejected() {
        let doc = r#"
            [[entity]]
            name = "Twice"
            [[entity]]
            name = "Twice"
        "#;
        assert!(parse_dictionary(doc).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(load_dictionary(Path::new("/nonexistent/entities.toml")).is_err());
    }
}
