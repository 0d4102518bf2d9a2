//! Schema documents
//!
//! A schema can be declared in JSON instead of code:
//!
//! ```json
//! {
//!   "version": 2,
//!   "types": [
//!     {
//!       "name": "file_entry",
//!       "attributes": [
//!         { "name": "path", "kind": "string" },
//!         { "name": "size", "kind": "integer", "default": 0 }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! Attribute order in the document is the declaration order. Migrations
//! are code and are registered on the loaded schema afterwards.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use super::registry::Schema;
use super::types::{AttributeDef, AttributeKind, ContainerType};
use crate::container::Value;
use crate::errors::{StoreError, StoreResult};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SchemaDocument {
    version: u32,
    #[serde(default)]
    types: Vec<TypeDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TypeDocument {
    name: String,
    #[serde(default)]
    attributes: Vec<AttributeDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AttributeDocument {
    name: String,
    kind: AttributeKind,
    #[serde(default)]
    default: Option<serde_json::Value>,
}

impl Schema {
    /// Parses a schema document.
    pub fn from_json_str(json: &str) -> StoreResult<Self> {
        Self::parse_document(json, "<inline>")
    }

    /// Loads a schema document from disk.
    pub fn load(path: &Path) -> StoreResult<Self> {
        let json = fs::read_to_string(path).map_err(|e| {
            StoreError::io(format!("failed to read schema file {}", path.display()), e)
        })?;
        Self::parse_document(&json, &path.display().to_string())
    }

    fn parse_document(json: &str, source: &str) -> StoreResult<Self> {
        let document: SchemaDocument = serde_json::from_str(json)
            .map_err(|e| StoreError::invalid_schema(source, format!("invalid JSON: {}", e)))?;

        let mut schema = Schema::new(document.version);
        schema
            .validate()
            .map_err(|e| StoreError::invalid_schema(source, e.message()))?;

        for type_doc in document.types {
            let mut container_type = ContainerType::new(type_doc.name.as_str());
            for attr in type_doc.attributes {
                let def = match attr.default {
                    None | Some(serde_json::Value::Null) => AttributeDef::new(attr.name, attr.kind),
                    Some(ref json) => {
                        let default = Value::from_json(attr.kind, json).ok_or_else(|| {
                            StoreError::invalid_schema(
                                source,
                                format!(
                                    "default of '{}.{}' is not a valid {} value",
                                    type_doc.name, attr.name, attr.kind
                                ),
                            )
                        })?;
                        AttributeDef::with_default(attr.name, attr.kind, default)
                    }
                };
                container_type = container_type.declare(def);
            }
            schema.register_type(container_type)?;
        }

        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreErrorCode;
    use std::io::Write;

    const DOCUMENT: &str = r#"{
        "version": 2,
        "types": [
            {
                "name": "file_entry",
                "attributes": [
                    { "name": "path", "kind": "string" },
                    { "name": "size", "kind": "integer", "default": 0 },
                    { "name": "modified", "kind": "timestamp", "default": "2020-09-13T12:26:40Z" },
                    { "name": "parent", "kind": "reference" }
                ]
            },
            { "name": "event", "attributes": [ { "name": "tag", "kind": "binary", "default": [1, 2] } ] }
        ]
    }"#;

    #[test]
    fn test_parse_document() {
        let schema = Schema::from_json_str(DOCUMENT).unwrap();
        assert_eq!(schema.version(), 2);
        assert_eq!(schema.type_names(), vec!["event", "file_entry"]);

        let file_entry = schema.container_type("file_entry").unwrap();
        let names: Vec<&str> = file_entry.attributes().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["path", "size", "modified", "parent"]);

        let container = schema.create("file_entry").unwrap();
        assert_eq!(container.get_attribute("size").unwrap(), &Value::Integer(0));
        assert_eq!(
            container.get_attribute("modified").unwrap(),
            &Value::Timestamp(1_600_000_000_000_000)
        );

        let event = schema.create("event").unwrap();
        assert_eq!(event.get_attribute("tag").unwrap(), &Value::Binary(vec![1, 2]));
    }

    #[test]
    fn test_bad_default_rejected() {
        let json = r#"{"version": 1, "types": [{"name": "t", "attributes": [
            {"name": "a", "kind": "integer", "default": "zero"}]}]}"#;
        let err = Schema::from_json_str(json).unwrap_err();
        assert_eq!(err.code(), StoreErrorCode::InvalidSchema);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let json = r#"{"version": 1, "types": [{"name": "t", "attributes": [
            {"name": "a", "kind": "decimal"}]}]}"#;
        assert_eq!(
            Schema::from_json_str(json).unwrap_err().code(),
            StoreErrorCode::InvalidSchema
        );
    }

    #[test]
    fn test_version_zero_rejected() {
        let err = Schema::from_json_str(r#"{"version": 0}"#).unwrap_err();
        assert_eq!(err.code(), StoreErrorCode::InvalidSchema);
    }

    #[test]
    fn test_duplicate_attribute_rejected() {
        let json = r#"{"version": 1, "types": [{"name": "t", "attributes": [
            {"name": "a", "kind": "integer"}, {"name": "a", "kind": "string"}]}]}"#;
        assert_eq!(
            Schema::from_json_str(json).unwrap_err().code(),
            StoreErrorCode::InvalidType
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DOCUMENT.as_bytes()).unwrap();
        let schema = Schema::load(file.path()).unwrap();
        assert!(schema.has_type("file_entry"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Schema::load(&dir.path().join("missing.json")).unwrap_err();
        assert_eq!(err.code(), StoreErrorCode::Io);
    }
}
