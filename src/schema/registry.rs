//! The schema: versioned container type registry plus migration table

use std::collections::BTreeMap;
use std::sync::Arc;

use super::migration::{MigrationEntry, MigrationTable};
use super::types::ContainerType;
use crate::container::AttributeContainer;
use crate::errors::{StoreError, StoreErrorCode, StoreResult};

/// Registry of container types at a schema version.
///
/// A schema is an explicit value handed to the store on open. Types are
/// immutable once registered.
#[derive(Debug, Clone)]
pub struct Schema {
    version: u32,
    types: BTreeMap<String, Arc<ContainerType>>,
    migrations: MigrationTable,
}

impl Schema {
    /// Creates an empty schema at `version`. Versions start at 1.
    pub fn new(version: u32) -> Self {
        Self {
            version,
            types: BTreeMap::new(),
            migrations: MigrationTable::new(),
        }
    }

    /// Builder form of `register_type`.
    pub fn with_type(mut self, container_type: ContainerType) -> StoreResult<Self> {
        self.register_type(container_type)?;
        Ok(self)
    }

    /// Builder form of `register_migration`.
    pub fn with_migration(mut self, entry: MigrationEntry) -> StoreResult<Self> {
        self.register_migration(entry)?;
        Ok(self)
    }

    /// Registers a container type.
    pub fn register_type(&mut self, container_type: ContainerType) -> StoreResult<()> {
        container_type.validate_structure()?;
        if self.types.contains_key(container_type.name()) {
            return Err(StoreError::new(
                StoreErrorCode::InvalidType,
                format!(
                    "container type '{}' is already registered",
                    container_type.name()
                ),
            ));
        }
        self.types
            .insert(container_type.name().to_string(), Arc::new(container_type));
        Ok(())
    }

    /// Registers a migration. Migrations past the schema version can never
    /// be reached and are rejected.
    pub fn register_migration(&mut self, entry: MigrationEntry) -> StoreResult<()> {
        if entry.to_version() > self.version {
            return Err(StoreError::invalid_migration(format!(
                "migration {} -> {} targets a version above the schema version {}",
                entry.from_version(),
                entry.to_version(),
                self.version
            )));
        }
        self.migrations.register(entry)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn container_type(&self, name: &str) -> Option<&Arc<ContainerType>> {
        self.types.get(name)
    }

    pub fn has_type(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Registered type names, sorted
    pub fn type_names(&self) -> Vec<&str> {
        self.types.keys().map(String::as_str).collect()
    }

    pub fn migrations(&self) -> &MigrationTable {
        &self.migrations
    }

    /// Creates an empty container of a registered type.
    pub fn create(&self, type_name: &str) -> StoreResult<AttributeContainer> {
        let container_type = self
            .types
            .get(type_name)
            .ok_or_else(|| StoreError::invalid_type(type_name))?;
        Ok(AttributeContainer::new(Arc::clone(container_type)))
    }

    /// Checks the schema as a whole before it is bound to a store.
    pub fn validate(&self) -> StoreResult<()> {
        if self.version == 0 {
            return Err(StoreError::new(
                StoreErrorCode::InvalidType,
                "schema version must be at least 1",
            ));
        }
        Ok(())
    }
}
