//! The attribute container
//!
//! Containers are created through a `Schema` so every container is bound to
//! a registered type. Attributes are validated when set; values are kept in
//! declaration order so encoding is deterministic.

use std::collections::BTreeMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use super::expression::FilterExpression;
use super::identifier::ContainerIdentifier;
use super::value::Value;
use crate::errors::{StoreError, StoreErrorCode, StoreResult};
use crate::schema::ContainerType;

/// A typed record with an ordered, schema-validated attribute mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeContainer {
    container_type: Arc<ContainerType>,
    identifier: Option<ContainerIdentifier>,
    values: Vec<Option<Value>>,
}

impl AttributeContainer {
    pub(crate) fn new(container_type: Arc<ContainerType>) -> Self {
        let values = vec![None; container_type.attributes().len()];
        Self {
            container_type,
            identifier: None,
            values,
        }
    }

    pub fn type_name(&self) -> &str {
        self.container_type.name()
    }

    pub fn container_type(&self) -> &ContainerType {
        &self.container_type
    }

    /// Identifier assigned by the store, or by the caller before the first write
    pub fn identifier(&self) -> Option<&ContainerIdentifier> {
        self.identifier.as_ref()
    }

    /// Sets the identifier.
    ///
    /// The identifier must belong to this container's type. Once set it can
    /// only be set again to the same value.
    pub fn set_identifier(&mut self, identifier: ContainerIdentifier) -> StoreResult<()> {
        if identifier.type_name() != self.type_name() {
            return Err(StoreError::invalid_identifier(format!(
                "identifier '{}' does not belong to container type '{}'",
                identifier,
                self.type_name()
            )));
        }
        match self.identifier {
            Some(ref existing) if *existing != identifier => Err(StoreError::new(
                StoreErrorCode::DuplicateIdentifier,
                format!("container already has identifier '{}'", existing),
            )),
            _ => {
                self.identifier = Some(identifier);
                Ok(())
            }
        }
    }

    /// Sets an attribute, validating it against the declared kind.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<Value>) -> StoreResult<()> {
        let value = value.into();
        let position = self.container_type.check_value(name, &value)?;
        self.values[position] = Some(value);
        Ok(())
    }

    /// Returns the attribute value, falling back to the declared default.
    pub fn get_attribute(&self, name: &str) -> StoreResult<&Value> {
        let position = self
            .container_type
            .position(name)
            .ok_or_else(|| StoreError::unknown_attribute(self.type_name(), name))?;

        match self.values[position] {
            Some(ref value) => Ok(value),
            None => self.container_type.attributes()[position]
                .default
                .as_ref()
                .ok_or_else(|| StoreError::unknown_attribute(self.type_name(), name)),
        }
    }

    /// Returns the explicitly set value of an attribute, ignoring defaults.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.container_type
            .position(name)
            .and_then(|p| self.values[p].as_ref())
    }

    /// Names of the set attributes, in declaration order.
    pub fn attribute_names(&self) -> Vec<&str> {
        self.attributes().map(|(name, _)| name).collect()
    }

    /// Set attributes as (name, value) pairs, in declaration order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.container_type
            .attributes()
            .iter()
            .zip(self.values.iter())
            .filter_map(|(def, value)| value.as_ref().map(|v| (def.name.as_str(), v)))
    }

    /// Copies the set attributes into a name-sorted map.
    pub fn to_map(&self) -> BTreeMap<String, Value> {
        self.attributes()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    /// Deterministic string of the set attribute values, sorted by name.
    pub fn attribute_values_string(&self) -> String {
        self.to_map()
            .iter()
            .map(|(name, value)| format!("{}: {}", name, value))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Hash over the attribute values string, used to find duplicate records.
    pub fn attribute_values_hash(&self) -> u64 {
        let digest = Sha256::digest(self.attribute_values_string().as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(prefix)
    }

    /// Evaluates a filter expression against this container.
    ///
    /// Malformed expressions and unknown attributes evaluate to false.
    pub fn matches_expression(&self, expression: &str) -> bool {
        match FilterExpression::parse(expression) {
            Ok(filter) => filter.matches(self),
            Err(_) => false,
        }
    }

    /// Stores a decoded value at a known position without re-validation.
    pub(crate) fn set_value_at(&mut self, position: usize, value: Value) {
        self.values[position] = Some(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeKind;

    fn test_type() -> Arc<ContainerType> {
        Arc::new(
            ContainerType::new("test_container")
                .attribute("attribute_name", AttributeKind::String)
                .attribute("attribute_value", AttributeKind::String)
                .attribute_with_default("count", AttributeKind::Integer, 0i64),
        )
    }

    fn populated() -> AttributeContainer {
        let mut container = AttributeContainer::new(test_type());
        container.set_attribute("attribute_name", "attribute_name").unwrap();
        container
            .set_attribute("attribute_value", "attribute_value")
            .unwrap();
        container
    }

    #[test]
    fn test_to_map() {
        let map = populated().to_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map["attribute_name"], Value::from("attribute_name"));
        assert_eq!(map["attribute_value"], Value::from("attribute_value"));
    }

    #[test]
    fn test_attribute_names_only_include_set_attributes() {
        assert_eq!(
            populated().attribute_names(),
            vec!["attribute_name", "attribute_value"]
        );
    }

    #[test]
    fn test_get_attribute_uses_default() {
        let container = populated();
        assert_eq!(container.get_attribute("count").unwrap(), &Value::Integer(0));
        assert!(container.attribute("count").is_none());
    }

    #[test]
    fn test_get_attribute_without_default_fails() {
        let container = AttributeContainer::new(test_type());
        let err = container.get_attribute("attribute_name").unwrap_err();
        assert_eq!(err.code(), StoreErrorCode::UnknownAttribute);
    }

    #[test]
    fn test_set_attribute_type_mismatch() {
        let mut container = AttributeContainer::new(test_type());
        let err = container.set_attribute("count", "many").unwrap_err();
        assert_eq!(err.code(), StoreErrorCode::TypeMismatch);
        assert!(container.attribute("count").is_none());
    }

    #[test]
    fn test_set_attribute_unknown_name() {
        let mut container = AttributeContainer::new(test_type());
        let err = container.set_attribute("bogus", 1i64).unwrap_err();
        assert_eq!(err.code(), StoreErrorCode::UnknownAttribute);
    }

    #[test]
    fn test_attribute_values_hash_changes_with_values() {
        let mut container = populated();
        let hash1 = container.attribute_values_hash();

        container.set_attribute("attribute_value", "changes").unwrap();
        let hash2 = container.attribute_values_hash();
        assert_ne!(hash1, hash2);

        container
            .set_attribute("attribute_value", "attribute_value")
            .unwrap();
        assert_eq!(container.attribute_values_hash(), hash1);
    }

    #[test]
    fn test_attribute_values_string() {
        let container = populated();
        assert_eq!(
            container.attribute_values_string(),
            "attribute_name: \"attribute_name\", attribute_value: \"attribute_value\""
        );
    }

    #[test]
    fn test_set_identifier() {
        let mut container = AttributeContainer::new(test_type());
        assert!(container.identifier().is_none());

        container
            .set_identifier(ContainerIdentifier::new("test_container", 3))
            .unwrap();
        // Same value again is fine
        container
            .set_identifier(ContainerIdentifier::new("test_container", 3))
            .unwrap();

        let err = container
            .set_identifier(ContainerIdentifier::new("test_container", 4))
            .unwrap_err();
        assert_eq!(err.code(), StoreErrorCode::DuplicateIdentifier);

        let err = container
            .set_identifier(ContainerIdentifier::new("other", 3))
            .unwrap_err();
        assert_eq!(err.code(), StoreErrorCode::InvalidIdentifier);
    }

    #[test]
    fn test_matches_expression() {
        let mut container = AttributeContainer::new(test_type());
        container.set_attribute("attribute_name", "value").unwrap();

        assert!(container.matches_expression("attribute_name == \"value\""));
        assert!(!container.matches_expression("attribute_name == \"bogus\""));
        assert!(!container.matches_expression("bogus"));
    }
}
