//! Container type definitions
//!
//! A container type declares a closed, ordered set of attributes. Each
//! attribute has a kind and an optional default returned when the attribute
//! was never set.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::container::Value;
use crate::errors::{StoreError, StoreErrorCode, StoreResult};

/// Attribute kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    Integer,
    Float,
    String,
    Boolean,
    Binary,
    Timestamp,
    Reference,
}

impl AttributeKind {
    /// Returns the kind name for error messages
    pub fn name(&self) -> &'static str {
        match self {
            AttributeKind::Integer => "integer",
            AttributeKind::Float => "float",
            AttributeKind::String => "string",
            AttributeKind::Boolean => "boolean",
            AttributeKind::Binary => "binary",
            AttributeKind::Timestamp => "timestamp",
            AttributeKind::Reference => "reference",
        }
    }

    /// On-disk tag byte
    pub fn tag(&self) -> u8 {
        match self {
            AttributeKind::Integer => 0x01,
            AttributeKind::Float => 0x02,
            AttributeKind::String => 0x03,
            AttributeKind::Boolean => 0x04,
            AttributeKind::Binary => 0x05,
            AttributeKind::Timestamp => 0x06,
            AttributeKind::Reference => 0x07,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(AttributeKind::Integer),
            0x02 => Some(AttributeKind::Float),
            0x03 => Some(AttributeKind::String),
            0x04 => Some(AttributeKind::Boolean),
            0x05 => Some(AttributeKind::Binary),
            0x06 => Some(AttributeKind::Timestamp),
            0x07 => Some(AttributeKind::Reference),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Declared attribute of a container type.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDef {
    pub name: String,
    pub kind: AttributeKind,
    /// Value returned by `get_attribute` when the attribute is unset
    pub default: Option<Value>,
}

impl AttributeDef {
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
        }
    }

    pub fn with_default(name: impl Into<String>, kind: AttributeKind, default: Value) -> Self {
        Self {
            name: name.into(),
            kind,
            default: Some(default),
        }
    }
}

/// A registered container type with its ordered attribute declarations.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerType {
    name: String,
    attributes: Vec<AttributeDef>,
    positions: HashMap<String, usize>,
}

impl ContainerType {
    /// Creates a container type without attributes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Declares an attribute without a default.
    pub fn attribute(self, name: impl Into<String>, kind: AttributeKind) -> Self {
        self.declare(AttributeDef::new(name, kind))
    }

    /// Declares an attribute with a default value.
    pub fn attribute_with_default(
        self,
        name: impl Into<String>,
        kind: AttributeKind,
        default: impl Into<Value>,
    ) -> Self {
        self.declare(AttributeDef::with_default(name, kind, default.into()))
    }

    /// Appends an attribute declaration. Duplicates are caught by
    /// `validate_structure` when the type is registered.
    pub fn declare(mut self, def: AttributeDef) -> Self {
        self.positions
            .entry(def.name.clone())
            .or_insert(self.attributes.len());
        self.attributes.push(def);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attribute declarations in declaration order
    pub fn attributes(&self) -> &[AttributeDef] {
        &self.attributes
    }

    /// Position of the attribute in declaration order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn attribute_def(&self, name: &str) -> Option<&AttributeDef> {
        self.position(name).map(|p| &self.attributes[p])
    }

    /// Checks names, duplicate declarations and default kinds.
    pub fn validate_structure(&self) -> StoreResult<()> {
        if self.name.is_empty() {
            return Err(StoreError::new(
                StoreErrorCode::InvalidType,
                "container type name must not be empty",
            ));
        }
        if self.name.len() > u16::MAX as usize {
            return Err(StoreError::new(
                StoreErrorCode::InvalidType,
                format!("container type name exceeds {} bytes", u16::MAX),
            ));
        }

        if self.positions.len() != self.attributes.len() {
            return Err(StoreError::new(
                StoreErrorCode::InvalidType,
                format!("container type '{}' declares an attribute twice", self.name),
            ));
        }

        for def in &self.attributes {
            if def.name.is_empty() || def.name.len() > u16::MAX as usize {
                return Err(StoreError::new(
                    StoreErrorCode::InvalidType,
                    format!("container type '{}' has an invalid attribute name", self.name),
                ));
            }
            if let Some(ref default) = def.default {
                if default.kind() != def.kind {
                    return Err(StoreError::type_mismatch(
                        &self.name,
                        &def.name,
                        def.kind.name(),
                        default.kind().name(),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Checks that `value` may be stored under `name`.
    pub fn check_value(&self, name: &str, value: &Value) -> StoreResult<usize> {
        let position = self
            .position(name)
            .ok_or_else(|| StoreError::unknown_attribute(&self.name, name))?;
        let def = &self.attributes[position];
        if value.kind() != def.kind {
            return Err(StoreError::type_mismatch(
                &self.name,
                name,
                def.kind.name(),
                value.kind().name(),
            ));
        }
        Ok(position)
    }
}
