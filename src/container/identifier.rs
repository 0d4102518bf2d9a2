//! Attribute container identifiers
//!
//! An identifier is the pair (type name, sequence number). Sequence numbers
//! are assigned by the store, start at 1 and are unique within their type.
//! The string form is `<type_name>.<sequence_number>`.

use std::fmt;
use std::str::FromStr;

use crate::errors::StoreError;

/// Identifier of a stored attribute container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerIdentifier {
    type_name: String,
    sequence_number: u64,
}

impl ContainerIdentifier {
    pub fn new(type_name: impl Into<String>, sequence_number: u64) -> Self {
        Self {
            type_name: type_name.into(),
            sequence_number,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }
}

impl fmt::Display for ContainerIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_name, self.sequence_number)
    }
}

impl FromStr for ContainerIdentifier {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (type_name, sequence) = s.rsplit_once('.').ok_or_else(|| {
            StoreError::invalid_identifier(format!("identifier '{}' has no sequence number", s))
        })?;

        if type_name.is_empty() {
            return Err(StoreError::invalid_identifier(format!(
                "identifier '{}' has no type name",
                s
            )));
        }

        let sequence_number = sequence.parse::<u64>().map_err(|e| {
            StoreError::invalid_identifier(format!(
                "identifier '{}' has invalid sequence number: {}",
                s, e
            ))
        })?;

        Ok(Self::new(type_name, sequence_number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_to_string() {
        let identifier = ContainerIdentifier::new("test_container", 1234);
        assert_eq!(identifier.to_string(), "test_container.1234");
    }

    #[test]
    fn test_parse_string_form() {
        let identifier: ContainerIdentifier = "event_data.17".parse().unwrap();
        assert_eq!(identifier.type_name(), "event_data");
        assert_eq!(identifier.sequence_number(), 17);
    }

    #[test]
    fn test_parse_type_name_with_dots() {
        let identifier: ContainerIdentifier = "windows.registry_key.3".parse().unwrap();
        assert_eq!(identifier.type_name(), "windows.registry_key");
        assert_eq!(identifier.sequence_number(), 3);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("no_sequence".parse::<ContainerIdentifier>().is_err());
        assert!(".12".parse::<ContainerIdentifier>().is_err());
        assert!("event.abc".parse::<ContainerIdentifier>().is_err());
        assert!("event.-1".parse::<ContainerIdentifier>().is_err());
    }

    #[test]
    fn test_ordering_by_type_then_sequence() {
        let a = ContainerIdentifier::new("event", 2);
        let b = ContainerIdentifier::new("event", 10);
        let c = ContainerIdentifier::new("file_entry", 1);
        assert!(a < b);
        assert!(b < c);
    }
}
