//! Schema-independent record representation
//!
//! Payload layout (inside the frame, all integers LE):
//!
//! ```text
//! +----------------------+
//! | Schema Version       | (u32)
//! +----------------------+
//! | Type Name            | (u16 length + UTF-8)
//! +----------------------+
//! | Identifier Flag      | (u8: 0 = none, 1 = present)
//! | Sequence Number      | (u64, only when present)
//! +----------------------+
//! | Attribute Count      | (u16)
//! +----------------------+
//! | Attribute *          | name (u16 length + UTF-8)
//! |                      | kind tag (u8)
//! |                      | value (u32 length + bytes)
//! +----------------------+
//! ```
//!
//! Every attribute is self-describing, so a record can be parsed without the
//! type registry. Migrations operate on this form.

use crate::container::{AttributeContainer, ContainerIdentifier, Value};
use crate::errors::{StoreError, StoreResult};
use crate::schema::AttributeKind;

use super::frame;

/// A decoded record whose attributes have not been checked against a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub schema_version: u32,
    pub type_name: String,
    pub sequence_number: Option<u64>,
    pub attributes: Vec<(String, Value)>,
}

impl RawRecord {
    /// Captures the set attributes of a container in declaration order.
    pub fn from_container(container: &AttributeContainer, schema_version: u32) -> Self {
        Self {
            schema_version,
            type_name: container.type_name().to_string(),
            sequence_number: container.identifier().map(|id| id.sequence_number()),
            attributes: container
                .attributes()
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect(),
        }
    }

    pub fn identifier(&self) -> Option<ContainerIdentifier> {
        self.sequence_number
            .map(|seq| ContainerIdentifier::new(self.type_name.clone(), seq))
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Replaces the value of an attribute, or appends it.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<Value> {
        let position = self.attributes.iter().position(|(n, _)| n == name)?;
        Some(self.attributes.remove(position).1)
    }

    /// Renames an attribute in place. Returns false if it was not present.
    pub fn rename_attribute(&mut self, from: &str, to: impl Into<String>) -> bool {
        match self.attributes.iter_mut().find(|(n, _)| n == from) {
            Some(entry) => {
                entry.0 = to.into();
                true
            }
            None => false,
        }
    }

    /// Encodes the record into a framed, checksummed byte sequence.
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        let mut payload = Vec::with_capacity(64);

        payload.extend_from_slice(&self.schema_version.to_le_bytes());
        write_short_str(&mut payload, "type name", &self.type_name)?;

        match self.sequence_number {
            Some(seq) => {
                payload.push(1);
                payload.extend_from_slice(&seq.to_le_bytes());
            }
            None => payload.push(0),
        }

        if self.attributes.len() > u16::MAX as usize {
            return Err(StoreError::encoding(format!(
                "{} attributes exceed the per-record limit of {}",
                self.attributes.len(),
                u16::MAX
            )));
        }
        payload.extend_from_slice(&(self.attributes.len() as u16).to_le_bytes());

        for (name, value) in &self.attributes {
            write_short_str(&mut payload, "attribute name", name)?;
            payload.push(value.kind().tag());
            let encoded = encode_value(value)?;
            if encoded.len() > u32::MAX as usize {
                return Err(StoreError::encoding(format!(
                    "value of attribute '{}' exceeds {} bytes",
                    name,
                    u32::MAX
                )));
            }
            payload.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
            payload.extend_from_slice(&encoded);
        }

        frame::wrap(&payload)
    }

    /// Decodes a framed record. Any structural problem is `CorruptRecord`.
    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        let payload = frame::unwrap(bytes)?;
        let mut reader = PayloadReader::new(payload);

        let schema_version = reader.read_u32()?;
        let type_name = reader.read_short_str()?;
        let sequence_number = match reader.read_u8()? {
            0 => None,
            1 => Some(reader.read_u64()?),
            flag => {
                return Err(StoreError::corrupt_record(format!(
                    "invalid identifier flag {}",
                    flag
                )))
            }
        };

        let count = reader.read_u16()? as usize;
        let mut attributes: Vec<(String, Value)> = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            let name = reader.read_short_str()?;
            let tag = reader.read_u8()?;
            let kind = AttributeKind::from_tag(tag).ok_or_else(|| {
                StoreError::corrupt_record(format!("unknown value kind tag 0x{:02x}", tag))
            })?;
            let len = reader.read_u32()? as usize;
            let value = decode_value(kind, reader.read_bytes(len)?)?;

            if attributes.iter().any(|(n, _)| *n == name) {
                return Err(StoreError::corrupt_record(format!(
                    "attribute '{}' encoded twice",
                    name
                )));
            }
            attributes.push((name, value));
        }

        if !reader.is_exhausted() {
            return Err(StoreError::corrupt_record(format!(
                "{} unparsed bytes in record payload",
                reader.remaining()
            )));
        }

        Ok(Self {
            schema_version,
            type_name,
            sequence_number,
            attributes,
        })
    }
}

/// Reads the schema version tag of a framed record.
pub fn record_schema_version(bytes: &[u8]) -> StoreResult<u32> {
    let payload = frame::unwrap(bytes)?;
    PayloadReader::new(payload).read_u32()
}

fn write_short_str(buf: &mut Vec<u8>, what: &str, s: &str) -> StoreResult<()> {
    if s.len() > u16::MAX as usize {
        return Err(StoreError::encoding(format!(
            "{} of {} bytes exceeds {} bytes",
            what,
            s.len(),
            u16::MAX
        )));
    }
    buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn encode_value(value: &Value) -> StoreResult<Vec<u8>> {
    Ok(match value {
        Value::Integer(v) => v.to_le_bytes().to_vec(),
        Value::Float(v) => v.to_bits().to_le_bytes().to_vec(),
        Value::String(v) => v.as_bytes().to_vec(),
        Value::Boolean(v) => vec![u8::from(*v)],
        Value::Binary(v) => v.clone(),
        Value::Timestamp(v) => v.to_le_bytes().to_vec(),
        Value::Reference(id) => {
            let mut buf = Vec::with_capacity(id.type_name().len() + 10);
            write_short_str(&mut buf, "reference type name", id.type_name())?;
            buf.extend_from_slice(&id.sequence_number().to_le_bytes());
            buf
        }
    })
}

fn decode_value(kind: AttributeKind, bytes: &[u8]) -> StoreResult<Value> {
    let fixed8 = |bytes: &[u8]| -> StoreResult<[u8; 8]> {
        bytes.try_into().map_err(|_| {
            StoreError::corrupt_record(format!(
                "{} value must be 8 bytes, got {}",
                kind,
                bytes.len()
            ))
        })
    };

    match kind {
        AttributeKind::Integer => Ok(Value::Integer(i64::from_le_bytes(fixed8(bytes)?))),
        AttributeKind::Float => Ok(Value::Float(f64::from_bits(u64::from_le_bytes(fixed8(
            bytes,
        )?)))),
        AttributeKind::Timestamp => Ok(Value::Timestamp(i64::from_le_bytes(fixed8(bytes)?))),
        AttributeKind::String => String::from_utf8(bytes.to_vec())
            .map(Value::String)
            .map_err(|e| StoreError::corrupt_record(format!("invalid UTF-8: {}", e))),
        AttributeKind::Boolean => match bytes {
            [0] => Ok(Value::Boolean(false)),
            [1] => Ok(Value::Boolean(true)),
            _ => Err(StoreError::corrupt_record("invalid boolean encoding")),
        },
        AttributeKind::Binary => Ok(Value::Binary(bytes.to_vec())),
        AttributeKind::Reference => {
            let mut reader = PayloadReader::new(bytes);
            let type_name = reader.read_short_str()?;
            let seq = reader.read_u64()?;
            if !reader.is_exhausted() {
                return Err(StoreError::corrupt_record("trailing bytes in reference value"));
            }
            Ok(Value::Reference(ContainerIdentifier::new(type_name, seq)))
        }
    }
}

/// Bounds-checked cursor over a record payload.
struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn is_exhausted(&self) -> bool {
        self.pos == self.data.len()
    }

    fn read_bytes(&mut self, len: usize) -> StoreResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(StoreError::corrupt_record(format!(
                "field of {} bytes exceeds remaining {} bytes at payload offset {}",
                len,
                self.remaining(),
                self.pos
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> StoreResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> StoreResult<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> StoreResult<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> StoreResult<u64> {
        let b = self.read_bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }

    fn read_short_str(&mut self) -> StoreResult<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| StoreError::corrupt_record(format!("invalid UTF-8: {}", e)))
    }
}
