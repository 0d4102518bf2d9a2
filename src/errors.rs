//! Store error types
//!
//! Every failure carries a stable `ACSTORE_*` code and one of four categories
//! so callers can tell bad input from a damaged store from a transient
//! resource problem:
//!
//! - VALIDATION: bad input, rejected before any I/O
//! - INTEGRITY: a stored record failed structural or checksum validation
//! - COMPATIBILITY: the store's schema version cannot be served
//! - RESOURCE: I/O, locking or capacity failures

use std::fmt;
use std::io;

/// Error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller input was wrong; always recoverable locally
    Validation,
    /// Stored bytes are damaged; other records remain usable
    Integrity,
    /// Store cannot be opened with this schema
    Compatibility,
    /// Environment failure; caller decides on retry
    Resource,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::Integrity => "INTEGRITY",
            ErrorCategory::Compatibility => "COMPATIBILITY",
            ErrorCategory::Resource => "RESOURCE",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Store error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorCode {
    /// Container type is not registered in the schema
    InvalidType,
    /// Encoded type name is not registered in the schema
    UnknownType,
    /// Attribute is not declared for the container type
    UnknownAttribute,
    /// Value kind does not match the declared attribute kind
    TypeMismatch,
    /// Identifier already used within its type
    DuplicateIdentifier,
    /// Mutation attempted on a read-only store
    ReadOnlyStore,
    /// Operation attempted on a closed store
    StoreClosed,
    /// Container cannot be represented in the record format
    Encoding,
    /// Record failed structural or checksum validation
    CorruptRecord,
    /// Store schema version is newer or has no migration path
    UnsupportedSchema,
    /// Migration table entry is malformed
    InvalidMigration,
    /// Store or record does not exist
    NotFound,
    /// Store already exists at the location
    AlreadyExists,
    /// Underlying I/O failure
    Io,
    /// Exclusive lock not acquired within the timeout
    LockTimeout,
    /// Backend capacity exhausted
    BackendFull,
    /// No sequence number left for a container type
    IdentifiersExhausted,
    /// Location descriptor is unusable
    InvalidLocation,
    /// Store configuration value is out of range
    InvalidConfig,
    /// Identifier string or identifier/type pairing is malformed
    InvalidIdentifier,
    /// Filter expression cannot be parsed
    InvalidExpression,
    /// Schema document is malformed
    InvalidSchema,
    /// Version manager asked for a transition its state does not allow
    InvalidTransition,
}

impl StoreErrorCode {
    /// Returns the stable string code
    pub fn code(&self) -> &'static str {
        match self {
            StoreErrorCode::InvalidType => "ACSTORE_INVALID_TYPE",
            StoreErrorCode::UnknownType => "ACSTORE_UNKNOWN_TYPE",
            StoreErrorCode::UnknownAttribute => "ACSTORE_UNKNOWN_ATTRIBUTE",
            StoreErrorCode::TypeMismatch => "ACSTORE_TYPE_MISMATCH",
            StoreErrorCode::DuplicateIdentifier => "ACSTORE_DUPLICATE_IDENTIFIER",
            StoreErrorCode::ReadOnlyStore => "ACSTORE_READ_ONLY",
            StoreErrorCode::StoreClosed => "ACSTORE_STORE_CLOSED",
            StoreErrorCode::Encoding => "ACSTORE_ENCODING_ERROR",
            StoreErrorCode::CorruptRecord => "ACSTORE_CORRUPT_RECORD",
            StoreErrorCode::UnsupportedSchema => "ACSTORE_UNSUPPORTED_SCHEMA",
            StoreErrorCode::InvalidMigration => "ACSTORE_INVALID_MIGRATION",
            StoreErrorCode::NotFound => "ACSTORE_NOT_FOUND",
            StoreErrorCode::AlreadyExists => "ACSTORE_ALREADY_EXISTS",
            StoreErrorCode::Io => "ACSTORE_IO_ERROR",
            StoreErrorCode::LockTimeout => "ACSTORE_LOCK_TIMEOUT",
            StoreErrorCode::BackendFull => "ACSTORE_BACKEND_FULL",
            StoreErrorCode::IdentifiersExhausted => "ACSTORE_IDENTIFIERS_EXHAUSTED",
            StoreErrorCode::InvalidLocation => "ACSTORE_INVALID_LOCATION",
            StoreErrorCode::InvalidConfig => "ACSTORE_INVALID_CONFIG",
            StoreErrorCode::InvalidIdentifier => "ACSTORE_INVALID_IDENTIFIER",
            StoreErrorCode::InvalidExpression => "ACSTORE_INVALID_EXPRESSION",
            StoreErrorCode::InvalidSchema => "ACSTORE_INVALID_SCHEMA",
            StoreErrorCode::InvalidTransition => "ACSTORE_INVALID_TRANSITION",
        }
    }

    /// Returns the category this code belongs to
    pub fn category(&self) -> ErrorCategory {
        match self {
            StoreErrorCode::InvalidType
            | StoreErrorCode::UnknownType
            | StoreErrorCode::UnknownAttribute
            | StoreErrorCode::TypeMismatch
            | StoreErrorCode::DuplicateIdentifier
            | StoreErrorCode::ReadOnlyStore
            | StoreErrorCode::StoreClosed
            | StoreErrorCode::Encoding
            | StoreErrorCode::InvalidMigration
            | StoreErrorCode::InvalidLocation
            | StoreErrorCode::InvalidConfig
            | StoreErrorCode::InvalidIdentifier
            | StoreErrorCode::InvalidExpression
            | StoreErrorCode::InvalidSchema
            | StoreErrorCode::InvalidTransition => ErrorCategory::Validation,
            StoreErrorCode::CorruptRecord => ErrorCategory::Integrity,
            StoreErrorCode::UnsupportedSchema => ErrorCategory::Compatibility,
            StoreErrorCode::NotFound
            | StoreErrorCode::AlreadyExists
            | StoreErrorCode::Io
            | StoreErrorCode::LockTimeout
            | StoreErrorCode::BackendFull
            | StoreErrorCode::IdentifiersExhausted => ErrorCategory::Resource,
        }
    }
}

impl fmt::Display for StoreErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Store error with code, message and optional context.
#[derive(Debug)]
pub struct StoreError {
    code: StoreErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl StoreError {
    /// Create an error with the given code and message
    pub fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    /// Attach details (offset, identifier, path) to the error
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn invalid_type(type_name: &str) -> Self {
        Self::new(
            StoreErrorCode::InvalidType,
            format!("container type '{}' is not registered", type_name),
        )
    }

    pub fn unknown_type(type_name: &str) -> Self {
        Self::new(
            StoreErrorCode::UnknownType,
            format!("encoded container type '{}' is not in the type registry", type_name),
        )
    }

    pub fn unknown_attribute(type_name: &str, name: &str) -> Self {
        Self::new(
            StoreErrorCode::UnknownAttribute,
            format!("attribute '{}' is not available on '{}'", name, type_name),
        )
    }

    pub fn type_mismatch(type_name: &str, name: &str, expected: &str, actual: &str) -> Self {
        Self::new(
            StoreErrorCode::TypeMismatch,
            format!(
                "attribute '{}.{}': expected {}, got {}",
                type_name, name, expected, actual
            ),
        )
    }

    pub fn duplicate_identifier(identifier: impl fmt::Display) -> Self {
        Self::new(
            StoreErrorCode::DuplicateIdentifier,
            format!("identifier '{}' is already in use", identifier),
        )
    }

    pub fn read_only(operation: &str) -> Self {
        Self::new(
            StoreErrorCode::ReadOnlyStore,
            format!("cannot {} on a store opened read-only", operation),
        )
    }

    pub fn store_closed() -> Self {
        Self::new(StoreErrorCode::StoreClosed, "store has been closed")
    }

    pub fn encoding(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::Encoding, message)
    }

    pub fn corrupt_record(reason: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::CorruptRecord, reason)
    }

    /// Corrupt record with byte offset context
    pub fn corrupt_at_offset(offset: u64, reason: impl Into<String>) -> Self {
        Self::corrupt_record(reason).with_details(format!("byte_offset: {}", offset))
    }

    pub fn unsupported_schema(stored: u32, supported: u32, reason: &str) -> Self {
        Self::new(
            StoreErrorCode::UnsupportedSchema,
            format!(
                "store schema version {} cannot be opened by schema version {}: {}",
                stored, supported, reason
            ),
        )
    }

    pub fn invalid_migration(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::InvalidMigration, message)
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::NotFound, format!("{} not found", what.into()))
    }

    pub fn already_exists(location: impl fmt::Display) -> Self {
        Self::new(
            StoreErrorCode::AlreadyExists,
            format!("a store already exists at {}", location),
        )
    }

    /// I/O failure with the underlying error as source
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: StoreErrorCode::Io,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    pub fn lock_timeout(location: impl fmt::Display, waited_ms: u64) -> Self {
        Self::new(
            StoreErrorCode::LockTimeout,
            format!("exclusive lock on {} not acquired", location),
        )
        .with_details(format!("waited_ms: {}", waited_ms))
    }

    pub fn backend_full(limit: u64, requested: u64) -> Self {
        Self::new(
            StoreErrorCode::BackendFull,
            format!("store size limit of {} bytes would be exceeded", limit),
        )
        .with_details(format!("requested_size: {}", requested))
    }

    pub fn invalid_location(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::InvalidLocation, message)
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::InvalidConfig, message)
    }

    pub fn identifiers_exhausted(type_name: &str) -> Self {
        Self::new(
            StoreErrorCode::IdentifiersExhausted,
            format!("no sequence number left for type '{}'", type_name),
        )
        .with_details(format!("last_sequence_number: {}", u64::MAX))
    }

    pub fn invalid_identifier(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::InvalidIdentifier, message)
    }

    pub fn invalid_expression(expression: &str, reason: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::InvalidExpression, reason)
            .with_details(format!("expression: {}", expression))
    }

    pub fn invalid_schema(source: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::InvalidSchema, reason)
            .with_details(format!("schema: {}", source.into()))
    }

    pub fn forbidden_transition(from: &str, to: &str) -> Self {
        Self::new(
            StoreErrorCode::InvalidTransition,
            format!("version state transition {} -> {} is not allowed", from, to),
        )
    }

    pub fn code(&self) -> StoreErrorCode {
        self.code
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    pub fn is_validation(&self) -> bool {
        self.category() == ErrorCategory::Validation
    }

    pub fn is_integrity(&self) -> bool {
        self.category() == ErrorCategory::Integrity
    }

    pub fn is_compatibility(&self) -> bool {
        self.category() == ErrorCategory::Compatibility
    }

    pub fn is_resource(&self) -> bool {
        self.category() == ErrorCategory::Resource
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.category(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
