//! Schema version state machine
//!
//! Decides, on open, whether a stored schema version can be served by the
//! schema supplied by the caller:
//!
//! ```text
//! Unopened -> Validating -> Current ----------------> Ready
//!                        -> NeedsMigration ---------> Ready
//!                        -> Incompatible -> Rejected
//! ```
//!
//! A failed migration moves `NeedsMigration` to `Rejected`. Transitions are
//! explicit calls; nothing is inferred.

use super::migration::MigrationTable;
use crate::errors::{StoreError, StoreResult};

/// Version state of a store being opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionState {
    /// Header not read yet
    Unopened,
    /// Stored version known, not yet classified
    Validating { stored: u32 },
    /// Stored version equals the supported version
    Current { version: u32 },
    /// Stored version is older and a migration chain exists
    NeedsMigration { from: u32, to: u32 },
    /// Stored version is newer, or older without a migration chain
    Incompatible { stored: u32, supported: u32 },
    /// Store may be served at `version`
    Ready { version: u32 },
    /// Store must not be served
    Rejected { stored: u32, supported: u32 },
}

impl Default for VersionState {
    fn default() -> Self {
        Self::Unopened
    }
}

impl VersionState {
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Unopened => "Unopened",
            Self::Validating { .. } => "Validating",
            Self::Current { .. } => "Current",
            Self::NeedsMigration { .. } => "NeedsMigration",
            Self::Incompatible { .. } => "Incompatible",
            Self::Ready { .. } => "Ready",
            Self::Rejected { .. } => "Rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready { .. } | Self::Rejected { .. })
    }

    /// Unopened -> Validating
    pub fn begin_validation(self, stored: u32) -> StoreResult<Self> {
        match self {
            Self::Unopened => Ok(Self::Validating { stored }),
            _ => Err(StoreError::forbidden_transition(self.state_name(), "Validating")),
        }
    }

    /// Validating -> Current | NeedsMigration | Incompatible
    pub fn classify(self, supported: u32, migrations: &MigrationTable) -> StoreResult<Self> {
        let stored = match self {
            Self::Validating { stored } => stored,
            _ => {
                return Err(StoreError::forbidden_transition(
                    self.state_name(),
                    "Current|NeedsMigration|Incompatible",
                ))
            }
        };

        if stored == supported {
            Ok(Self::Current { version: stored })
        } else if stored < supported && stored > 0 && migrations.chain(stored, supported).is_some() {
            Ok(Self::NeedsMigration {
                from: stored,
                to: supported,
            })
        } else {
            Ok(Self::Incompatible { stored, supported })
        }
    }

    /// Current -> Ready, or NeedsMigration -> Ready at `version`.
    ///
    /// `version` is the version the store is served at: the target version
    /// after a rewrite, or the stored version when records are upgraded on
    /// read instead.
    pub fn mark_ready(self, version: u32) -> StoreResult<Self> {
        match self {
            Self::Current { version: current } if current == version => {
                Ok(Self::Ready { version })
            }
            Self::NeedsMigration { from, to } if version == from || version == to => {
                Ok(Self::Ready { version })
            }
            _ => Err(StoreError::forbidden_transition(self.state_name(), "Ready")),
        }
    }

    /// Incompatible -> Rejected, or NeedsMigration -> Rejected on a failed
    /// migration.
    pub fn reject(self) -> StoreResult<Self> {
        match self {
            Self::Incompatible { stored, supported } => Ok(Self::Rejected { stored, supported }),
            Self::NeedsMigration { from, to } => Ok(Self::Rejected {
                stored: from,
                supported: to,
            }),
            _ => Err(StoreError::forbidden_transition(self.state_name(), "Rejected")),
        }
    }
}

/// Drives a `VersionState` and records every state it passes through.
#[derive(Debug, Clone)]
pub struct SchemaVersionManager {
    supported: u32,
    state: VersionState,
    history: Vec<VersionState>,
}

impl SchemaVersionManager {
    pub fn new(supported: u32) -> Self {
        Self {
            supported,
            state: VersionState::Unopened,
            history: vec![VersionState::Unopened],
        }
    }

    pub fn supported_version(&self) -> u32 {
        self.supported
    }

    pub fn state(&self) -> VersionState {
        self.state
    }

    /// States visited so far, oldest first
    pub fn history(&self) -> &[VersionState] {
        &self.history
    }

    fn advance(&mut self, next: VersionState) {
        self.state = next;
        self.history.push(next);
    }

    /// Validates the stored version.
    ///
    /// Returns `Current` or `NeedsMigration`. An incompatible version is
    /// rejected here and reported as `UnsupportedSchema`.
    pub fn validate(&mut self, stored: u32, migrations: &MigrationTable) -> StoreResult<VersionState> {
        let validating = self.state.begin_validation(stored)?;
        self.advance(validating);

        let classified = validating.classify(self.supported, migrations)?;
        self.advance(classified);

        if let VersionState::Incompatible { stored, supported } = classified {
            let rejected = classified.reject()?;
            self.advance(rejected);
            let reason = if stored > supported {
                "store was written by a newer schema"
            } else {
                "no migration path to the supported version"
            };
            return Err(StoreError::unsupported_schema(stored, supported, reason));
        }

        Ok(classified)
    }

    /// Marks the store as ready to serve at `version`.
    pub fn mark_ready(&mut self, version: u32) -> StoreResult<()> {
        let ready = self.state.mark_ready(version)?;
        self.advance(ready);
        Ok(())
    }

    /// Rejects the store after a failed migration.
    pub fn reject(&mut self) -> StoreResult<()> {
        let rejected = self.state.reject()?;
        self.advance(rejected);
        Ok(())
    }
}
