//! Domain newtypes
//!
//! Strongly-typed wrappers for identifiers shared across the engine.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// ConfigId
// ============================================================================

/// Identifier of a sync configuration
///
/// Assigned by the external configuration store; the engine only uses it
/// as an opaque key for the registry, the coordinator, and status events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigId(u64);

impl ConfigId {
    /// Wrap a raw identifier
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw identifier
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl Display for ConfigId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConfigId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|e| DomainError::ValidationFailed(format!("Invalid config id '{s}': {e}")))
    }
}

impl From<u64> for ConfigId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}
