//! Common types for the Relicward environment abstraction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a holder (a player account).
///
/// Uses UUID v4 for global uniqueness without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HolderId(pub Uuid);

impl HolderId {
    /// Creates a new random HolderId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a HolderId from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Creates a deterministic HolderId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for HolderId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for HolderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// A holder identity paired with its display name.
///
/// The id is authoritative; the name is carried for audit lines and
/// notifications only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HolderRef {
    pub id: HolderId,
    pub name: String,
}

impl HolderRef {
    pub fn new(id: HolderId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for HolderRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_holder_id_from_seed_is_stable() {
        assert_eq!(HolderId::from_seed(7), HolderId::from_seed(7));
        assert_ne!(HolderId::from_seed(7), HolderId::from_seed(8));
    }

    #[test]
    fn test_holder_id_display_is_short() {
        let id = HolderId::from_seed(1);
        assert_eq!(id.to_string().len(), 8);
    }
}
