//! Identifier types used throughout the Hearth core.
//!
//! Entity ids are 64-bit snowflakes; see [`crate::IdGenerator`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for an entity.
///
/// `EntityId::UNASSIGNED` (zero) marks an entity that has not been
/// inserted yet; the entity manager assigns a real id on first insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// The id carried by entities that were never inserted.
    pub const UNASSIGNED: Self = Self(0);

    /// Creates an entity ID from a raw value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_raw(&self) -> u64 {
        self.0
    }

    /// Returns true if no id has been assigned yet.
    #[must_use]
    pub const fn is_unassigned(&self) -> bool {
        self.0 == 0
    }

    /// Parses an entity ID from a decimal string.
    pub fn parse(s: &str) -> Result<Self, std::num::ParseIntError> {
        Ok(Self(s.parse()?))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<u64> for EntityId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Grouping key shared by entities of one type that are cached as a unit,
/// e.g. all characters owned by one account.
///
/// Not unique per entity. The fair scheduler also uses it as the owner of
/// write-behind tasks, so writes to one group stay ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyGroup(u64);

impl KeyGroup {
    /// Creates a key group from a raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for KeyGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for KeyGroup {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<EntityId> for KeyGroup {
    /// Types keyed by their own id (one entity per group) use this.
    fn from(id: EntityId) -> Self {
        Self(id.as_raw())
    }
}
