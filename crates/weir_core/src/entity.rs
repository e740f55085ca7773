//! Entity identity types
//!
//! An entity is addressed by a 64-bit key combining a 32-bit entity id with
//! the 32-bit id of the group holding its components. Keys are cheap to copy
//! and hash; all component data lives in the group stores.

use std::fmt;

/// Application-chosen entity id, unique within a group.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Opaque partition id. Groups have no central registry; any value except
/// [`GroupId::INVALID`] is usable.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub u32);

impl GroupId {
    /// Reserved sentinel. Building into or swapping with this group is a
    /// usage error.
    pub const INVALID: GroupId = GroupId(u32::MAX);

    #[inline]
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Full entity address (id within group)
///
/// Format: [32-bit group | 32-bit id]
/// - Id: application-chosen entity id
/// - Group: partition holding the entity's components
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub id: EntityId,
    pub group: GroupId,
}

impl EntityKey {
    pub const fn new(id: EntityId, group: GroupId) -> Self {
        Self { id, group }
    }

    /// Serialize to 64-bit integer (map keys, diagnostics)
    pub fn to_bits(&self) -> u64 {
        ((self.group.0 as u64) << 32) | (self.id.0 as u64)
    }

    /// Deserialize from 64-bit integer
    pub fn from_bits(bits: u64) -> Self {
        Self {
            id: EntityId(bits as u32),
            group: GroupId((bits >> 32) as u32),
        }
    }

    /// Same id, different group. Used when an entity migrates.
    pub fn with_group(&self, group: GroupId) -> Self {
        Self {
            id: self.id,
            group,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.group)
    }
}

/// Shorthand used throughout tests and examples.
pub fn key(id: u32, group: u32) -> EntityKey {
    EntityKey::new(EntityId(id), GroupId(group))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_bits_round_trip() {
        let k = key(5, 7);
        assert_eq!(EntityKey::from_bits(k.to_bits()), k);
        assert_eq!(k.to_bits() >> 32, 7);
        assert_eq!(k.to_bits() & 0xFFFF_FFFF, 5);
    }

    #[test]
    fn invalid_group_is_reserved() {
        assert!(!GroupId::INVALID.is_valid());
        assert!(GroupId(0).is_valid());
        assert!(GroupId(u32::MAX - 1).is_valid());
    }

    #[test]
    fn with_group_keeps_id() {
        let k = key(9, 1).with_group(GroupId(2));
        assert_eq!(k, key(9, 2));
    }
}
