//! Stable entity references
//!
//! A token keeps pointing at an entity while the entity migrates between
//! groups, and fails to resolve once the entity is removed. The generation
//! counter prevents a recycled slot from answering for a dead entity.

use crate::entity::EntityKey;
use crate::error::ResolveError;
use std::collections::HashMap;

/// Opaque entity reference (generation-indexed for safety)
///
/// Format: [32-bit version | 32-bit slot]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct EntityToken {
    slot: u32,
    version: u32,
}

impl EntityToken {
    /// Serialize to 64-bit integer (save files, cross-system handles)
    pub fn to_bits(&self) -> u64 {
        ((self.version as u64) << 32) | (self.slot as u64)
    }

    /// Deserialize from 64-bit integer
    pub fn from_bits(bits: u64) -> Self {
        Self {
            slot: bits as u32,
            version: (bits >> 32) as u32,
        }
    }
}

// Sentinel for a claimed slot with no entity attached yet. Live entities
// never use the reserved group, so this cannot collide with a real key.
const UNBOUND: u64 = u64::MAX;

struct Slot {
    version: u32,
    key: u64,
}

/// Token table: slot array with a free list, plus the key -> slot reverse
/// map the coordinator uses to repoint and invalidate during drains.
pub(crate) struct EntityLocator {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_key: HashMap<u64, u32>,
}

impl EntityLocator {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_key: HashMap::new(),
        }
    }

    /// Reserve a token without attaching it to an entity.
    pub fn claim(&mut self) -> EntityToken {
        if let Some(slot) = self.free.pop() {
            EntityToken {
                slot,
                version: self.slots[slot as usize].version,
            }
        } else {
            let slot = self.slots.len() as u32;
            self.slots.push(Slot {
                version: 0,
                key: UNBOUND,
            });
            EntityToken { slot, version: 0 }
        }
    }

    /// Attach a claimed token to a live entity.
    pub fn bind(&mut self, token: EntityToken, key: EntityKey) {
        let slot = &mut self.slots[token.slot as usize];
        debug_assert_eq!(slot.version, token.version, "binding through a stale token");
        debug_assert_eq!(slot.key, UNBOUND, "token already bound");
        slot.key = key.to_bits();
        self.by_key.insert(key.to_bits(), token.slot);
    }

    /// Claim and bind in one step, for entities that just became live.
    pub fn track(&mut self, key: EntityKey) -> EntityToken {
        let token = self.claim();
        self.bind(token, key);
        token
    }

    /// Follow an entity to its new location. No-op for untracked keys.
    pub fn repoint(&mut self, from: EntityKey, to: EntityKey) {
        if let Some(slot_index) = self.by_key.remove(&from.to_bits()) {
            self.slots[slot_index as usize].key = to.to_bits();
            self.by_key.insert(to.to_bits(), slot_index);
        }
    }

    /// Retire the token of a removed entity. Resolutions through it fail
    /// with `Expired` from here on.
    pub fn invalidate(&mut self, key: EntityKey) {
        if let Some(slot_index) = self.by_key.remove(&key.to_bits()) {
            let slot = &mut self.slots[slot_index as usize];
            slot.version = slot.version.wrapping_add(1);
            slot.key = UNBOUND;
            self.free.push(slot_index);
        }
    }

    pub fn resolve(&self, token: EntityToken) -> Result<EntityKey, ResolveError> {
        let slot = self
            .slots
            .get(token.slot as usize)
            .ok_or(ResolveError::Expired)?;
        if slot.version != token.version {
            return Err(ResolveError::Expired);
        }
        if slot.key == UNBOUND {
            return Err(ResolveError::Unbound);
        }
        Ok(EntityKey::from_bits(slot.key))
    }

    pub fn token_of(&self, key: EntityKey) -> Option<EntityToken> {
        let &slot = self.by_key.get(&key.to_bits())?;
        Some(EntityToken {
            slot,
            version: self.slots[slot as usize].version,
        })
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.by_key.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::key;

    #[test]
    fn tokens_follow_moves() {
        let mut locator = EntityLocator::new();
        let token = locator.track(key(5, 1));
        assert_eq!(locator.resolve(token), Ok(key(5, 1)));

        locator.repoint(key(5, 1), key(5, 2));
        assert_eq!(locator.resolve(token), Ok(key(5, 2)));
        assert_eq!(locator.token_of(key(5, 2)), Some(token));
        assert_eq!(locator.token_of(key(5, 1)), None);
    }

    #[test]
    fn removal_expires_the_token() {
        let mut locator = EntityLocator::new();
        let token = locator.track(key(5, 1));
        locator.invalidate(key(5, 1));
        assert_eq!(locator.resolve(token), Err(ResolveError::Expired));
    }

    #[test]
    fn claimed_but_never_bound_is_a_distinct_failure() {
        let mut locator = EntityLocator::new();
        let token = locator.claim();
        assert_eq!(locator.resolve(token), Err(ResolveError::Unbound));
    }

    #[test]
    fn recycled_slot_does_not_answer_for_the_dead() {
        let mut locator = EntityLocator::new();
        let old = locator.track(key(1, 1));
        locator.invalidate(key(1, 1));

        let new = locator.track(key(2, 1));
        // same slot, bumped version
        assert_eq!(locator.resolve(new), Ok(key(2, 1)));
        assert_eq!(locator.resolve(old), Err(ResolveError::Expired));
    }

    #[test]
    fn token_bits_round_trip() {
        let mut locator = EntityLocator::new();
        let token = locator.track(key(7, 3));
        let restored = EntityToken::from_bits(token.to_bits());
        assert_eq!(locator.resolve(restored), Ok(key(7, 3)));
    }
}
