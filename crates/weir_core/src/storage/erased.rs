// erased.rs - type-erased store surface used by the group directory

use crate::component::{Component, ComponentTypeId};
use crate::deferred::DeferredOps;
use crate::entity::{EntityId, EntityKey, GroupId};
use crate::reactor::{EntityEvent, EventKind, RangeEvent, ReactorRegistry};
use crate::storage::dense::{DenseStore, StoreError, SwapBackLog};
use std::any::Any;
use std::ops::Range;

/// Failure inside a removal drain.
pub(crate) enum DrainError {
    Store(StoreError),
    Consumer(anyhow::Error),
}

/// What the submission machinery needs from a store without knowing its
/// payload type. The typed half of each operation lives in the
/// `DenseStore<T>` impl below, which recovers `T` and reaches the matching
/// dispatch table.
pub(crate) trait ErasedStore: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn component_id(&self) -> ComponentTypeId;
    fn component_name(&self) -> &'static str;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool;
    fn contains(&self, id: EntityId) -> bool;
    fn entity_ids(&self) -> &[EntityId];
    fn reserve_extra(&mut self, additional: usize);
    fn clear_keep_capacity(&mut self);

    /// Fresh empty store of the same component type and strategy.
    fn spawn_empty(&self) -> Box<dyn ErasedStore>;

    /// Move all live entities of `src` (same component type) onto this
    /// store, preserving `src`'s dense order.
    fn absorb(&mut self, src: &mut dyn ErasedStore) -> Result<Range<usize>, StoreError>;

    /// Migrate one entity into `dst` (same component type). On a duplicate
    /// in `dst` the tick fails and the value is gone with it; nothing is
    /// rolled back.
    fn transplant(
        &mut self,
        dst: &mut dyn ErasedStore,
        from: EntityId,
        to: EntityId,
        log: &mut SwapBackLog,
    ) -> Result<u32, StoreError>;

    /// Add callbacks over a freshly appended range: range style first, then
    /// legacy per entity.
    fn dispatch_added(
        &mut self,
        group: GroupId,
        range: Range<usize>,
        reactors: &mut ReactorRegistry,
        ops: &mut DeferredOps<'_>,
    ) -> Result<(), anyhow::Error>;

    /// Swap callbacks over a range appended by migration. `from_ids` is
    /// parallel to the range and carries each entity's id in the origin
    /// group.
    fn dispatch_swapped(
        &mut self,
        from_group: GroupId,
        to_group: GroupId,
        range: Range<usize>,
        from_ids: &[EntityId],
        reactors: &mut ReactorRegistry,
        ops: &mut DeferredOps<'_>,
    ) -> Result<(), anyhow::Error>;

    /// Interleaved removal drain: per victim, legacy remove callbacks fire
    /// while the value is still live, then the physical swap-back removal
    /// runs; afterwards range callbacks cover the parked tail.
    fn drain_removals(
        &mut self,
        group: GroupId,
        victims: &[EntityId],
        reactors: &mut ReactorRegistry,
        ops: &mut DeferredOps<'_>,
    ) -> Result<(), DrainError>;

    /// Whole-group teardown: remove callbacks over every live entity, then
    /// clear the contents in place.
    fn drain_group_removal(
        &mut self,
        group: GroupId,
        reactors: &mut ReactorRegistry,
        ops: &mut DeferredOps<'_>,
    ) -> Result<(), anyhow::Error>;

    /// Dispose callbacks over every live entity. Contents are left intact;
    /// the world tears storage down afterwards.
    fn dispatch_disposed(
        &mut self,
        group: GroupId,
        reactors: &mut ReactorRegistry,
        ops: &mut DeferredOps<'_>,
    ) -> Result<(), anyhow::Error>;
}

impl<T: Component> ErasedStore for DenseStore<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn component_id(&self) -> ComponentTypeId {
        DenseStore::component_id(self)
    }

    fn component_name(&self) -> &'static str {
        DenseStore::component_name(self)
    }

    fn len(&self) -> usize {
        DenseStore::len(self)
    }

    fn is_empty(&self) -> bool {
        DenseStore::is_empty(self)
    }

    fn contains(&self, id: EntityId) -> bool {
        DenseStore::contains(self, id)
    }

    fn entity_ids(&self) -> &[EntityId] {
        DenseStore::entity_ids(self)
    }

    fn reserve_extra(&mut self, additional: usize) {
        DenseStore::reserve_extra(self, additional);
    }

    fn clear_keep_capacity(&mut self) {
        DenseStore::clear_keep_capacity(self);
    }

    fn spawn_empty(&self) -> Box<dyn ErasedStore> {
        Box::new(self.spawn_empty_boxed())
    }

    fn absorb(&mut self, src: &mut dyn ErasedStore) -> Result<Range<usize>, StoreError> {
        let src = src
            .as_any_mut()
            .downcast_mut::<DenseStore<T>>()
            .expect("absorb between stores of different component types");
        DenseStore::absorb(self, src)
    }

    fn transplant(
        &mut self,
        dst: &mut dyn ErasedStore,
        from: EntityId,
        to: EntityId,
        log: &mut SwapBackLog,
    ) -> Result<u32, StoreError> {
        let dst = dst
            .as_any_mut()
            .downcast_mut::<DenseStore<T>>()
            .expect("transplant between stores of different component types");
        let value = self.take(from, log)?;
        dst.add(to, value)
    }

    fn dispatch_added(
        &mut self,
        group: GroupId,
        range: Range<usize>,
        reactors: &mut ReactorRegistry,
        ops: &mut DeferredOps<'_>,
    ) -> Result<(), anyhow::Error> {
        let Some(table) = reactors.table_mut::<T>(self.component_id()) else {
            return Ok(());
        };

        for (mask, reactor) in table.range.iter_mut() {
            if mask.contains(EventKind::Add) {
                let (values, ids) = self.range_slices(range.clone());
                reactor.react(RangeEvent::Added { values, ids, group }, ops)?;
            }
        }

        for index in range {
            let key = EntityKey::new(self.id_at(index), group);
            for (mask, reactor) in table.entity.iter_mut() {
                if mask.contains(EventKind::Add) {
                    let value = self.value_at_mut(index);
                    reactor.react(EntityEvent::Added { value, key }, ops)?;
                }
            }
        }
        Ok(())
    }

    fn dispatch_swapped(
        &mut self,
        from_group: GroupId,
        to_group: GroupId,
        range: Range<usize>,
        from_ids: &[EntityId],
        reactors: &mut ReactorRegistry,
        ops: &mut DeferredOps<'_>,
    ) -> Result<(), anyhow::Error> {
        debug_assert_eq!(range.len(), from_ids.len(), "swap id column diverged");
        let Some(table) = reactors.table_mut::<T>(self.component_id()) else {
            return Ok(());
        };

        for (mask, reactor) in table.range.iter_mut() {
            if mask.contains(EventKind::Swap) {
                let (values, ids) = self.range_slices(range.clone());
                reactor.react(
                    RangeEvent::Swapped {
                        values,
                        ids,
                        from: from_group,
                        to: to_group,
                    },
                    ops,
                )?;
            }
        }

        for (offset, index) in range.enumerate() {
            let from = EntityKey::new(from_ids[offset], from_group);
            let to = EntityKey::new(self.id_at(index), to_group);
            for (mask, reactor) in table.entity.iter_mut() {
                if mask.contains(EventKind::Swap) {
                    let value = self.value_at_mut(index);
                    reactor.react(EntityEvent::Swapped { value, from, to }, ops)?;
                }
            }
        }
        Ok(())
    }

    fn drain_removals(
        &mut self,
        group: GroupId,
        victims: &[EntityId],
        reactors: &mut ReactorRegistry,
        ops: &mut DeferredOps<'_>,
    ) -> Result<(), DrainError> {
        // Capture dense slots up front; swap-back corrections repair the
        // captured indices as earlier removals shuffle the tail.
        let mut slots = Vec::with_capacity(victims.len());
        for &id in victims {
            let index = self
                .index_of(id)
                .ok_or(DrainError::Store(StoreError::NotFound { id }))?;
            slots.push((id, index));
        }

        let mut log = SwapBackLog::new();
        let mut table = reactors.table_mut::<T>(self.component_id());
        let mut removed = 0usize;

        for (id, captured) in slots {
            let index = log.corrected(id).unwrap_or(captured) as usize;
            debug_assert_eq!(
                self.index_of(id),
                Some(index as u32),
                "swap-back correction diverged from sparse index"
            );

            if let Some(ref mut table) = table {
                let key = EntityKey::new(id, group);
                for (mask, reactor) in table.entity.iter_mut() {
                    if mask.contains(EventKind::Remove) {
                        let value = self.value_at_mut(index);
                        reactor
                            .react(EntityEvent::Removed { value, key }, ops)
                            .map_err(DrainError::Consumer)?;
                    }
                }
            }

            self.remove(id, &mut log).map_err(DrainError::Store)?;
            removed += 1;
        }

        if removed > 0 {
            if let Some(ref mut table) = table {
                for (mask, reactor) in table.range.iter_mut() {
                    if mask.contains(EventKind::Remove) {
                        let (values, ids) = self.tail_slices(removed);
                        reactor
                            .react(RangeEvent::Removed { values, ids, group }, ops)
                            .map_err(DrainError::Consumer)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn drain_group_removal(
        &mut self,
        group: GroupId,
        reactors: &mut ReactorRegistry,
        ops: &mut DeferredOps<'_>,
    ) -> Result<(), anyhow::Error> {
        let count = DenseStore::len(self);
        if let Some(table) = reactors.table_mut::<T>(self.component_id()) {
            for index in 0..count {
                let key = EntityKey::new(self.id_at(index), group);
                for (mask, reactor) in table.entity.iter_mut() {
                    if mask.contains(EventKind::Remove) {
                        let value = self.value_at_mut(index);
                        reactor.react(EntityEvent::Removed { value, key }, ops)?;
                    }
                }
            }

            for (mask, reactor) in table.range.iter_mut() {
                if mask.contains(EventKind::Remove) {
                    let (values, ids) = self.range_slices(0..count);
                    reactor.react(RangeEvent::Removed { values, ids, group }, ops)?;
                }
            }
        }
        self.clear_keep_capacity();
        Ok(())
    }

    fn dispatch_disposed(
        &mut self,
        group: GroupId,
        reactors: &mut ReactorRegistry,
        ops: &mut DeferredOps<'_>,
    ) -> Result<(), anyhow::Error> {
        let count = DenseStore::len(self);
        let Some(table) = reactors.table_mut::<T>(self.component_id()) else {
            return Ok(());
        };

        for index in 0..count {
            let key = EntityKey::new(self.id_at(index), group);
            for (mask, reactor) in table.entity.iter_mut() {
                if mask.contains(EventKind::Dispose) {
                    let value = self.value_at_mut(index);
                    reactor.react(EntityEvent::Disposed { value, key }, ops)?;
                }
            }
        }

        for (mask, reactor) in table.range.iter_mut() {
            if mask.contains(EventKind::Dispose) {
                let (values, ids) = self.range_slices(0..count);
                reactor.react(RangeEvent::Disposed { values, ids, group }, ops)?;
            }
        }
        Ok(())
    }
}
