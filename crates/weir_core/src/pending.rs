//! Staged entity builds
//!
//! Component values for entities under construction accumulate here, bucketed
//! by destination group and component type, and move wholesale into live
//! storage when the coordinator flushes. Buckets are dense stores themselves,
//! so the flush is a straight columnar append.

use crate::component::{Component, ComponentInfo, ComponentTypeId};
use crate::entity::{EntityId, EntityKey, GroupId};
use crate::error::UsageError;
use crate::storage::{DenseStore, ErasedStore};
use std::collections::{HashMap, HashSet};
use std::mem;

#[derive(Default)]
pub(crate) struct GroupBucket {
    pub stores: HashMap<ComponentTypeId, Box<dyn ErasedStore>>,
    pub members: HashSet<EntityId>,
}

/// One staging window of queued builds.
///
/// Nominally `pub` because `ComponentSet::stage` names it in a public
/// signature; the private module keeps it unreachable outside the crate.
#[derive(Default)]
pub struct PendingFrame {
    pub(crate) buckets: HashMap<GroupId, GroupBucket>,
}

impl PendingFrame {
    /// Reserve an entity slot in its destination bucket. Two builds of the
    /// same key in one window collide here.
    pub fn admit(&mut self, key: EntityKey) -> Result<(), UsageError> {
        let bucket = self.buckets.entry(key.group).or_default();
        if !bucket.members.insert(key.id) {
            return Err(UsageError::DuplicateEntity(key));
        }
        Ok(())
    }

    pub fn contains(&self, key: EntityKey) -> bool {
        self.buckets
            .get(&key.group)
            .map_or(false, |bucket| bucket.members.contains(&key.id))
    }

    pub fn stage_value<T: Component>(
        &mut self,
        info: &ComponentInfo,
        key: EntityKey,
        value: T,
    ) -> Result<(), UsageError> {
        let bucket = self.buckets.entry(key.group).or_default();
        let store = bucket
            .stores
            .entry(info.id())
            .or_insert_with(|| info.new_store());
        store
            .as_any_mut()
            .downcast_mut::<DenseStore<T>>()
            .expect("pending bucket holds a different component type")
            .add(key.id, value)
            .map(|_| ())
            .map_err(|_| UsageError::DuplicateComponent {
                key,
                component: info.name(),
            })
    }

    /// Staged value of one component for one pending entity, for composer
    /// writes between build and submit.
    pub fn staged_value_mut<T: Component>(
        &mut self,
        type_id: ComponentTypeId,
        key: EntityKey,
    ) -> Option<&mut T> {
        let bucket = self.buckets.get_mut(&key.group)?;
        let store = bucket
            .stores
            .get_mut(&type_id)?
            .as_any_mut()
            .downcast_mut::<DenseStore<T>>()
            .expect("pending bucket holds a different component type");
        store.get_mut(key.id).ok()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(|bucket| bucket.members.is_empty())
    }

    pub fn staged_count(&self) -> usize {
        self.buckets.values().map(|bucket| bucket.members.len()).sum()
    }

    /// Empty every bucket but keep the stores, so steady-state churn stops
    /// allocating after the first few windows.
    pub fn clear(&mut self) {
        for bucket in self.buckets.values_mut() {
            bucket.members.clear();
            for store in bucket.stores.values_mut() {
                store.clear_keep_capacity();
            }
        }
    }
}

/// Double-buffered staging, swapped at the flush step of each iteration.
pub(crate) struct PendingAdds {
    staged: PendingFrame,
    draining: PendingFrame,
}

impl PendingAdds {
    pub fn new() -> Self {
        Self {
            staged: PendingFrame::default(),
            draining: PendingFrame::default(),
        }
    }

    pub fn staged(&self) -> &PendingFrame {
        &self.staged
    }

    pub fn staged_mut(&mut self) -> &mut PendingFrame {
        &mut self.staged
    }

    pub fn has_staged(&self) -> bool {
        !self.staged.is_empty()
    }

    pub fn swap_frames(&mut self) {
        debug_assert!(self.draining.is_empty(), "previous flush left residue");
        mem::swap(&mut self.staged, &mut self.draining);
    }

    pub fn take_draining(&mut self) -> PendingFrame {
        mem::take(&mut self.draining)
    }

    pub fn recycle(&mut self, mut frame: PendingFrame) {
        frame.clear();
        self.draining = frame;
    }
}
