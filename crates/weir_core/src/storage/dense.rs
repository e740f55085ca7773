// dense.rs - sparse/dense component store with swap-back removal

use crate::component::{Component, ComponentTypeId, StoreKind};
use crate::entity::EntityId;
use crate::storage::buffer::{ComponentBuffer, RawBuffer, TrackedBuffer};
use std::collections::HashMap;
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    DuplicateEntity { id: EntityId },
    NotFound { id: EntityId },
}

/// Transient record of entities relocated by swap-back removal.
///
/// Every removal that backfills its slot from the dense tail records
/// `(moved_id -> new_index)` here so structures holding captured dense
/// indices can correct them mid-drain. The table only means anything within
/// one drain batch; callers clear it between batches.
#[derive(Default)]
pub struct SwapBackLog {
    moves: HashMap<EntityId, u32>,
}

impl SwapBackLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, id: EntityId, index: u32) {
        self.moves.insert(id, index);
    }

    pub(crate) fn forget(&mut self, id: EntityId) {
        self.moves.remove(&id);
    }

    /// Corrected dense index for an entity moved since the batch began.
    pub fn corrected(&self, id: EntityId) -> Option<u32> {
        self.moves.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn clear(&mut self) {
        self.moves.clear();
    }
}

/// Dense column of `T` values for one (group, component type) pair.
///
/// Layout is the classic sparse-set triple: a dense value array with no
/// holes, a parallel dense id array, and a sparse `id -> index` map. Removal
/// swaps the last live slot into the hole, so dense indices are not stable
/// across removals.
///
/// The logical `count` can trail the physical length: removal parks the
/// victim's value past the count instead of dropping it, which keeps the
/// value addressable for removal callbacks until a later add overwrites the
/// slot.
pub struct DenseStore<T: Component> {
    type_id: ComponentTypeId,
    name: &'static str,
    kind: StoreKind,
    sparse: HashMap<EntityId, u32>,
    ids: Vec<EntityId>,
    values: Box<dyn ComponentBuffer<T>>,
    count: usize,
}

impl<T: Component> DenseStore<T> {
    pub(crate) fn new_tracked(type_id: ComponentTypeId, name: &'static str) -> Self {
        Self {
            type_id,
            name,
            kind: StoreKind::Tracked,
            sparse: HashMap::new(),
            ids: Vec::new(),
            values: Box::new(TrackedBuffer::new()),
            count: 0,
        }
    }

    pub(crate) fn with_buffer(
        type_id: ComponentTypeId,
        name: &'static str,
        kind: StoreKind,
        values: Box<dyn ComponentBuffer<T>>,
    ) -> Self {
        Self {
            type_id,
            name,
            kind,
            sparse: HashMap::new(),
            ids: Vec::new(),
            values,
            count: 0,
        }
    }

    #[inline]
    pub fn component_id(&self) -> ComponentTypeId {
        self.type_id
    }

    #[inline]
    pub fn component_name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Number of live entities.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn contains(&self, id: EntityId) -> bool {
        self.sparse.contains_key(&id)
    }

    /// Dense index of `id`, if live. Never fails; prefer this over
    /// [`get`](Self::get) when absence is an expected outcome.
    #[inline]
    pub fn index_of(&self, id: EntityId) -> Option<u32> {
        self.sparse.get(&id).copied()
    }

    pub fn get(&self, id: EntityId) -> Result<&T, StoreError> {
        let index = self.sparse.get(&id).ok_or(StoreError::NotFound { id })?;
        Ok(self.values.get(*index as usize))
    }

    pub fn get_mut(&mut self, id: EntityId) -> Result<&mut T, StoreError> {
        let index = self.sparse.get(&id).ok_or(StoreError::NotFound { id })?;
        Ok(self.values.get_mut(*index as usize))
    }

    /// Live values in dense order.
    pub fn values(&self) -> &[T] {
        &self.values.as_slice()[..self.count]
    }

    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values.as_mut_slice()[..self.count]
    }

    /// Live entity ids, parallel to [`values`](Self::values).
    pub fn entity_ids(&self) -> &[EntityId] {
        &self.ids[..self.count]
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.entity_ids().iter().copied().zip(self.values().iter())
    }

    /// Ensure capacity for `total` live entities.
    pub fn reserve_total(&mut self, total: usize) {
        let extra = total.saturating_sub(self.count);
        self.reserve_extra(extra);
    }

    /// Ensure capacity for `additional` more entities.
    pub fn reserve_extra(&mut self, additional: usize) {
        self.values.reserve(additional);
        self.ids.reserve(additional);
        self.sparse.reserve(additional);
    }

    pub fn capacity(&self) -> usize {
        self.values.capacity()
    }

    /// Insert a value for `id` at the dense end, reusing a parked slot if one
    /// exists.
    pub fn add(&mut self, id: EntityId, value: T) -> Result<u32, StoreError> {
        if self.sparse.contains_key(&id) {
            return Err(StoreError::DuplicateEntity { id });
        }
        debug_assert_eq!(self.ids.len(), self.values.len(), "id column diverged");

        let index = self.count;
        if index < self.ids.len() {
            self.ids[index] = id;
            self.values.set(index, value);
        } else {
            self.ids.push(id);
            self.values.push(value);
        }
        self.sparse.insert(id, index as u32);
        self.count = index + 1;
        Ok(index as u32)
    }

    /// Remove `id` by swapping the last live slot into its place.
    ///
    /// The victim's value is parked at the new count, not dropped, and stays
    /// readable there until a later add overwrites the slot. If another
    /// entity backfilled the hole, the move is recorded in `log`.
    pub fn remove(&mut self, id: EntityId, log: &mut SwapBackLog) -> Result<(), StoreError> {
        let index = self.sparse.remove(&id).ok_or(StoreError::NotFound { id })? as usize;
        log.forget(id);

        let last = self.count - 1;
        if index != last {
            self.values.swap(index, last);
            self.ids.swap(index, last);
            let moved = self.ids[index];
            self.sparse.insert(moved, index as u32);
            log.record(moved, index as u32);
        }
        self.count = last;
        Ok(())
    }

    /// Remove `id` and move its value out, for migration between stores.
    /// Same swap-back bookkeeping as [`remove`](Self::remove), but the value
    /// leaves the buffer instead of parking.
    pub(crate) fn take(&mut self, id: EntityId, log: &mut SwapBackLog) -> Result<T, StoreError> {
        let index = self.sparse.remove(&id).ok_or(StoreError::NotFound { id })? as usize;
        log.forget(id);

        let last = self.count - 1;
        if index != last {
            self.values.swap(index, last);
            self.ids.swap(index, last);
            let moved = self.ids[index];
            self.sparse.insert(moved, index as u32);
            log.record(moved, index as u32);
        }
        let value = self.values.take_at(last);
        self.ids.swap_remove(last);
        self.count = last;
        Ok(value)
    }

    /// Move every live entity of `src` onto the end of this store,
    /// preserving `src`'s dense order. Fails before touching anything if any
    /// incoming id already lives here. `src` is left empty with its capacity
    /// intact.
    pub(crate) fn absorb(&mut self, src: &mut DenseStore<T>) -> Result<Range<usize>, StoreError> {
        for &id in &src.ids[..src.count] {
            if self.sparse.contains_key(&id) {
                return Err(StoreError::DuplicateEntity { id });
            }
        }

        self.trim_tail();
        src.trim_tail();

        let start = self.count;
        let n = src.count;
        self.reserve_extra(n);
        for (k, &id) in src.ids.iter().enumerate() {
            self.sparse.insert(id, (start + k) as u32);
        }
        src.values.move_all(&mut *self.values);
        self.ids.append(&mut src.ids);
        src.sparse.clear();
        src.count = 0;
        self.count = start + n;
        Ok(start..self.count)
    }

    /// Drop parked values past the live count.
    pub(crate) fn trim_tail(&mut self) {
        self.values.truncate(self.count);
        self.ids.truncate(self.count);
    }

    /// Drop all contents, keeping allocations.
    pub(crate) fn clear_keep_capacity(&mut self) {
        self.sparse.clear();
        self.ids.clear();
        self.values.clear();
        self.count = 0;
    }

    /// Mutable view of a live dense range plus its parallel ids.
    pub(crate) fn range_slices(&mut self, range: Range<usize>) -> (&mut [T], &[EntityId]) {
        let values = &mut self.values.as_mut_slice()[range.clone()];
        let ids = &self.ids[range];
        (values, ids)
    }

    /// Parked tail left behind by the last `removed` removals.
    pub(crate) fn tail_slices(&mut self, removed: usize) -> (&mut [T], &[EntityId]) {
        let range = self.count..self.count + removed;
        let values = &mut self.values.as_mut_slice()[range.clone()];
        let ids = &self.ids[range];
        (values, ids)
    }

    pub(crate) fn value_at_mut(&mut self, index: usize) -> &mut T {
        debug_assert!(index < self.count, "index past live count");
        self.values.get_mut(index)
    }

    pub(crate) fn id_at(&self, index: usize) -> EntityId {
        self.ids[index]
    }

    pub(crate) fn spawn_empty_boxed(&self) -> DenseStore<T> {
        DenseStore::with_buffer(self.type_id, self.name, self.kind, self.values.boxed_empty())
    }
}

impl<T: Component> DenseStore<T>
where
    T: bytemuck::Pod,
{
    pub(crate) fn new_raw(type_id: ComponentTypeId, name: &'static str) -> Self {
        Self {
            type_id,
            name,
            kind: StoreKind::Raw,
            sparse: HashMap::new(),
            ids: Vec::new(),
            values: Box::new(RawBuffer::new()),
            count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentTypeId;

    #[derive(Debug, Clone, PartialEq)]
    struct Score(u64);
    impl Component for Score {}

    fn store() -> DenseStore<Score> {
        DenseStore::new_tracked(ComponentTypeId(0), "Score")
    }

    fn filled(ids: &[u32]) -> DenseStore<Score> {
        let mut s = store();
        for &id in ids {
            s.add(EntityId(id), Score(id as u64 * 10)).unwrap();
        }
        s
    }

    #[test]
    fn add_assigns_dense_indices_in_order() {
        let s = filled(&[1, 2, 3]);
        assert_eq!(s.len(), 3);
        assert_eq!(s.index_of(EntityId(2)), Some(1));
        assert_eq!(s.entity_ids(), &[EntityId(1), EntityId(2), EntityId(3)]);
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let mut s = filled(&[1]);
        let err = s.add(EntityId(1), Score(99));
        assert_eq!(err, Err(StoreError::DuplicateEntity { id: EntityId(1) }));
        assert_eq!(s.get(EntityId(1)).unwrap(), &Score(10));
    }

    #[test]
    fn swap_back_removal_keeps_dense_array_hole_free() {
        let mut s = filled(&[1, 2, 3, 4, 5, 6]);
        let mut log = SwapBackLog::new();

        s.remove(EntityId(2), &mut log).unwrap();
        s.remove(EntityId(5), &mut log).unwrap();

        assert_eq!(s.len(), 4);
        assert_eq!(
            s.entity_ids(),
            &[EntityId(1), EntityId(6), EntityId(3), EntityId(4)]
        );
        // every live id agrees with the sparse map
        for (index, &id) in s.entity_ids().iter().enumerate() {
            assert_eq!(s.index_of(id), Some(index as u32));
        }
        // entity 6 backfilled slot 1 and the move was logged
        assert_eq!(log.corrected(EntityId(6)), Some(1));
        assert_eq!(s.get(EntityId(6)).unwrap(), &Score(60));
    }

    #[test]
    fn removed_values_stay_parked_past_the_count() {
        let mut s = filled(&[1, 2, 3]);
        let mut log = SwapBackLog::new();
        s.remove(EntityId(1), &mut log).unwrap();

        let (parked_values, parked_ids) = s.tail_slices(1);
        assert_eq!(parked_values, &[Score(10)]);
        assert_eq!(parked_ids, &[EntityId(1)]);

        // the next add overwrites the parked region
        s.add(EntityId(9), Score(90)).unwrap();
        assert_eq!(s.len(), 3);
        assert_eq!(s.get(EntityId(9)).unwrap(), &Score(90));
    }

    #[test]
    fn take_extracts_the_value_and_backfills() {
        let mut s = filled(&[1, 2, 3]);
        let mut log = SwapBackLog::new();
        let value = s.take(EntityId(1), &mut log).unwrap();
        assert_eq!(value.0, 10);
        assert_eq!(s.len(), 2);
        assert_eq!(s.entity_ids(), &[EntityId(3), EntityId(2)]);
        assert_eq!(log.corrected(EntityId(3)), Some(0));
    }

    #[test]
    fn absorb_appends_in_source_order() {
        let mut dst = filled(&[1, 2]);
        let mut src = filled(&[7, 8, 9]);
        let range = dst.absorb(&mut src).unwrap();
        assert_eq!(range, 2..5);
        assert_eq!(
            dst.entity_ids(),
            &[EntityId(1), EntityId(2), EntityId(7), EntityId(8), EntityId(9)]
        );
        assert!(src.is_empty());
        assert_eq!(dst.get(EntityId(8)).unwrap(), &Score(80));
    }

    #[test]
    fn absorb_with_duplicate_changes_nothing() {
        let mut dst = filled(&[1, 2]);
        let mut src = filled(&[3, 2]);
        let err = dst.absorb(&mut src);
        assert_eq!(err, Err(StoreError::DuplicateEntity { id: EntityId(2) }));
        assert_eq!(dst.len(), 2);
        assert_eq!(src.len(), 2);
        assert_eq!(src.get(EntityId(3)).unwrap(), &Score(30));
    }

    #[test]
    fn remove_missing_fails() {
        let mut s = filled(&[1]);
        let mut log = SwapBackLog::new();
        let err = s.remove(EntityId(4), &mut log);
        assert_eq!(err, Err(StoreError::NotFound { id: EntityId(4) }));
    }

    #[test]
    fn raw_store_round_trip() {
        #[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C)]
        struct Velocity {
            dx: f32,
            dy: f32,
        }
        impl Component for Velocity {}

        let mut s = DenseStore::<Velocity>::new_raw(ComponentTypeId(3), "Velocity");
        let mut log = SwapBackLog::new();
        for n in 0..4 {
            s.add(EntityId(n), Velocity {
                dx: n as f32,
                dy: -(n as f32),
            })
            .unwrap();
        }
        s.remove(EntityId(0), &mut log).unwrap();
        assert_eq!(s.len(), 3);
        assert_eq!(s.entity_ids(), &[EntityId(3), EntityId(1), EntityId(2)]);
        let v = s.get(EntityId(3)).unwrap();
        assert_eq!((v.dx, v.dy), (3.0, -3.0));
        let (parked, _) = s.tail_slices(1);
        assert_eq!(parked, &[Velocity { dx: 0.0, dy: 0.0 }]);
    }
}
