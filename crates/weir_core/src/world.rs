//! World: the storage root
//!
//! A world owns one component registry, the grouped component stores, the
//! staged operation queues, the reactor subscriptions, and the token table.
//! Reads and queued writes are available any time; structural changes apply
//! only when `submit` drains the queues. Worlds are single-threaded and
//! fully independent of each other.

use crate::builder::{begin_build, ComponentSet, EntityComposer};
use crate::component::{Component, ComponentRegistry, ComponentTypeId};
use crate::deferred::{DeferredOps, OpLedger};
use crate::entity::{EntityKey, GroupId};
use crate::error::{ResolveError, SubmitError, UsageError};
use crate::group::GroupDirectory;
use crate::locator::{EntityLocator, EntityToken};
use crate::oplog::OperationLog;
use crate::pending::PendingAdds;
use crate::reactor::{EntityReactor, EventMask, RangeReactor, ReactorRegistry, TickObserver};
use crate::storage::DenseStore;
use crate::submit::Phase;
use std::sync::atomic::{AtomicU64, Ordering};
use weir_metrics::Counter;

static NEXT_WORLD_ID: AtomicU64 = AtomicU64::new(1);

pub struct World {
    pub(crate) id: u64,
    pub(crate) registry: ComponentRegistry,
    pub(crate) directory: GroupDirectory,
    pub(crate) pending: PendingAdds,
    pub(crate) oplog: OperationLog,
    pub(crate) reactors: ReactorRegistry,
    pub(crate) locator: EntityLocator,
    pub(crate) ledger: OpLedger,
    pub(crate) phase: Phase,
    pub(crate) submissions: u64,
    pub(crate) counters: Counter,
    pub(crate) disposed: bool,
}

impl World {
    pub fn new() -> Self {
        let id = NEXT_WORLD_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(world = id, "world created");
        Self {
            id,
            registry: ComponentRegistry::new(),
            directory: GroupDirectory::new(),
            pending: PendingAdds::new(),
            oplog: OperationLog::new(),
            reactors: ReactorRegistry::new(),
            locator: EntityLocator::new(),
            ledger: OpLedger::new(),
            phase: Phase::Idle,
            submissions: 0,
            counters: Counter::new(),
            disposed: false,
        }
    }

    /// Process-unique id, used by drivers to refuse a world they did not
    /// start with.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Completed submissions.
    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    pub fn counters(&self) -> &Counter {
        &self.counters
    }

    // ------------------------------------------------------------------
    // registration
    // ------------------------------------------------------------------

    /// Register a component type with the tracked (Vec-backed) strategy.
    pub fn register_component<T: Component>(&mut self) -> Result<ComponentTypeId, UsageError> {
        self.registry.register::<T>()
    }

    /// Register a component type with the raw contiguous-buffer strategy.
    /// Only plain fixed-layout payloads qualify, which the `Pod` bound
    /// enforces at compile time.
    pub fn register_raw_component<T: Component + bytemuck::Pod>(
        &mut self,
    ) -> Result<ComponentTypeId, UsageError> {
        self.registry.register_raw::<T>()
    }

    /// Subscribe a per-entity reactor to the structural events of `T`.
    /// `T` must be registered first.
    pub fn subscribe<T: Component>(
        &mut self,
        mask: EventMask,
        reactor: impl EntityReactor<T>,
    ) -> Result<(), UsageError> {
        let id = self.registry.require::<T>()?.id();
        self.reactors.subscribe_entity::<T>(id, mask, reactor);
        Ok(())
    }

    /// Subscribe a batched reactor to the structural events of `T`.
    pub fn subscribe_ranged<T: Component>(
        &mut self,
        mask: EventMask,
        reactor: impl RangeReactor<T>,
    ) -> Result<(), UsageError> {
        let id = self.registry.require::<T>()?.id();
        self.reactors.subscribe_range::<T>(id, mask, reactor);
        Ok(())
    }

    pub fn observe(&mut self, observer: impl TickObserver) {
        self.reactors.observe(observer);
    }

    // ------------------------------------------------------------------
    // queued structural changes
    // ------------------------------------------------------------------

    /// Queue an entity build. Fails now if the key is live or already
    /// staged; the entity itself materializes at the next submission.
    pub fn build_entity<C: ComponentSet>(
        &mut self,
        key: EntityKey,
        components: C,
    ) -> Result<EntityComposer<'_>, UsageError> {
        if self.directory.entity_exists(key) {
            return Err(UsageError::DuplicateEntity(key));
        }
        begin_build(
            &self.registry,
            self.pending.staged_mut(),
            &mut self.ledger,
            key,
            components,
        )
    }

    #[track_caller]
    pub fn queue_remove(&mut self, key: EntityKey) -> Result<(), UsageError> {
        self.deferred().queue_remove(key)
    }

    #[track_caller]
    pub fn queue_swap(&mut self, key: EntityKey, to: GroupId) -> Result<(), UsageError> {
        self.deferred().queue_swap(key, to)
    }

    #[track_caller]
    pub fn queue_group_remove(&mut self, group: GroupId) -> Result<(), UsageError> {
        self.deferred().queue_group_remove(group)
    }

    #[track_caller]
    pub fn queue_group_swap(&mut self, from: GroupId, to: GroupId) -> Result<(), UsageError> {
        self.deferred().queue_group_swap(from, to)
    }

    fn deferred(&mut self) -> DeferredOps<'_> {
        DeferredOps::new(
            &self.registry,
            self.pending.staged_mut(),
            self.oplog.staged_mut(),
            &mut self.ledger,
        )
    }

    // ------------------------------------------------------------------
    // queries
    // ------------------------------------------------------------------

    /// The `T` store of one group, if it ever materialized.
    pub fn store<T: Component>(&self, group: GroupId) -> Option<&DenseStore<T>> {
        let id = self.registry.id_of::<T>()?;
        self.directory
            .store(group, id)?
            .as_any()
            .downcast_ref::<DenseStore<T>>()
    }

    pub fn store_mut<T: Component>(&mut self, group: GroupId) -> Option<&mut DenseStore<T>> {
        let id = self.registry.id_of::<T>()?;
        self.directory
            .store_mut(group, id)?
            .as_any_mut()
            .downcast_mut::<DenseStore<T>>()
    }

    /// Every group holding a `T` store, in materialization order.
    pub fn stores<T: Component>(&self) -> impl Iterator<Item = (GroupId, &DenseStore<T>)> + '_ {
        let id = self.registry.id_of::<T>();
        let groups: &[GroupId] = id
            .map(|id| self.directory.groups_with(id))
            .unwrap_or(&[]);
        groups.iter().filter_map(move |&group| {
            let store = self.directory.store(group, id?)?;
            Some((group, store.as_any().downcast_ref::<DenseStore<T>>()?))
        })
    }

    /// Live in storage, as of the last submission.
    pub fn entity_exists(&self, key: EntityKey) -> bool {
        self.directory.entity_exists(key)
    }

    /// Staged for the next submission.
    pub fn entity_pending(&self, key: EntityKey) -> bool {
        self.pending.staged().contains(key)
    }

    /// Stable token for a live entity. Pending entities have no token until
    /// their build flushes.
    pub fn token_of(&self, key: EntityKey) -> Option<EntityToken> {
        self.locator.token_of(key)
    }

    pub fn resolve(&self, token: EntityToken) -> Result<EntityKey, ResolveError> {
        self.locator.resolve(token)
    }

    // ------------------------------------------------------------------
    // lifecycle
    // ------------------------------------------------------------------

    /// Tear the world down: fire `Dispose` callbacks for every live entity,
    /// then drop all storage and queues. Idempotent. Dropping a `World`
    /// without calling this skips the callbacks.
    pub fn dispose(&mut self) -> Result<(), SubmitError> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;

        let mut result = Ok(());
        'groups: for group in self.directory.sorted_groups() {
            let Some(mut columns) = self.directory.detach_group(group) else {
                continue;
            };
            for type_id in columns.sorted_type_ids() {
                let store = columns
                    .store_mut(type_id)
                    .expect("type listed by its own column set");
                if store.is_empty() {
                    continue;
                }
                let component = store.component_name();
                let mut ops = DeferredOps::new(
                    &self.registry,
                    self.pending.staged_mut(),
                    self.oplog.staged_mut(),
                    &mut self.ledger,
                );
                if let Err(source) =
                    store.dispatch_disposed(group, &mut self.reactors, &mut ops)
                {
                    result = Err(SubmitError::Consumer {
                        phase: "dispose",
                        component,
                        group,
                        source,
                    });
                    break 'groups;
                }
            }
        }

        self.directory.clear();
        self.pending = PendingAdds::new();
        self.oplog = OperationLog::new();
        self.locator.clear();
        self.ledger.clear_ops();
        self.ledger.clear_builds();
        tracing::info!(world = self.id, "world disposed");
        result
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::key;

    struct Position {
        x: f32,
        y: f32,
    }
    impl Component for Position {}

    struct Velocity {
        dx: f32,
    }
    impl Component for Velocity {}

    #[test]
    fn worlds_get_distinct_ids() {
        let a = World::new();
        let b = World::new();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn built_entities_materialize_on_submit() {
        let mut world = World::new();
        world.register_component::<Position>().unwrap();
        world.register_component::<Velocity>().unwrap();

        world
            .build_entity(
                key(1, 1),
                (Position { x: 1.0, y: 2.0 }, Velocity { dx: 0.5 }),
            )
            .unwrap();

        assert!(world.entity_pending(key(1, 1)));
        assert!(!world.entity_exists(key(1, 1)));

        world.submit().unwrap();

        assert!(!world.entity_pending(key(1, 1)));
        assert!(world.entity_exists(key(1, 1)));

        let store = world.store::<Position>(GroupId(1)).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(crate::entity::EntityId(1)).unwrap().x, 1.0);

        let velocities = world.store::<Velocity>(GroupId(1)).unwrap();
        assert_eq!(velocities.get(crate::entity::EntityId(1)).unwrap().dx, 0.5);
    }

    #[test]
    fn building_a_live_key_fails_eagerly() {
        let mut world = World::new();
        world.register_component::<Position>().unwrap();
        world
            .build_entity(key(1, 1), (Position { x: 0.0, y: 0.0 },))
            .unwrap();
        world.submit().unwrap();

        assert!(matches!(
            world.build_entity(key(1, 1), (Position { x: 0.0, y: 0.0 },)),
            Err(UsageError::DuplicateEntity(_))
        ));
    }

    #[test]
    fn composer_writes_land_in_storage() {
        let mut world = World::new();
        world.register_component::<Position>().unwrap();

        world
            .build_entity(key(2, 1), (Position { x: 0.0, y: 0.0 },))
            .unwrap()
            .set(Position { x: 8.0, y: 9.0 })
            .unwrap();
        world.submit().unwrap();

        let store = world.store::<Position>(GroupId(1)).unwrap();
        let p = store.get(crate::entity::EntityId(2)).unwrap();
        assert_eq!((p.x, p.y), (8.0, 9.0));
    }

    #[test]
    fn subscribing_an_unregistered_type_fails() {
        struct Listener;
        impl EntityReactor<Position> for Listener {
            fn react(
                &mut self,
                _event: crate::reactor::EntityEvent<'_, Position>,
                _ops: &mut DeferredOps<'_>,
            ) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let mut world = World::new();
        assert!(matches!(
            world.subscribe::<Position>(EventMask::ALL, Listener),
            Err(UsageError::UnregisteredComponent(_))
        ));
    }

    #[test]
    fn stores_iterates_every_group_holding_the_type() {
        let mut world = World::new();
        world.register_component::<Position>().unwrap();
        for group in 1..=3u32 {
            world
                .build_entity(key(group, group), (Position { x: 0.0, y: 0.0 },))
                .unwrap();
        }
        world.submit().unwrap();

        let mut groups: Vec<GroupId> = world.stores::<Position>().map(|(g, _)| g).collect();
        groups.sort_unstable();
        assert_eq!(groups, vec![GroupId(1), GroupId(2), GroupId(3)]);
    }

    #[test]
    fn dispose_is_idempotent_and_drops_storage() {
        let mut world = World::new();
        world.register_component::<Position>().unwrap();
        world
            .build_entity(key(1, 1), (Position { x: 0.0, y: 0.0 },))
            .unwrap();
        world.submit().unwrap();

        world.dispose().unwrap();
        assert!(!world.entity_exists(key(1, 1)));
        assert!(world.store::<Position>(GroupId(1)).is_none());
        world.dispose().unwrap();
    }
}
