//! Structural event dispatch
//!
//! Consumers subscribe to the structural changes of one component type and
//! are invoked while the coordinator drains its queues. The event set is
//! closed: add, remove, swap, dispose. Within one component type, reactors
//! fire in registration order.

use crate::component::{Component, ComponentTypeId};
use crate::deferred::DeferredOps;
use crate::entity::{EntityId, EntityKey, GroupId};
use std::any::Any;
use std::collections::HashMap;

/// The structural changes a reactor can observe.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Add,
    Remove,
    Swap,
    Dispose,
}

/// Set of event kinds a subscription listens for.
///
/// Compose with `|`: `EventMask::ADD | EventMask::REMOVE`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EventMask(u8);

impl EventMask {
    pub const ADD: EventMask = EventMask(1 << 0);
    pub const REMOVE: EventMask = EventMask(1 << 1);
    pub const SWAP: EventMask = EventMask(1 << 2);
    pub const DISPOSE: EventMask = EventMask(1 << 3);
    pub const ALL: EventMask = EventMask(0b1111);

    pub fn contains(&self, kind: EventKind) -> bool {
        self.0 & EventMask::from(kind).0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl From<EventKind> for EventMask {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Add => Self::ADD,
            EventKind::Remove => Self::REMOVE,
            EventKind::Swap => Self::SWAP,
            EventKind::Dispose => Self::DISPOSE,
        }
    }
}

impl std::ops::BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

/// One entity's structural change, delivered per entity.
///
/// The payload reference is live storage. For `Removed` the value is still
/// readable and writable; it leaves the partition when the callback returns.
pub enum EntityEvent<'a, T> {
    Added { value: &'a mut T, key: EntityKey },
    Removed { value: &'a mut T, key: EntityKey },
    Swapped { value: &'a mut T, from: EntityKey, to: EntityKey },
    Disposed { value: &'a mut T, key: EntityKey },
}

impl<T> EntityEvent<'_, T> {
    pub fn kind(&self) -> EventKind {
        match self {
            EntityEvent::Added { .. } => EventKind::Add,
            EntityEvent::Removed { .. } => EventKind::Remove,
            EntityEvent::Swapped { .. } => EventKind::Swap,
            EntityEvent::Disposed { .. } => EventKind::Dispose,
        }
    }
}

/// A batch of structural changes, delivered once per affected range.
///
/// `values` and `ids` are parallel slices over contiguous storage. For
/// `Removed` they cover the evicted tail; those values are gone after the
/// callback returns.
pub enum RangeEvent<'a, T> {
    Added {
        values: &'a mut [T],
        ids: &'a [EntityId],
        group: GroupId,
    },
    Removed {
        values: &'a mut [T],
        ids: &'a [EntityId],
        group: GroupId,
    },
    Swapped {
        values: &'a mut [T],
        ids: &'a [EntityId],
        from: GroupId,
        to: GroupId,
    },
    Disposed {
        values: &'a mut [T],
        ids: &'a [EntityId],
        group: GroupId,
    },
}

impl<T> RangeEvent<'_, T> {
    pub fn kind(&self) -> EventKind {
        match self {
            RangeEvent::Added { .. } => EventKind::Add,
            RangeEvent::Removed { .. } => EventKind::Remove,
            RangeEvent::Swapped { .. } => EventKind::Swap,
            RangeEvent::Disposed { .. } => EventKind::Dispose,
        }
    }
}

/// Per-entity reactor. `ops` accepts further structural requests; they join
/// the staged queues and drain in a later iteration of the same submission.
pub trait EntityReactor<T: Component>: 'static {
    fn react(&mut self, event: EntityEvent<'_, T>, ops: &mut DeferredOps<'_>)
        -> anyhow::Result<()>;
}

/// Batched reactor. One call covers a contiguous run of entities, which
/// keeps per-entity overhead out of bulk operations.
pub trait RangeReactor<T: Component>: 'static {
    fn react(&mut self, event: RangeEvent<'_, T>, ops: &mut DeferredOps<'_>)
        -> anyhow::Result<()>;
}

/// Hook on submission boundaries, for frame bookkeeping outside any one
/// component type.
pub trait TickObserver: 'static {
    fn submission_started(&mut self, _tick: u64) {}
    fn submission_completed(&mut self, _tick: u64) {}
}

/// Subscriptions for one component type, in registration order.
pub(crate) struct ReactorTable<T: Component> {
    pub(crate) entity: Vec<(EventMask, Box<dyn EntityReactor<T>>)>,
    pub(crate) range: Vec<(EventMask, Box<dyn RangeReactor<T>>)>,
}

impl<T: Component> ReactorTable<T> {
    fn new() -> Self {
        Self {
            entity: Vec::new(),
            range: Vec::new(),
        }
    }
}

/// All subscriptions of a world, keyed by component type id. Tables are
/// type-erased here and recovered by the stores at dispatch time.
pub(crate) struct ReactorRegistry {
    tables: HashMap<ComponentTypeId, Box<dyn Any>>,
    observers: Vec<Box<dyn TickObserver>>,
    registered: usize,
}

impl ReactorRegistry {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
            observers: Vec::new(),
            registered: 0,
        }
    }

    pub fn subscribe_entity<T: Component>(
        &mut self,
        id: ComponentTypeId,
        mask: EventMask,
        reactor: impl EntityReactor<T>,
    ) {
        self.table_entry::<T>(id).entity.push((mask, Box::new(reactor)));
        self.registered += 1;
    }

    pub fn subscribe_range<T: Component>(
        &mut self,
        id: ComponentTypeId,
        mask: EventMask,
        reactor: impl RangeReactor<T>,
    ) {
        self.table_entry::<T>(id).range.push((mask, Box::new(reactor)));
        self.registered += 1;
    }

    pub fn observe(&mut self, observer: impl TickObserver) {
        self.observers.push(Box::new(observer));
    }

    /// Table for a component type, if anything ever subscribed to it.
    pub fn table_mut<T: Component>(
        &mut self,
        id: ComponentTypeId,
    ) -> Option<&mut ReactorTable<T>> {
        let table = self.tables.get_mut(&id)?;
        Some(
            table
                .downcast_mut::<ReactorTable<T>>()
                .expect("reactor table registered under a different component type"),
        )
    }

    fn table_entry<T: Component>(&mut self, id: ComponentTypeId) -> &mut ReactorTable<T> {
        self.tables
            .entry(id)
            .or_insert_with(|| Box::new(ReactorTable::<T>::new()))
            .downcast_mut::<ReactorTable<T>>()
            .expect("reactor table registered under a different component type")
    }

    pub fn notify_started(&mut self, tick: u64) {
        for observer in self.observers.iter_mut() {
            observer.submission_started(tick);
        }
    }

    pub fn notify_completed(&mut self, tick: u64) {
        for observer in self.observers.iter_mut() {
            observer.submission_completed(tick);
        }
    }

    pub fn reactor_count(&self) -> usize {
        self.registered
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Health(#[allow(dead_code)] u32);
    impl Component for Health {}

    struct Armor(#[allow(dead_code)] u32);
    impl Component for Armor {}

    struct Quiet;
    impl EntityReactor<Health> for Quiet {
        fn react(
            &mut self,
            _event: EntityEvent<'_, Health>,
            _ops: &mut DeferredOps<'_>,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }
    impl RangeReactor<Health> for Quiet {
        fn react(
            &mut self,
            _event: RangeEvent<'_, Health>,
            _ops: &mut DeferredOps<'_>,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn mask_algebra() {
        let mask = EventMask::ADD | EventMask::REMOVE;
        assert!(mask.contains(EventKind::Add));
        assert!(mask.contains(EventKind::Remove));
        assert!(!mask.contains(EventKind::Swap));

        for kind in [
            EventKind::Add,
            EventKind::Remove,
            EventKind::Swap,
            EventKind::Dispose,
        ] {
            assert!(EventMask::ALL.contains(kind));
            assert!(!EventMask::from(kind).is_empty());
        }
    }

    #[test]
    fn tables_key_by_component_id() {
        let mut registry = ReactorRegistry::new();
        registry.subscribe_entity::<Health>(ComponentTypeId(0), EventMask::ADD, Quiet);
        registry.subscribe_range::<Health>(ComponentTypeId(0), EventMask::REMOVE, Quiet);

        let table = registry
            .table_mut::<Health>(ComponentTypeId(0))
            .unwrap();
        assert_eq!(table.entity.len(), 1);
        assert_eq!(table.range.len(), 1);

        assert!(registry.table_mut::<Armor>(ComponentTypeId(1)).is_none());
        assert_eq!(registry.reactor_count(), 2);
    }

    #[test]
    fn registration_order_is_preserved() {
        let mut registry = ReactorRegistry::new();
        registry.subscribe_entity::<Health>(ComponentTypeId(0), EventMask::ADD, Quiet);
        registry.subscribe_entity::<Health>(ComponentTypeId(0), EventMask::REMOVE, Quiet);

        let table = registry.table_mut::<Health>(ComponentTypeId(0)).unwrap();
        assert_eq!(table.entity[0].0, EventMask::ADD);
        assert_eq!(table.entity[1].0, EventMask::REMOVE);
    }

    #[test]
    fn observers_hear_both_edges() {
        struct Edges(Rc<RefCell<Vec<(&'static str, u64)>>>);
        impl TickObserver for Edges {
            fn submission_started(&mut self, tick: u64) {
                self.0.borrow_mut().push(("start", tick));
            }
            fn submission_completed(&mut self, tick: u64) {
                self.0.borrow_mut().push(("end", tick));
            }
        }

        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ReactorRegistry::new();
        registry.observe(Edges(log.clone()));

        registry.notify_started(3);
        registry.notify_completed(3);
        assert_eq!(*log.borrow(), vec![("start", 3), ("end", 3)]);
        assert_eq!(registry.observer_count(), 1);
    }
}
