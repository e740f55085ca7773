// component.rs - component trait and per-world type registry

use crate::error::UsageError;
use crate::storage::{DenseStore, ErasedStore};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

/// Marker trait for component payloads. Implement it for any `'static` type
/// you intend to store:
///
/// ```ignore
/// struct Position { x: f32, y: f32 }
/// impl Component for Position {}
/// ```
pub trait Component: 'static {
    /// Diagnostic name. Defaults to the Rust type path.
    fn component_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Numeric component type id, assigned per registry in registration order.
/// Ids from different worlds are unrelated and must not be mixed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(pub u32);

impl fmt::Display for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Which value-buffer strategy a component type's stores use.
///
/// Picked once at registration and fixed for the lifetime of the registry:
/// `Tracked` supports any payload, `Raw` requires `bytemuck::Pod` and moves
/// values by plain copy.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StoreKind {
    Tracked,
    Raw,
}

type StoreFactory = fn(ComponentTypeId, &'static str) -> Box<dyn ErasedStore>;

/// Registered facts about one component type.
#[derive(Copy, Clone)]
pub struct ComponentInfo {
    id: ComponentTypeId,
    name: &'static str,
    kind: StoreKind,
    make: StoreFactory,
}

impl ComponentInfo {
    #[inline]
    pub fn id(&self) -> ComponentTypeId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Spawn an empty store for this component type.
    pub(crate) fn new_store(&self) -> Box<dyn ErasedStore> {
        (self.make)(self.id, self.name)
    }
}

/// Per-world component registry. Types must be registered before they appear
/// in builds or subscriptions; ids are handed out monotonically starting at
/// zero so they double as table indices.
#[derive(Default)]
pub struct ComponentRegistry {
    infos: Vec<ComponentInfo>,
    by_type: HashMap<TypeId, ComponentTypeId>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            infos: Vec::new(),
            by_type: HashMap::new(),
        }
    }

    /// Register `T` with the tracked (Vec-backed) strategy. Re-registering
    /// the same type is a no-op returning the original id.
    pub fn register<T: Component>(&mut self) -> Result<ComponentTypeId, UsageError> {
        self.register_with::<T>(StoreKind::Tracked, make_tracked::<T>)
    }

    /// Register `T` with the raw contiguous-buffer strategy. The `Pod` bound
    /// is what guarantees the payload is plain fixed-layout data.
    pub fn register_raw<T: Component + bytemuck::Pod>(
        &mut self,
    ) -> Result<ComponentTypeId, UsageError> {
        self.register_with::<T>(StoreKind::Raw, make_raw::<T>)
    }

    fn register_with<T: Component>(
        &mut self,
        kind: StoreKind,
        make: StoreFactory,
    ) -> Result<ComponentTypeId, UsageError> {
        if let Some(&id) = self.by_type.get(&TypeId::of::<T>()) {
            let info = &self.infos[id.0 as usize];
            if info.kind != kind {
                return Err(UsageError::StrategyMismatch(info.name));
            }
            return Ok(id);
        }

        let id = ComponentTypeId(self.infos.len() as u32);
        self.by_type.insert(TypeId::of::<T>(), id);
        self.infos.push(ComponentInfo {
            id,
            name: T::component_name(),
            kind,
            make,
        });
        Ok(id)
    }

    /// Look up the id of a registered type.
    pub fn id_of<T: Component>(&self) -> Option<ComponentTypeId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Like [`id_of`](Self::id_of) but failing with the caller-facing error.
    pub(crate) fn require<T: Component>(&self) -> Result<&ComponentInfo, UsageError> {
        self.id_of::<T>()
            .map(|id| &self.infos[id.0 as usize])
            .ok_or_else(|| UsageError::UnregisteredComponent(T::component_name()))
    }

    pub fn info(&self, id: ComponentTypeId) -> Option<&ComponentInfo> {
        self.infos.get(id.0 as usize)
    }

    pub fn name_of(&self, id: ComponentTypeId) -> &'static str {
        self.info(id).map(|info| info.name).unwrap_or("<unknown>")
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

fn make_tracked<T: Component>(id: ComponentTypeId, name: &'static str) -> Box<dyn ErasedStore> {
    Box::new(DenseStore::<T>::new_tracked(id, name))
}

fn make_raw<T: Component + bytemuck::Pod>(
    id: ComponentTypeId,
    name: &'static str,
) -> Box<dyn ErasedStore> {
    Box::new(DenseStore::<T>::new_raw(id, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tagged(#[allow(dead_code)] String);
    impl Component for Tagged {}

    #[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Point {
        #[allow(dead_code)]
        x: f32,
        #[allow(dead_code)]
        y: f32,
    }
    impl Component for Point {}

    #[test]
    fn ids_are_assigned_in_registration_order() {
        let mut registry = ComponentRegistry::new();
        let a = registry.register::<Tagged>().unwrap();
        let b = registry.register_raw::<Point>().unwrap();
        assert_eq!(a, ComponentTypeId(0));
        assert_eq!(b, ComponentTypeId(1));
        assert_eq!(registry.id_of::<Tagged>(), Some(a));
    }

    #[test]
    fn independent_registries_number_independently() {
        let mut first = ComponentRegistry::new();
        let mut second = ComponentRegistry::new();
        first.register::<Tagged>().unwrap();
        let in_first = first.register_raw::<Point>().unwrap();
        let in_second = second.register_raw::<Point>().unwrap();
        assert_eq!(in_first, ComponentTypeId(1));
        assert_eq!(in_second, ComponentTypeId(0));
    }

    #[test]
    fn re_registration_is_idempotent() {
        let mut registry = ComponentRegistry::new();
        let first = registry.register::<Tagged>().unwrap();
        let again = registry.register::<Tagged>().unwrap();
        assert_eq!(first, again);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn strategy_cannot_change_after_registration() {
        let mut registry = ComponentRegistry::new();
        registry.register_raw::<Point>().unwrap();
        let err = registry.register_with::<Point>(StoreKind::Tracked, make_tracked::<Point>);
        assert!(matches!(err, Err(UsageError::StrategyMismatch(_))));
    }
}
