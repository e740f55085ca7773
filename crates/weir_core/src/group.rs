// group.rs - directory of component stores per group

use crate::component::ComponentTypeId;
use crate::entity::{EntityId, EntityKey, GroupId};
use crate::storage::ErasedStore;
use std::collections::{hash_map::Entry, HashMap};

/// Stores of one group, keyed by component type.
pub(crate) struct GroupColumns {
    stores: HashMap<ComponentTypeId, Box<dyn ErasedStore>>,
}

impl GroupColumns {
    fn new() -> Self {
        Self {
            stores: HashMap::new(),
        }
    }

    pub fn store(&self, type_id: ComponentTypeId) -> Option<&dyn ErasedStore> {
        self.stores.get(&type_id).map(|store| store.as_ref())
    }

    pub fn store_mut(&mut self, type_id: ComponentTypeId) -> Option<&mut Box<dyn ErasedStore>> {
        self.stores.get_mut(&type_id)
    }

    /// Type ids present in this group, ascending. Drains iterate in this
    /// order so callback sequences are stable across runs.
    pub fn sorted_type_ids(&self) -> Vec<ComponentTypeId> {
        let mut ids: Vec<ComponentTypeId> = self.stores.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn contains_entity(&self, id: EntityId) -> bool {
        self.stores.values().any(|store| store.contains(id))
    }
}

/// Maps each group to its per-type stores and keeps the inverse
/// component-type -> groups index for type-first queries.
pub(crate) struct GroupDirectory {
    groups: HashMap<GroupId, GroupColumns>,
    by_type: HashMap<ComponentTypeId, Vec<GroupId>>,
}

impl GroupDirectory {
    pub fn new() -> Self {
        Self {
            groups: HashMap::new(),
            by_type: HashMap::new(),
        }
    }

    pub fn group(&self, group: GroupId) -> Option<&GroupColumns> {
        self.groups.get(&group)
    }

    /// Get or lazily materialize the store for `like`'s component type in
    /// `group`.
    pub fn store_like_mut(
        &mut self,
        group: GroupId,
        like: &dyn ErasedStore,
    ) -> &mut Box<dyn ErasedStore> {
        let columns = self.groups.entry(group).or_insert_with(GroupColumns::new);
        match columns.stores.entry(like.component_id()) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => {
                tracing::trace!(
                    %group,
                    component = like.component_name(),
                    "materialized store"
                );
                self.by_type
                    .entry(like.component_id())
                    .or_default()
                    .push(group);
                vacant.insert(like.spawn_empty())
            }
        }
    }

    pub fn store(&self, group: GroupId, type_id: ComponentTypeId) -> Option<&dyn ErasedStore> {
        self.groups.get(&group)?.store(type_id)
    }

    pub fn store_mut(
        &mut self,
        group: GroupId,
        type_id: ComponentTypeId,
    ) -> Option<&mut Box<dyn ErasedStore>> {
        self.groups.get_mut(&group)?.store_mut(type_id)
    }

    /// Groups holding a store of `type_id`, in materialization order.
    pub fn groups_with(&self, type_id: ComponentTypeId) -> &[GroupId] {
        self.by_type
            .get(&type_id)
            .map(|groups| groups.as_slice())
            .unwrap_or(&[])
    }

    pub fn entity_exists(&self, key: EntityKey) -> bool {
        self.groups
            .get(&key.group)
            .map(|columns| columns.contains_entity(key.id))
            .unwrap_or(false)
    }

    /// Remove a group permanently, pruning the inverse index.
    pub fn remove_group(&mut self, group: GroupId) -> Option<GroupColumns> {
        let columns = self.groups.remove(&group)?;
        for type_id in columns.stores.keys() {
            if let Some(groups) = self.by_type.get_mut(type_id) {
                groups.retain(|&g| g != group);
            }
        }
        Some(columns)
    }

    /// Temporarily lift a group out of the directory so its stores can be
    /// mutated alongside another group's. The caller must reattach it.
    pub fn detach_group(&mut self, group: GroupId) -> Option<GroupColumns> {
        self.groups.remove(&group)
    }

    pub fn reattach_group(&mut self, group: GroupId, columns: GroupColumns) {
        self.groups.insert(group, columns);
    }

    /// All group ids, ascending.
    pub fn sorted_groups(&self) -> Vec<GroupId> {
        let mut groups: Vec<GroupId> = self.groups.keys().copied().collect();
        groups.sort_unstable();
        groups
    }

    pub fn clear(&mut self) {
        self.groups.clear();
        self.by_type.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, ComponentRegistry};
    use crate::entity::key;

    #[derive(Debug, Clone, PartialEq)]
    struct Mass(#[allow(dead_code)] f64);
    impl Component for Mass {}

    #[test]
    fn stores_materialize_lazily_and_index_back() {
        let mut registry = ComponentRegistry::new();
        registry.register::<Mass>().unwrap();
        let info = registry.require::<Mass>().unwrap();
        let template = info.new_store();

        let mut directory = GroupDirectory::new();
        assert!(directory.group(GroupId(1)).is_none());

        directory.store_like_mut(GroupId(1), template.as_ref());
        directory.store_like_mut(GroupId(2), template.as_ref());
        // second hit reuses the store
        directory.store_like_mut(GroupId(1), template.as_ref());

        assert_eq!(
            directory.groups_with(template.component_id()),
            &[GroupId(1), GroupId(2)]
        );
    }

    #[test]
    fn remove_group_prunes_the_inverse_index() {
        let mut registry = ComponentRegistry::new();
        registry.register::<Mass>().unwrap();
        let template = registry.require::<Mass>().unwrap().new_store();

        let mut directory = GroupDirectory::new();
        directory.store_like_mut(GroupId(1), template.as_ref());
        directory.store_like_mut(GroupId(2), template.as_ref());

        directory.remove_group(GroupId(1));
        assert_eq!(
            directory.groups_with(template.component_id()),
            &[GroupId(2)]
        );
        assert!(!directory.entity_exists(key(1, 1)));
    }
}
