//! Entity construction
//!
//! Builds stage component values into the pending buffer as a typed tuple.
//! Types are resolved against the registry before anything is written, so a
//! failed build leaves no partial residue. The returned composer can
//! overwrite staged values until the next submission flushes them.

use crate::component::{Component, ComponentRegistry};
use crate::deferred::{check_group, OpLedger};
use crate::entity::EntityKey;
use crate::error::UsageError;
use crate::pending::PendingFrame;

mod sealed {
    pub trait Sealed {}
}

/// Tuple of component values making up one entity. Implemented for tuples
/// of 1 to 8 components and sealed against implementations elsewhere.
pub trait ComponentSet: sealed::Sealed {
    /// Check every member type against the registry without staging.
    #[doc(hidden)]
    fn resolve(registry: &ComponentRegistry, key: EntityKey) -> Result<(), UsageError>;

    /// Write the values into the pending bucket for `key`.
    #[doc(hidden)]
    fn stage(
        self,
        registry: &ComponentRegistry,
        frame: &mut PendingFrame,
        key: EntityKey,
    ) -> Result<(), UsageError>;
}

macro_rules! component_set_tuple {
    ($($t:ident => $v:ident),+) => {
        impl<$($t: Component),+> sealed::Sealed for ($($t,)+) {}

        impl<$($t: Component),+> ComponentSet for ($($t,)+) {
            fn resolve(registry: &ComponentRegistry, key: EntityKey) -> Result<(), UsageError> {
                let members = [$({
                    let info = registry.require::<$t>()?;
                    (info.id(), info.name())
                }),+];
                for i in 0..members.len() {
                    for j in (i + 1)..members.len() {
                        if members[i].0 == members[j].0 {
                            return Err(UsageError::DuplicateComponent {
                                key,
                                component: members[j].1,
                            });
                        }
                    }
                }
                Ok(())
            }

            fn stage(
                self,
                registry: &ComponentRegistry,
                frame: &mut PendingFrame,
                key: EntityKey,
            ) -> Result<(), UsageError> {
                let ($($v,)+) = self;
                $(
                    let info = registry.require::<$t>()?;
                    frame.stage_value(info, key, $v)?;
                )+
                Ok(())
            }
        }
    };
}

component_set_tuple!(A => a);
component_set_tuple!(A => a, B => b);
component_set_tuple!(A => a, B => b, C => c);
component_set_tuple!(A => a, B => b, C => c, D => d);
component_set_tuple!(A => a, B => b, C => c, D => d, E => e);
component_set_tuple!(A => a, B => b, C => c, D => d, E => e, F => f);
component_set_tuple!(A => a, B => b, C => c, D => d, E => e, F => f, G => g);
component_set_tuple!(A => a, B => b, C => c, D => d, E => e, F => f, G => g, H => h);

/// Validate, reserve the slot, and stage the initial values.
pub(crate) fn begin_build<'a, C: ComponentSet>(
    registry: &'a ComponentRegistry,
    frame: &'a mut PendingFrame,
    ledger: &mut OpLedger,
    key: EntityKey,
    components: C,
) -> Result<EntityComposer<'a>, UsageError> {
    check_group(key.group)?;
    C::resolve(registry, key)?;
    frame.admit(key)?;
    components.stage(registry, frame, key)?;
    ledger.note_build(key);
    Ok(EntityComposer {
        registry,
        frame,
        key,
    })
}

/// Handle over a staged build. Valid until the submission that flushes the
/// entity; writes through it replace staged values in place.
pub struct EntityComposer<'a> {
    registry: &'a ComponentRegistry,
    frame: &'a mut PendingFrame,
    key: EntityKey,
}

impl EntityComposer<'_> {
    pub fn key(&self) -> EntityKey {
        self.key
    }

    /// Replace the staged value of one component of the build.
    pub fn set<T: Component>(&mut self, value: T) -> Result<&mut Self, UsageError> {
        *self.slot::<T>()? = value;
        Ok(self)
    }

    /// Mutate the staged value of one component in place.
    pub fn update<T: Component>(&mut self, f: impl FnOnce(&mut T)) -> Result<&mut Self, UsageError> {
        f(self.slot::<T>()?);
        Ok(self)
    }

    fn slot<T: Component>(&mut self) -> Result<&mut T, UsageError> {
        let info = self.registry.require::<T>()?;
        self.frame
            .staged_value_mut::<T>(info.id(), self.key)
            .ok_or(UsageError::ComponentAbsent {
                key: self.key,
                component: info.name(),
            })
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
        #[allow(dead_code)]
        dx: f32,
    }
    impl Component for Velocity {}

    struct Unregistered;
    impl Component for Unregistered {}

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry.register::<Position>().unwrap();
        registry.register::<Velocity>().unwrap();
        registry
    }

    #[test]
    fn build_stages_every_component_and_composer_tunes_them() {
        let registry = registry();
        let mut frame = PendingFrame::default();
        let mut ledger = OpLedger::new();

        let mut composer = begin_build(
            &registry,
            &mut frame,
            &mut ledger,
            key(9, 2),
            (Position { x: 0.0, y: 0.0 }, Velocity { dx: 1.0 }),
        )
        .unwrap();

        assert_eq!(composer.key(), key(9, 2));
        composer
            .set(Position { x: 4.0, y: 2.0 })
            .unwrap()
            .update(|p: &mut Position| p.y += 1.0)
            .unwrap();

        let id = registry.id_of::<Position>().unwrap();
        let staged = frame.staged_value_mut::<Position>(id, key(9, 2)).unwrap();
        assert_eq!((staged.x, staged.y), (4.0, 3.0));
    }

    #[test]
    fn unregistered_component_fails_without_residue() {
        let registry = registry();
        let mut frame = PendingFrame::default();
        let mut ledger = OpLedger::new();

        let result = begin_build(
            &registry,
            &mut frame,
            &mut ledger,
            key(9, 2),
            (Position { x: 0.0, y: 0.0 }, Unregistered),
        );
        assert!(matches!(result, Err(UsageError::UnregisteredComponent(_))));
        assert!(frame.is_empty());
        assert!(!frame.contains(key(9, 2)));
    }

    #[test]
    fn one_type_twice_in_a_build_is_rejected() {
        let registry = registry();
        let mut frame = PendingFrame::default();
        let mut ledger = OpLedger::new();

        let result = begin_build(
            &registry,
            &mut frame,
            &mut ledger,
            key(9, 2),
            (Position { x: 0.0, y: 0.0 }, Position { x: 1.0, y: 1.0 }),
        );
        assert!(matches!(
            result,
            Err(UsageError::DuplicateComponent { .. })
        ));
        assert!(frame.is_empty());
    }

    #[test]
    fn composer_rejects_types_outside_the_build() {
        let registry = registry();
        let mut frame = PendingFrame::default();
        let mut ledger = OpLedger::new();

        let mut composer = begin_build(
            &registry,
            &mut frame,
            &mut ledger,
            key(9, 2),
            (Position { x: 0.0, y: 0.0 },),
        )
        .unwrap();

        assert!(matches!(
            composer.set(Velocity { dx: 1.0 }),
            Err(UsageError::ComponentAbsent { .. })
        ));
    }

    #[test]
    fn reserved_group_cannot_be_built_into() {
        let registry = registry();
        let mut frame = PendingFrame::default();
        let mut ledger = OpLedger::new();

        let result = begin_build(
            &registry,
            &mut frame,
            &mut ledger,
            key(1, crate::entity::GroupId::INVALID.0),
            (Position { x: 0.0, y: 0.0 },),
        );
        assert!(matches!(result, Err(UsageError::ReservedGroup(_))));
    }
}
