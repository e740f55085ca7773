//! Deferred operation facade
//!
//! Handed to reactors during dispatch. Everything queued through it lands in
//! the staged frames and drains on a later iteration of the running
//! submission, which is what makes re-entrant structural changes safe.

use crate::builder::{begin_build, ComponentSet, EntityComposer};
use crate::component::ComponentRegistry;
use crate::entity::{EntityKey, GroupId};
use crate::error::UsageError;
use crate::oplog::{EntityOp, EntityOpKind, GroupOp, OpFrame};
use crate::pending::PendingFrame;
use std::panic::Location;

#[cfg(debug_assertions)]
use std::collections::{HashMap, HashSet};

pub(crate) fn check_group(group: GroupId) -> Result<(), UsageError> {
    if !group.is_valid() {
        return Err(UsageError::ReservedGroup(group));
    }
    Ok(())
}

#[cfg(debug_assertions)]
#[derive(Copy, Clone)]
enum QueuedKind {
    Remove,
    Swap,
}

/// Debug-only conflict tracker for one staging window. Catches operation
/// combinations that would behave surprisingly at drain time. Compiles to
/// nothing in release builds; the drain itself stays correct without it.
pub(crate) struct OpLedger {
    #[cfg(debug_assertions)]
    builds: HashSet<u64>,
    #[cfg(debug_assertions)]
    ops: HashMap<u64, QueuedKind>,
}

impl OpLedger {
    pub fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            builds: HashSet::new(),
            #[cfg(debug_assertions)]
            ops: HashMap::new(),
        }
    }

    pub fn note_build(&mut self, key: EntityKey) {
        #[cfg(debug_assertions)]
        self.builds.insert(key.to_bits());
        #[cfg(not(debug_assertions))]
        let _ = key;
    }

    /// Removing an entity built in the same window is rejected; the build has
    /// not flushed yet, so there is nothing to remove. Removing over a queued
    /// swap is allowed and supersedes it.
    pub fn note_remove(&mut self, key: EntityKey) -> Result<(), UsageError> {
        #[cfg(debug_assertions)]
        {
            let bits = key.to_bits();
            if self.builds.contains(&bits) {
                return Err(UsageError::ConflictingOperation {
                    key,
                    previous: "build",
                    requested: "remove",
                });
            }
            if let Some(QueuedKind::Remove) = self.ops.get(&bits) {
                return Err(UsageError::ConflictingOperation {
                    key,
                    previous: "remove",
                    requested: "remove",
                });
            }
            self.ops.insert(bits, QueuedKind::Remove);
        }
        #[cfg(not(debug_assertions))]
        let _ = key;
        Ok(())
    }

    pub fn note_swap(&mut self, key: EntityKey) -> Result<(), UsageError> {
        #[cfg(debug_assertions)]
        {
            let bits = key.to_bits();
            if self.builds.contains(&bits) {
                return Err(UsageError::ConflictingOperation {
                    key,
                    previous: "build",
                    requested: "swap",
                });
            }
            if let Some(prior) = self.ops.get(&bits) {
                let previous = match prior {
                    QueuedKind::Remove => "remove",
                    QueuedKind::Swap => "swap",
                };
                return Err(UsageError::ConflictingOperation {
                    key,
                    previous,
                    requested: "swap",
                });
            }
            self.ops.insert(bits, QueuedKind::Swap);
        }
        #[cfg(not(debug_assertions))]
        let _ = key;
        Ok(())
    }

    /// Forget tracked removes and swaps. Runs when the operation log rotates.
    pub fn clear_ops(&mut self) {
        #[cfg(debug_assertions)]
        self.ops.clear();
    }

    /// Forget tracked builds. Runs when the pending buffer rotates.
    pub fn clear_builds(&mut self) {
        #[cfg(debug_assertions)]
        self.builds.clear();
    }
}

/// Queueing surface handed to reactors. Borrows the staged side of the
/// world's queues while the coordinator drains the other side.
pub struct DeferredOps<'a> {
    registry: &'a ComponentRegistry,
    pending: &'a mut PendingFrame,
    oplog: &'a mut OpFrame,
    ledger: &'a mut OpLedger,
}

impl<'a> DeferredOps<'a> {
    pub(crate) fn new(
        registry: &'a ComponentRegistry,
        pending: &'a mut PendingFrame,
        oplog: &'a mut OpFrame,
        ledger: &'a mut OpLedger,
    ) -> Self {
        Self {
            registry,
            pending,
            oplog,
            ledger,
        }
    }

    /// Queue an entity build. The duplicate-against-live check happens at
    /// flush time here, unlike the eager check on the world surface; the
    /// entity under the hammer right now may be mid-move.
    pub fn build_entity<C: ComponentSet>(
        &mut self,
        key: EntityKey,
        components: C,
    ) -> Result<EntityComposer<'_>, UsageError> {
        begin_build(self.registry, self.pending, self.ledger, key, components)
    }

    #[track_caller]
    pub fn queue_remove(&mut self, key: EntityKey) -> Result<(), UsageError> {
        check_group(key.group)?;
        self.ledger.note_remove(key)?;
        self.oplog.stage_entity(
            key,
            EntityOp {
                kind: EntityOpKind::Remove,
                site: Location::caller(),
            },
        );
        Ok(())
    }

    #[track_caller]
    pub fn queue_swap(&mut self, key: EntityKey, to: GroupId) -> Result<(), UsageError> {
        check_group(key.group)?;
        check_group(to)?;
        if to == key.group {
            return Err(UsageError::SwapToOrigin(to));
        }
        self.ledger.note_swap(key)?;
        self.oplog.stage_entity(
            key,
            EntityOp {
                kind: EntityOpKind::SwapTo(key.with_group(to)),
                site: Location::caller(),
            },
        );
        Ok(())
    }

    #[track_caller]
    pub fn queue_group_remove(&mut self, group: GroupId) -> Result<(), UsageError> {
        check_group(group)?;
        self.oplog.stage_group(GroupOp::Remove {
            group,
            site: Location::caller(),
        });
        Ok(())
    }

    #[track_caller]
    pub fn queue_group_swap(&mut self, from: GroupId, to: GroupId) -> Result<(), UsageError> {
        check_group(from)?;
        check_group(to)?;
        if from == to {
            return Err(UsageError::SwapToOrigin(to));
        }
        self.oplog.stage_group(GroupOp::Swap {
            from,
            to,
            site: Location::caller(),
        });
        Ok(())
    }
}
