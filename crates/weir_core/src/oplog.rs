//! Deferred structural operation log
//!
//! Removals and swaps queue here and drain on submission. Two frames
//! alternate: consumers stage into one while the coordinator drains the
//! other, so callback-issued operations land in the next iteration instead
//! of mutating the queue mid-drain.

use crate::entity::{EntityKey, GroupId};
use std::collections::HashMap;
use std::mem;
use std::panic::Location;

pub(crate) enum EntityOpKind {
    Remove,
    SwapTo(EntityKey),
}

pub(crate) struct EntityOp {
    pub kind: EntityOpKind,
    /// Call site that queued the operation, reported when the drain fails.
    pub site: &'static Location<'static>,
}

#[derive(Copy, Clone)]
pub(crate) enum GroupOp {
    Remove {
        group: GroupId,
        site: &'static Location<'static>,
    },
    Swap {
        from: GroupId,
        to: GroupId,
        site: &'static Location<'static>,
    },
}

/// One staging window of queued operations. Entity ops coalesce per entity,
/// group ops replay in queue order.
#[derive(Default)]
pub(crate) struct OpFrame {
    pub entity_ops: HashMap<u64, EntityOp>,
    pub group_ops: Vec<GroupOp>,
}

impl OpFrame {
    pub fn stage_entity(&mut self, key: EntityKey, op: EntityOp) {
        use std::collections::hash_map::Entry;
        match self.entity_ops.entry(key.to_bits()) {
            Entry::Vacant(slot) => {
                slot.insert(op);
            }
            Entry::Occupied(mut slot) => {
                // A queued removal is final; a later swap cannot revive it.
                if !matches!(slot.get().kind, EntityOpKind::Remove) {
                    slot.insert(op);
                }
            }
        }
    }

    pub fn stage_group(&mut self, op: GroupOp) {
        self.group_ops.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.entity_ops.is_empty() && self.group_ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.entity_ops.clear();
        self.group_ops.clear();
    }
}

/// Double-buffered frames, swapped at the top of each drain iteration.
pub(crate) struct OperationLog {
    staged: OpFrame,
    draining: OpFrame,
}

impl OperationLog {
    pub fn new() -> Self {
        Self {
            staged: OpFrame::default(),
            draining: OpFrame::default(),
        }
    }

    pub fn staged_mut(&mut self) -> &mut OpFrame {
        &mut self.staged
    }

    pub fn has_staged(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Rotate the staged frame into draining position.
    pub fn swap_frames(&mut self) {
        debug_assert!(self.draining.is_empty(), "previous drain left residue");
        mem::swap(&mut self.staged, &mut self.draining);
    }

    /// Detach the draining frame so callbacks can stage freely while the
    /// coordinator walks it. Return it through `recycle` when done.
    pub fn take_draining(&mut self) -> OpFrame {
        mem::take(&mut self.draining)
    }

    /// Park a processed frame for reuse, keeping its allocations.
    pub fn recycle(&mut self, mut frame: OpFrame) {
        frame.clear();
        self.draining = frame;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::key;

    fn here() -> &'static Location<'static> {
        Location::caller()
    }

    #[test]
    fn removal_is_final_within_a_frame() {
        let mut frame = OpFrame::default();
        frame.stage_entity(
            key(1, 1),
            EntityOp {
                kind: EntityOpKind::Remove,
                site: here(),
            },
        );
        frame.stage_entity(
            key(1, 1),
            EntityOp {
                kind: EntityOpKind::SwapTo(key(1, 2)),
                site: here(),
            },
        );

        assert_eq!(frame.entity_ops.len(), 1);
        let op = &frame.entity_ops[&key(1, 1).to_bits()];
        assert!(matches!(op.kind, EntityOpKind::Remove));
    }

    #[test]
    fn later_swap_replaces_earlier_swap() {
        let mut frame = OpFrame::default();
        frame.stage_entity(
            key(1, 1),
            EntityOp {
                kind: EntityOpKind::SwapTo(key(1, 2)),
                site: here(),
            },
        );
        frame.stage_entity(
            key(1, 1),
            EntityOp {
                kind: EntityOpKind::SwapTo(key(1, 3)),
                site: here(),
            },
        );

        let op = &frame.entity_ops[&key(1, 1).to_bits()];
        match &op.kind {
            EntityOpKind::SwapTo(dest) => assert_eq!(*dest, key(1, 3)),
            EntityOpKind::Remove => panic!("swap coalesced into a removal"),
        }
    }

    #[test]
    fn frames_alternate_between_staging_and_draining() {
        let mut log = OperationLog::new();
        log.staged_mut().stage_entity(
            key(4, 1),
            EntityOp {
                kind: EntityOpKind::Remove,
                site: here(),
            },
        );
        assert!(log.has_staged());

        log.swap_frames();
        assert!(!log.has_staged());

        let frame = log.take_draining();
        assert_eq!(frame.entity_ops.len(), 1);

        // staging during the drain lands in the other frame
        log.staged_mut().stage_group(GroupOp::Remove {
            group: crate::entity::GroupId(7),
            site: here(),
        });
        log.recycle(frame);

        log.swap_frames();
        let frame = log.take_draining();
        assert_eq!(frame.group_ops.len(), 1);
        assert!(frame.entity_ops.is_empty());
        log.recycle(frame);
    }
}
