//! Submission coordinator
//!
//! One submission drains all staged structural work. Each iteration rotates
//! the operation log, runs group removals then group swaps, entity swaps
//! then entity removals, and finally flushes pending builds, dispatching
//! callbacks along the way. Work those callbacks queue lands in the fresh
//! staged frames and drives the next iteration; a submission still
//! generating work at the iteration cap fails with `Convergence`.
//!
//! Everything runs on the calling thread. Failures are fatal for the tick:
//! work applied before the failure stays applied, the rest stays queued.

use crate::component::ComponentTypeId;
use crate::deferred::DeferredOps;
use crate::entity::{EntityId, EntityKey, GroupId};
use crate::error::{SubmitError, UsageError};
use crate::group::GroupColumns;
use crate::oplog::{EntityOpKind, GroupOp, OpFrame};
use crate::pending::PendingFrame;
use crate::storage::{DrainError, StoreError, SwapBackLog};
use crate::world::World;
use std::collections::BTreeMap;
use std::mem;
use std::ops::Range;
use std::panic::Location;

type Site = &'static Location<'static>;

/// Iterations one submission may run before it is declared divergent.
pub const MAX_SUBMISSION_ITERATIONS: u32 = 10;

/// Coordinator position. `Idle` outside a submission; the rest trace the
/// per-iteration pipeline.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Starting,
    GroupOps,
    EntityOps,
    Flush,
    Notify,
}

impl Phase {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Starting => "starting",
            Phase::GroupOps => "group operations",
            Phase::EntityOps => "entity operations",
            Phase::Flush => "pending flush",
            Phase::Notify => "notification",
        }
    }
}

impl World {
    /// Drain every queued structural operation, iterating until no staged
    /// work remains.
    pub fn submit(&mut self) -> Result<(), SubmitError> {
        if self.phase != Phase::Idle {
            return Err(SubmitError::Usage(UsageError::ReentrantSubmission));
        }
        self.phase = Phase::Starting;
        let result = self.run_submission();
        self.phase = Phase::Idle;
        result
    }

    fn run_submission(&mut self) -> Result<(), SubmitError> {
        let span = tracing::debug_span!("submit", world = self.id, tick = self.submissions);
        let _guard = span.enter();

        let mut iterations: u32 = 0;
        while self.oplog.has_staged() || self.pending.has_staged() {
            if iterations == MAX_SUBMISSION_ITERATIONS {
                tracing::warn!(iterations, "submission exceeded its iteration cap");
                return Err(SubmitError::Convergence { iterations });
            }
            if iterations == 0 {
                self.reactors.notify_started(self.submissions);
            }
            iterations += 1;
            self.run_iteration()?;
        }

        if iterations > 0 {
            tracing::debug!(iterations, "submission completed");
            self.counters.increment("submissions", 1);
            self.counters.increment("iterations", iterations as usize);
            self.reactors.notify_completed(self.submissions);
            self.submissions += 1;
        }
        Ok(())
    }

    fn run_iteration(&mut self) -> Result<(), SubmitError> {
        self.oplog.swap_frames();
        self.ledger.clear_ops();
        let mut frame = self.oplog.take_draining();
        let result = self.drain_op_frame(&mut frame);
        self.oplog.recycle(frame);
        result?;

        self.phase = Phase::Flush;
        if self.pending.has_staged() {
            self.flush_pending()?;
        }
        Ok(())
    }

    fn drain_op_frame(&mut self, frame: &mut OpFrame) -> Result<(), SubmitError> {
        self.phase = Phase::GroupOps;
        let group_ops = mem::take(&mut frame.group_ops);
        for op in &group_ops {
            if let GroupOp::Remove { group, site } = *op {
                self.drain_group_remove(group, site)?;
            }
        }
        for op in &group_ops {
            if let GroupOp::Swap { from, to, site } = *op {
                self.drain_group_swap(from, to, site)?;
            }
        }
        frame.group_ops = group_ops;

        self.phase = Phase::EntityOps;
        let mut swaps: BTreeMap<(GroupId, GroupId), Vec<(EntityId, EntityId, Site)>> =
            BTreeMap::new();
        let mut removes: BTreeMap<GroupId, Vec<(EntityId, Site)>> = BTreeMap::new();
        for (bits, op) in frame.entity_ops.drain() {
            let from = EntityKey::from_bits(bits);
            match op.kind {
                EntityOpKind::SwapTo(dest) => swaps
                    .entry((from.group, dest.group))
                    .or_default()
                    .push((from.id, dest.id, op.site)),
                EntityOpKind::Remove => {
                    removes.entry(from.group).or_default().push((from.id, op.site))
                }
            }
        }

        for ((from_group, to_group), mut batch) in swaps {
            batch.sort_unstable_by_key(|&(id, _, _)| id);
            self.drain_swap_batch(from_group, to_group, &batch)?;
            self.counters.increment("entities_swapped", batch.len());
        }

        for (group, mut batch) in removes {
            batch.sort_unstable_by_key(|&(id, _)| id);
            self.drain_remove_batch(group, &batch)?;
            self.counters.increment("entities_removed", batch.len());
        }
        Ok(())
    }

    fn drain_group_remove(&mut self, group: GroupId, site: Site) -> Result<(), SubmitError> {
        let Some(mut columns) = self.directory.detach_group(group) else {
            tracing::debug!(%group, "removal of an absent group");
            return Ok(());
        };
        let result = self.group_remove_inner(group, &mut columns, site);
        // members a failed drain left behind lose their tokens with the group
        for type_id in columns.sorted_type_ids() {
            let store = columns
                .store(type_id)
                .expect("type listed by its own column set");
            for &id in store.entity_ids() {
                self.locator.invalidate(EntityKey::new(id, group));
            }
        }
        // the group is gone either way; route through `remove_group` so the
        // inverse index is pruned with it
        self.directory.reattach_group(group, columns);
        self.directory.remove_group(group);
        self.counters.increment("groups_removed", 1);
        result
    }

    fn group_remove_inner(
        &mut self,
        group: GroupId,
        columns: &mut GroupColumns,
        site: Site,
    ) -> Result<(), SubmitError> {
        let phase = self.phase.name();
        for type_id in columns.sorted_type_ids() {
            let store = columns
                .store_mut(type_id)
                .expect("type listed by its own column set");
            if store.is_empty() {
                continue;
            }
            let component = store.component_name();
            let removed: Vec<EntityId> = store.entity_ids().to_vec();
            let mut ops = DeferredOps::new(
                &self.registry,
                self.pending.staged_mut(),
                self.oplog.staged_mut(),
                &mut self.ledger,
            );
            store
                .drain_group_removal(group, &mut self.reactors, &mut ops)
                .map_err(|err| SubmitError::Consumer {
                    phase,
                    component,
                    group,
                    source: err.context(format!("queued at {}", site)),
                })?;
            for &id in &removed {
                self.locator.invalidate(EntityKey::new(id, group));
            }
        }
        Ok(())
    }

    fn drain_group_swap(&mut self, from: GroupId, to: GroupId, site: Site) -> Result<(), SubmitError> {
        let Some(mut source) = self.directory.detach_group(from) else {
            tracing::debug!(%from, %to, "swap of an absent group");
            return Ok(());
        };
        let result = self.group_swap_inner(from, to, &mut source, site);
        // stores come back empty with their capacity kept
        self.directory.reattach_group(from, source);
        self.counters.increment("groups_swapped", 1);
        result
    }

    fn group_swap_inner(
        &mut self,
        from: GroupId,
        to: GroupId,
        source: &mut GroupColumns,
        site: Site,
    ) -> Result<(), SubmitError> {
        let phase = self.phase.name();

        // reject before the first column moves; a partial migration would
        // leave entities split across the two groups
        if let Some(occupied) = self.directory.group(to) {
            for type_id in source.sorted_type_ids() {
                let src = source
                    .store(type_id)
                    .expect("type listed by its own column set");
                for &id in src.entity_ids() {
                    if occupied.contains_entity(id) {
                        return Err(SubmitError::queued(
                            UsageError::DuplicateEntity(EntityKey::new(id, to)),
                            site,
                        ));
                    }
                }
            }
        }

        for type_id in source.sorted_type_ids() {
            let src = source
                .store_mut(type_id)
                .expect("type listed by its own column set");
            if src.is_empty() {
                continue;
            }
            let moved: Vec<EntityId> = src.entity_ids().to_vec();
            let dst = self.directory.store_like_mut(to, src.as_ref());
            dst.reserve_extra(src.len());
            let range = dst.absorb(src.as_mut()).map_err(|err| {
                let usage = match err {
                    StoreError::DuplicateEntity { id } => {
                        UsageError::DuplicateEntity(EntityKey::new(id, to))
                    }
                    StoreError::NotFound { id } => {
                        UsageError::EntityNotFound(EntityKey::new(id, from))
                    }
                };
                SubmitError::queued(usage, site)
            })?;
            for &id in &moved {
                self.locator
                    .repoint(EntityKey::new(id, from), EntityKey::new(id, to));
            }
            let component = dst.component_name();
            let mut ops = DeferredOps::new(
                &self.registry,
                self.pending.staged_mut(),
                self.oplog.staged_mut(),
                &mut self.ledger,
            );
            dst.dispatch_swapped(from, to, range, &moved, &mut self.reactors, &mut ops)
                .map_err(|err| SubmitError::Consumer {
                    phase,
                    component,
                    group: to,
                    source: err.context(format!("queued at {}", site)),
                })?;
        }
        Ok(())
    }

    fn drain_swap_batch(
        &mut self,
        from_group: GroupId,
        to_group: GroupId,
        batch: &[(EntityId, EntityId, Site)],
    ) -> Result<(), SubmitError> {
        let Some(mut source) = self.directory.detach_group(from_group) else {
            let (id, _, site) = batch[0];
            return Err(SubmitError::queued(
                UsageError::EntityNotFound(EntityKey::new(id, from_group)),
                site,
            ));
        };
        let result = self.swap_batch_inner(from_group, to_group, &mut source, batch);
        self.directory.reattach_group(from_group, source);
        result
    }

    fn swap_batch_inner(
        &mut self,
        from_group: GroupId,
        to_group: GroupId,
        source: &mut GroupColumns,
        batch: &[(EntityId, EntityId, Site)],
    ) -> Result<(), SubmitError> {
        let phase = self.phase.name();

        // whole batch or nothing: validate both endpoints before moving a
        // value, since a half-applied transplant cannot be rolled back
        for &(id, _, site) in batch {
            if !source.contains_entity(id) {
                return Err(SubmitError::queued(
                    UsageError::EntityNotFound(EntityKey::new(id, from_group)),
                    site,
                ));
            }
        }
        if let Some(occupied) = self.directory.group(to_group) {
            for &(_, to_id, site) in batch {
                if occupied.contains_entity(to_id) {
                    return Err(SubmitError::queued(
                        UsageError::DuplicateEntity(EntityKey::new(to_id, to_group)),
                        site,
                    ));
                }
            }
        }

        // migrate every component column first; callbacks only run once the
        // whole entity is in its destination
        let mut dispatches: Vec<(ComponentTypeId, Range<usize>, Vec<EntityId>)> = Vec::new();
        for type_id in source.sorted_type_ids() {
            let src = source
                .store_mut(type_id)
                .expect("type listed by its own column set");
            let movers: Vec<(EntityId, EntityId, Site)> = batch
                .iter()
                .copied()
                .filter(|&(id, _, _)| src.contains(id))
                .collect();
            if movers.is_empty() {
                continue;
            }
            let dst = self.directory.store_like_mut(to_group, src.as_ref());
            dst.reserve_extra(movers.len());
            let start = dst.len();
            let mut log = SwapBackLog::new();
            let mut from_ids = Vec::with_capacity(movers.len());
            for &(from_id, to_id, site) in &movers {
                src.transplant(dst.as_mut(), from_id, to_id, &mut log)
                    .map_err(|err| {
                        let usage = match err {
                            StoreError::DuplicateEntity { id } => {
                                UsageError::DuplicateEntity(EntityKey::new(id, to_group))
                            }
                            StoreError::NotFound { id } => {
                                UsageError::EntityNotFound(EntityKey::new(id, from_group))
                            }
                        };
                        SubmitError::queued(usage, site)
                    })?;
                from_ids.push(from_id);
            }
            dispatches.push((type_id, start..dst.len(), from_ids));
        }

        // the locator follows the whole entity, once
        for &(from_id, to_id, _) in batch {
            self.locator.repoint(
                EntityKey::new(from_id, from_group),
                EntityKey::new(to_id, to_group),
            );
        }

        // the batch drains as one dispatch; its first entry names the site
        let site = batch[0].2;
        for (type_id, range, from_ids) in dispatches {
            let store = self
                .directory
                .store_mut(to_group, type_id)
                .expect("store materialized during this batch");
            let component = store.component_name();
            let mut ops = DeferredOps::new(
                &self.registry,
                self.pending.staged_mut(),
                self.oplog.staged_mut(),
                &mut self.ledger,
            );
            store
                .dispatch_swapped(
                    from_group,
                    to_group,
                    range,
                    &from_ids,
                    &mut self.reactors,
                    &mut ops,
                )
                .map_err(|err| SubmitError::Consumer {
                    phase,
                    component,
                    group: to_group,
                    source: err.context(format!("queued at {}", site)),
                })?;
        }
        Ok(())
    }

    fn drain_remove_batch(
        &mut self,
        group: GroupId,
        batch: &[(EntityId, Site)],
    ) -> Result<(), SubmitError> {
        let phase = self.phase.name();

        let columns = self.directory.group(group);
        for &(id, site) in batch {
            let present = columns.map_or(false, |c| c.contains_entity(id));
            if !present {
                return Err(SubmitError::queued(
                    UsageError::EntityNotFound(EntityKey::new(id, group)),
                    site,
                ));
            }
        }

        let type_ids = self
            .directory
            .group(group)
            .map(|columns| columns.sorted_type_ids())
            .unwrap_or_default();

        for type_id in type_ids {
            let Some(store) = self.directory.store_mut(group, type_id) else {
                continue;
            };
            let victims: Vec<EntityId> = batch
                .iter()
                .map(|&(id, _)| id)
                .filter(|&id| store.contains(id))
                .collect();
            if victims.is_empty() {
                continue;
            }
            let component = store.component_name();
            let mut ops = DeferredOps::new(
                &self.registry,
                self.pending.staged_mut(),
                self.oplog.staged_mut(),
                &mut self.ledger,
            );
            store
                .drain_removals(group, &victims, &mut self.reactors, &mut ops)
                .map_err(|err| match err {
                    DrainError::Store(StoreError::NotFound { id }) => {
                        let site = batch
                            .iter()
                            .find(|&&(bid, _)| bid == id)
                            .map(|&(_, site)| site)
                            .unwrap_or(batch[0].1);
                        SubmitError::queued(
                            UsageError::EntityNotFound(EntityKey::new(id, group)),
                            site,
                        )
                    }
                    DrainError::Store(StoreError::DuplicateEntity { id }) => {
                        SubmitError::Usage(UsageError::DuplicateEntity(EntityKey::new(id, group)))
                    }
                    DrainError::Consumer(source) => SubmitError::Consumer {
                        phase,
                        component,
                        group,
                        source: source.context(format!("queued at {}", batch[0].1)),
                    },
                })?;
        }

        for &(id, _) in batch {
            self.locator.invalidate(EntityKey::new(id, group));
        }
        Ok(())
    }

    fn flush_pending(&mut self) -> Result<(), SubmitError> {
        self.pending.swap_frames();
        self.ledger.clear_builds();
        let mut frame = self.pending.take_draining();

        let mut groups: Vec<GroupId> = frame.buckets.keys().copied().collect();
        groups.sort_unstable();

        let result = self.flush_frame(&mut frame, &groups);
        self.pending.recycle(frame);
        result
    }

    fn flush_frame(
        &mut self,
        frame: &mut PendingFrame,
        groups: &[GroupId],
    ) -> Result<(), SubmitError> {
        for &group in groups {
            let bucket = frame
                .buckets
                .get_mut(&group)
                .expect("group listed from this frame");
            if bucket.members.is_empty() {
                continue;
            }

            let mut members: Vec<EntityId> = bucket.members.iter().copied().collect();
            members.sort_unstable();

            // builds queued from callbacks skip the eager liveness check, so
            // it reruns here against current storage
            for &id in &members {
                let key = EntityKey::new(id, group);
                if self.directory.entity_exists(key) {
                    return Err(SubmitError::Usage(UsageError::DuplicateEntity(key)));
                }
            }

            let mut type_ids: Vec<ComponentTypeId> = bucket.stores.keys().copied().collect();
            type_ids.sort_unstable();

            // append every column before any callback runs, so add callbacks
            // always observe whole entities
            let mut appended: Vec<(ComponentTypeId, Range<usize>)> = Vec::new();
            for &type_id in &type_ids {
                let src = bucket
                    .stores
                    .get_mut(&type_id)
                    .expect("type listed from this bucket");
                if src.is_empty() {
                    continue;
                }
                let dst = self.directory.store_like_mut(group, src.as_ref());
                dst.reserve_extra(src.len());
                let range = dst.absorb(src.as_mut()).map_err(|err| {
                    let usage = match err {
                        StoreError::DuplicateEntity { id } => {
                            UsageError::DuplicateEntity(EntityKey::new(id, group))
                        }
                        StoreError::NotFound { id } => {
                            UsageError::EntityNotFound(EntityKey::new(id, group))
                        }
                    };
                    SubmitError::Usage(usage)
                })?;
                appended.push((type_id, range));
            }

            for &id in &members {
                self.locator.track(EntityKey::new(id, group));
            }
            self.counters.increment("entities_built", members.len());

            self.phase = Phase::Notify;
            let phase = self.phase.name();
            for (type_id, range) in appended {
                let store = self
                    .directory
                    .store_mut(group, type_id)
                    .expect("absorbed into it just now");
                let component = store.component_name();
                let mut ops = DeferredOps::new(
                    &self.registry,
                    self.pending.staged_mut(),
                    self.oplog.staged_mut(),
                    &mut self.ledger,
                );
                store
                    .dispatch_added(group, range, &mut self.reactors, &mut ops)
                    .map_err(|err| SubmitError::Consumer {
                        phase,
                        component,
                        group,
                        source: err,
                    })?;
            }
            self.phase = Phase::Flush;
        }
        Ok(())
    }
}
