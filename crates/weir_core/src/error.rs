//! Error taxonomy
//!
//! `UsageError` covers caller mistakes and is fatal for the operation that
//! raised it. `SubmitError` is what a submission tick surfaces: usage errors
//! carried to the drain point (with the call site that queued the operation),
//! consumer callback failures, or a convergence failure. Nothing here is
//! retried internally; partial work committed before a failure stays
//! committed.

use crate::entity::{EntityKey, GroupId};
use std::panic::Location;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("entity {0} already exists")]
    DuplicateEntity(EntityKey),
    #[error("entity {0} not found")]
    EntityNotFound(EntityKey),
    #[error("component `{component}` appears twice in the build of {key}")]
    DuplicateComponent {
        key: EntityKey,
        component: &'static str,
    },
    #[error("entity {key} has no pending `{component}` component")]
    ComponentAbsent {
        key: EntityKey,
        component: &'static str,
    },
    #[error("component type `{0}` is not registered")]
    UnregisteredComponent(&'static str),
    #[error("component type `{0}` is already registered with a different storage strategy")]
    StrategyMismatch(&'static str),
    #[error("group {0} is reserved")]
    ReservedGroup(GroupId),
    #[error("swap destination equals the origin group {0}")]
    SwapToOrigin(GroupId),
    #[error("conflicting queued operations for {key}: {previous} then {requested}")]
    ConflictingOperation {
        key: EntityKey,
        previous: &'static str,
        requested: &'static str,
    },
    #[error("submission already in progress")]
    ReentrantSubmission,
    #[error("driver bound to world {bound} was stepped with world {given}")]
    DriverRebound { bound: u64, given: u64 },
}

/// Failure of a submission tick. Everything already applied before the
/// failing step remains applied.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error("{source} (queued at {site})")]
    QueuedUsage {
        source: UsageError,
        site: &'static Location<'static>,
    },
    #[error("consumer failed during {phase} for `{component}` in {group}")]
    Consumer {
        phase: &'static str,
        component: &'static str,
        group: GroupId,
        #[source]
        source: anyhow::Error,
    },
    #[error("submission did not converge after {iterations} iterations (possible circular submission)")]
    Convergence { iterations: u32 },
}

impl SubmitError {
    pub(crate) fn queued(source: UsageError, site: &'static Location<'static>) -> Self {
        Self::QueuedUsage { source, site }
    }
}

/// Token resolution failure. `Expired` means the entity was removed after the
/// token was issued; `Unbound` means the token was claimed but never attached
/// to a live entity.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("entity reference expired")]
    Expired,
    #[error("entity reference claimed but never bound")]
    Unbound,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::key;

    #[test]
    fn messages_carry_identity() {
        let err = UsageError::DuplicateEntity(key(3, 1));
        assert_eq!(err.to_string(), "entity e3@g1 already exists");

        let err = UsageError::ConflictingOperation {
            key: key(4, 2),
            previous: "remove",
            requested: "swap",
        };
        assert!(err.to_string().contains("e4@g2"));
        assert!(err.to_string().contains("remove then swap"));
    }

    #[test]
    fn convergence_message_names_the_loop() {
        let err = SubmitError::Convergence { iterations: 10 };
        assert!(err.to_string().contains("circular submission"));
    }
}
