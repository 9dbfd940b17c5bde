// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! One-tick deferral buffer for stack pushes and pops.

use std::any::TypeId;
use std::fmt;

use crate::mode::{Mode, ModeId};

/// A mode waiting to be pushed at the next tick.
pub(crate) struct PendingPush {
    pub(crate) id: ModeId,
    pub(crate) type_id: TypeId,
    pub(crate) mode: Box<dyn Mode>,
}

/// What a deferred pop removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopTarget {
    /// A specific mode instance.
    Id(ModeId),
    /// The first stacked mode of a concrete type.
    Type(TypeId),
}

/// Requests submitted mid-tick, applied atomically at the next tick.
///
/// Pushes are applied before pops, then the stack refreshes once.
#[derive(Default)]
pub struct PendingQueue {
    pushes: Vec<PendingPush>,
    pops: Vec<PopTarget>,
}

impl PendingQueue {
    pub(crate) fn push(&mut self, entry: PendingPush) {
        self.pushes.push(entry);
    }

    pub(crate) fn pop(&mut self, target: PopTarget) {
        self.pops.push(target);
    }

    pub(crate) fn take(&mut self) -> (Vec<PendingPush>, Vec<PopTarget>) {
        (
            std::mem::take(&mut self.pushes),
            std::mem::take(&mut self.pops),
        )
    }

    pub(crate) fn contains_type(&self, type_id: TypeId) -> bool {
        self.pushes.iter().any(|p| p.type_id == type_id)
    }

    pub(crate) fn find_type(&self, type_id: TypeId) -> Option<ModeId> {
        self.pushes
            .iter()
            .find(|p| p.type_id == type_id)
            .map(|p| p.id)
    }

    /// Drops a queued push without running any hook.
    pub(crate) fn cancel_push(&mut self, id: ModeId) -> bool {
        let before = self.pushes.len();
        self.pushes.retain(|p| p.id != id);
        self.pushes.len() != before
    }

    pub(crate) fn contains_id(&self, id: ModeId) -> bool {
        self.pushes.iter().any(|p| p.id == id)
    }

    /// Queued pushes.
    pub fn push_count(&self) -> usize {
        self.pushes.len()
    }

    /// Queued pops.
    pub fn pop_count(&self) -> usize {
        self.pops.len()
    }

    /// Returns `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pushes.is_empty() && self.pops.is_empty()
    }
}

impl fmt::Debug for PendingQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingQueue")
            .field("pushes", &self.pushes.iter().map(|p| p.id).collect::<Vec<_>>())
            .field("pops", &self.pops)
            .finish()
    }
}
