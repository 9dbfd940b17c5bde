// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Priority-resolved stack of modes.
//!
//! The stack stores modes unordered and resolves the authoritative mode (the
//! entry with the highest priority) through a [`PriorityBuffer`]. Whenever
//! the authoritative mode changes the old one is disabled before the new one
//! is enabled, and every refresh folds all stacked modes into a fresh
//! [`OverrideRecord`] that is published to subscribers.

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::mode::{DefaultMode, Directive, Lifetime, Mode, ModeCx, ModeId};
use crate::overrides::{FoldedState, OverrideRecord, DEFAULT_TIME_SCALE};
use crate::pending::{PendingPush, PendingQueue, PopTarget};
use crate::priority_buffer::{Priority, PriorityBuffer};

/// Errors reported by stack operations. None of them change stack state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StackError {
    /// A single-instance mode of this type is already on the stack or queued.
    #[error("mode {name} is already on the stack")]
    DuplicateMode {
        /// Name of the rejected mode.
        name: &'static str,
    },
    /// Another concrete type already owns this priority.
    #[error("priority {priority} belongs to {owner}; cannot push {incoming}")]
    PriorityConflict {
        /// Contested priority.
        priority: Priority,
        /// Type that claimed the priority first.
        owner: &'static str,
        /// Type that was rejected.
        incoming: &'static str,
    },
    /// The default mode is the floor of the stack and cannot be popped.
    #[error("the default mode cannot be removed")]
    DefaultModeRemoval,
}

/// Read-only description of a stacked mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeInfo {
    /// Identity.
    pub id: ModeId,
    /// Diagnostic name.
    pub name: &'static str,
    /// Priority.
    pub priority: Priority,
    /// Survives resets.
    pub persistent: bool,
}

struct StackEntry {
    type_id: TypeId,
    priority: Priority,
    mode: Box<dyn Mode>,
}

/// Stack of modes plus its one-tick pending queue.
pub struct ModeStack {
    entries: BTreeMap<ModeId, StackEntry>,
    authority: PriorityBuffer<ModeId, ModeId>,
    enabled: Option<ModeId>,
    pending: PendingQueue,
    priority_owners: HashMap<Priority, (TypeId, &'static str)>,
    directives: Vec<Directive>,
    next_id: u64,
    folded: FoldedState,
    publisher: watch::Sender<FoldedState>,
}

impl Default for ModeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeStack {
    /// Creates a stack whose floor is the built-in [`DefaultMode`].
    pub fn new() -> Self {
        Self::with_default_mode(DefaultMode)
    }

    /// Creates a stack whose floor is `default`. It is enabled immediately
    /// and can never be popped.
    pub fn with_default_mode<M: Mode>(default: M) -> Self {
        let folded = FoldedState {
            authoritative: ModeId::DEFAULT,
            record: OverrideRecord::default(),
        };
        let (publisher, _) = watch::channel(folded);
        let mut stack = Self {
            entries: BTreeMap::new(),
            authority: PriorityBuffer::new(ModeId::DEFAULT),
            enabled: None,
            pending: PendingQueue::default(),
            priority_owners: HashMap::new(),
            directives: Vec::new(),
            next_id: ModeId::DEFAULT.value() + 1,
            folded,
            publisher,
        };
        stack.insert(ModeId::DEFAULT, TypeId::of::<M>(), Box::new(default));
        stack.refresh();
        stack
    }

    /// Pushes `mode` immediately and refreshes the authoritative mode.
    pub fn push<M: Mode>(&mut self, mode: M) -> Result<ModeId, StackError> {
        let type_id = TypeId::of::<M>();
        self.admit(type_id, &mode)?;
        let id = self.allocate_id();
        self.insert(id, type_id, Box::new(mode));
        self.refresh();
        Ok(id)
    }

    /// Queues `mode` for the next tick. The returned id is valid immediately
    /// and reports [`Lifetime::Pending`] until the queue is applied.
    pub fn push_deferred<M: Mode>(&mut self, mode: M) -> Result<ModeId, StackError> {
        let type_id = TypeId::of::<M>();
        self.admit(type_id, &mode)?;
        let id = self.allocate_id();
        debug!(%id, mode = mode.name(), "push deferred");
        self.pending.push(PendingPush {
            id,
            type_id,
            mode: Box::new(mode),
        });
        Ok(id)
    }

    /// Removes the mode with identity `id` immediately.
    ///
    /// A mode still waiting in the pending queue is dropped without any hook.
    /// Returns `false` when nothing was removed.
    pub fn pop(&mut self, id: ModeId) -> bool {
        if id == ModeId::DEFAULT {
            error!(error = %StackError::DefaultModeRemoval, "pop rejected");
            return false;
        }
        if self.pending.cancel_push(id) {
            debug!(%id, "pending push cancelled");
            return true;
        }
        if !self.remove(id) {
            debug!(%id, "pop: mode not on stack");
            return false;
        }
        self.refresh();
        true
    }

    /// Removes the first stacked mode of type `M`.
    pub fn pop_by_type<M: Mode>(&mut self) -> Option<ModeId> {
        let Some(id) = self.find_type(TypeId::of::<M>()) else {
            debug!(mode = std::any::type_name::<M>(), "pop: no mode of this type");
            return None;
        };
        if id == ModeId::DEFAULT {
            error!(error = %StackError::DefaultModeRemoval, "pop rejected");
            return None;
        }
        self.remove(id);
        self.refresh();
        Some(id)
    }

    /// Queues removal of `id` for the next tick.
    pub fn pop_deferred(&mut self, id: ModeId) {
        self.pending.pop(PopTarget::Id(id));
    }

    /// Queues removal of the first stacked mode of type `M` for the next tick.
    pub fn pop_deferred_by_type<M: Mode>(&mut self) {
        self.pending.pop(PopTarget::Type(TypeId::of::<M>()));
    }

    /// Applies every queued push, then every queued pop, then refreshes once.
    ///
    /// Returns `true` if anything was queued.
    pub fn apply_pending(&mut self) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        let (pushes, pops) = self.pending.take();
        for PendingPush { id, type_id, mode } in pushes {
            // Re-check: a direct push may have landed since submission.
            match self.admit(type_id, mode.as_ref()) {
                Ok(()) => self.insert(id, type_id, mode),
                Err(err) => warn!(%id, %err, "deferred push dropped"),
            }
        }
        for target in pops {
            let id = match target {
                PopTarget::Id(id) => Some(id),
                PopTarget::Type(type_id) => self.find_type(type_id),
            };
            match id {
                Some(ModeId::DEFAULT) => {
                    error!(error = %StackError::DefaultModeRemoval, "deferred pop rejected");
                }
                Some(id) => {
                    if !self.remove(id) {
                        debug!(%id, "deferred pop: mode not on stack");
                    }
                }
                None => debug!(?target, "deferred pop: no matching mode"),
            }
        }
        self.refresh();
        true
    }

    /// One stack tick: apply the pending queue, run the authoritative mode's
    /// per-tick hook, then fold again.
    pub fn tick(&mut self) {
        self.apply_pending();
        let id = self.authoritative();
        self.call_hook(id, |m, cx| {
            m.on_tick(cx);
        });
        self.publish();
    }

    /// Removes every non-persistent mode, then refreshes once.
    pub fn reset(&mut self) -> usize {
        let transient: Vec<ModeId> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.mode.persistent())
            .map(|(id, _)| *id)
            .collect();
        for id in &transient {
            self.remove(*id);
        }
        if !transient.is_empty() {
            debug!(removed = transient.len(), "stack reset");
        }
        self.refresh();
        transient.len()
    }

    /// Re-resolves the authoritative mode, runs disable/enable hooks when it
    /// changed, then folds and publishes.
    pub fn refresh(&mut self) {
        let next = *self.authority.value();
        if self.enabled != Some(next) {
            if let Some(prev) = self.enabled.take() {
                self.call_hook(prev, |m, cx| {
                    m.on_disable(cx);
                });
            }
            debug!(id = %next, mode = self.name_of(next), "authoritative mode changed");
            self.enabled = Some(next);
            self.call_hook(next, |m, cx| {
                m.on_enable(cx);
            });
        }
        self.publish();
    }

    /// Folds every stacked mode into a fresh record.
    ///
    /// Record fields are written lowest priority first, so the highest
    /// priority writer wins any contested field. The time-scale is resolved
    /// separately: the claim with the highest priority wins and ties keep the
    /// first claim seen.
    pub fn fold(&self) -> OverrideRecord {
        let mut ordered: Vec<(&ModeId, &StackEntry)> = self.entries.iter().collect();
        ordered.sort_by_key(|(id, e)| (e.priority, **id));

        let mut record = OverrideRecord::default();
        for (_, entry) in &ordered {
            entry.mode.contribute(&mut record);
        }

        let mut scale: Option<(f32, Priority)> = None;
        for entry in self.entries.values() {
            let Some(value) = entry.mode.time_scale() else {
                continue;
            };
            match scale {
                Some((_, best)) if best >= entry.priority => {}
                _ => scale = Some((value, entry.priority)),
            }
        }
        record.time_scale = scale.map_or(DEFAULT_TIME_SCALE, |(value, _)| value);
        record
    }

    /// Subscribes to folded state; the receiver already holds the current value.
    pub fn subscribe(&self) -> watch::Receiver<FoldedState> {
        self.publisher.subscribe()
    }

    /// Most recently published fold.
    pub fn folded(&self) -> FoldedState {
        self.folded
    }

    /// Current authoritative mode.
    pub fn authoritative(&self) -> ModeId {
        *self.authority.value()
    }

    /// Name of the current authoritative mode.
    pub fn authoritative_name(&self) -> &'static str {
        self.name_of(self.authoritative())
    }

    /// Lifecycle state of `id`.
    pub fn lifetime(&self, id: ModeId) -> Lifetime {
        if self.entries.contains_key(&id) {
            Lifetime::OnStack
        } else if self.pending.contains_id(id) {
            Lifetime::Pending
        } else {
            Lifetime::Inactive
        }
    }

    /// Returns `true` if a mode of type `M` is on the stack.
    pub fn contains<M: Mode>(&self) -> bool {
        self.find_type(TypeId::of::<M>()).is_some()
    }

    /// Returns `true` if a mode of type `M` is on the stack or queued.
    pub fn is_present<M: Mode>(&self) -> bool {
        let type_id = TypeId::of::<M>();
        self.find_type(type_id).is_some() || self.pending.contains_type(type_id)
    }

    /// Identity of the first stacked or queued mode of type `M`.
    pub fn find<M: Mode>(&self) -> Option<ModeId> {
        let type_id = TypeId::of::<M>();
        self.find_type(type_id)
            .or_else(|| self.pending.find_type(type_id))
    }

    /// Number of stacked modes, including the default.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`: the default mode cannot be removed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stacked modes, highest priority first.
    pub fn modes(&self) -> Vec<ModeInfo> {
        let mut out: Vec<ModeInfo> = self
            .entries
            .iter()
            .map(|(id, e)| ModeInfo {
                id: *id,
                name: e.mode.name(),
                priority: e.priority,
                persistent: e.mode.persistent(),
            })
            .collect();
        out.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        out
    }

    /// The one-tick pending queue.
    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    /// Pipeline directives raised by hooks since the last call.
    pub(crate) fn take_directives(&mut self) -> Vec<Directive> {
        std::mem::take(&mut self.directives)
    }

    fn allocate_id(&mut self) -> ModeId {
        let id = ModeId::from_raw(self.next_id);
        self.next_id += 1;
        id
    }

    fn admit(&self, type_id: TypeId, mode: &dyn Mode) -> Result<(), StackError> {
        let priority = mode.priority();
        if let Some((owner_type, owner)) = self.priority_owners.get(&priority) {
            if *owner_type != type_id {
                let err = StackError::PriorityConflict {
                    priority,
                    owner: *owner,
                    incoming: mode.name(),
                };
                error!(%err, "push rejected");
                return Err(err);
            }
        }
        if !mode.multiple_instance()
            && (self.find_type(type_id).is_some() || self.pending.contains_type(type_id))
        {
            let err = StackError::DuplicateMode { name: mode.name() };
            warn!(%err, "push rejected");
            return Err(err);
        }
        Ok(())
    }

    fn insert(&mut self, id: ModeId, type_id: TypeId, mode: Box<dyn Mode>) {
        let priority = mode.priority();
        self.priority_owners
            .entry(priority)
            .or_insert((type_id, mode.name()));
        debug!(%id, mode = mode.name(), priority, "mode pushed");
        self.entries.insert(
            id,
            StackEntry {
                type_id,
                priority,
                mode,
            },
        );
        self.authority.push(id, id, priority);
        self.call_hook(id, |m, cx| {
            m.on_pushed(cx);
        });
    }

    fn remove(&mut self, id: ModeId) -> bool {
        let Some(mut entry) = self.entries.remove(&id) else {
            return false;
        };
        self.authority.pop(&id);
        if self.enabled == Some(id) {
            self.enabled = None;
            entry
                .mode
                .on_disable(&mut ModeCx::new(id, &mut self.directives, &mut self.pending));
        }
        entry
            .mode
            .on_terminate(&mut ModeCx::new(id, &mut self.directives, &mut self.pending));
        debug!(%id, mode = entry.mode.name(), "mode removed");
        true
    }

    fn find_type(&self, type_id: TypeId) -> Option<ModeId> {
        self.entries
            .iter()
            .find(|(_, e)| e.type_id == type_id)
            .map(|(id, _)| *id)
    }

    fn name_of(&self, id: ModeId) -> &'static str {
        self.entries.get(&id).map_or("<none>", |e| e.mode.name())
    }

    fn call_hook(&mut self, id: ModeId, hook: impl FnOnce(&mut dyn Mode, &mut ModeCx<'_>)) {
        if let Some(entry) = self.entries.get_mut(&id) {
            let mut cx = ModeCx::new(id, &mut self.directives, &mut self.pending);
            hook(entry.mode.as_mut(), &mut cx);
        }
    }

    fn publish(&mut self) {
        let next = FoldedState {
            authoritative: self.authoritative(),
            record: self.fold(),
        };
        self.folded = next;
        self.publisher.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
