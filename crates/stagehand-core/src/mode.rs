// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Mode capability trait, identifiers, and the hook context.

use std::fmt;

use crate::overrides::OverrideRecord;
use crate::pending::{PendingQueue, PopTarget};
use crate::priority_buffer::Priority;
use crate::transfer::Direction;

/// Priority of the built-in default mode; the floor of every stack.
pub const DEFAULT_PRIORITY: Priority = -1;

/// Stack-assigned identity of a pushed mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModeId(u64);

impl ModeId {
    /// Identity of the built-in default mode.
    pub const DEFAULT: Self = Self(0);

    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mode#{}", self.0)
    }
}

/// Where a mode is in its stack lifecycle.
///
/// A mode that was created but never pushed is an owned value the stack has
/// no id for, so there is no `Created` state: ids the stack never handed out
/// report [`Lifetime::Inactive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// Queued by a deferred push; applied on the next tick.
    Pending,
    /// Stored on the stack.
    OnStack,
    /// Removed from the stack, or never handed to it.
    Inactive,
}

/// Pipeline requests a mode hook hands back to the orchestrator.
///
/// Hooks run while the stack is mutably borrowed, so anything that reaches
/// outside the stack is queued here and applied by the orchestrator once the
/// stack operation returns. Stack-local requests such as
/// [`ModeCx::pop_self`] go straight into the stack's pending queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Begin a run of the pipeline for `direction`, owned by `owner`.
    StartPipeline {
        /// Pipeline to start.
        direction: Direction,
        /// Binding mode that represents the run on the stack.
        owner: ModeId,
    },
    /// Stop the pipeline for `direction`.
    StopPipeline {
        /// Pipeline to stop.
        direction: Direction,
    },
}

/// Context passed to every mode lifecycle hook.
#[derive(Debug)]
pub struct ModeCx<'a> {
    id: ModeId,
    directives: &'a mut Vec<Directive>,
    pending: &'a mut PendingQueue,
}

impl<'a> ModeCx<'a> {
    pub(crate) fn new(
        id: ModeId,
        directives: &'a mut Vec<Directive>,
        pending: &'a mut PendingQueue,
    ) -> Self {
        Self {
            id,
            directives,
            pending,
        }
    }

    /// Identity of the mode receiving the hook.
    pub fn id(&self) -> ModeId {
        self.id
    }

    /// Starts the pipeline for `direction` with this mode as its owner.
    pub fn start_pipeline(&mut self, direction: Direction) {
        self.directives.push(Directive::StartPipeline {
            direction,
            owner: self.id,
        });
    }

    /// Stops the pipeline for `direction`.
    pub fn stop_pipeline(&mut self, direction: Direction) {
        self.directives.push(Directive::StopPipeline { direction });
    }

    /// Removes this mode from the stack on the next tick.
    pub fn pop_self(&mut self) {
        self.pending.pop(PopTarget::Id(self.id));
    }
}

/// A prioritized behavioral state that can live on the [`crate::ModeStack`].
///
/// `priority` must be constant for a concrete type and distinct from every
/// other concrete type pushed onto the same stack.
pub trait Mode: Send + 'static {
    /// Fixed priority of this mode type; larger wins.
    fn priority(&self) -> Priority;

    /// Diagnostic name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Survives [`crate::ModeStack::reset`].
    fn persistent(&self) -> bool {
        false
    }

    /// Allows several instances of this type on the stack at once.
    fn multiple_instance(&self) -> bool {
        false
    }

    /// Called once when the mode lands on the stack.
    fn on_pushed(&mut self, _cx: &mut ModeCx<'_>) {}

    /// Called when the mode becomes authoritative.
    fn on_enable(&mut self, _cx: &mut ModeCx<'_>) {}

    /// Called once per tick while the mode is authoritative.
    fn on_tick(&mut self, _cx: &mut ModeCx<'_>) {}

    /// Called when the mode stops being authoritative.
    fn on_disable(&mut self, _cx: &mut ModeCx<'_>) {}

    /// Called once when the mode leaves the stack.
    fn on_terminate(&mut self, _cx: &mut ModeCx<'_>) {}

    /// Writes this mode's contribution into the folded record.
    fn contribute(&self, _record: &mut OverrideRecord) {}

    /// Claims the global time-scale; the highest-priority claim wins.
    fn time_scale(&self) -> Option<f32> {
        None
    }
}

/// Always-present floor of the stack.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMode;

impl Mode for DefaultMode {
    fn priority(&self) -> Priority {
        DEFAULT_PRIORITY
    }

    fn name(&self) -> &'static str {
        "default"
    }

    fn persistent(&self) -> bool {
        true
    }
}
