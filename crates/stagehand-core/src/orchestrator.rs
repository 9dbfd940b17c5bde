// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Context object that owns the mode stack and both pipelines.
//!
//! Construct one at application start and call [`Orchestrator::tick`] once
//! per application tick. A tick applies the stack's pending queue, advances
//! the Load pipeline and then the Unload pipeline, and publishes the folded
//! override record. Mode hooks and pipeline results are routed through here,
//! which is how a binding mode landing on the stack starts its pipeline and
//! how a completed pipeline removes its binding mode.

use std::time::Instant;

use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, trace, warn};

use crate::binding::{binding_priority, LoadingMode, UnloadingMode};
use crate::mode::{Directive, Lifetime, Mode, ModeId};
use crate::mode_stack::{ModeStack, StackError};
use crate::overrides::{FoldedState, TimeScaleHold};
use crate::readiness::ReadinessRegistry;
use crate::transfer::{
    BundleId, DefaultBehavior, Direction, LoadedSet, Phase, PipelineAction, PipelineBehavior,
    PipelineEvent, PipelineTimings, TickInput, TransferHost, TransferMode, TransferPipeline,
    TransferRequest,
};

/// Construction-time settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Settle and throttle delays shared by both pipelines.
    pub timings: PipelineTimings,
    /// Capacity of the pipeline event channel.
    pub event_capacity: usize,
    /// Bundles exclusive loads never unload.
    pub core_bundles: Vec<BundleId>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timings: PipelineTimings::default(),
            event_capacity: 256,
            core_bundles: Vec::new(),
        }
    }
}

/// Owns the runtime core; see the module docs.
pub struct Orchestrator {
    stack: ModeStack,
    load: TransferPipeline,
    unload: TransferPipeline,
    load_hold: TimeScaleHold,
    unload_hold: TimeScaleHold,
    readiness: ReadinessRegistry,
    loaded: LoadedSet,
    host: Box<dyn TransferHost>,
    events: broadcast::Sender<PipelineEvent>,
    ticks: u64,
}

impl Orchestrator {
    /// Creates an orchestrator whose pipelines use [`DefaultBehavior`].
    pub fn new<H>(settings: Settings, host: H) -> Self
    where
        H: TransferHost + 'static,
    {
        Self::with_behaviors(settings, host, DefaultBehavior, DefaultBehavior)
    }

    /// Creates an orchestrator with explicit per-direction behaviors.
    pub fn with_behaviors<H, L, U>(settings: Settings, host: H, load: L, unload: U) -> Self
    where
        H: TransferHost + 'static,
        L: PipelineBehavior + 'static,
        U: PipelineBehavior + 'static,
    {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        let load_hold = TimeScaleHold::default();
        let unload_hold = TimeScaleHold::default();
        info!(
            settle_ms = settings.timings.settle.as_millis(),
            throttle_ms = settings.timings.throttle.as_millis(),
            core_bundles = settings.core_bundles.len(),
            "orchestrator initialised"
        );
        Self {
            stack: ModeStack::new(),
            load: TransferPipeline::new(
                Direction::Load,
                Box::new(load),
                load_hold.clone(),
                settings.timings,
                events.clone(),
            ),
            unload: TransferPipeline::new(
                Direction::Unload,
                Box::new(unload),
                unload_hold.clone(),
                settings.timings,
                events.clone(),
            ),
            load_hold,
            unload_hold,
            readiness: ReadinessRegistry::default(),
            loaded: LoadedSet::with_core(settings.core_bundles),
            host: Box::new(host),
            events,
            ticks: 0,
        }
    }

    /// Advances everything by one application tick.
    pub fn tick(&mut self, now: Instant) {
        self.ticks += 1;
        trace!(tick = self.ticks, "tick");
        self.stack.tick();
        self.drain_directives();

        self.advance(Direction::Load, now);
        self.advance(Direction::Unload, now);

        // Behaviors may have moved a time-scale hold; refold.
        self.stack.refresh();
        self.drain_directives();
    }

    /// Queues a load of `bundle` and makes sure a Load run exists for it.
    pub fn request_load(&mut self, bundle: impl Into<BundleId>, mode: TransferMode) {
        self.request(
            Direction::Load,
            TransferRequest {
                bundle: bundle.into(),
                mode,
            },
        );
    }

    /// Queues an unload of `bundle` and makes sure an Unload run exists for it.
    pub fn request_unload(&mut self, bundle: impl Into<BundleId>) {
        self.request(Direction::Unload, TransferRequest::additive(bundle));
    }

    /// Queues `request` for `direction`.
    ///
    /// The first request creates the direction's binding mode (applied on the
    /// next tick); later requests join the run that mode represents.
    pub fn request(&mut self, direction: Direction, request: TransferRequest) {
        self.pipeline_mut(direction).enqueue(request);
        self.ensure_binding(direction);
    }

    /// Cancels the run for `direction` and removes its binding mode.
    ///
    /// The in-flight host operation is dropped before this returns and queued
    /// requests are discarded. Returns `false` if the pipeline was already
    /// inactive.
    pub fn cancel(&mut self, direction: Direction) -> bool {
        let pipeline = match direction {
            Direction::Load => &mut self.load,
            Direction::Unload => &mut self.unload,
        };
        let stopped = pipeline.stop(&self.loaded);
        let dropped = pipeline.discard_requests();
        if dropped > 0 {
            debug!(%direction, dropped, "queued requests discarded");
        }
        // Covers a binding mode still waiting in the pending queue too.
        if let Some(id) = self.binding_id(direction) {
            self.stack.pop(id);
        }
        self.drain_directives();
        stopped
    }

    /// Pushes `mode` immediately.
    pub fn push_mode<M: Mode>(&mut self, mode: M) -> Result<ModeId, StackError> {
        let result = self.stack.push(mode);
        self.drain_directives();
        result
    }

    /// Queues `mode` for the next tick.
    pub fn push_mode_deferred<M: Mode>(&mut self, mode: M) -> Result<ModeId, StackError> {
        let result = self.stack.push_deferred(mode);
        self.drain_directives();
        result
    }

    /// Removes `id` immediately.
    pub fn pop_mode(&mut self, id: ModeId) -> bool {
        let removed = self.stack.pop(id);
        self.drain_directives();
        removed
    }

    /// Removes the first stacked mode of type `M` immediately.
    pub fn pop_mode_by_type<M: Mode>(&mut self) -> Option<ModeId> {
        let removed = self.stack.pop_by_type::<M>();
        self.drain_directives();
        removed
    }

    /// Queues removal of `id` for the next tick.
    pub fn pop_mode_deferred(&mut self, id: ModeId) {
        self.stack.pop_deferred(id);
    }

    /// Queues removal of the first stacked mode of type `M` for the next tick.
    pub fn pop_mode_deferred_by_type<M: Mode>(&mut self) {
        self.stack.pop_deferred_by_type::<M>();
    }

    /// The mode stack.
    pub fn stack(&self) -> &ModeStack {
        &self.stack
    }

    /// Pipeline for `direction`.
    pub fn pipeline(&self, direction: Direction) -> &TransferPipeline {
        match direction {
            Direction::Load => &self.load,
            Direction::Unload => &self.unload,
        }
    }

    /// Phase of the pipeline for `direction`.
    pub fn phase(&self, direction: Direction) -> Phase {
        self.pipeline(direction).phase()
    }

    /// Readiness processors.
    pub fn readiness(&self) -> &ReadinessRegistry {
        &self.readiness
    }

    /// Readiness processors, for registration.
    pub fn readiness_mut(&mut self) -> &mut ReadinessRegistry {
        &mut self.readiness
    }

    /// Bundles loaded so far.
    pub fn loaded(&self) -> &LoadedSet {
        &self.loaded
    }

    /// Marks `bundle` as core: exclusive loads never unload it.
    pub fn mark_core(&mut self, bundle: impl Into<BundleId>) {
        self.loaded.mark_core(bundle);
    }

    /// Time-scale slot reported by the binding mode of `direction`.
    pub fn time_scale_hold(&self, direction: Direction) -> &TimeScaleHold {
        match direction {
            Direction::Load => &self.load_hold,
            Direction::Unload => &self.unload_hold,
        }
    }

    /// Subscribes to pipeline events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Subscribes to folded overrides; the receiver holds the current value.
    pub fn subscribe_overrides(&self) -> watch::Receiver<FoldedState> {
        self.stack.subscribe()
    }

    /// Ticks processed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// `true` when both pipelines are inactive with empty queues and the
    /// stack has nothing pending.
    pub fn is_idle(&self) -> bool {
        !self.load.phase().is_active()
            && !self.unload.phase().is_active()
            && self.load.requests().is_empty()
            && self.unload.requests().is_empty()
            && self.stack.pending().is_empty()
    }

    fn pipeline_mut(&mut self, direction: Direction) -> &mut TransferPipeline {
        match direction {
            Direction::Load => &mut self.load,
            Direction::Unload => &mut self.unload,
        }
    }

    fn binding_id(&self, direction: Direction) -> Option<ModeId> {
        match direction {
            Direction::Load => self.stack.find::<LoadingMode>(),
            Direction::Unload => self.stack.find::<UnloadingMode>(),
        }
    }

    fn ensure_binding(&mut self, direction: Direction) {
        if self.binding_id(direction).is_some() {
            return;
        }
        let result = match direction {
            Direction::Load => self
                .stack
                .push_deferred(LoadingMode::new(self.load_hold.clone())),
            Direction::Unload => self
                .stack
                .push_deferred(UnloadingMode::new(self.unload_hold.clone())),
        };
        match result {
            Ok(id) => debug!(%direction, %id, "binding mode queued"),
            Err(err) => {
                // Without a binding mode nothing would ever run the queue.
                let dropped = self.pipeline_mut(direction).discard_requests();
                error!(
                    %direction,
                    %err,
                    priority = binding_priority(direction),
                    dropped,
                    "could not queue binding mode; requests discarded"
                );
            }
        }
    }

    fn advance(&mut self, direction: Direction, now: Instant) {
        let sibling = self.pipeline(direction.opposite()).view();
        let authoritative = self.stack.authoritative();
        let pipeline = match direction {
            Direction::Load => &mut self.load,
            Direction::Unload => &mut self.unload,
        };
        let mut input = TickInput {
            now,
            sibling,
            authoritative,
            readiness: &self.readiness,
            host: &mut *self.host,
            loaded: &mut self.loaded,
        };
        let actions = pipeline.advance(&mut input);
        for action in actions {
            self.apply_action(direction, action);
        }
    }

    fn apply_action(&mut self, direction: Direction, action: PipelineAction) {
        match action {
            PipelineAction::ResetTransientModes => {
                let removed = self.stack.reset();
                debug!(removed, "transient modes cleared for load");
            }
            PipelineAction::NestedUnload(bundles) => {
                for bundle in bundles {
                    self.unload.enqueue(TransferRequest::additive(bundle));
                }
                self.ensure_binding(Direction::Unload);
            }
            PipelineAction::Complete { owner } => match owner {
                Some(id) if self.stack.lifetime(id) == Lifetime::OnStack => {
                    // The owner's termination hook stops the pipeline.
                    self.stack.pop(id);
                }
                _ => {
                    warn!(%direction, "completed run has no owner on the stack");
                    self.stop_pipeline(direction);
                }
            },
        }
        self.drain_directives();
    }

    fn drain_directives(&mut self) {
        loop {
            let directives = self.stack.take_directives();
            if directives.is_empty() {
                break;
            }
            for directive in directives {
                self.apply_directive(directive);
            }
        }
    }

    fn apply_directive(&mut self, directive: Directive) {
        match directive {
            Directive::StartPipeline { direction, owner } => {
                let pipeline = match direction {
                    Direction::Load => &mut self.load,
                    Direction::Unload => &mut self.unload,
                };
                pipeline.start(owner, &self.loaded);
            }
            Directive::StopPipeline { direction } => self.stop_pipeline(direction),
        }
    }

    fn stop_pipeline(&mut self, direction: Direction) {
        let pipeline = match direction {
            Direction::Load => &mut self.load,
            Direction::Unload => &mut self.unload,
        };
        if pipeline.stop(&self.loaded) && !pipeline.requests().is_empty() {
            debug!(%direction, queued = pipeline.requests().len(), "requests arrived late; scheduling another run");
            self.ensure_binding(direction);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferOp;

    struct Noop;

    impl TransferHost for Noop {
        fn begin_transfer(&mut self, _: Direction, _: &TransferRequest) -> TransferOp {
            TransferOp::ready()
        }
    }

    #[test]
    fn repeated_requests_share_one_binding_mode() {
        let mut orch = Orchestrator::new(Settings::default(), Noop);
        orch.request_unload("a");
        orch.request_unload("b");
        assert_eq!(orch.stack().pending().push_count(), 1);

        orch.tick(Instant::now());
        assert!(orch.stack().contains::<UnloadingMode>());
        assert_eq!(orch.phase(Direction::Unload), Phase::Start);
        assert_eq!(orch.pipeline(Direction::Unload).requests().len(), 2);
    }

    #[test]
    fn cancel_before_first_tick_drops_the_queued_binding() {
        let mut orch = Orchestrator::new(Settings::default(), Noop);
        orch.request_load("a", TransferMode::Additive);
        assert!(!orch.cancel(Direction::Load));
        assert!(orch.stack().pending().is_empty());
        assert!(!orch.stack().is_present::<LoadingMode>());
    }

    #[test]
    fn binding_mode_can_remove_itself_through_its_context() {
        struct OneShot;
        impl Mode for OneShot {
            fn priority(&self) -> crate::Priority {
                42
            }
            fn on_enable(&mut self, cx: &mut crate::ModeCx<'_>) {
                cx.pop_self();
            }
        }
        let mut orch = Orchestrator::new(Settings::default(), Noop);
        let id = orch.push_mode(OneShot).unwrap();
        assert_eq!(orch.stack().authoritative(), id);
        orch.tick(Instant::now());
        assert_eq!(orch.stack().authoritative(), ModeId::DEFAULT);
    }

    struct Menu;

    impl Mode for Menu {
        fn priority(&self) -> crate::Priority {
            7
        }
    }

    #[test]
    fn deferred_push_and_pop_land_on_the_next_tick() {
        let mut orch = Orchestrator::new(Settings::default(), Noop);
        let id = orch.push_mode_deferred(Menu).unwrap();
        assert_eq!(orch.stack().lifetime(id), Lifetime::Pending);
        assert_eq!(orch.stack().authoritative(), ModeId::DEFAULT);

        orch.tick(Instant::now());
        assert_eq!(orch.stack().authoritative(), id);

        orch.pop_mode_deferred(id);
        assert_eq!(orch.stack().lifetime(id), Lifetime::OnStack);
        orch.tick(Instant::now());
        assert_eq!(orch.stack().lifetime(id), Lifetime::Inactive);
    }

    #[test]
    fn pop_by_type_immediate_and_deferred() {
        let mut orch = Orchestrator::new(Settings::default(), Noop);
        let id = orch.push_mode(Menu).unwrap();
        assert_eq!(orch.pop_mode_by_type::<Menu>(), Some(id));
        assert_eq!(orch.pop_mode_by_type::<Menu>(), None);

        orch.push_mode(Menu).unwrap();
        orch.pop_mode_deferred_by_type::<Menu>();
        assert!(orch.stack().contains::<Menu>());
        orch.tick(Instant::now());
        assert!(!orch.stack().contains::<Menu>());
        assert_eq!(orch.stack().authoritative(), ModeId::DEFAULT);
    }

    #[test]
    fn rejected_binding_mode_discards_its_requests() {
        struct Squatter;
        impl Mode for Squatter {
            fn priority(&self) -> crate::Priority {
                binding_priority(Direction::Load)
            }
        }
        let mut orch = Orchestrator::new(Settings::default(), Noop);
        orch.push_mode(Squatter).unwrap();

        orch.request_load("a", TransferMode::Additive);
        assert!(!orch.stack().is_present::<LoadingMode>());
        assert!(orch.pipeline(Direction::Load).requests().is_empty());
        assert!(orch.is_idle());

        orch.tick(Instant::now());
        assert_eq!(orch.phase(Direction::Load), Phase::Inactive);
        assert!(!orch.loaded().contains(&BundleId::new("a")));
    }
}
