// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ordered phase state machine that moves queued bundles in one direction.
//!
//! A pipeline is advanced once per application tick. Each call runs steps
//! until it reaches a suspension point, so every wait is an explicit
//! [`Step`]:
//!
//! | step        | phase               | resumes when                                  |
//! |-------------|---------------------|-----------------------------------------------|
//! | `Gate`      | `Prepare`           | sibling not actively running and `may_start`  |
//! | `Settle`    | `Start`             | settle deadline passed (at least one tick)    |
//! | `Nested`    | `Running`           | sibling `Inactive` and its queue empty        |
//! | `Transfer`  | `Running`           | host operation resolved                       |
//! | `Throttle`  | `Running`           | inter-transfer deadline passed                |
//! | `Reclaim`   | `FreeingMemory`     | host memory reclaim resolved                  |
//! | `Readiness` | `AwaitingReadiness` | no readiness processor busy                   |
//! | `Authority` | `Ready`             | owner authoritative and `may_complete`        |
//! | `Done`      | `Complete`          | stopped by the owning mode's termination      |
//!
//! Conditions that already hold do not cost a tick; deadlines always do.

use std::task::Poll;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::behavior::{BehaviorCx, PipelineBehavior, TransferProgress};
use super::events::PipelineEvent;
use super::host::{TransferError, TransferHost, TransferOp};
use super::phase::{Direction, Phase};
use super::request::{BundleId, LoadedSet, TransferMode, TransferRequest};
use crate::mode::ModeId;
use crate::overrides::TimeScaleHold;
use crate::readiness::ReadinessRegistry;

/// Fixed delays applied by every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineTimings {
    /// Pause between `Start` and the first transfer.
    pub settle: Duration,
    /// Pause after each transfer before the next one begins.
    pub throttle: Duration,
}

impl Default for PipelineTimings {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(100),
            throttle: Duration::from_millis(20),
        }
    }
}

/// What a pipeline can observe about its sibling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct SiblingView {
    pub(crate) phase: Phase,
    pub(crate) actively_running: bool,
    pub(crate) awaiting_sibling: bool,
    pub(crate) has_requests: bool,
}

/// Everything a pipeline reads or mutates during one advance.
pub(crate) struct TickInput<'a> {
    pub(crate) now: Instant,
    pub(crate) sibling: SiblingView,
    pub(crate) authoritative: ModeId,
    pub(crate) readiness: &'a ReadinessRegistry,
    pub(crate) host: &'a mut dyn TransferHost,
    pub(crate) loaded: &'a mut LoadedSet,
}

/// Work a pipeline hands back to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PipelineAction {
    /// Pop every non-persistent mode.
    ResetTransientModes,
    /// Unload these bundles and let the caller wait for the sibling run.
    NestedUnload(Vec<BundleId>),
    /// The run reached `Complete`; its owner must leave the stack.
    Complete { owner: Option<ModeId> },
}

enum Step {
    Idle,
    Gate,
    Settle {
        until: Instant,
    },
    Next,
    Nested {
        observed: bool,
    },
    Transfer {
        op: TransferOp,
    },
    Throttle {
        until: Instant,
        outcome: Result<(), TransferError>,
    },
    Reclaim {
        op: TransferOp,
    },
    Readiness,
    Authority,
    Done,
}

enum Flow {
    Continue,
    Suspend,
}

/// One direction's transfer pipeline.
pub struct TransferPipeline {
    direction: Direction,
    phase: Phase,
    step: Step,
    owner: Option<ModeId>,
    requests: Vec<TransferRequest>,
    cursor: usize,
    exclusive_cleared: bool,
    behavior: Box<dyn PipelineBehavior>,
    time_scale: TimeScaleHold,
    timings: PipelineTimings,
    events: broadcast::Sender<PipelineEvent>,
    runs: u64,
}

impl TransferPipeline {
    pub(crate) fn new(
        direction: Direction,
        behavior: Box<dyn PipelineBehavior>,
        time_scale: TimeScaleHold,
        timings: PipelineTimings,
        events: broadcast::Sender<PipelineEvent>,
    ) -> Self {
        Self {
            direction,
            phase: Phase::Inactive,
            step: Step::Idle,
            owner: None,
            requests: Vec::new(),
            cursor: 0,
            exclusive_cleared: false,
            behavior,
            time_scale,
            timings,
            events,
            runs: 0,
        }
    }

    /// Direction this pipeline moves bundles in.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Binding mode that owns the current run.
    pub fn owner(&self) -> Option<ModeId> {
        self.owner
    }

    /// Requests queued for the current or next run, processed ones included.
    pub fn requests(&self) -> &[TransferRequest] {
        &self.requests
    }

    /// Requests not yet transferred.
    pub fn remaining(&self) -> &[TransferRequest] {
        &self.requests[self.cursor.min(self.requests.len())..]
    }

    /// Number of runs started so far.
    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// `true` while the run holds the transfer slot: in `Start` or `Running`
    /// and not suspended on a nested sibling run.
    pub fn is_actively_running(&self) -> bool {
        matches!(self.phase, Phase::Start | Phase::Running) && !self.is_awaiting_sibling()
    }

    /// `true` while the run waits for a nested sibling run to finish.
    pub fn is_awaiting_sibling(&self) -> bool {
        matches!(self.step, Step::Nested { .. })
    }

    pub(crate) fn view(&self) -> SiblingView {
        SiblingView {
            phase: self.phase,
            actively_running: self.is_actively_running(),
            awaiting_sibling: self.is_awaiting_sibling(),
            has_requests: !self.requests.is_empty(),
        }
    }

    pub(crate) fn enqueue(&mut self, request: TransferRequest) {
        debug!(direction = %self.direction, bundle = %request.bundle, mode = ?request.mode, "request queued");
        self.requests.push(request);
    }

    /// Drops every queued request without touching the run state.
    pub(crate) fn discard_requests(&mut self) -> usize {
        let dropped = self.requests.len();
        self.requests.clear();
        dropped
    }

    /// Begins a run owned by `owner`. A run already in progress is cancelled
    /// and superseded; its untransferred requests carry over.
    pub(crate) fn start(&mut self, owner: ModeId, loaded: &LoadedSet) {
        if self.phase.is_active() {
            warn!(
                direction = %self.direction,
                phase = %self.phase,
                "pipeline restarted mid-run; superseding previous run"
            );
            self.drop_processed();
            self.abort(loaded);
        }
        self.owner = Some(owner);
        self.runs += 1;
        info!(direction = %self.direction, run = self.runs, %owner, queued = self.requests.len(), "run requested");
        self.enter(Phase::Request);
        let mut cx = BehaviorCx::new(self.direction, &self.time_scale, loaded);
        self.behavior.setup(&self.requests, &mut cx);
        self.enter(Phase::Prepare);
        self.step = Step::Gate;
    }

    /// Stops the pipeline.
    ///
    /// From `Complete` this is the normal end of a run: processed requests
    /// are dropped and late arrivals stay queued. From any other active
    /// phase the run is cancelled: the in-flight operation is dropped before
    /// this returns and the whole queue is discarded. From `Inactive` it does
    /// nothing. Returns `true` if a run was ended.
    pub(crate) fn stop(&mut self, loaded: &LoadedSet) -> bool {
        match self.phase {
            Phase::Inactive => false,
            Phase::Complete => {
                let mut cx = BehaviorCx::new(self.direction, &self.time_scale, loaded);
                self.behavior.on_stop(&mut cx);
                self.drop_processed();
                self.finish(false);
                true
            }
            phase => {
                warn!(direction = %self.direction, %phase, "pipeline stopped before completion");
                self.requests.clear();
                self.abort(loaded);
                true
            }
        }
    }

    fn drop_processed(&mut self) {
        let processed = self.cursor.min(self.requests.len());
        self.requests = self.requests.split_off(processed);
    }

    fn abort(&mut self, loaded: &LoadedSet) {
        // Dropping the step drops any in-flight host operation.
        self.step = Step::Idle;
        let mut cx = BehaviorCx::new(self.direction, &self.time_scale, loaded);
        self.behavior.on_cancel(&mut cx);
        self.finish(true);
    }

    fn finish(&mut self, cancelled: bool) {
        self.step = Step::Idle;
        self.cursor = 0;
        self.exclusive_cleared = false;
        self.owner = None;
        self.enter(Phase::Inactive);
        self.emit(PipelineEvent::Stopped {
            direction: self.direction,
            cancelled,
        });
        info!(direction = %self.direction, run = self.runs, cancelled, "run stopped");
    }

    /// Runs steps until the pipeline suspends.
    pub(crate) fn advance(&mut self, input: &mut TickInput<'_>) -> Vec<PipelineAction> {
        let mut actions = Vec::new();
        loop {
            let step = std::mem::replace(&mut self.step, Step::Idle);
            match self.run_step(step, input, &mut actions) {
                Flow::Continue => {}
                Flow::Suspend => break,
            }
        }
        actions
    }

    fn run_step(
        &mut self,
        step: Step,
        input: &mut TickInput<'_>,
        actions: &mut Vec<PipelineAction>,
    ) -> Flow {
        match step {
            Step::Idle => Flow::Suspend,
            Step::Gate => {
                if input.sibling.actively_running {
                    self.step = Step::Gate;
                    return Flow::Suspend;
                }
                let mut cx = BehaviorCx::new(self.direction, &self.time_scale, input.loaded);
                if !self.behavior.may_start(&mut cx) {
                    self.step = Step::Gate;
                    return Flow::Suspend;
                }
                self.enter(Phase::Start);
                let mut cx = BehaviorCx::new(self.direction, &self.time_scale, input.loaded);
                self.behavior.on_start(&mut cx);
                self.emit(PipelineEvent::Started {
                    direction: self.direction,
                });
                self.step = Step::Settle {
                    until: input.now + self.timings.settle,
                };
                Flow::Suspend
            }
            Step::Settle { until } => {
                if input.now < until {
                    self.step = Step::Settle { until };
                    return Flow::Suspend;
                }
                if self.direction == Direction::Load {
                    actions.push(PipelineAction::ResetTransientModes);
                }
                self.enter(Phase::Running);
                self.step = Step::Next;
                Flow::Continue
            }
            Step::Next => self.next_request(input, actions),
            Step::Nested { observed } => {
                let sibling_active = input.sibling.phase.is_active();
                let observed = observed || sibling_active;
                // A sibling that never started and has nothing queued was
                // cancelled before it ran.
                let finished = !sibling_active && (observed || !input.sibling.has_requests);
                if finished {
                    debug!(direction = %self.direction, "nested sibling run finished");
                    self.step = Step::Next;
                    Flow::Continue
                } else {
                    self.step = Step::Nested { observed };
                    Flow::Suspend
                }
            }
            Step::Transfer { mut op } => match op.poll_once() {
                Poll::Pending => {
                    self.step = Step::Transfer { op };
                    Flow::Suspend
                }
                Poll::Ready(outcome) => {
                    self.step = Step::Throttle {
                        until: input.now + self.timings.throttle,
                        outcome,
                    };
                    Flow::Suspend
                }
            },
            Step::Throttle { until, outcome } => {
                if input.now < until {
                    self.step = Step::Throttle { until, outcome };
                    return Flow::Suspend;
                }
                self.complete_transfer(outcome, input.loaded);
                self.step = Step::Next;
                Flow::Continue
            }
            Step::Reclaim { mut op } => match op.poll_once() {
                Poll::Pending => {
                    self.step = Step::Reclaim { op };
                    Flow::Suspend
                }
                Poll::Ready(outcome) => {
                    if let Err(err) = outcome {
                        warn!(direction = %self.direction, %err, "memory reclaim failed");
                    }
                    self.enter(Phase::AwaitingReadiness);
                    self.step = Step::Readiness;
                    Flow::Continue
                }
            },
            Step::Readiness => {
                if input.readiness.any_busy() {
                    self.step = Step::Readiness;
                    return Flow::Suspend;
                }
                self.enter(Phase::Ready);
                let mut cx = BehaviorCx::new(self.direction, &self.time_scale, input.loaded);
                self.behavior.on_ready(&mut cx);
                self.step = Step::Authority;
                Flow::Continue
            }
            Step::Authority => {
                // A sibling suspended on this run outranks it on the stack, so
                // its wait stands in for authority.
                let authoritative = self.owner == Some(input.authoritative)
                    || input.sibling.awaiting_sibling;
                let mut cx = BehaviorCx::new(self.direction, &self.time_scale, input.loaded);
                if !(authoritative && self.behavior.may_complete(&mut cx)) {
                    self.step = Step::Authority;
                    return Flow::Suspend;
                }
                self.enter(Phase::Complete);
                actions.push(PipelineAction::Complete { owner: self.owner });
                self.step = Step::Done;
                Flow::Suspend
            }
            Step::Done => {
                self.step = Step::Done;
                Flow::Suspend
            }
        }
    }

    fn next_request(
        &mut self,
        input: &mut TickInput<'_>,
        actions: &mut Vec<PipelineAction>,
    ) -> Flow {
        let Some(request) = self.requests.get(self.cursor).cloned() else {
            self.enter(Phase::FreeingMemory);
            self.step = Step::Reclaim {
                op: input.host.reclaim_memory(),
            };
            return Flow::Continue;
        };

        if self.direction == Direction::Load
            && request.mode == TransferMode::Exclusive
            && !self.exclusive_cleared
        {
            self.exclusive_cleared = true;
            let victims = input.loaded.replaceable();
            if !victims.is_empty() {
                info!(
                    bundle = %request.bundle,
                    unloading = victims.len(),
                    "exclusive load: unloading replaceable bundles first"
                );
                actions.push(PipelineAction::NestedUnload(victims));
                self.step = Step::Nested { observed: false };
                return Flow::Suspend;
            }
        }

        let mut cx = BehaviorCx::new(self.direction, &self.time_scale, input.loaded);
        self.behavior.on_pre_transfer(&request, &mut cx);
        self.emit(PipelineEvent::PreTransfer {
            direction: self.direction,
            bundle: request.bundle.clone(),
        });
        let op = input.host.begin_transfer(self.direction, &request);
        let progress = TransferProgress {
            bundle: &request.bundle,
            mode: request.mode,
            index: self.cursor,
            total: self.requests.len(),
        };
        let mut cx = BehaviorCx::new(self.direction, &self.time_scale, input.loaded);
        self.behavior.on_transfer(&progress, &mut cx);
        debug!(direction = %self.direction, bundle = %request.bundle, index = self.cursor, "transfer begun");
        self.step = Step::Transfer { op };
        Flow::Continue
    }

    fn complete_transfer(&mut self, outcome: Result<(), TransferError>, loaded: &mut LoadedSet) {
        let Some(request) = self.requests.get(self.cursor).cloned() else {
            return;
        };
        self.cursor += 1;
        self.exclusive_cleared = false;
        match outcome {
            Ok(()) => {
                match self.direction {
                    Direction::Load => loaded.insert(request.bundle.clone()),
                    Direction::Unload => loaded.remove(&request.bundle),
                };
                self.emit(PipelineEvent::PostTransfer {
                    direction: self.direction,
                    bundle: request.bundle,
                });
            }
            Err(err) => {
                warn!(direction = %self.direction, bundle = %request.bundle, %err, "transfer failed; skipping bundle");
                self.emit(PipelineEvent::TransferFailed {
                    direction: self.direction,
                    bundle: request.bundle,
                    reason: err.to_string(),
                });
            }
        }
    }

    fn enter(&mut self, phase: Phase) {
        debug_assert!(
            phase == Phase::Inactive || phase > self.phase,
            "phase must advance monotonically: {} -> {}",
            self.phase,
            phase
        );
        debug!(direction = %self.direction, from = %self.phase, to = %phase, "phase changed");
        self.phase = phase;
        self.emit(PipelineEvent::PhaseChanged {
            direction: self.direction,
            phase,
        });
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::behavior::DefaultBehavior;
    use crate::transfer::host::TransferOp;

    struct Instant0;

    impl TransferHost for Instant0 {
        fn begin_transfer(&mut self, _: Direction, _: &TransferRequest) -> TransferOp {
            TransferOp::ready()
        }
    }

    fn pipeline(direction: Direction) -> (TransferPipeline, broadcast::Receiver<PipelineEvent>) {
        let (tx, rx) = broadcast::channel(64);
        let timings = PipelineTimings {
            settle: Duration::from_millis(10),
            throttle: Duration::from_millis(1),
        };
        (
            TransferPipeline::new(
                direction,
                Box::new(DefaultBehavior),
                TimeScaleHold::default(),
                timings,
                tx,
            ),
            rx,
        )
    }

    #[test]
    fn stop_on_inactive_pipeline_is_silent() {
        let (mut p, mut rx) = pipeline(Direction::Unload);
        assert!(!p.stop(&LoadedSet::default()));
        assert!(rx.try_recv().is_err());
        assert_eq!(p.phase(), Phase::Inactive);
    }

    #[test]
    fn start_moves_to_prepare_and_gate_waits_on_sibling() {
        let (mut p, _rx) = pipeline(Direction::Unload);
        let mut loaded = LoadedSet::default();
        let readiness = ReadinessRegistry::default();
        let mut host = Instant0;
        p.enqueue(TransferRequest::additive("a"));
        p.start(ModeId::from_raw(7), &loaded);
        assert_eq!(p.phase(), Phase::Prepare);

        let mut input = TickInput {
            now: Instant::now(),
            sibling: SiblingView {
                phase: Phase::Running,
                actively_running: true,
                ..SiblingView::default()
            },
            authoritative: ModeId::from_raw(7),
            readiness: &readiness,
            host: &mut host,
            loaded: &mut loaded,
        };
        assert!(p.advance(&mut input).is_empty());
        assert_eq!(p.phase(), Phase::Prepare);

        input.sibling = SiblingView::default();
        p.advance(&mut input);
        assert_eq!(p.phase(), Phase::Start);
        assert!(p.is_actively_running());
    }

    #[test]
    fn restart_mid_run_keeps_untransferred_requests() {
        let (mut p, mut rx) = pipeline(Direction::Load);
        let mut loaded = LoadedSet::default();
        let readiness = ReadinessRegistry::default();
        let mut host = Instant0;
        p.enqueue(TransferRequest::additive("a"));
        p.enqueue(TransferRequest::additive("b"));
        p.start(ModeId::from_raw(1), &loaded);

        let start = Instant::now();
        let mut input = TickInput {
            now: start,
            sibling: SiblingView::default(),
            authoritative: ModeId::from_raw(1),
            readiness: &readiness,
            host: &mut host,
            loaded: &mut loaded,
        };
        p.advance(&mut input);
        input.now = start + Duration::from_millis(20);
        p.advance(&mut input);
        input.now = start + Duration::from_millis(40);
        p.advance(&mut input);
        assert_eq!(p.remaining().len(), 1);
        while rx.try_recv().is_ok() {}

        p.start(ModeId::from_raw(2), &LoadedSet::default());
        assert_eq!(p.owner(), Some(ModeId::from_raw(2)));
        assert_eq!(p.phase(), Phase::Prepare);
        assert_eq!(p.requests(), &[TransferRequest::additive("b")]);
        assert_eq!(p.runs(), 2);
        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(events.contains(&PipelineEvent::Stopped {
            direction: Direction::Load,
            cancelled: true,
        }));
    }

    #[test]
    fn cancel_mid_run_discards_queue_and_reports_cancelled() {
        let (mut p, mut rx) = pipeline(Direction::Load);
        let loaded = LoadedSet::default();
        p.enqueue(TransferRequest::additive("a"));
        p.start(ModeId::from_raw(3), &loaded);
        while rx.try_recv().is_ok() {}

        assert!(p.stop(&loaded));
        assert_eq!(p.phase(), Phase::Inactive);
        assert!(p.requests().is_empty());
        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(events.contains(&PipelineEvent::Stopped {
            direction: Direction::Load,
            cancelled: true,
        }));
    }
}
