// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Strategy hooks a pipeline consults at each phase.

use super::phase::Direction;
use super::request::{BundleId, LoadedSet, TransferMode, TransferRequest};
use crate::overrides::TimeScaleHold;

/// What a behavior can see and touch from inside a hook.
#[derive(Debug)]
pub struct BehaviorCx<'a> {
    direction: Direction,
    time_scale: &'a TimeScaleHold,
    loaded: &'a LoadedSet,
}

impl<'a> BehaviorCx<'a> {
    pub(crate) fn new(
        direction: Direction,
        time_scale: &'a TimeScaleHold,
        loaded: &'a LoadedSet,
    ) -> Self {
        Self {
            direction,
            time_scale,
            loaded,
        }
    }

    /// Direction of the calling pipeline.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Time-scale slot reported by this direction's binding mode.
    pub fn time_scale(&self) -> &TimeScaleHold {
        self.time_scale
    }

    /// Bundles loaded so far.
    pub fn loaded(&self) -> &LoadedSet {
        self.loaded
    }
}

/// Position of a transfer within its run.
#[derive(Debug, Clone, Copy)]
pub struct TransferProgress<'a> {
    /// Bundle being moved.
    pub bundle: &'a BundleId,
    /// Requested transfer mode.
    pub mode: TransferMode,
    /// Zero-based position in the run.
    pub index: usize,
    /// Requests known to the run when this transfer began.
    pub total: usize,
}

/// Per-direction strategy. Every hook has a no-op default; both gates
/// default to open.
///
/// A gate that never opens stalls its pipeline indefinitely; the pipeline
/// does not time out.
pub trait PipelineBehavior: Send {
    /// Called when a run begins, with the requests queued so far.
    fn setup(&mut self, _requests: &[TransferRequest], _cx: &mut BehaviorCx<'_>) {}

    /// Polled each tick in `Prepare`; the run starts once it returns `true`.
    fn may_start(&mut self, _cx: &mut BehaviorCx<'_>) -> bool {
        true
    }

    /// Called on entering `Start`.
    fn on_start(&mut self, _cx: &mut BehaviorCx<'_>) {}

    /// Called before each transfer begins.
    fn on_pre_transfer(&mut self, _request: &TransferRequest, _cx: &mut BehaviorCx<'_>) {}

    /// Called once the host has accepted a transfer.
    fn on_transfer(&mut self, _progress: &TransferProgress<'_>, _cx: &mut BehaviorCx<'_>) {}

    /// Called on entering `Ready`.
    fn on_ready(&mut self, _cx: &mut BehaviorCx<'_>) {}

    /// Polled each tick in `Ready`; the run completes once it returns `true`.
    fn may_complete(&mut self, _cx: &mut BehaviorCx<'_>) -> bool {
        true
    }

    /// Called when a completed run stops.
    fn on_stop(&mut self, _cx: &mut BehaviorCx<'_>) {}

    /// Called when a run is stopped before completing.
    fn on_cancel(&mut self, _cx: &mut BehaviorCx<'_>) {}
}

/// Freezes the global time-scale from start until the run stops.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBehavior;

impl PipelineBehavior for DefaultBehavior {
    fn on_start(&mut self, cx: &mut BehaviorCx<'_>) {
        cx.time_scale().hold(0.0);
    }

    fn on_stop(&mut self, cx: &mut BehaviorCx<'_>) {
        cx.time_scale().release();
    }

    fn on_cancel(&mut self, cx: &mut BehaviorCx<'_>) {
        cx.time_scale().release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_behavior_holds_time_scale_between_start_and_stop() {
        let hold = TimeScaleHold::default();
        let loaded = LoadedSet::default();
        let mut behavior = DefaultBehavior;
        let mut cx = BehaviorCx::new(Direction::Load, &hold, &loaded);

        behavior.on_start(&mut cx);
        assert_eq!(hold.get(), Some(0.0));
        behavior.on_stop(&mut cx);
        assert_eq!(hold.get(), None);

        behavior.on_start(&mut cx);
        behavior.on_cancel(&mut cx);
        assert!(!hold.is_held());
    }
}
