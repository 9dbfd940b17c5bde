// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Modes that represent a pipeline run on the stack.
//!
//! A run exists exactly as long as its binding mode: landing on the stack
//! starts the pipeline, leaving it stops the pipeline. Both modes are
//! persistent so a Load run's stack reset never removes them.

use crate::mode::{Mode, ModeCx};
use crate::overrides::{OverrideRecord, TimeScaleHold};
use crate::priority_buffer::Priority;
use crate::transfer::Direction;

/// Priority of [`LoadingMode`]; outranks every application mode.
pub const LOADING_PRIORITY: Priority = 10_000;

/// Priority of [`UnloadingMode`]; just above the default mode.
pub const UNLOADING_PRIORITY: Priority = 0;

/// Fixed priority of the binding mode for `direction`.
pub const fn binding_priority(direction: Direction) -> Priority {
    match direction {
        Direction::Load => LOADING_PRIORITY,
        Direction::Unload => UNLOADING_PRIORITY,
    }
}

/// Stack representative of a Load run.
#[derive(Debug, Clone, Default)]
pub struct LoadingMode {
    hold: TimeScaleHold,
}

impl LoadingMode {
    /// Creates the mode; it reports `hold` as its time-scale claim.
    pub fn new(hold: TimeScaleHold) -> Self {
        Self { hold }
    }
}

impl Mode for LoadingMode {
    fn priority(&self) -> Priority {
        LOADING_PRIORITY
    }

    fn name(&self) -> &'static str {
        "loading"
    }

    fn persistent(&self) -> bool {
        true
    }

    fn on_pushed(&mut self, cx: &mut ModeCx<'_>) {
        cx.start_pipeline(Direction::Load);
    }

    fn on_terminate(&mut self, cx: &mut ModeCx<'_>) {
        cx.stop_pipeline(Direction::Load);
    }

    fn contribute(&self, record: &mut OverrideRecord) {
        record.is_loading = true;
        record.has_control = false;
    }

    fn time_scale(&self) -> Option<f32> {
        self.hold.get()
    }
}

/// Stack representative of an Unload run.
#[derive(Debug, Clone, Default)]
pub struct UnloadingMode {
    hold: TimeScaleHold,
}

impl UnloadingMode {
    /// Creates the mode; it reports `hold` as its time-scale claim.
    pub fn new(hold: TimeScaleHold) -> Self {
        Self { hold }
    }
}

impl Mode for UnloadingMode {
    fn priority(&self) -> Priority {
        UNLOADING_PRIORITY
    }

    fn name(&self) -> &'static str {
        "unloading"
    }

    fn persistent(&self) -> bool {
        true
    }

    fn on_pushed(&mut self, cx: &mut ModeCx<'_>) {
        cx.start_pipeline(Direction::Unload);
    }

    fn on_terminate(&mut self, cx: &mut ModeCx<'_>) {
        cx.stop_pipeline(Direction::Unload);
    }

    fn contribute(&self, record: &mut OverrideRecord) {
        record.is_unloading = true;
        record.has_control = false;
    }

    fn time_scale(&self) -> Option<f32> {
        self.hold.get()
    }
}
