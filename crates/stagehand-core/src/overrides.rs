// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared override record folded from every stacked mode.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::mode::ModeId;

/// Time-scale reported when no mode claims the scalar override.
pub const DEFAULT_TIME_SCALE: f32 = 1.0;

/// Flags folded from the mode stack, lowest priority first.
///
/// Any mode may write any field; the highest-priority writer wins.
/// `time_scale` is not written by modes directly: it is resolved separately
/// from [`crate::Mode::time_scale`] by explicit priority comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OverrideRecord {
    /// Content is being loaded.
    pub is_loading: bool,
    /// Content is being unloaded.
    pub is_unloading: bool,
    /// The application is shutting down.
    pub is_quitting: bool,
    /// The user currently has control (input is accepted).
    pub has_control: bool,
    /// Resolved global time-scale factor.
    pub time_scale: f32,
}

impl Default for OverrideRecord {
    fn default() -> Self {
        Self {
            is_loading: false,
            is_unloading: false,
            is_quitting: false,
            has_control: true,
            time_scale: DEFAULT_TIME_SCALE,
        }
    }
}

/// Value published to override consumers after each refresh.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FoldedState {
    /// Authoritative mode at the time of the fold.
    pub authoritative: ModeId,
    /// Folded record.
    pub record: OverrideRecord,
}

const NO_HOLD: u32 = u32::MAX;

/// Shared slot through which a pipeline behavior pins the time-scale.
///
/// Cloning shares the slot. The binding mode of the pipeline reads it back as
/// its time-scale override, so a hold takes effect on the next fold.
#[derive(Debug, Clone)]
pub struct TimeScaleHold(Arc<AtomicU32>);

impl Default for TimeScaleHold {
    fn default() -> Self {
        Self(Arc::new(AtomicU32::new(NO_HOLD)))
    }
}

impl TimeScaleHold {
    /// Pins the time-scale to `scale`.
    pub fn hold(&self, scale: f32) {
        let bits = scale.to_bits();
        // u32::MAX is a NaN payload; never a meaningful scale.
        let bits = if bits == NO_HOLD { f32::NAN.to_bits() } else { bits };
        self.0.store(bits, Ordering::Release);
    }

    /// Clears the pin.
    pub fn release(&self) {
        self.0.store(NO_HOLD, Ordering::Release);
    }

    /// Currently pinned scale, if any.
    pub fn get(&self) -> Option<f32> {
        match self.0.load(Ordering::Acquire) {
            NO_HOLD => None,
            bits => Some(f32::from_bits(bits)),
        }
    }

    /// Returns `true` while a scale is pinned.
    pub fn is_held(&self) -> bool {
        self.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hold_is_shared_between_clones() {
        let hold = TimeScaleHold::default();
        let reader = hold.clone();
        assert_eq!(reader.get(), None);
        hold.hold(0.0);
        assert_eq!(reader.get(), Some(0.0));
        hold.release();
        assert!(!reader.is_held());
    }

    #[test]
    fn default_record_grants_control() {
        let rec = OverrideRecord::default();
        assert!(rec.has_control);
        assert!(!rec.is_loading);
        assert!((rec.time_scale - DEFAULT_TIME_SCALE).abs() < f32::EPSILON);
    }
}
