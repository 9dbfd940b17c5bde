// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fire-and-forget pipeline notifications.

use super::phase::{Direction, Phase};
use super::request::BundleId;

/// Notification broadcast by a pipeline. Sending never blocks and is dropped
/// when nobody listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A run passed its start gate.
    Started {
        /// Pipeline direction.
        direction: Direction,
    },
    /// A run ended.
    Stopped {
        /// Pipeline direction.
        direction: Direction,
        /// `true` when the run was stopped before completing.
        cancelled: bool,
    },
    /// The pipeline entered `phase`.
    PhaseChanged {
        /// Pipeline direction.
        direction: Direction,
        /// New phase.
        phase: Phase,
    },
    /// A transfer is about to begin.
    PreTransfer {
        /// Pipeline direction.
        direction: Direction,
        /// Bundle being moved.
        bundle: BundleId,
    },
    /// A transfer finished successfully.
    PostTransfer {
        /// Pipeline direction.
        direction: Direction,
        /// Bundle that moved.
        bundle: BundleId,
    },
    /// A transfer failed; the bundle was skipped.
    TransferFailed {
        /// Pipeline direction.
        direction: Direction,
        /// Bundle that did not move.
        bundle: BundleId,
        /// Host-reported reason.
        reason: String,
    },
}

impl PipelineEvent {
    /// Direction of the pipeline that sent the event.
    pub fn direction(&self) -> Direction {
        match self {
            Self::Started { direction }
            | Self::Stopped { direction, .. }
            | Self::PhaseChanged { direction, .. }
            | Self::PreTransfer { direction, .. }
            | Self::PostTransfer { direction, .. }
            | Self::TransferFailed { direction, .. } => *direction,
        }
    }
}
