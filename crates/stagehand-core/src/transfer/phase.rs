// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pipeline direction and phase enumeration.

use std::fmt;

/// Which way content moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    /// Bundles enter the application.
    Load,
    /// Bundles leave the application.
    Unload,
}

impl Direction {
    /// The sibling direction.
    pub const fn opposite(self) -> Self {
        match self {
            Self::Load => Self::Unload,
            Self::Unload => Self::Load,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Load => "load",
            Self::Unload => "unload",
        })
    }
}

/// Ordered pipeline phases. Strictly increasing within one run; only a stop
/// returns the pipeline to [`Phase::Inactive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Phase {
    /// No run in progress.
    #[default]
    Inactive = 0,
    /// A run was started; the behavior is being set up.
    Request = 1,
    /// Waiting on the sibling pipeline and the behavior's start gate.
    Prepare = 2,
    /// Start hooks fired; settling before transfers.
    Start = 3,
    /// Transferring queued bundles in submission order.
    Running = 4,
    /// Waiting on the host's memory reclaim.
    FreeingMemory = 5,
    /// Waiting for every readiness processor to report ready.
    AwaitingReadiness = 6,
    /// Waiting for authority and the behavior's completion gate.
    Ready = 7,
    /// Finished; waiting for the owning mode to leave the stack.
    Complete = 8,
}

impl Phase {
    /// Returns `true` for every phase between a start and a stop.
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Inactive)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_ordered() {
        assert!(Phase::Inactive < Phase::Request);
        assert!(Phase::Running < Phase::FreeingMemory);
        assert!(Phase::Ready < Phase::Complete);
        assert_eq!(Phase::Complete as u8, 8);
    }

    #[test]
    fn opposite_direction_round_trips() {
        assert_eq!(Direction::Load.opposite(), Direction::Unload);
        assert_eq!(Direction::Unload.opposite().opposite(), Direction::Unload);
    }
}
