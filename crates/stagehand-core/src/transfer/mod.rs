// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Load/Unload transfer pipelines and their collaborator ports.

mod behavior;
mod events;
mod host;
mod phase;
mod pipeline;
mod request;

pub use behavior::{BehaviorCx, DefaultBehavior, PipelineBehavior, TransferProgress};
pub use events::PipelineEvent;
pub use host::{TransferError, TransferHost, TransferOp};
pub use phase::{Direction, Phase};
pub use pipeline::{PipelineTimings, TransferPipeline};
pub use request::{BundleId, LoadedSet, TransferMode, TransferRequest};

pub(crate) use pipeline::{PipelineAction, TickInput};
