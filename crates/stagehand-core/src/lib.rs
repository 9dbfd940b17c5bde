// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! stagehand-core: priority-resolved mode stack and load/unload pipelines.
//!
//! A [`ModeStack`] resolves which application mode is authoritative and folds
//! every stacked mode into one [`OverrideRecord`]. Two [`TransferPipeline`]s
//! move content bundles in and out through an ordered phase machine, each run
//! represented on the stack by a binding mode. The [`Orchestrator`] owns all
//! of it and is advanced by calling [`Orchestrator::tick`] once per
//! application tick.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod binding;
mod mode;
mod mode_stack;
mod orchestrator;
mod overrides;
mod pending;
mod priority_buffer;
/// Readiness processors that gate pipeline completion.
pub mod readiness;
/// Load/Unload transfer pipelines, host port, and behavior hooks.
pub mod transfer;

pub use binding::{
    binding_priority, LoadingMode, UnloadingMode, LOADING_PRIORITY, UNLOADING_PRIORITY,
};
pub use mode::{DefaultMode, Directive, Lifetime, Mode, ModeCx, ModeId, DEFAULT_PRIORITY};
pub use mode_stack::{ModeInfo, ModeStack, StackError};
pub use orchestrator::{Orchestrator, Settings};
pub use overrides::{FoldedState, OverrideRecord, TimeScaleHold, DEFAULT_TIME_SCALE};
pub use pending::{PendingQueue, PopTarget};
pub use priority_buffer::{Priority, PriorityBuffer};
pub use readiness::{ProcessorId, ReadinessFlag, ReadinessProcessor, ReadinessRegistry};
pub use transfer::{
    BehaviorCx, BundleId, DefaultBehavior, Direction, LoadedSet, Phase, PipelineBehavior,
    PipelineEvent, PipelineTimings, TransferError, TransferHost, TransferMode, TransferOp,
    TransferPipeline, TransferProgress, TransferRequest,
};
