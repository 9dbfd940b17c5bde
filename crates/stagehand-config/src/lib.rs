// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Config service, storage port, and runtime settings for Stagehand.
#![deny(missing_docs)]

/// Storage port, JSON service, and the in-memory store.
pub mod store;

/// Runtime settings.
pub mod runtime;

pub use runtime::RuntimeConfig;
pub use store::{ConfigError, ConfigService, ConfigStore, MemoryConfigStore};
