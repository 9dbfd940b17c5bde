// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Runtime settings persisted under [`RuntimeConfig::KEY`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stagehand_core::{BundleId, PipelineTimings, Settings};

use crate::store::{ConfigError, ConfigService, ConfigStore};

/// Tick cadence, pipeline delays, and core bundles.
///
/// Every field has a default, so a partial file (or none at all) is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Interval between orchestrator ticks.
    pub tick_interval_ms: u64,
    /// Pause between a run's `Start` phase and its first transfer.
    pub settle_delay_ms: u64,
    /// Pause after each transfer.
    pub transfer_interval_ms: u64,
    /// Buffered pipeline events per subscriber.
    pub event_capacity: usize,
    /// Bundles exclusive loads never unload.
    pub core_bundles: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 16,
            settle_delay_ms: 100,
            transfer_interval_ms: 20,
            event_capacity: 256,
            core_bundles: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    /// Store key.
    pub const KEY: &'static str = "runtime";

    /// Rejects values the runtime cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be > 0".into()));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be > 0".into()));
        }
        Ok(())
    }

    /// Tick interval as a [`Duration`].
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Orchestrator settings derived from this config.
    pub fn settings(&self) -> Settings {
        Settings {
            timings: PipelineTimings {
                settle: Duration::from_millis(self.settle_delay_ms),
                throttle: Duration::from_millis(self.transfer_interval_ms),
            },
            event_capacity: self.event_capacity,
            core_bundles: self.core_bundles.iter().map(BundleId::new).collect(),
        }
    }
}

impl<S> ConfigService<S>
where
    S: ConfigStore,
{
    /// Loads and validates the runtime config; missing means defaults.
    pub fn load_runtime(&self) -> Result<RuntimeConfig, ConfigError> {
        let config: RuntimeConfig = self.load_or_default(RuntimeConfig::KEY)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates and persists the runtime config.
    pub fn save_runtime(&self, config: &RuntimeConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.save(RuntimeConfig::KEY, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryConfigStore;

    #[test]
    fn missing_config_means_defaults() {
        let service = ConfigService::new(MemoryConfigStore::default());
        assert_eq!(service.load_runtime().unwrap(), RuntimeConfig::default());
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let store = MemoryConfigStore::default();
        store
            .save_raw(RuntimeConfig::KEY, br#"{ "settle_delay_ms": 5, "core_bundles": ["boot"] }"#)
            .unwrap();
        let config = ConfigService::new(store).load_runtime().unwrap();
        assert_eq!(config.settle_delay_ms, 5);
        assert_eq!(config.tick_interval_ms, 16);

        let settings = config.settings();
        assert_eq!(settings.timings.settle, Duration::from_millis(5));
        assert_eq!(settings.timings.throttle, Duration::from_millis(20));
        assert_eq!(settings.core_bundles, vec![BundleId::new("boot")]);
    }

    #[test]
    fn zero_tick_interval_is_rejected() {
        let store = MemoryConfigStore::default();
        store
            .save_raw(RuntimeConfig::KEY, br#"{ "tick_interval_ms": 0 }"#)
            .unwrap();
        let err = ConfigService::new(store).load_runtime().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn invalid_config_is_not_saved() {
        let service = ConfigService::new(MemoryConfigStore::default());
        let config = RuntimeConfig {
            event_capacity: 0,
            ..RuntimeConfig::default()
        };
        assert!(service.save_runtime(&config).is_err());
        assert!(service.load::<RuntimeConfig>(RuntimeConfig::KEY).unwrap().is_none());
    }
}
