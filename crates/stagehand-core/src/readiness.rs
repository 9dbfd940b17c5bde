// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Dynamic set of processors that can hold pipelines in `AwaitingReadiness`.
//!
//! Registration is caller-paired: whoever registers a processor must
//! unregister it, and a processor that never reports ready stalls every
//! pipeline indefinitely. Nothing here expires stale entries.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

/// Anything that can report it is still initializing.
pub trait ReadinessProcessor: Send + Sync {
    /// `true` while the processor is not ready.
    fn is_busy(&self) -> bool;

    /// Diagnostic name.
    fn name(&self) -> &str {
        "processor"
    }
}

/// Handle returned by [`ReadinessRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessorId(u64);

/// Registered readiness processors.
#[derive(Default)]
pub struct ReadinessRegistry {
    processors: BTreeMap<ProcessorId, Arc<dyn ReadinessProcessor>>,
    next_id: u64,
}

impl ReadinessRegistry {
    /// Adds a processor.
    pub fn register(&mut self, processor: Arc<dyn ReadinessProcessor>) -> ProcessorId {
        let id = ProcessorId(self.next_id);
        self.next_id += 1;
        debug!(processor = processor.name(), "readiness processor registered");
        self.processors.insert(id, processor);
        id
    }

    /// Removes a processor. Returns `false` if it was not registered.
    pub fn unregister(&mut self, id: ProcessorId) -> bool {
        self.processors.remove(&id).is_some()
    }

    /// `true` if any registered processor reports busy.
    pub fn any_busy(&self) -> bool {
        self.processors.values().any(|p| p.is_busy())
    }

    /// Names of the processors currently reporting busy.
    pub fn busy(&self) -> Vec<String> {
        self.processors
            .values()
            .filter(|p| p.is_busy())
            .map(|p| p.name().to_owned())
            .collect()
    }

    /// Number of registered processors.
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    /// Returns `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

/// Shareable busy flag; the simplest [`ReadinessProcessor`].
#[derive(Debug, Clone)]
pub struct ReadinessFlag {
    name: String,
    busy: Arc<AtomicBool>,
}

impl ReadinessFlag {
    /// Creates a flag that starts busy.
    pub fn busy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            busy: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Sets the busy state.
    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::Release);
    }

    /// Reports ready.
    pub fn mark_ready(&self) {
        self.set_busy(false);
    }
}

impl ReadinessProcessor for ReadinessFlag {
    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_busy_until_every_processor_is_ready() {
        let mut registry = ReadinessRegistry::default();
        assert!(!registry.any_busy());

        let shaders = ReadinessFlag::busy("shaders");
        let audio = ReadinessFlag::busy("audio");
        registry.register(Arc::new(shaders.clone()));
        let audio_id = registry.register(Arc::new(audio.clone()));
        assert_eq!(registry.busy().len(), 2);

        shaders.mark_ready();
        assert_eq!(registry.busy(), vec!["audio".to_owned()]);

        assert!(registry.unregister(audio_id));
        assert!(!registry.any_busy());
        assert!(!registry.unregister(audio_id));
    }
}
