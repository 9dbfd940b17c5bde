// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Bundle identifiers, transfer requests, and the loaded-bundle set.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Name of a loadable unit of content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BundleId(Arc<str>);

impl BundleId {
    /// Creates a bundle id.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Bundle name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BundleId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for BundleId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

/// How a bundle joins the loaded set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransferMode {
    /// Added next to whatever is already loaded.
    #[default]
    Additive,
    /// Replaces every loaded non-core bundle (load direction only).
    Exclusive,
}

/// One queued transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransferRequest {
    /// Bundle to move.
    pub bundle: BundleId,
    /// Transfer mode.
    pub mode: TransferMode,
}

impl TransferRequest {
    /// Additive request for `bundle`.
    pub fn additive(bundle: impl Into<BundleId>) -> Self {
        Self {
            bundle: bundle.into(),
            mode: TransferMode::Additive,
        }
    }

    /// Exclusive request for `bundle`.
    pub fn exclusive(bundle: impl Into<BundleId>) -> Self {
        Self {
            bundle: bundle.into(),
            mode: TransferMode::Exclusive,
        }
    }
}

/// Bundles currently loaded, plus the core bundles that exclusive loads keep.
#[derive(Debug, Clone, Default)]
pub struct LoadedSet {
    loaded: BTreeSet<BundleId>,
    core: BTreeSet<BundleId>,
}

impl LoadedSet {
    /// Creates a set with the given core bundles.
    pub fn with_core<I, B>(core: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<BundleId>,
    {
        Self {
            loaded: BTreeSet::new(),
            core: core.into_iter().map(Into::into).collect(),
        }
    }

    /// Marks `bundle` as core: exclusive loads never unload it.
    pub fn mark_core(&mut self, bundle: impl Into<BundleId>) {
        self.core.insert(bundle.into());
    }

    /// Returns `true` if `bundle` is core.
    pub fn is_core(&self, bundle: &BundleId) -> bool {
        self.core.contains(bundle)
    }

    /// Returns `true` if `bundle` is loaded.
    pub fn contains(&self, bundle: &BundleId) -> bool {
        self.loaded.contains(bundle)
    }

    /// Loaded bundles in name order.
    pub fn iter(&self) -> impl Iterator<Item = &BundleId> + '_ {
        self.loaded.iter()
    }

    /// Number of loaded bundles.
    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    /// Returns `true` when nothing is loaded.
    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    /// Loaded bundles an exclusive load replaces.
    pub fn replaceable(&self) -> Vec<BundleId> {
        self.loaded
            .iter()
            .filter(|b| !self.core.contains(*b))
            .cloned()
            .collect()
    }

    pub(crate) fn insert(&mut self, bundle: BundleId) -> bool {
        self.loaded.insert(bundle)
    }

    pub(crate) fn remove(&mut self, bundle: &BundleId) -> bool {
        self.loaded.remove(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaceable_skips_core_bundles() {
        let mut set = LoadedSet::with_core(["boot"]);
        set.insert("boot".into());
        set.insert("level-1".into());
        set.insert("ui".into());
        set.mark_core("ui");
        assert_eq!(set.replaceable(), vec![BundleId::new("level-1")]);
    }
}
