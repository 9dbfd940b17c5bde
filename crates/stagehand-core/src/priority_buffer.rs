// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Keyed multi-value buffer that always exposes its highest-priority value.

/// Signed priority; larger values win.
pub type Priority = i32;

#[derive(Debug, Clone)]
struct Slot<K, V> {
    key: K,
    value: V,
    priority: Priority,
}

/// Holds `(key, value, priority)` entries and caches the winning value.
///
/// Every mutation rescans the entries (O(n)); buffers are expected to stay
/// small. Equal priorities resolve to the first entry in insertion order,
/// and replacing an entry moves it to the back. Callers that care about ties
/// must use distinct priorities.
#[derive(Debug, Clone)]
pub struct PriorityBuffer<K, V> {
    slots: Vec<Slot<K, V>>,
    default: V,
    current: V,
    winner: Option<usize>,
}

impl<K, V> PriorityBuffer<K, V>
where
    K: PartialEq,
    V: Clone,
{
    /// Creates an empty buffer that reports `default` until something is pushed.
    pub fn new(default: V) -> Self {
        Self {
            slots: Vec::new(),
            current: default.clone(),
            default,
            winner: None,
        }
    }

    /// Inserts or replaces the entry keyed by `key`, then recomputes the winner.
    pub fn push(&mut self, key: K, value: V, priority: Priority) {
        self.slots.retain(|s| s.key != key);
        self.slots.push(Slot {
            key,
            value,
            priority,
        });
        self.recompute();
    }

    /// Removes the entry keyed by `key` and returns its value.
    pub fn pop(&mut self, key: &K) -> Option<V> {
        let idx = self.slots.iter().position(|s| &s.key == key)?;
        let slot = self.slots.remove(idx);
        self.recompute();
        Some(slot.value)
    }

    /// Drops every entry and reverts to the configured default.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.recompute();
    }

    /// Winning value (the default when empty).
    pub fn value(&self) -> &V {
        &self.current
    }

    /// Priority of the winning entry, `None` when the buffer is empty.
    pub fn winning_priority(&self) -> Option<Priority> {
        self.winner.map(|i| self.slots[i].priority)
    }

    /// Key of the winning entry, `None` when the buffer is empty.
    pub fn winning_key(&self) -> Option<&K> {
        self.winner.map(|i| &self.slots[i].key)
    }

    /// Returns `true` if an entry is stored under `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.slots.iter().any(|s| &s.key == key)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Iterates `(key, value, priority)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V, Priority)> + '_ {
        self.slots.iter().map(|s| (&s.key, &s.value, s.priority))
    }

    fn recompute(&mut self) {
        let mut best: Option<usize> = None;
        for (i, slot) in self.slots.iter().enumerate() {
            match best {
                Some(b) if self.slots[b].priority >= slot.priority => {}
                _ => best = Some(i),
            }
        }
        self.winner = best;
        self.current = best.map_or_else(|| self.default.clone(), |i| self.slots[i].value.clone());
    }
}
