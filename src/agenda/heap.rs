//! A binary max-heap of activations with keyed removal.
//!
//! Retractions cancel activations from the middle of the queue, so a
//! plain `BinaryHeap` does not fit; this heap keeps a position map from
//! activation key to slot and supports O(log n) removal by key plus an
//! in-place re-sort when the strategy or saliences change.

use std::collections::HashMap;

use super::activation::{Activation, ActivationKey};
use super::strategy::Strategy;

#[derive(Default)]
pub(crate) struct ActivationHeap {
    entries: Vec<Activation>,
    positions: HashMap<ActivationKey, usize>,
}

impl ActivationHeap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &ActivationKey) -> bool {
        self.positions.contains_key(key)
    }

    /// Inserts unless an activation with the same key is already queued.
    /// Returns whether it was inserted.
    pub(crate) fn push(&mut self, act: Activation, strategy: &dyn Strategy) -> bool {
        let key = act.key();
        if self.positions.contains_key(&key) {
            return false;
        }
        let idx = self.entries.len();
        self.positions.insert(key, idx);
        self.entries.push(act);
        self.sift_up(idx, strategy);
        true
    }

    /// Removes and returns the best activation.
    pub(crate) fn pop(&mut self, strategy: &dyn Strategy) -> Option<Activation> {
        if self.entries.is_empty() {
            return None;
        }
        Some(self.remove_at(0, strategy))
    }

    /// Removes the activation with the given key, if queued.
    pub(crate) fn remove(
        &mut self,
        key: &ActivationKey,
        strategy: &dyn Strategy,
    ) -> Option<Activation> {
        let idx = *self.positions.get(key)?;
        Some(self.remove_at(idx, strategy))
    }

    /// Re-establishes heap order after saliences or the strategy change.
    pub(crate) fn reorder(&mut self, strategy: &dyn Strategy) {
        for idx in (0..self.entries.len() / 2).rev() {
            self.sift_down(idx, strategy);
        }
    }

    /// Recomputes each activation's salience, then restores order.
    pub(crate) fn refresh_salience(&mut self, strategy: &dyn Strategy) {
        let mut changed = false;
        for act in &mut self.entries {
            let salience = act.rule.current_salience();
            if salience != act.salience {
                act.salience = salience;
                changed = true;
            }
        }
        if changed {
            self.reorder(strategy);
        }
    }

    /// All queued activations in firing order. Used for introspection
    /// only; firing goes through `pop`.
    pub(crate) fn ordered(&self, strategy: &dyn Strategy) -> Vec<Activation> {
        let mut out = self.entries.clone();
        out.sort_by(|a, b| strategy.compare(b, a));
        out
    }

    fn remove_at(&mut self, idx: usize, strategy: &dyn Strategy) -> Activation {
        let last = self.entries.len() - 1;
        self.entries.swap(idx, last);
        let removed = self.entries.pop().unwrap_or_else(|| unreachable!());
        self.positions.remove(&removed.key());
        if idx < self.entries.len() {
            self.positions.insert(self.entries[idx].key(), idx);
            // The swapped-in element may violate order in either
            // direction relative to its new parent.
            self.sift_down(idx, strategy);
            self.sift_up(idx, strategy);
        }
        removed
    }

    fn sift_up(&mut self, mut idx: usize, strategy: &dyn Strategy) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if strategy.compare(&self.entries[idx], &self.entries[parent])
                != std::cmp::Ordering::Greater
            {
                break;
            }
            self.swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize, strategy: &dyn Strategy) {
        loop {
            let left = 2 * idx + 1;
            if left >= self.entries.len() {
                break;
            }
            let right = left + 1;
            let mut best = left;
            if right < self.entries.len()
                && strategy.compare(&self.entries[right], &self.entries[left])
                    == std::cmp::Ordering::Greater
            {
                best = right;
            }
            if strategy.compare(&self.entries[best], &self.entries[idx])
                != std::cmp::Ordering::Greater
            {
                break;
            }
            self.swap(idx, best);
            idx = best;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.entries.swap(a, b);
        self.positions.insert(self.entries[a].key(), a);
        self.positions.insert(self.entries[b].key(), b);
    }
}

impl std::fmt::Debug for ActivationHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationHeap")
            .field("len", &self.entries.len())
            .finish()
    }
}
