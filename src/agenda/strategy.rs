//! Conflict-resolution strategies.

use std::cmp::Ordering;

use super::activation::Activation;

/// Orders activations within one module's queue.
///
/// `compare` returns [`Ordering::Greater`] when `a` should fire before
/// `b`. Implementations must be total and consistent so the queue can
/// re-sort in place when the strategy changes mid-run.
pub trait Strategy: Send + Sync {
    /// Strategy name, for events and diagnostics.
    fn name(&self) -> &'static str;

    /// Firing-order comparison: `Greater` means `a` fires first.
    fn compare(&self, a: &Activation, b: &Activation) -> Ordering;
}

/// Default strategy: higher salience first, then newer facts first,
/// then most recently queued first.
#[derive(Debug, Default, Clone, Copy)]
pub struct DepthStrategy;

impl Strategy for DepthStrategy {
    fn name(&self) -> &'static str {
        "depth"
    }

    fn compare(&self, a: &Activation, b: &Activation) -> Ordering {
        a.salience
            .cmp(&b.salience)
            .then(a.recency.cmp(&b.recency))
            .then(a.seq.cmp(&b.seq))
    }
}

/// Higher salience first, then older facts first, so equal-salience
/// activations fire in arrival order.
#[derive(Debug, Default, Clone, Copy)]
pub struct BreadthStrategy;

impl Strategy for BreadthStrategy {
    fn name(&self) -> &'static str {
        "breadth"
    }

    fn compare(&self, a: &Activation, b: &Activation) -> Ordering {
        a.salience
            .cmp(&b.salience)
            .then(b.recency.cmp(&a.recency))
            .then(b.seq.cmp(&a.seq))
    }
}
