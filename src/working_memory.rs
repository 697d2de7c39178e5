//! Working memory: the authoritative fact store.
//!
//! Assigns fact identity, detects exact duplicates by data equality,
//! and holds the FIFO queue of pending operations that cascaded changes
//! (truth-maintenance retractions, rule-body asserts) are drained from.
//! The surrounding engine owns the propagation loop; this module owns
//! storage and ordering.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use crate::error::{EvalError, RetortResult};
use crate::fact::{Fact, FactId, FactKey};
use crate::value::Value;

/// Outcome of an assert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertOutcome {
    /// The fact was new and is now published under this id.
    Asserted(FactId),
    /// A data-equal fact already existed; nothing was published and no
    /// activations changed.
    AlreadyExisted(FactId),
}

impl AssertOutcome {
    /// The id of the canonical stored fact either way.
    #[must_use]
    pub const fn fact_id(self) -> FactId {
        match self {
            Self::Asserted(id) | Self::AlreadyExisted(id) => id,
        }
    }

    /// True when the assert published a new fact.
    #[must_use]
    pub const fn is_new(self) -> bool {
        matches!(self, Self::Asserted(_))
    }
}

/// A queued working-memory operation.
#[derive(Debug)]
pub(crate) enum WmOp {
    Assert(Fact),
    Retract(FactId),
    Modify {
        id: FactId,
        changes: Vec<(usize, Value)>,
    },
}

/// The fact store.
#[derive(Debug, Default)]
pub struct WorkingMemory {
    by_id: BTreeMap<FactId, Arc<Fact>>,
    by_key: HashMap<FactKey, FactId>,
    next_id: u64,
    clock: u64,
    pending: VecDeque<WmOp>,
}

impl WorkingMemory {
    /// Creates an empty store. Ids start at 1; id 0 stays reserved for
    /// synthetic facts.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// Number of stored facts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True when no facts are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Current logical clock value.
    #[must_use]
    pub const fn pseudotime(&self) -> u64 {
        self.clock
    }

    /// Looks up a fact by id.
    #[must_use]
    pub fn find_fact_by_id(&self, id: FactId) -> Option<Arc<Fact>> {
        self.by_id.get(&id).cloned()
    }

    /// Looks up the canonical stored instance data-equal to `fact`.
    #[must_use]
    pub fn find_fact(&self, fact: &Fact) -> Option<Arc<Fact>> {
        self.by_key
            .get(&fact.key())
            .and_then(|id| self.by_id.get(id))
            .cloned()
    }

    /// All facts in id order.
    #[must_use]
    pub fn facts(&self) -> Vec<Arc<Fact>> {
        self.by_id.values().cloned().collect()
    }

    /// Publishes a fact: assigns the next id, bumps the logical clock,
    /// and indexes it. The caller must have checked for duplicates.
    pub(crate) fn publish(&mut self, mut fact: Fact) -> Arc<Fact> {
        self.clock += 1;
        fact.id = FactId::new(self.next_id);
        fact.pseudotime = self.clock;
        self.next_id += 1;

        let fact = Arc::new(fact);
        self.by_key.insert(fact.key(), fact.id);
        self.by_id.insert(fact.id, Arc::clone(&fact));
        fact
    }

    /// Id of the stored fact data-equal to `key`, if any.
    #[must_use]
    pub(crate) fn id_for_key(&self, key: &FactKey) -> Option<FactId> {
        self.by_key.get(key).copied()
    }

    /// Withdraws a fact by id, unindexing it.
    pub(crate) fn withdraw(&mut self, id: FactId) -> Option<Arc<Fact>> {
        let fact = self.by_id.remove(&id)?;
        // Only drop the key entry if it still points at this fact; a
        // modify may have redirected it.
        if self.by_key.get(&fact.key()) == Some(&id) {
            self.by_key.remove(&fact.key());
        }
        Some(fact)
    }

    /// Replaces a fact's slots in place of its identity: same id, new
    /// values, bumped pseudotime. Returns (old, new).
    pub(crate) fn replace(
        &mut self,
        id: FactId,
        changes: &[(usize, Value)],
    ) -> RetortResult<(Arc<Fact>, Arc<Fact>)> {
        let old = self
            .by_id
            .get(&id)
            .cloned()
            .ok_or(EvalError::FactNotFound { id: id.as_u64() })?;

        let mut slots = old.slots.clone();
        for (idx, value) in changes {
            if *idx >= slots.len() {
                return Err(EvalError::SlotOutOfRange {
                    template: old.template.name.clone(),
                    slot: *idx,
                }
                .into());
            }
            slots[*idx] = value.clone();
        }

        self.clock += 1;
        let new = Arc::new(Fact {
            template: Arc::clone(&old.template),
            slots,
            id,
            pseudotime: self.clock,
            shadow: old.shadow,
        });

        if self.by_key.get(&old.key()) == Some(&id) {
            self.by_key.remove(&old.key());
        }
        self.by_key.insert(new.key(), id);
        self.by_id.insert(id, Arc::clone(&new));
        Ok((old, new))
    }

    /// Queues a cascaded operation for the drain loop.
    pub(crate) fn enqueue(&mut self, op: WmOp) {
        self.pending.push_back(op);
    }

    /// Pops the next pending operation, FIFO.
    pub(crate) fn dequeue(&mut self) -> Option<WmOp> {
        self.pending.pop_front()
    }

    /// True while cascaded work remains queued.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drops all facts and pending work, restarting ids at 1.
    pub(crate) fn reset(&mut self) {
        self.by_id.clear();
        self.by_key.clear();
        self.pending.clear();
        self.next_id = 1;
        self.clock = 0;
    }
}

/// Working-memory handle passed to firing rule bodies.
///
/// Reads see the store as of firing time; writes queue behind the
/// firing and drain in FIFO order once the body returns, so a body
/// never observes its own half-applied changes mid-propagation.
pub struct RuleContext<'a> {
    pub(crate) wm: &'a WorkingMemory,
    pub(crate) ops: &'a mut Vec<WmOp>,
}

impl RuleContext<'_> {
    /// Queues a fact assertion.
    pub fn assert_fact(&mut self, fact: Fact) {
        self.ops.push(WmOp::Assert(fact));
    }

    /// Queues a retraction by id.
    pub fn retract(&mut self, id: FactId) {
        self.ops.push(WmOp::Retract(id));
    }

    /// Queues an atomic modify of the given slots.
    pub fn modify(&mut self, id: FactId, changes: Vec<(usize, Value)>) {
        self.ops.push(WmOp::Modify { id, changes });
    }

    /// Looks up a fact by id, as of firing time.
    #[must_use]
    pub fn find_fact_by_id(&self, id: FactId) -> Option<Arc<Fact>> {
        self.wm.find_fact_by_id(id)
    }

    /// Looks up the canonical instance data-equal to `fact`.
    #[must_use]
    pub fn find_fact(&self, fact: &Fact) -> Option<Arc<Fact>> {
        self.wm.find_fact(fact)
    }

    /// All facts as of firing time.
    #[must_use]
    pub fn facts(&self) -> Vec<Arc<Fact>> {
        self.wm.facts()
    }
}
