//! Two-input join nodes.
//!
//! A join combines a left input (already-matched prefix tokens) with a
//! right input (single facts from a pattern chain). Both sides are held
//! in [`TokenMemory`]s; when one side receives an event the other side's
//! memory is consulted, restricted to the bucket the join key allows.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::RetortResult;
use crate::fact::Fact;
use crate::network::memory::{MemoryKey, TokenMemory};
use crate::network::single::Relation;
use crate::network::Tag;
use crate::token::Token;

/// An inter-pattern test: a value in the left prefix against a slot of
/// the right fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinTest {
    /// Fact index within the left chain (0-based from the root).
    pub left_fact: usize,
    /// Slot index within that fact.
    pub left_slot: usize,
    /// Sub-index into a left multislot value.
    pub left_sub: Option<usize>,
    /// Slot index within the right fact.
    pub right_slot: usize,
    /// Sub-index into a right multislot value.
    pub right_sub: Option<usize>,
    /// Relation applied between the two values.
    pub relation: Relation,
}

impl JoinTest {
    /// Evaluates the test for a (prefix, fact) pair.
    ///
    /// A prefix shorter than the referenced fact index fails quietly:
    /// removals re-run tests on carried data and must stay deterministic.
    pub fn eval(&self, left: &Token, right: &Fact) -> RetortResult<bool> {
        let Some(lf) = left.fact_at(self.left_fact) else {
            return Ok(false);
        };
        let lv = lf.slot_at(self.left_slot, self.left_sub)?;
        let rv = right.slot_at(self.right_slot, self.right_sub)?;
        self.relation.eval(&lv, &rv)
    }
}

/// Picks the first equality test usable as a memory index.
pub(crate) fn pick_index(tests: &[JoinTest]) -> Option<usize> {
    tests.iter().position(|t| t.relation.is_indexable())
}

pub(crate) fn memories_for(tests: &[JoinTest], index: Option<usize>) -> (TokenMemory, TokenMemory) {
    match index {
        Some(i) => {
            let t = &tests[i];
            (
                TokenMemory::new(MemoryKey::Slot {
                    fact: t.left_fact,
                    slot: t.left_slot,
                    sub: t.left_sub,
                }),
                TokenMemory::new(MemoryKey::Slot {
                    fact: 0,
                    slot: t.right_slot,
                    sub: t.right_sub,
                }),
            )
        }
        None => (
            TokenMemory::new(MemoryKey::SortCode),
            TokenMemory::new(MemoryKey::SortCode),
        ),
    }
}

/// State of a two-input join node.
#[derive(Debug)]
pub struct JoinState {
    pub(crate) tests: Vec<JoinTest>,
    pub(crate) index: Option<usize>,
    pub(crate) left: TokenMemory,
    pub(crate) right: TokenMemory,
}

impl JoinState {
    /// Creates join state for a test set.
    #[must_use]
    pub fn new(tests: Vec<JoinTest>) -> Self {
        let index = pick_index(&tests);
        let (left, right) = memories_for(&tests, index);
        Self {
            tests,
            index,
            left,
            right,
        }
    }

    fn passes(&self, left: &Token, right: &Fact) -> RetortResult<bool> {
        for t in &self.tests {
            if !t.eval(left, right)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Right-memory candidates for a left token.
    fn right_candidates(&self, token: &Arc<Token>) -> RetortResult<Vec<Arc<Token>>> {
        match self.index {
            Some(i) => {
                let t = &self.tests[i];
                let Some(lf) = token.fact_at(t.left_fact) else {
                    return Ok(Vec::new());
                };
                let code = lf.slot_at(t.left_slot, t.left_sub)?.bucket_code();
                Ok(self.right.candidates(code).cloned().collect())
            }
            None => Ok(self.right.iter().cloned().collect()),
        }
    }

    /// Left-memory candidates for a right fact.
    fn left_candidates(&self, fact: &Fact) -> RetortResult<Vec<Arc<Token>>> {
        match self.index {
            Some(i) => {
                let t = &self.tests[i];
                let code = fact.slot_at(t.right_slot, t.right_sub)?.bucket_code();
                Ok(self.left.candidates(code).cloned().collect())
            }
            None => Ok(self.left.iter().cloned().collect()),
        }
    }

    /// Handles an event on the left input.
    pub(crate) fn left_event(
        &mut self,
        tag: Tag,
        token: &Arc<Token>,
    ) -> RetortResult<Vec<(Tag, Arc<Token>)>> {
        if tag.is_addition() {
            self.left.add(Arc::clone(token))?;
        } else {
            self.left.remove(token)?;
        }

        let mut out = Vec::new();
        for right in self.right_candidates(token)? {
            if self.passes(token, &right.fact)? {
                out.push((tag, token.extend(Arc::clone(&right.fact))));
            }
        }
        Ok(out)
    }

    /// Handles an event on the right input (a single-fact token).
    pub(crate) fn right_event(
        &mut self,
        tag: Tag,
        token: &Arc<Token>,
    ) -> RetortResult<Vec<(Tag, Arc<Token>)>> {
        if tag.is_addition() {
            self.right.add(Arc::clone(token))?;
        } else {
            self.right.remove(token)?;
        }

        let mut out = Vec::new();
        for left in self.left_candidates(&token.fact)? {
            if self.passes(&left, &token.fact)? {
                out.push((tag, left.extend(Arc::clone(&token.fact))));
            }
        }
        Ok(out)
    }

    /// Replays a left token through a node that already saw a full pass.
    ///
    /// Memory is left untouched; the join is evaluated against the
    /// existing right memory so late-added successors get populated.
    pub(crate) fn left_replay(&self, token: &Arc<Token>) -> RetortResult<Vec<(Tag, Arc<Token>)>> {
        let mut out = Vec::new();
        for right in self.right_candidates(token)? {
            if self.passes(token, &right.fact)? {
                out.push((Tag::Update, token.extend(Arc::clone(&right.fact))));
            }
        }
        Ok(out)
    }

    /// Flushes both memories.
    pub(crate) fn flush(&mut self) {
        self.left.clear();
        self.right.clear();
    }
}
