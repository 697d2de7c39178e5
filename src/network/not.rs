//! Negated joins.
//!
//! A negated condition always admits the left token but suppresses it
//! while a non-zero count of matching right facts exists. Passing tokens
//! carry a distinguished placeholder fact so downstream nodes see a
//! normal one-fact extension. The count lives on the canonical
//! left-memory token and must never go negative; a negative transition
//! is a corrupted-state fatal error.
//!
//! The single-left-fact specialization differs only in memory layout
//! (the index key always refers to fact 0), so it falls out of the same
//! state type here.

use std::sync::Arc;

use crate::error::{RetortError, RetortResult};
use crate::fact::Fact;
use crate::network::join::{memories_for, pick_index, JoinTest};
use crate::network::memory::TokenMemory;
use crate::network::Tag;
use crate::token::Token;

/// State of a negated join node. Never shared across rules.
#[derive(Debug)]
pub struct NegatedState {
    tests: Vec<JoinTest>,
    index: Option<usize>,
    left: TokenMemory,
    right: TokenMemory,
}

impl NegatedState {
    /// Creates negation state for a test set.
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

    fn count_matches(&self, token: &Arc<Token>) -> RetortResult<i64> {
        let candidates: Vec<Arc<Token>> = match self.index {
            Some(i) => {
                let t = &self.tests[i];
                let Some(lf) = token.fact_at(t.left_fact) else {
                    return Ok(0);
                };
                let code = lf.slot_at(t.left_slot, t.left_sub)?.bucket_code();
                self.right.candidates(code).cloned().collect()
            }
            None => self.right.iter().cloned().collect(),
        };

        let mut n = 0i64;
        for c in &candidates {
            if self.passes(token, &c.fact)? {
                n += 1;
            }
        }
        Ok(n)
    }

    fn pass_through(token: &Arc<Token>) -> Arc<Token> {
        token.extend(Fact::placeholder())
    }

    /// Handles an event on the left input.
    pub(crate) fn left_event(
        &mut self,
        tag: Tag,
        token: &Arc<Token>,
    ) -> RetortResult<Vec<(Tag, Arc<Token>)>> {
        if tag.is_addition() {
            let n = self.count_matches(token)?;
            token.add_negation(n);
            self.left.add(Arc::clone(token))?;
            if n == 0 {
                return Ok(vec![(tag, Self::pass_through(token))]);
            }
            Ok(Vec::new())
        } else {
            self.left.remove(token)?;
            // The dependent placeholder goes away with its left token
            // unconditionally; downstream matching runs on carried data.
            Ok(vec![(tag, Self::pass_through(token))])
        }
    }

    /// Handles an event on the right input.
    pub(crate) fn right_event(
        &mut self,
        tag: Tag,
        token: &Arc<Token>,
    ) -> RetortResult<Vec<(Tag, Arc<Token>)>> {
        let mut out = Vec::new();

        if tag.is_addition() {
            self.right.add(Arc::clone(token))?;
            let retract_tag = match tag {
                Tag::ModifyAdd => Tag::ModifyRemove,
                _ => Tag::Remove,
            };
            for left in self.left_candidates(&token.fact)? {
                if self.passes(&left, &token.fact)? {
                    if left.add_negation(1) == 1 {
                        out.push((retract_tag, Self::pass_through(&left)));
                    }
                }
            }
        } else {
            self.right.remove(token)?;
            let assert_tag = match tag {
                Tag::ModifyRemove => Tag::ModifyAdd,
                _ => Tag::Add,
            };
            for left in self.left_candidates(&token.fact)? {
                if self.passes(&left, &token.fact)? {
                    let n = left.add_negation(-1);
                    if n < 0 {
                        return Err(RetortError::internal(
                            "NegatedState::right_event",
                            format!("negation count went negative for {left}"),
                        ));
                    }
                    if n == 0 {
                        out.push((assert_tag, Self::pass_through(&left)));
                    }
                }
            }
        }

        Ok(out)
    }

    /// Replays a left token without touching state (old-node update pass).
    pub(crate) fn left_replay(&self, token: &Arc<Token>) -> RetortResult<Vec<(Tag, Arc<Token>)>> {
        // The canonical instance owns the live count.
        let code = self.left.code_for(token)?;
        let count = self
            .left
            .candidates(code)
            .find(|t| t.data_eq(token))
            .map_or_else(|| 0, |t| t.negation_count());
        if count == 0 {
            return Ok(vec![(Tag::Update, Self::pass_through(token))]);
        }
        Ok(Vec::new())
    }

    /// Flushes both memories.
    pub(crate) fn flush(&mut self) {
        self.left.clear();
        self.right.clear();
    }
}
