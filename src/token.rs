//! Tokens: persistent partial-match chains.
//!
//! A token is a singly-linked list of facts built by prepending one new
//! fact to a parent token. Chains are shared (`Arc`) across the many
//! tokens that extend a common prefix and are never deep-copied. The
//! only mutable field is the negation counter, which negated joins bump
//! in place on the canonical left-memory instance; all such mutation
//! happens under the working-memory lock.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::fact::{Fact, FactId};

/// A partial or complete match: a parent-linked chain of facts.
#[derive(Debug)]
pub struct Token {
    /// The enclosing prefix, absent for a chain of one.
    pub parent: Option<Arc<Token>>,
    /// The fact this link adds to the chain.
    pub fact: Arc<Fact>,
    /// Number of facts in the chain.
    pub size: usize,
    /// Rolling hash of the chain's fact ids, used for memory partitioning.
    pub sort_code: u64,
    /// Count of right facts currently matching a negated condition.
    /// Touched only by negated joins holding the left-memory instance.
    negation_count: AtomicI64,
}

impl Token {
    /// Starts a chain from a single fact.
    #[must_use]
    pub fn seed(fact: Arc<Fact>) -> Arc<Self> {
        let sort_code = rolling(0, fact.id);
        Arc::new(Self {
            parent: None,
            fact,
            size: 1,
            sort_code,
            negation_count: AtomicI64::new(0),
        })
    }

    /// Extends a chain by one fact.
    #[must_use]
    pub fn extend(self: &Arc<Self>, fact: Arc<Fact>) -> Arc<Self> {
        let sort_code = rolling(self.sort_code, fact.id);
        Arc::new(Self {
            parent: Some(Arc::clone(self)),
            fact,
            size: self.size + 1,
            sort_code,
            negation_count: AtomicI64::new(0),
        })
    }

    /// The fact at `index`, counting from the chain root (0-based).
    #[must_use]
    pub fn fact_at(&self, index: usize) -> Option<&Arc<Fact>> {
        if index >= self.size {
            return None;
        }
        let mut cur = self;
        loop {
            if cur.size == index + 1 {
                return Some(&cur.fact);
            }
            cur = cur.parent.as_deref()?;
        }
    }

    /// The prefix of this chain with `size` facts.
    #[must_use]
    pub fn prefix(self: &Arc<Self>, size: usize) -> Option<Arc<Self>> {
        let mut cur = Arc::clone(self);
        loop {
            if cur.size == size {
                return Some(cur);
            }
            if cur.size < size {
                return None;
            }
            let parent = cur.parent.as_ref()?;
            cur = Arc::clone(parent);
        }
    }

    /// Fact ids from root to tip. Unique per chain within one engine, so
    /// this doubles as a hashable identity for agenda and support keying.
    #[must_use]
    pub fn id_chain(&self) -> Vec<FactId> {
        let mut ids = vec![FactId::SYNTHETIC; self.size];
        let mut cur = self;
        loop {
            ids[cur.size - 1] = cur.fact.id;
            match cur.parent.as_deref() {
                Some(p) => cur = p,
                None => break,
            }
        }
        ids
    }

    /// Iterates facts from tip back to root.
    pub fn facts_rev(&self) -> impl Iterator<Item = &Arc<Fact>> {
        std::iter::successors(Some(self), |t| t.parent.as_deref()).map(|t| &t.fact)
    }

    /// Data-equality: fact ids and contents match pairwise back to root.
    #[must_use]
    pub fn data_eq(&self, other: &Self) -> bool {
        if self.size != other.size || self.sort_code != other.sort_code {
            return false;
        }
        let mut a = Some(self);
        let mut b = Some(other);
        while let (Some(x), Some(y)) = (a, b) {
            if x.fact.id != y.fact.id || x.fact != y.fact {
                return false;
            }
            a = x.parent.as_deref();
            b = y.parent.as_deref();
        }
        true
    }

    /// Current negation count.
    #[must_use]
    pub fn negation_count(&self) -> i64 {
        self.negation_count.load(Ordering::Relaxed)
    }

    /// Bumps the negation count, returning the new value.
    pub(crate) fn add_negation(&self, delta: i64) -> i64 {
        self.negation_count.fetch_add(delta, Ordering::Relaxed) + delta
    }
}

fn rolling(code: u64, id: FactId) -> u64 {
    code.wrapping_mul(31).wrapping_add(id.as_u64()).wrapping_add(1)
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids = self.id_chain();
        write!(f, "[")?;
        for (i, id) in ids.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "f-{id}")?;
        }
        write!(f, "]")
    }
}
