//! Hashed token memories for two-input nodes.
//!
//! Each join node holds tokens in a `TokenMemory`: a bucketed index that
//! restricts join evaluation to the one bucket that could possibly match.
//! The bucket key is either the token's structural sort code or the value
//! at a configured (fact-index, slot-index, sub-index) triple, depending
//! on whether the node indexes by join key or by prefix identity.

use std::sync::Arc;

use crate::error::RetortResult;
use crate::token::Token;

/// How a memory buckets its tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKey {
    /// Bucket by the chain's structural sort code.
    SortCode,
    /// Bucket by the value at a fact/slot/sub-index triple.
    Slot {
        /// Fact index within the chain (0-based from the root).
        fact: usize,
        /// Slot index within that fact.
        slot: usize,
        /// Sub-index into a multislot value.
        sub: Option<usize>,
    },
}

const INITIAL_BUCKETS: usize = 16;
const LOAD_FACTOR: usize = 3;

/// A hash-bucketed collection of tokens held at a join node.
#[derive(Debug)]
pub struct TokenMemory {
    key: MemoryKey,
    buckets: Vec<Vec<Arc<Token>>>,
    len: usize,
}

impl TokenMemory {
    /// Creates an empty memory with the given bucketing key.
    #[must_use]
    pub fn new(key: MemoryKey) -> Self {
        Self {
            key,
            buckets: vec![Vec::new(); INITIAL_BUCKETS],
            len: 0,
        }
    }

    /// Number of stored tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no tokens are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The bucket code this memory derives from a token.
    pub fn code_for(&self, token: &Token) -> RetortResult<u64> {
        match self.key {
            MemoryKey::SortCode => Ok(token.sort_code),
            MemoryKey::Slot { fact, slot, sub } => match token.fact_at(fact) {
                Some(f) => Ok(f.slot_at(slot, sub)?.bucket_code()),
                // Carried data can be shorter than the key expects after a
                // structural mismatch upstream; fold into one bucket.
                None => Ok(0),
            },
        }
    }

    /// Stores a token.
    pub fn add(&mut self, token: Arc<Token>) -> RetortResult<()> {
        if self.len >= self.buckets.len() * LOAD_FACTOR {
            self.rehash();
        }
        let code = self.code_for(&token)?;
        let idx = self.bucket_index(code);
        self.buckets[idx].push(token);
        self.len += 1;
        Ok(())
    }

    /// Removes and returns the stored token data-equal to `token`.
    ///
    /// Returns the canonical stored instance so callers can read state
    /// (the negation counter) that lives on it rather than on the caller-built argument.
    pub fn remove(&mut self, token: &Token) -> RetortResult<Option<Arc<Token>>> {
        let code = self.code_for(token)?;
        let idx = self.bucket_index(code);
        let bucket = &mut self.buckets[idx];
        if let Some(pos) = bucket.iter().position(|t| t.data_eq(token)) {
            self.len -= 1;
            return Ok(Some(bucket.swap_remove(pos)));
        }
        Ok(None)
    }

    /// Tokens in the bucket for `code`. Only candidates; callers still
    /// run their full test set on each.
    pub fn candidates(&self, code: u64) -> impl Iterator<Item = &Arc<Token>> {
        let idx = self.bucket_index(code);
        self.buckets[idx].iter()
    }

    /// All stored tokens, order unspecified.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Token>> {
        self.buckets.iter().flatten()
    }

    /// Drops every token.
    pub fn clear(&mut self) {
        for b in &mut self.buckets {
            b.clear();
        }
        self.len = 0;
    }

    fn bucket_index(&self, code: u64) -> usize {
        (code % self.buckets.len() as u64) as usize
    }

    fn rehash(&mut self) {
        let new_size = self.buckets.len() * 2 + 1;
        let old = std::mem::replace(&mut self.buckets, vec![Vec::new(); new_size]);
        for token in old.into_iter().flatten() {
            // Codes were computable when first added.
            let code = self.code_for(&token).unwrap_or(0);
            let idx = self.bucket_index(code);
            self.buckets[idx].push(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::{Fact, FactId};
    use crate::template::Template;
    use crate::value::Value;

    fn token(id: u64, age: i64) -> Arc<Token> {
        let t = Template::new("person", ["age"]);
        let mut f = Fact::new(t, vec![Value::Int(age)]);
        f.id = FactId::new(id);
        Token::seed(Arc::new(f))
    }

    #[test]
    fn memory_add_remove_by_data_equality() {
        let mut m = TokenMemory::new(MemoryKey::SortCode);
        m.add(token(1, 30)).unwrap();
        m.add(token(2, 25)).unwrap();
        assert_eq!(m.len(), 2);

        let removed = m.remove(&token(1, 30)).unwrap();
        assert!(removed.is_some());
        assert_eq!(m.len(), 1);

        // Absent token removes nothing.
        assert!(m.remove(&token(9, 9)).unwrap().is_none());
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn memory_slot_key_groups_equal_values() {
        let key = MemoryKey::Slot {
            fact: 0,
            slot: 0,
            sub: None,
        };
        let mut m = TokenMemory::new(key);
        m.add(token(1, 30)).unwrap();
        m.add(token(2, 30)).unwrap();
        m.add(token(3, 25)).unwrap();

        let code = Value::Int(30).bucket_code();
        let hits: Vec<_> = m.candidates(code).collect();
        // The age-25 token may only collide by accident of bucket count.
        assert!(hits.len() >= 2);
        assert!(hits
            .iter()
            .filter(|t| t.fact.slots[0] == Value::Int(30))
            .count() == 2);
    }

    #[test]
    fn memory_rehash_preserves_contents() {
        let mut m = TokenMemory::new(MemoryKey::SortCode);
        for i in 0..200 {
            m.add(token(i, i64::try_from(i).unwrap())).unwrap();
        }
        assert_eq!(m.len(), 200);
        assert_eq!(m.iter().count(), 200);
        // Every token is still findable after rehashing.
        assert!(m.remove(&token(150, 150)).unwrap().is_some());
        assert_eq!(m.len(), 199);
    }

    #[test]
    fn memory_clear() {
        let mut m = TokenMemory::new(MemoryKey::SortCode);
        m.add(token(1, 1)).unwrap();
        m.clear();
        assert!(m.is_empty());
        assert_eq!(m.iter().count(), 0);
    }

    #[test]
    fn memory_canonical_instance_returned() {
        let mut m = TokenMemory::new(MemoryKey::SortCode);
        let stored = token(1, 30);
        stored.add_negation(2);
        m.add(Arc::clone(&stored)).unwrap();

        // A fresh equal-data token finds the canonical instance.
        let got = m.remove(&token(1, 30)).unwrap().unwrap();
        assert!(Arc::ptr_eq(&got, &stored));
        assert_eq!(got.negation_count(), 2);
    }
}
