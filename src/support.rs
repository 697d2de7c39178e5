//! Truth maintenance: logical support tracking.
//!
//! A fact asserted while a logical dependency context is active records
//! the matching prefix token as its justification. A fact may hold many
//! independent justifications; when the last one's token goes away the
//! fact is scheduled for retraction. A fact with zero recorded support
//! is unconditionally supported and never auto-retracted, and one
//! unconditional assert makes a fact permanent no matter how many
//! conditional supports it also carries.

use std::collections::HashMap;

use crate::fact::FactId;
use crate::token::Token;

/// Identity of a justifying token: its fact-id chain.
type TokenKey = Vec<FactId>;

#[derive(Debug, Default)]
struct SupportEntry {
    unconditional: bool,
    tokens: Vec<TokenKey>,
}

/// The truth-maintenance table.
#[derive(Debug, Default)]
pub struct LogicalSupport {
    by_fact: HashMap<FactId, SupportEntry>,
    by_token: HashMap<TokenKey, Vec<FactId>>,
}

impl LogicalSupport {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `token` as a justification for `fact`.
    ///
    /// No-op if the fact is already unconditionally supported.
    pub fn add_support(&mut self, fact: FactId, token: &Token) {
        let entry = self.by_fact.entry(fact).or_default();
        if entry.unconditional {
            return;
        }
        let key = token.id_chain();
        if !entry.tokens.contains(&key) {
            entry.tokens.push(key.clone());
            self.by_token.entry(key).or_default().push(fact);
        }
    }

    /// Marks a fact as unconditionally supported and drops any
    /// conditional justifications it held. Absorbing: cannot be undone
    /// short of retracting the fact.
    pub fn mark_unconditional(&mut self, fact: FactId) {
        let entry = self.by_fact.entry(fact).or_default();
        entry.unconditional = true;
        for key in std::mem::take(&mut entry.tokens) {
            if let Some(facts) = self.by_token.get_mut(&key) {
                facts.retain(|f| *f != fact);
                if facts.is_empty() {
                    self.by_token.remove(&key);
                }
            }
        }
    }

    /// True unless the fact holds only conditional support.
    #[must_use]
    pub fn is_unconditional(&self, fact: FactId) -> bool {
        self.by_fact.get(&fact).map_or(true, |e| e.unconditional)
    }

    /// Deletes the support entries justified by `token`, returning the
    /// facts whose justification set became empty. The caller schedules
    /// their retraction; nothing is retracted inline.
    #[must_use]
    pub fn remove_token(&mut self, token: &Token) -> Vec<FactId> {
        let key = token.id_chain();
        let Some(facts) = self.by_token.remove(&key) else {
            return Vec::new();
        };

        let mut doomed = Vec::new();
        for fact in facts {
            if let Some(entry) = self.by_fact.get_mut(&fact) {
                entry.tokens.retain(|k| *k != key);
                if entry.tokens.is_empty() && !entry.unconditional {
                    self.by_fact.remove(&fact);
                    doomed.push(fact);
                }
            }
        }
        doomed
    }

    /// Drops all bookkeeping for a retracted fact.
    pub fn remove_fact(&mut self, fact: FactId) {
        if let Some(entry) = self.by_fact.remove(&fact) {
            for key in entry.tokens {
                if let Some(facts) = self.by_token.get_mut(&key) {
                    facts.retain(|f| *f != fact);
                    if facts.is_empty() {
                        self.by_token.remove(&key);
                    }
                }
            }
        }
    }

    /// Number of facts with recorded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_fact.len()
    }

    /// True when no entries are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_fact.is_empty()
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.by_fact.clear();
        self.by_token.clear();
    }
}
