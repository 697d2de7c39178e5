//! A single rule instantiation awaiting firing.

use std::fmt;
use std::sync::Arc;

use crate::fact::FactId;
use crate::rule::{RuleId, RuleRef};
use crate::token::Token;

/// Identity of an activation: the rule plus the ids of the facts that
/// matched it. Removal after a retraction finds the activation by this
/// key even though the token instances differ.
pub type ActivationKey = (RuleId, Vec<FactId>);

/// A rule matched against a complete token, queued for firing.
#[derive(Clone)]
pub struct Activation {
    /// The matched rule.
    pub rule: RuleRef,
    /// The complete left token at the rule's terminal.
    pub token: Arc<Token>,
    /// Salience captured when the activation was queued; refreshed by
    /// the agenda when configured to re-evaluate.
    pub salience: i64,
    /// Pseudotime of the newest fact in the token.
    pub recency: u64,
    /// Queue arrival order, for strategy tie-breaking.
    pub seq: u64,
}

impl Activation {
    /// Builds an activation with recency derived from the token.
    #[must_use]
    pub fn new(rule: RuleRef, token: Arc<Token>, salience: i64, seq: u64) -> Self {
        let recency = token
            .facts_rev()
            .map(|f| f.pseudotime)
            .max()
            .unwrap_or(0);
        Self {
            rule,
            token,
            salience,
            recency,
            seq,
        }
    }

    /// The activation's identity key.
    #[must_use]
    pub fn key(&self) -> ActivationKey {
        (self.rule.id, self.token.id_chain())
    }
}

impl fmt::Debug for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activation")
            .field("rule", &self.rule.name)
            .field("facts", &self.token.id_chain())
            .field("salience", &self.salience)
            .field("recency", &self.recency)
            .field("seq", &self.seq)
            .finish()
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: ", self.salience, self.rule.name)?;
        let ids = self.token.id_chain();
        let mut first = true;
        for id in ids {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            if id.is_synthetic() {
                write!(f, "*")?;
            } else {
                write!(f, "f-{}", id.as_u64())?;
            }
        }
        Ok(())
    }
}
