//! Facts: the typed records held in working memory.
//!
//! A fact is an ordered tuple of slot values plus a template reference.
//! Once published into working memory a fact is immutable; modify is
//! retract-then-reassert presented as one atomic operation. Identity
//! (`FactId`) is assigned monotonically by working memory; data equality
//! (`FactKey`) is template name plus slot values, independent of id.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{EvalError, RetortResult};
use crate::template::Template;
use crate::value::Value;

/// Working-memory fact identifier.
///
/// Assigned monotonically on assert, never reused within an engine.
/// Id 0 is reserved for synthetic facts (negation placeholders and
/// accumulate results) that never live in working memory.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct FactId(u64);

impl FactId {
    /// The reserved id for synthetic facts.
    pub const SYNTHETIC: Self = Self(0);

    /// Wraps a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// True for the reserved synthetic id.
    #[must_use]
    pub const fn is_synthetic(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable typed record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    /// Schema for this fact.
    pub template: Arc<Template>,
    /// Slot values in template order.
    pub slots: Vec<Value>,
    /// Working-memory identity; `SYNTHETIC` until published.
    pub id: FactId,
    /// Logical clock value at the last assert or modify.
    pub pseudotime: u64,
    /// Set for facts mirroring host objects. Inert in the matching core;
    /// carried for the host-binding collaborator.
    pub shadow: bool,
}

impl Fact {
    /// Creates an unpublished fact. Missing slots are filled with
    /// `Value::None`; extra values are truncated to the template arity.
    #[must_use]
    pub fn new(template: Arc<Template>, mut slots: Vec<Value>) -> Self {
        slots.resize(template.arity(), Value::None);
        Self {
            template,
            slots,
            id: FactId::SYNTHETIC,
            pseudotime: 0,
            shadow: false,
        }
    }

    /// The synthetic placeholder appended to tokens passing a negated
    /// condition. Shared by every negated join.
    #[must_use]
    pub fn placeholder() -> Arc<Self> {
        static PLACEHOLDER: std::sync::OnceLock<Arc<Fact>> = std::sync::OnceLock::new();
        Arc::clone(PLACEHOLDER.get_or_init(|| {
            Arc::new(Self::new(Template::new("__not", Vec::<String>::new()), Vec::new()))
        }))
    }

    /// A synthetic single-slot fact carrying an accumulate result.
    #[must_use]
    pub fn accumulate_result(value: Value) -> Arc<Self> {
        Arc::new(Self::new(Template::new("__accumulate", ["result"]), vec![value]))
    }

    /// Value at `slot`, range-checked.
    pub fn slot(&self, slot: usize) -> RetortResult<&Value> {
        self.slots.get(slot).ok_or_else(|| {
            EvalError::SlotOutOfRange {
                template: self.template.name.clone(),
                slot,
            }
            .into()
        })
    }

    /// Value at `slot`, descending into a multislot sub-index when given.
    ///
    /// A sub-index past the end of the list yields `Value::None` rather
    /// than an error: removals must be evaluable against carried data
    /// even when the live fact has since changed shape.
    pub fn slot_at(&self, slot: usize, sub_index: Option<usize>) -> RetortResult<Value> {
        let v = self.slot(slot)?;
        match sub_index {
            None => Ok(v.clone()),
            Some(i) => Ok(v
                .as_list()
                .and_then(|l| l.get(i))
                .cloned()
                .unwrap_or(Value::None)),
        }
    }

    /// Data-equality key: template name plus slot values.
    #[must_use]
    pub fn key(&self) -> FactKey {
        FactKey {
            template: self.template.name.clone(),
            slots: self.slots.clone(),
        }
    }

    /// True if this fact has been published into working memory.
    #[must_use]
    pub const fn is_published(&self) -> bool {
        !self.id.is_synthetic()
    }
}

/// Two facts are equal when their template names and slot values match,
/// independent of id and pseudotime.
impl PartialEq for Fact {
    fn eq(&self, other: &Self) -> bool {
        self.template.name == other.template.name && self.slots == other.slots
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f-{} ({}", self.id, self.template.name)?;
        for (def, v) in self.template.slots.iter().zip(&self.slots) {
            write!(f, " ({} {})", def.name, v)?;
        }
        write!(f, ")")
    }
}

/// Hashable data-equality key for a fact.
///
/// Working memory and truth maintenance are keyed by this, so an exact
/// duplicate assert finds the canonical stored instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactKey {
    /// Template name.
    pub template: String,
    /// Slot values.
    pub slots: Vec<Value>,
}

impl Eq for FactKey {}

#[allow(clippy::derived_hash_with_manual_eq)]
impl std::hash::Hash for FactKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.template.hash(state);
        for v in &self.slots {
            v.bucket_code().hash(state);
        }
    }
}
