//! Fact templates (schemas).
//!
//! A template names an ordered list of slots. Facts hold one value per
//! slot in template order. Template identity is by name; two engines
//! exchanging serialized facts agree on layout through the name alone.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{NetworkError, RetortResult};

/// A single slot declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDef {
    /// Slot name, unique within the template.
    pub name: String,
    /// Whether the slot holds a list of values rather than one.
    pub multislot: bool,
}

impl SlotDef {
    /// Declares a single-valued slot.
    pub fn single(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            multislot: false,
        }
    }

    /// Declares a multislot.
    pub fn multi(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            multislot: true,
        }
    }
}

/// A fact schema: a named, ordered list of slots.
///
/// # Examples
///
/// ```
/// use retort::Template;
///
/// let person = Template::new("person", ["name", "age"]);
/// assert_eq!(person.slot_index("age"), Some(1));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    /// Template name; identity for equality and working-memory keying.
    pub name: String,
    /// Ordered slot declarations.
    pub slots: Vec<SlotDef>,
    /// When set, modifies only re-propagate through branches that test a
    /// changed slot. Tokens already held downstream keep the pre-modify
    /// fact for slots nothing tested.
    pub slot_specific: bool,
}

impl Template {
    /// Creates a template with single-valued slots.
    pub fn new<I, S>(name: impl Into<String>, slot_names: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            name: name.into(),
            slots: slot_names.into_iter().map(SlotDef::single).collect(),
            slot_specific: false,
        })
    }

    /// Creates a template from explicit slot declarations.
    pub fn with_slots(name: impl Into<String>, slots: Vec<SlotDef>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            slots,
            slot_specific: false,
        })
    }

    /// Returns a slot-specific copy of this template.
    #[must_use]
    pub fn slot_specific(mut self: Arc<Self>) -> Arc<Self> {
        let t = Arc::make_mut(&mut self);
        t.slot_specific = true;
        self
    }

    /// Number of slots.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.slots.len()
    }

    /// Index of a slot by name.
    #[must_use]
    pub fn slot_index(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.name == name)
    }

    /// Index of a slot by name, as a network-construction error if absent.
    pub fn require_slot(&self, name: &str) -> RetortResult<usize> {
        self.slot_index(name).ok_or_else(|| {
            NetworkError::UnknownSlot {
                template: self.name.clone(),
                slot: name.to_string(),
            }
            .into()
        })
    }

    /// Whether the slot at `index` is a multislot.
    #[must_use]
    pub fn is_multislot(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(|s| s.multislot)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(deftemplate {}", self.name)?;
        for s in &self.slots {
            if s.multislot {
                write!(f, " (multislot {})", s.name)?;
            } else {
                write!(f, " (slot {})", s.name)?;
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_slot_lookup() {
        let t = Template::new("person", ["name", "age"]);
        assert_eq!(t.arity(), 2);
        assert_eq!(t.slot_index("name"), Some(0));
        assert_eq!(t.slot_index("age"), Some(1));
        assert_eq!(t.slot_index("height"), None);
    }

    #[test]
    fn template_require_slot_errors() {
        let t = Template::new("person", ["name"]);
        let err = t.require_slot("age").unwrap_err();
        assert!(err.is_network());
    }

    #[test]
    fn template_multislot_flag() {
        let t = Template::with_slots(
            "box",
            vec![SlotDef::single("label"), SlotDef::multi("contents")],
        );
        assert!(!t.is_multislot(0));
        assert!(t.is_multislot(1));
        assert!(!t.is_multislot(9));
    }

    #[test]
    fn template_slot_specific_copy() {
        let t = Template::new("person", ["name"]).slot_specific();
        assert!(t.slot_specific);
    }

    #[test]
    fn template_display() {
        let t = Template::with_slots(
            "box",
            vec![SlotDef::single("label"), SlotDef::multi("contents")],
        );
        assert_eq!(
            format!("{t}"),
            "(deftemplate box (slot label) (multislot contents))"
        );
    }
}
