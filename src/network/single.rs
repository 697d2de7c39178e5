//! Single-input tests: the `Node1` family.
//!
//! These nodes sit between the network root and the joins. Each receives
//! single-fact tokens, applies a local test, and forwards passers. They
//! are the most heavily shared nodes: every rule matching the same
//! template/slot constraints reuses one chain of them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use crate::error::{NetworkError, RetortError, RetortResult};
use crate::fact::Fact;
use crate::value::Value;

const REGEX_CACHE_MAX: usize = 1024;

static REGEX_CACHE: OnceLock<RwLock<HashMap<String, regex::Regex>>> = OnceLock::new();

pub(crate) fn cached_regex(pattern: &str) -> RetortResult<regex::Regex> {
    let cache = REGEX_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    {
        let guard = cache
            .read()
            .map_err(|_| RetortError::internal("cached_regex", "regex cache lock poisoned"))?;
        if let Some(re) = guard.get(pattern) {
            return Ok(re.clone());
        }
    }

    let compiled = regex::Regex::new(pattern).map_err(|e| {
        RetortError::Network(NetworkError::InvalidRegex {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
    })?;

    let mut guard = cache
        .write()
        .map_err(|_| RetortError::internal("cached_regex", "regex cache lock poisoned"))?;

    if guard.len() >= REGEX_CACHE_MAX {
        // Keep the cache bounded to avoid unbounded memory usage.
        guard.clear();
    }

    // Another thread may have inserted it while we compiled.
    guard
        .entry(pattern.to_string())
        .or_insert_with(|| compiled.clone());
    Ok(compiled)
}

/// Relation between a tested value and a reference value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum Relation {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Regex match on symbol/string values.
    Matches(String),
}

impl Relation {
    /// Evaluates `left <relation> right`.
    ///
    /// Incomparable values fail ordering relations rather than erroring:
    /// removals must re-run the same tests on carried data, so a test
    /// must give the same verdict for the same inputs every time.
    pub fn eval(&self, left: &Value, right: &Value) -> RetortResult<bool> {
        use std::cmp::Ordering;
        match self {
            Self::Eq => Ok(left == right),
            Self::Ne => Ok(left != right),
            Self::Lt => Ok(left.compare(right) == Some(Ordering::Less)),
            Self::Le => Ok(matches!(
                left.compare(right),
                Some(Ordering::Less | Ordering::Equal)
            )),
            Self::Gt => Ok(left.compare(right) == Some(Ordering::Greater)),
            Self::Ge => Ok(matches!(
                left.compare(right),
                Some(Ordering::Greater | Ordering::Equal)
            )),
            Self::Matches(pattern) => {
                let Some(s) = left.as_str() else {
                    return Ok(false);
                };
                let re = cached_regex(pattern)?;
                Ok(re.is_match(s))
            }
        }
    }

    /// True for relations usable as a memory index key.
    #[must_use]
    pub const fn is_indexable(&self) -> bool {
        matches!(self, Self::Eq)
    }
}

/// A slot-against-constant test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotTest {
    /// Slot index within the pattern's template.
    pub slot: usize,
    /// Sub-index for multislot decomposition.
    pub sub: Option<usize>,
    /// Relation applied.
    pub relation: Relation,
    /// Reference value.
    pub value: Value,
}

impl SlotTest {
    /// Applies the test to a fact.
    pub fn eval(&self, fact: &Fact) -> RetortResult<bool> {
        let v = fact.slot_at(self.slot, self.sub)?;
        self.relation.eval(&v, &self.value)
    }
}

/// A multislot length constraint, the gate for multislot splitting.
///
/// Patterns that decompose a multislot into positional sub-tests first
/// pin the list length (or a minimum), then test sub-indexes via
/// [`SlotTest::sub`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultislotLength {
    /// Slot index of the multislot.
    pub slot: usize,
    /// Required length when `exact`, minimum length otherwise.
    pub len: usize,
    /// Exact or at-least.
    pub exact: bool,
}

impl MultislotLength {
    /// Applies the length constraint to a fact.
    pub fn eval(&self, fact: &Fact) -> RetortResult<bool> {
        let Some(list) = fact.slot(self.slot)?.as_list() else {
            return Ok(false);
        };
        Ok(if self.exact {
            list.len() == self.len
        } else {
            list.len() >= self.len
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{SlotDef, Template};

    fn person(age: i64) -> Fact {
        let t = Template::new("person", ["name", "age"]);
        Fact::new(t, vec![Value::symbol("Al"), Value::Int(age)])
    }

    #[test]
    fn relation_ordering() {
        assert!(Relation::Gt.eval(&Value::Int(30), &Value::Int(28)).unwrap());
        assert!(!Relation::Gt.eval(&Value::Int(25), &Value::Int(28)).unwrap());
        assert!(Relation::Le
            .eval(&Value::Float(2.0), &Value::Int(2))
            .unwrap());
    }

    #[test]
    fn relation_incomparable_fails_quietly() {
        assert!(!Relation::Lt
            .eval(&Value::symbol("x"), &Value::Int(1))
            .unwrap());
        assert!(Relation::Ne
            .eval(&Value::symbol("x"), &Value::Int(1))
            .unwrap());
    }

    #[test]
    fn relation_regex() {
        let r = Relation::Matches("^ab+$".to_string());
        assert!(r.eval(&Value::symbol("abb"), &Value::None).unwrap());
        assert!(!r.eval(&Value::symbol("ba"), &Value::None).unwrap());
        assert!(!r.eval(&Value::Int(3), &Value::None).unwrap());
    }

    #[test]
    fn relation_bad_regex_is_structural_error() {
        let r = Relation::Matches("([".to_string());
        let err = r.eval(&Value::symbol("x"), &Value::None).unwrap_err();
        assert!(err.is_network());
    }

    #[test]
    fn slot_test_eval() {
        let test = SlotTest {
            slot: 1,
            sub: None,
            relation: Relation::Gt,
            value: Value::Int(28),
        };
        assert!(test.eval(&person(30)).unwrap());
        assert!(!test.eval(&person(25)).unwrap());
    }

    #[test]
    fn slot_test_out_of_range_errors() {
        let test = SlotTest {
            slot: 7,
            sub: None,
            relation: Relation::Eq,
            value: Value::None,
        };
        assert!(test.eval(&person(30)).is_err());
    }

    #[test]
    fn multislot_length_and_sub_test() {
        let t = Template::with_slots(
            "box",
            vec![SlotDef::single("label"), SlotDef::multi("contents")],
        );
        let f = Fact::new(
            t,
            vec![
                Value::symbol("b"),
                Value::List(vec![Value::Int(1), Value::Int(2)]),
            ],
        );

        let exact = MultislotLength {
            slot: 1,
            len: 2,
            exact: true,
        };
        assert!(exact.eval(&f).unwrap());

        let min = MultislotLength {
            slot: 1,
            len: 3,
            exact: false,
        };
        assert!(!min.eval(&f).unwrap());

        let sub = SlotTest {
            slot: 1,
            sub: Some(1),
            relation: Relation::Eq,
            value: Value::Int(2),
        };
        assert!(sub.eval(&f).unwrap());
    }

    #[test]
    fn multislot_length_on_scalar_fails() {
        let f = person(30);
        let m = MultislotLength {
            slot: 1,
            len: 1,
            exact: false,
        };
        assert!(!m.eval(&f).unwrap());
    }
}
