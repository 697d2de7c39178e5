//! Slot values facts can hold.
//!
//! Values in retort cover the primitive types a template slot can carry,
//! plus `List` for multislot contents and `Fact` for fact-id references.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::fact::FactId;

/// Possible values a fact slot can hold.
///
/// # Examples
///
/// ```
/// use retort::Value;
///
/// let sym = Value::symbol("red");
/// let n = Value::Int(42);
///
/// assert!(sym.is_symbol());
/// assert_eq!(n.as_float(), Some(42.0));
/// ```
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Symbol(String),
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<Value>),
    Fact(FactId),
    None,
}

#[allow(missing_docs)]
impl Value {
    /// Creates a symbol value.
    pub fn symbol(s: impl Into<String>) -> Self {
        Self::Symbol(s.into())
    }

    pub const fn is_symbol(&self) -> bool {
        matches!(self, Self::Symbol(_))
    }

    pub const fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    pub const fn is_int(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float(_))
    }

    pub const fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view; ints widen to float.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Text view; symbols and strings both qualify.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Symbol(v) | Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_fact(&self) -> Option<FactId> {
        match self {
            Self::Fact(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Symbol(_) => "symbol",
            Self::String(_) => "string",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::List(_) => "list",
            Self::Fact(_) => "fact",
            Self::None => "none",
        }
    }

    /// Compares two values for ordering tests.
    ///
    /// Ints and floats compare numerically across types; symbols and
    /// strings compare lexically across types. Everything else is only
    /// comparable to itself and only for equality.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (a, b) if a.as_float().is_some() && b.as_float().is_some() => {
                Some(a.as_float()?.total_cmp(&b.as_float()?))
            }
            (a, b) if a.as_str().is_some() && b.as_str().is_some() => {
                Some(a.as_str()?.cmp(b.as_str()?))
            }
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Fact(a), Self::Fact(b)) => Some(a.cmp(b)),
            (a, b) if a == b => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// Stable hash contribution for memory partitioning.
    ///
    /// Equal values (under `==`) must produce equal codes; numeric
    /// cross-type equality is not folded (Int(1) and Float(1.0) are not
    /// `==` and may hash apart).
    #[must_use]
    pub fn bucket_code(&self) -> u64 {
        match self {
            Self::Symbol(s) | Self::String(s) => {
                let mut h: u64 = 0xcbf2_9ce4_8422_2325;
                for b in s.bytes() {
                    h ^= u64::from(b);
                    h = h.wrapping_mul(0x0100_0000_01b3);
                }
                h
            }
            #[allow(clippy::cast_sign_loss)]
            Self::Int(v) => *v as u64,
            Self::Float(v) => v.to_bits(),
            Self::Bool(v) => u64::from(*v),
            Self::List(vs) => vs
                .iter()
                .fold(17u64, |acc, v| acc.wrapping_mul(31).wrapping_add(v.bucket_code())),
            Self::Fact(id) => id.as_u64(),
            Self::None => 0,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::None
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Symbol(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::List(vs) => {
                write!(f, "(")?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
            Self::Fact(id) => write!(f, "<fact-{id}>"),
            Self::None => write!(f, "nil"),
        }
    }
}

// Convenient From implementations
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Symbol(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<FactId> for Value {
    fn from(v: FactId) -> Self {
        Self::Fact(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}
