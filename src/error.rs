//! Error types for retort.
//!
//! All errors in retort are strongly typed using thiserror.
//! The taxonomy mirrors how failures behave: network construction
//! errors are fatal at the call site, evaluation errors carry the
//! propagation context they occurred in, and invariant violations
//! indicate corrupted internal state and are never retried.

use thiserror::Error;

/// Structural errors raised while building or mutating the node graph.
///
/// These indicate a malformed construction request and are fatal at the
/// call site; the network is left unchanged.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Unknown template '{name}'")]
    UnknownTemplate {
        name: String,
    },

    #[error("Template '{template}' has no slot named '{slot}'")]
    UnknownSlot {
        template: String,
        slot: String,
    },

    #[error("Slot '{slot}' of template '{template}' is not a multislot")]
    NotAMultislot {
        template: String,
        slot: String,
    },

    #[error("Unknown rule '{name}'")]
    UnknownRule {
        name: String,
    },

    #[error("Unknown module '{name}'")]
    UnknownModule {
        name: String,
    },

    #[error("Rule '{name}' has no patterns")]
    EmptyRule {
        name: String,
    },

    #[error("Pattern {pattern} of rule '{rule}' is invalid: {reason}")]
    InvalidPattern {
        rule: String,
        pattern: usize,
        reason: String,
    },

    #[error("Invalid regex '{pattern}': {reason}")]
    InvalidRegex {
        pattern: String,
        reason: String,
    },

    #[error("Logical prefix length {prefix} exceeds pattern count {patterns} in rule '{rule}'")]
    LogicalPrefixTooLong {
        rule: String,
        prefix: usize,
        patterns: usize,
    },
}

/// Data errors raised while a token propagates through the network.
///
/// A failing test or accumulator aborts the triggering fact operation.
/// Successors that already ran are not rolled back; working memory keeps
/// whatever the completed propagation steps applied.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Test at node {node} failed: {reason}")]
    TestFailed {
        node: usize,
        reason: String,
    },

    #[error("Accumulator '{name}' failed at node {node}: {reason}")]
    AccumulatorFailed {
        name: String,
        node: usize,
        reason: String,
    },

    #[error("Rule '{rule}' body failed: {source}")]
    RuleBody {
        rule: String,
        #[source]
        source: Box<RetortError>,
    },

    #[error("Fact {id} not found in working memory")]
    FactNotFound {
        id: u64,
    },

    #[error("Slot index {slot} out of range for template '{template}'")]
    SlotOutOfRange {
        template: String,
        slot: usize,
    },
}

/// Top-level error type for retort.
///
/// Internal errors are invariant violations (negative negation counts,
/// corrupted heap state); they are unrecoverable and indicate a bug.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum RetortError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    #[error("Internal error in {routine}: {message}")]
    Internal {
        routine: &'static str,
        message: String,
    },
}

impl RetortError {
    /// Creates an internal error tagged with the routine it came from.
    #[must_use]
    pub fn internal(routine: &'static str, message: impl Into<String>) -> Self {
        Self::Internal {
            routine,
            message: message.into(),
        }
    }

    /// Returns true if this is a structural network error.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Returns true if this is a propagation-time data error.
    #[must_use]
    pub const fn is_eval(&self) -> bool {
        matches!(self, Self::Eval(_))
    }

    /// Returns true if this is an internal invariant violation.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Result type alias for retort operations.
pub type RetortResult<T> = Result<T, RetortError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_error_unknown_slot() {
        let err = NetworkError::UnknownSlot {
            template: "person".to_string(),
            slot: "height".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("person"));
        assert!(msg.contains("height"));
    }

    #[test]
    fn eval_error_fact_not_found() {
        let err = EvalError::FactNotFound { id: 42 };
        let msg = format!("{err}");
        assert!(msg.contains("42"));
    }

    #[test]
    fn retort_error_from_network() {
        let err: RetortError = NetworkError::UnknownRule {
            name: "r1".to_string(),
        }
        .into();
        assert!(err.is_network());
        assert!(!err.is_eval());
    }

    #[test]
    fn retort_error_from_eval() {
        let err: RetortError = EvalError::TestFailed {
            node: 3,
            reason: "type mismatch".to_string(),
        }
        .into();
        assert!(err.is_eval());
    }

    #[test]
    fn retort_error_internal_carries_routine() {
        let err = RetortError::internal("NodeNot2::decrement", "count went negative");
        assert!(err.is_internal());
        let msg = format!("{err}");
        assert!(msg.contains("NodeNot2::decrement"));
        assert!(msg.contains("negative"));
    }

    #[test]
    fn rule_body_error_wraps_cause() {
        let cause = RetortError::internal("fire", "boom");
        let err: RetortError = EvalError::RuleBody {
            rule: "r1".to_string(),
            source: Box::new(cause),
        }
        .into();
        let msg = format!("{err}");
        assert!(msg.contains("r1"));
    }
}
