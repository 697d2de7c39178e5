//! # Retort - A Forward-Chaining Production Rule Engine
//!
//! Retort matches facts in working memory against rule patterns through
//! a discrimination network, queues complete matches on an agenda, and
//! fires them under a pluggable conflict-resolution strategy. Retracted
//! facts withdraw their matches exactly; facts asserted under logical
//! support disappear when their justification does.
//!
//! ## Core Concepts
//!
//! - **Template**: The named, slotted shape facts are built from
//! - **Fact**: An immutable tuple in working memory with a stable id
//! - **Rule**: Patterns compiled into the network plus a body closure
//! - **Activation**: A complete match queued for firing
//! - **Logical support**: Truth maintenance linking derived facts to
//!   the matches that justify them
//!
//! ## Usage
//!
//! ```rust,ignore
//! use retort::{PatternSpec, Relation, Rete, RuleSpec, Template, Value};
//!
//! let engine = Rete::new();
//! engine.add_template(Template::new("person", ["name", "age"]));
//!
//! engine.add_rule(
//!     RuleSpec::new(
//!         "greet_adult",
//!         Box::new(|token, _ctx| {
//!             println!("adult: {}", token.fact.slots[0]);
//!             Ok(())
//!         }),
//!     )
//!     .pattern(PatternSpec::matches("person").test("age", Relation::Ge, Value::Int(18))),
//! )?;
//!
//! engine.assert("person", vec![Value::symbol("Al"), Value::Int(30)])?;
//! engine.run(None)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Data model
pub mod error;
pub mod fact;
pub mod template;
pub mod token;
pub mod value;

// Matching
pub mod builder;
pub mod network;
pub mod rule;
pub mod support;

// Firing
pub mod agenda;
pub mod engine;
pub mod listener;
pub mod working_memory;

// Re-export primary types at crate root for convenience
pub use agenda::{
    Activation, ActivationKey, BreadthStrategy, DepthStrategy, SalienceEvaluation, Strategy,
};
pub use builder::{
    Aggregate, JoinConstraint, LengthConstraint, PatternKind, PatternSpec, RuleSpec,
    SlotConstraint,
};
pub use engine::Rete;
pub use error::{EvalError, NetworkError, RetortError, RetortResult};
pub use fact::{Fact, FactId};
pub use listener::{CallbackId, EngineEvent, EventKind, EventStream};
pub use network::accumulate::{Accumulator, Collect, Count, Sum};
pub use network::single::Relation;
pub use network::{NodeId, Tag};
pub use rule::{Rule, RuleBody, RuleId, RuleRef, SalienceFn, MAIN_MODULE};
pub use template::{SlotDef, Template};
pub use token::Token;
pub use value::Value;
pub use working_memory::{AssertOutcome, RuleContext, WorkingMemory};
