//! Rules: the firing side of the network.
//!
//! The core does not parse rule text; a compiled rule is a name, a
//! module, a salience, an optional logical-prefix length, and a body
//! closure invoked when an activation fires. Pattern structure lives in
//! the node graph, compiled from a [`crate::builder::RuleSpec`].

use std::fmt;
use std::sync::Arc;

use crate::error::RetortResult;
use crate::token::Token;
use crate::working_memory::RuleContext;

/// The default rule module.
pub const MAIN_MODULE: &str = "MAIN";

/// Rule identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct RuleId(uuid::Uuid);

impl RuleId {
    /// Creates a new random rule ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A rule body: runs with the firing token and a working-memory handle.
pub type RuleBody = Box<dyn Fn(&Token, &mut RuleContext<'_>) -> RetortResult<()> + Send + Sync>;

/// Recomputes a rule's salience; consulted per agenda configuration.
pub type SalienceFn = Box<dyn Fn() -> i64 + Send + Sync>;

/// A compiled rule.
pub struct Rule {
    /// Stable identity; activation equality is rule identity plus token
    /// data-equality.
    pub id: RuleId,
    /// Rule name, unique within the engine.
    pub name: String,
    /// Module whose agenda queue holds this rule's activations.
    pub module: String,
    /// Static salience.
    pub salience: i64,
    /// Dynamic salience, when the agenda is configured to re-evaluate.
    pub dynamic_salience: Option<SalienceFn>,
    /// Number of leading patterns whose match logically supports facts
    /// asserted by the body. `None` disables truth maintenance for this
    /// rule.
    pub logical_prefix: Option<usize>,
    /// Per-pattern changed-slot masks, mirroring the gates compiled
    /// into the network. Zero for a pattern whose template is not
    /// slot-specific; such patterns are re-propagated on every modify.
    pub pattern_masks: Vec<u64>,
    /// The body to run on firing.
    pub body: RuleBody,
}

impl Rule {
    /// Evaluates the rule's current salience.
    #[must_use]
    pub fn current_salience(&self) -> i64 {
        match &self.dynamic_salience {
            Some(f) => f(),
            None => self.salience,
        }
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("module", &self.module)
            .field("salience", &self.salience)
            .field("dynamic", &self.dynamic_salience.is_some())
            .field("logical_prefix", &self.logical_prefix)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.module, self.name)
    }
}

/// Shared rule handle stored at terminal nodes and on activations.
pub type RuleRef = Arc<Rule>;
