//! Compiling rule definitions into network node chains.
//!
//! A [`RuleSpec`] names patterns against templates by slot name; the
//! compiler resolves names to indices, builds the single-input chain
//! for each pattern, and strings the two-input joins left to right.
//! Structurally equal single-input nodes and plain joins are shared
//! across rules through chained content signatures; negated joins,
//! accumulate joins, logical adapters, and terminals are never shared.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{NetworkError, RetortResult};
use crate::network::accumulate::{Accumulator, AccumulateState, Collect, Count, Sum};
use crate::network::join::{JoinState, JoinTest};
use crate::network::not::NegatedState;
use crate::network::single::{MultislotLength, Relation, SlotTest};
use crate::network::{Network, NodeId, NodeKind, Side};
use crate::rule::{Rule, RuleBody, RuleId, RuleRef, SalienceFn, MAIN_MODULE};
use crate::template::Template;
use crate::value::Value;

/// A constant test on one slot of the pattern's own fact.
#[derive(Debug, Clone)]
pub struct SlotConstraint {
    /// Slot name.
    pub slot: String,
    /// Element index for multislot tests.
    pub sub: Option<usize>,
    /// Comparison.
    pub relation: Relation,
    /// Right-hand value.
    pub value: Value,
}

/// A length test on a multislot.
#[derive(Debug, Clone)]
pub struct LengthConstraint {
    /// Multislot name.
    pub slot: String,
    /// Required length.
    pub len: usize,
    /// Exact match when true, minimum length when false.
    pub exact: bool,
}

/// A variable-style test relating this pattern's fact to an earlier
/// pattern's fact in the partial match.
#[derive(Debug, Clone)]
pub struct JoinConstraint {
    /// Index of the earlier pattern.
    pub left_pattern: usize,
    /// Slot name in the earlier pattern's template.
    pub left_slot: String,
    /// Element index when the left slot is a multislot.
    pub left_sub: Option<usize>,
    /// Slot name in this pattern's template.
    pub right_slot: String,
    /// Element index when the right slot is a multislot.
    pub right_sub: Option<usize>,
    /// Comparison, left value against right value.
    pub relation: Relation,
}

/// The aggregation applied by an accumulate pattern.
#[derive(Clone)]
pub enum Aggregate {
    /// Number of matching facts.
    Count,
    /// Numeric sum over a slot.
    Sum {
        /// Slot name in this pattern's template.
        slot: String,
    },
    /// All values of a slot, as a list.
    Collect {
        /// Slot name in this pattern's template.
        slot: String,
    },
    /// A caller-provided accumulator over the whole fact.
    Custom(Arc<dyn Accumulator>),
}

impl std::fmt::Debug for Aggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Count => write!(f, "Count"),
            Self::Sum { slot } => write!(f, "Sum({slot})"),
            Self::Collect { slot } => write!(f, "Collect({slot})"),
            Self::Custom(a) => write!(f, "Custom({})", a.name()),
        }
    }
}

/// How a pattern participates in the match.
#[derive(Debug, Clone)]
pub enum PatternKind {
    /// Positive match; the fact joins the token.
    Match,
    /// Matches when no fact satisfies the pattern; a placeholder joins
    /// the token.
    Negated,
    /// Aggregates all satisfying facts; a synthetic result fact joins
    /// the token.
    Accumulate(Aggregate),
}

/// One pattern of a rule.
#[derive(Debug, Clone)]
pub struct PatternSpec {
    /// Template name this pattern matches.
    pub template: String,
    /// Positive, negated, or accumulate.
    pub kind: PatternKind,
    /// Constant slot tests.
    pub tests: Vec<SlotConstraint>,
    /// Multislot length tests.
    pub lengths: Vec<LengthConstraint>,
    /// Tests against earlier patterns.
    pub joins: Vec<JoinConstraint>,
}

impl PatternSpec {
    fn with_kind(template: impl Into<String>, kind: PatternKind) -> Self {
        Self {
            template: template.into(),
            kind,
            tests: Vec::new(),
            lengths: Vec::new(),
            joins: Vec::new(),
        }
    }

    /// A positive pattern on `template`.
    #[must_use]
    pub fn matches(template: impl Into<String>) -> Self {
        Self::with_kind(template, PatternKind::Match)
    }

    /// A negated pattern on `template`.
    #[must_use]
    pub fn negated(template: impl Into<String>) -> Self {
        Self::with_kind(template, PatternKind::Negated)
    }

    /// An accumulate pattern on `template`.
    #[must_use]
    pub fn accumulate(template: impl Into<String>, aggregate: Aggregate) -> Self {
        Self::with_kind(template, PatternKind::Accumulate(aggregate))
    }

    /// Adds a constant test on a slot.
    #[must_use]
    pub fn test(mut self, slot: impl Into<String>, relation: Relation, value: impl Into<Value>) -> Self {
        self.tests.push(SlotConstraint {
            slot: slot.into(),
            sub: None,
            relation,
            value: value.into(),
        });
        self
    }

    /// Adds a constant test on one element of a multislot.
    #[must_use]
    pub fn test_element(
        mut self,
        slot: impl Into<String>,
        sub: usize,
        relation: Relation,
        value: impl Into<Value>,
    ) -> Self {
        self.tests.push(SlotConstraint {
            slot: slot.into(),
            sub: Some(sub),
            relation,
            value: value.into(),
        });
        self
    }

    /// Adds a multislot length test.
    #[must_use]
    pub fn length(mut self, slot: impl Into<String>, len: usize, exact: bool) -> Self {
        self.lengths.push(LengthConstraint {
            slot: slot.into(),
            len,
            exact,
        });
        self
    }

    /// Adds an equality join against an earlier pattern's slot.
    #[must_use]
    pub fn join(
        self,
        left_pattern: usize,
        left_slot: impl Into<String>,
        relation: Relation,
        right_slot: impl Into<String>,
    ) -> Self {
        self.join_full(JoinConstraint {
            left_pattern,
            left_slot: left_slot.into(),
            left_sub: None,
            right_slot: right_slot.into(),
            right_sub: None,
            relation,
        })
    }

    /// Adds a fully specified join constraint.
    #[must_use]
    pub fn join_full(mut self, constraint: JoinConstraint) -> Self {
        self.joins.push(constraint);
        self
    }
}

/// A complete rule definition ready for compilation.
pub struct RuleSpec {
    /// Rule name, unique within the engine.
    pub name: String,
    /// Agenda module.
    pub module: String,
    /// Static salience.
    pub salience: i64,
    /// Dynamic salience closure.
    pub dynamic_salience: Option<SalienceFn>,
    /// Number of leading patterns that logically support body asserts.
    pub logical_prefix: Option<usize>,
    /// The patterns, left to right.
    pub patterns: Vec<PatternSpec>,
    /// The body to run on firing.
    pub body: RuleBody,
}

impl RuleSpec {
    /// Starts a rule with the given name and body, in MAIN at salience
    /// zero.
    #[must_use]
    pub fn new(name: impl Into<String>, body: RuleBody) -> Self {
        Self {
            name: name.into(),
            module: MAIN_MODULE.to_string(),
            salience: 0,
            dynamic_salience: None,
            logical_prefix: None,
            patterns: Vec::new(),
            body,
        }
    }

    /// Sets the agenda module.
    #[must_use]
    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    /// Sets the static salience.
    #[must_use]
    pub fn salience(mut self, salience: i64) -> Self {
        self.salience = salience;
        self
    }

    /// Sets a dynamic salience closure.
    #[must_use]
    pub fn dynamic_salience(mut self, f: SalienceFn) -> Self {
        self.dynamic_salience = Some(f);
        self
    }

    /// Declares that the first `prefix` patterns logically support
    /// facts asserted by the body.
    #[must_use]
    pub fn logical(mut self, prefix: usize) -> Self {
        self.logical_prefix = Some(prefix);
        self
    }

    /// Appends a pattern.
    #[must_use]
    pub fn pattern(mut self, pattern: PatternSpec) -> Self {
        self.patterns.push(pattern);
        self
    }
}

impl std::fmt::Debug for RuleSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleSpec")
            .field("name", &self.name)
            .field("module", &self.module)
            .field("salience", &self.salience)
            .field("logical_prefix", &self.logical_prefix)
            .field("patterns", &self.patterns)
            .finish_non_exhaustive()
    }
}

/// Signature of the root, the chain anchor.
const ROOT_SIG: [u8; 32] = [0; 32];

fn chain(parent: Option<[u8; 32]>, descriptor: &str) -> Option<[u8; 32]> {
    let parent = parent?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(&parent);
    hasher.update(descriptor.as_bytes());
    Some(*hasher.finalize().as_bytes())
}

fn chain2(left: Option<[u8; 32]>, right: Option<[u8; 32]>, descriptor: &str) -> Option<[u8; 32]> {
    let (left, right) = (left?, right?);
    let mut hasher = blake3::Hasher::new();
    hasher.update(&left);
    hasher.update(&right);
    hasher.update(descriptor.as_bytes());
    Some(*hasher.finalize().as_bytes())
}

struct CompiledPattern {
    tail: NodeId,
    signature: Option<[u8; 32]>,
    /// Changed-slot gate for slot-specific modifies; zero passes all.
    mask: u64,
    join_tests: Vec<JoinTest>,
    kind: PatternKind,
}

/// Compiles a rule into the network. On success the terminal is wired
/// but carries no activations yet; the caller runs the update re-scan.
pub(crate) fn compile(
    spec: RuleSpec,
    templates: &HashMap<String, Arc<Template>>,
    network: &mut Network,
) -> RetortResult<RuleRef> {
    if spec.patterns.is_empty() {
        return Err(NetworkError::EmptyRule {
            name: spec.name.clone(),
        }
        .into());
    }
    if !matches!(spec.patterns[0].kind, PatternKind::Match) {
        return Err(NetworkError::InvalidPattern {
            rule: spec.name.clone(),
            pattern: 0,
            reason: "first pattern must be a positive match".to_string(),
        }
        .into());
    }
    if let Some(prefix) = spec.logical_prefix {
        if prefix == 0 || prefix > spec.patterns.len() {
            return Err(NetworkError::LogicalPrefixTooLong {
                rule: spec.name.clone(),
                prefix,
                patterns: spec.patterns.len(),
            }
            .into());
        }
    }

    let resolved = resolve_templates(&spec, templates)?;
    let masks = pattern_masks(&spec, &resolved)?;

    let mut compiled = Vec::with_capacity(spec.patterns.len());
    for (index, pattern) in spec.patterns.iter().enumerate() {
        compiled.push(compile_pattern(
            &spec,
            index,
            pattern,
            &resolved,
            masks[index],
            network,
        )?);
    }

    let rule = Arc::new(Rule {
        id: RuleId::new(),
        name: spec.name,
        module: spec.module,
        salience: spec.salience,
        dynamic_salience: spec.dynamic_salience,
        logical_prefix: spec.logical_prefix,
        pattern_masks: masks,
        body: spec.body,
    });

    let mut compiled = compiled.into_iter();
    let first = compiled.next().unwrap_or_else(|| unreachable!());
    let mut left = first.tail;
    let mut left_sig = first.signature;
    // Pattern-entry mask, consumed by the first downstream edge.
    let mut left_mask = first.mask;

    if rule.logical_prefix == Some(1) {
        let adapter = network.intern(NodeKind::LogicalAdapter, None);
        network.connect(left, adapter, Side::Left, left_mask)?;
        left = adapter;
        left_sig = None;
        left_mask = 0;
    }

    for (offset, pattern) in compiled.enumerate() {
        let descriptor = format!("{:?}", pattern.join_tests);
        let (node, sig) = match pattern.kind {
            PatternKind::Match => {
                let sig = chain2(left_sig, pattern.signature, &descriptor);
                (
                    network.intern(NodeKind::Join(JoinState::new(pattern.join_tests)), sig),
                    sig,
                )
            }
            PatternKind::Negated => (
                network.intern(NodeKind::Negated(NegatedState::new(pattern.join_tests)), None),
                None,
            ),
            PatternKind::Accumulate(aggregate) => {
                let accumulator = build_accumulator(
                    &rule.name,
                    offset + 1,
                    &aggregate,
                    &resolved[offset + 1],
                )?;
                (
                    network.intern(
                        NodeKind::Accumulate(AccumulateState::new(pattern.join_tests, accumulator)),
                        None,
                    ),
                    None,
                )
            }
        };
        network.connect(left, node, Side::Left, left_mask)?;
        network.connect(pattern.tail, node, Side::Right, pattern.mask)?;
        left = node;
        left_sig = sig;
        left_mask = 0;

        if rule.logical_prefix == Some(offset + 2) {
            let adapter = network.intern(NodeKind::LogicalAdapter, None);
            network.connect(left, adapter, Side::Left, 0)?;
            left = adapter;
            left_sig = None;
        }
    }

    let terminal = network.intern(
        NodeKind::Terminal {
            rule: Arc::clone(&rule),
        },
        None,
    );
    network.connect(left, terminal, Side::Left, left_mask)?;
    Ok(rule)
}

fn resolve_templates(
    spec: &RuleSpec,
    templates: &HashMap<String, Arc<Template>>,
) -> RetortResult<Vec<Arc<Template>>> {
    spec.patterns
        .iter()
        .map(|p| {
            templates
                .get(&p.template)
                .cloned()
                .ok_or_else(|| {
                    NetworkError::UnknownTemplate {
                        name: p.template.clone(),
                    }
                    .into()
                })
        })
        .collect()
}

pub(crate) fn slot_bit(index: usize) -> u64 {
    1u64.checked_shl(u32::try_from(index.min(63)).unwrap_or(63)).unwrap_or(0)
}

/// Computes each pattern's changed-slot mask: the slots its own tests
/// read plus the slots later joins read from it. Non-slot-specific
/// templates get zero, which never gates.
fn pattern_masks(spec: &RuleSpec, resolved: &[Arc<Template>]) -> RetortResult<Vec<u64>> {
    let mut masks = vec![0u64; spec.patterns.len()];
    for (index, pattern) in spec.patterns.iter().enumerate() {
        let template = &resolved[index];
        if !template.slot_specific {
            continue;
        }
        let mut mask = 0u64;
        for test in &pattern.tests {
            mask |= slot_bit(template.require_slot(&test.slot)?);
        }
        for length in &pattern.lengths {
            mask |= slot_bit(template.require_slot(&length.slot)?);
        }
        for join in &pattern.joins {
            mask |= slot_bit(template.require_slot(&join.right_slot)?);
        }
        masks[index] = mask;
    }
    // Slots an earlier pattern exposes to later joins count against the
    // earlier pattern's gate.
    for pattern in &spec.patterns {
        for join in &pattern.joins {
            let Some(left_template) = resolved.get(join.left_pattern) else {
                continue;
            };
            if left_template.slot_specific {
                masks[join.left_pattern] |= slot_bit(left_template.require_slot(&join.left_slot)?);
            }
        }
    }
    Ok(masks)
}

fn compile_pattern(
    spec: &RuleSpec,
    index: usize,
    pattern: &PatternSpec,
    resolved: &[Arc<Template>],
    mask: u64,
    network: &mut Network,
) -> RetortResult<CompiledPattern> {
    let template = &resolved[index];
    if index == 0 && !pattern.joins.is_empty() {
        return Err(NetworkError::InvalidPattern {
            rule: spec.name.clone(),
            pattern: 0,
            reason: "the first pattern has nothing to join against".to_string(),
        }
        .into());
    }

    let gate_sig = chain(Some(ROOT_SIG), &format!("type:{}", template.name));
    let gate = network.intern(
        NodeKind::TypeGate {
            template: template.name.clone(),
        },
        gate_sig,
    );
    network.connect(NodeId::ROOT, gate, Side::Left, 0)?;

    let mut tail = gate;
    let mut sig = gate_sig;

    for test in &pattern.tests {
        let slot = template.require_slot(&test.slot)?;
        if test.sub.is_some() && !template.is_multislot(slot) {
            return Err(NetworkError::NotAMultislot {
                template: template.name.clone(),
                slot: test.slot.clone(),
            }
            .into());
        }
        let slot_test = SlotTest {
            slot,
            sub: test.sub,
            relation: test.relation.clone(),
            value: test.value.clone(),
        };
        sig = chain(sig, &format!("slot:{slot_test:?}"));
        let node = network.intern(NodeKind::Slot(slot_test), sig);
        network.connect(tail, node, Side::Left, 0)?;
        tail = node;
    }

    for length in &pattern.lengths {
        let slot = template.require_slot(&length.slot)?;
        if !template.is_multislot(slot) {
            return Err(NetworkError::NotAMultislot {
                template: template.name.clone(),
                slot: length.slot.clone(),
            }
            .into());
        }
        let test = MultislotLength {
            slot,
            len: length.len,
            exact: length.exact,
        };
        sig = chain(sig, &format!("len:{test:?}"));
        let node = network.intern(NodeKind::Multislot(test), sig);
        network.connect(tail, node, Side::Left, 0)?;
        tail = node;
    }

    let mut join_tests = Vec::with_capacity(pattern.joins.len());
    for join in &pattern.joins {
        if join.left_pattern >= index {
            return Err(NetworkError::InvalidPattern {
                rule: spec.name.clone(),
                pattern: index,
                reason: format!(
                    "join references pattern {} which is not earlier in the rule",
                    join.left_pattern
                ),
            }
            .into());
        }
        let left_template = &resolved[join.left_pattern];
        let left_slot = left_template.require_slot(&join.left_slot)?;
        if join.left_sub.is_some() && !left_template.is_multislot(left_slot) {
            return Err(NetworkError::NotAMultislot {
                template: left_template.name.clone(),
                slot: join.left_slot.clone(),
            }
            .into());
        }
        let right_slot = template.require_slot(&join.right_slot)?;
        if join.right_sub.is_some() && !template.is_multislot(right_slot) {
            return Err(NetworkError::NotAMultislot {
                template: template.name.clone(),
                slot: join.right_slot.clone(),
            }
            .into());
        }
        join_tests.push(JoinTest {
            left_fact: join.left_pattern,
            left_slot,
            left_sub: join.left_sub,
            right_slot,
            right_sub: join.right_sub,
            relation: join.relation.clone(),
        });
    }

    Ok(CompiledPattern {
        tail,
        signature: sig,
        mask,
        join_tests,
        kind: pattern.kind.clone(),
    })
}

fn build_accumulator(
    rule: &str,
    pattern: usize,
    aggregate: &Aggregate,
    template: &Arc<Template>,
) -> RetortResult<Arc<dyn Accumulator>> {
    Ok(match aggregate {
        Aggregate::Count => Arc::new(Count),
        Aggregate::Sum { slot } => Arc::new(Sum {
            slot: template.require_slot(slot).map_err(|_| {
                NetworkError::InvalidPattern {
                    rule: rule.to_string(),
                    pattern,
                    reason: format!("sum slot '{slot}' is not in template '{}'", template.name),
                }
            })?,
        }),
        Aggregate::Collect { slot } => Arc::new(Collect {
            slot: template.require_slot(slot).map_err(|_| {
                NetworkError::InvalidPattern {
                    rule: rule.to_string(),
                    pattern,
                    reason: format!("collect slot '{slot}' is not in template '{}'", template.name),
                }
            })?,
        }),
        Aggregate::Custom(custom) => Arc::clone(custom),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::SlotDef;

    fn noop_body() -> RuleBody {
        Box::new(|_, _| Ok(()))
    }

    fn templates() -> HashMap<String, Arc<Template>> {
        let mut map = HashMap::new();
        map.insert(
            "person".to_string(),
            Template::new("person", ["name", "age"]),
        );
        map.insert(
            "order".to_string(),
            Template::with_slots(
                "order",
                vec![
                    SlotDef::single("customer"),
                    SlotDef::single("total"),
                    SlotDef::multi("items"),
                ],
            ),
        );
        map
    }

    fn adult_rule(name: &str) -> RuleSpec {
        RuleSpec::new(name, noop_body()).pattern(
            PatternSpec::matches("person").test("age", Relation::Ge, Value::Int(18)),
        )
    }

    #[test]
    fn compiles_a_single_pattern_rule() {
        let mut network = Network::new();
        let rule = compile(adult_rule("adult"), &templates(), &mut network).unwrap();
        assert_eq!(rule.name, "adult");
        // Root, type gate, slot test, terminal.
        assert_eq!(network.node_count(), 4);
    }

    #[test]
    fn identical_chains_are_shared() {
        let mut network = Network::new();
        compile(adult_rule("adult_a"), &templates(), &mut network).unwrap();
        let before = network.node_count();
        compile(adult_rule("adult_b"), &templates(), &mut network).unwrap();
        // Only a fresh terminal is added.
        assert_eq!(network.node_count(), before + 1);
    }

    #[test]
    fn join_rule_builds_a_two_input_node() {
        let mut network = Network::new();
        let spec = RuleSpec::new("customer_order", noop_body())
            .pattern(PatternSpec::matches("person"))
            .pattern(
                PatternSpec::matches("order").join(0, "name", Relation::Eq, "customer"),
            );
        compile(spec, &templates(), &mut network).unwrap();
        // Root, two gates, join, terminal.
        assert_eq!(network.node_count(), 5);
    }

    #[test]
    fn unknown_template_is_rejected() {
        let mut network = Network::new();
        let spec = RuleSpec::new("r", noop_body()).pattern(PatternSpec::matches("ghost"));
        let err = compile(spec, &templates(), &mut network).unwrap_err();
        assert!(err.is_network());
    }

    #[test]
    fn unknown_slot_is_rejected() {
        let mut network = Network::new();
        let spec = RuleSpec::new("r", noop_body()).pattern(
            PatternSpec::matches("person").test("height", Relation::Gt, Value::Int(0)),
        );
        assert!(compile(spec, &templates(), &mut network).is_err());
    }

    #[test]
    fn empty_rule_is_rejected() {
        let mut network = Network::new();
        let err = compile(RuleSpec::new("r", noop_body()), &templates(), &mut network).unwrap_err();
        assert!(err.to_string().contains("no patterns"));
    }

    #[test]
    fn negated_first_pattern_is_rejected() {
        let mut network = Network::new();
        let spec = RuleSpec::new("r", noop_body()).pattern(PatternSpec::negated("person"));
        assert!(compile(spec, &templates(), &mut network).is_err());
    }

    #[test]
    fn logical_prefix_beyond_patterns_is_rejected() {
        let mut network = Network::new();
        let spec = adult_rule("r").logical(2);
        let err = compile(spec, &templates(), &mut network).unwrap_err();
        assert!(err.to_string().contains("prefix"));
    }

    #[test]
    fn element_test_requires_a_multislot() {
        let mut network = Network::new();
        let spec = RuleSpec::new("r", noop_body()).pattern(
            PatternSpec::matches("person").test_element("name", 0, Relation::Eq, "x"),
        );
        assert!(compile(spec, &templates(), &mut network).is_err());
    }

    #[test]
    fn length_test_requires_a_multislot() {
        let mut network = Network::new();
        let bad = RuleSpec::new("r", noop_body()).pattern(
            PatternSpec::matches("order").length("total", 2, true),
        );
        assert!(compile(bad, &templates(), &mut network).is_err());

        let mut network = Network::new();
        let good = RuleSpec::new("r", noop_body()).pattern(
            PatternSpec::matches("order").length("items", 2, false),
        );
        assert!(compile(good, &templates(), &mut network).is_ok());
    }

    #[test]
    fn forward_join_reference_is_rejected() {
        let mut network = Network::new();
        let spec = RuleSpec::new("r", noop_body())
            .pattern(PatternSpec::matches("person"))
            .pattern(
                PatternSpec::matches("order").join(1, "customer", Relation::Eq, "customer"),
            );
        assert!(compile(spec, &templates(), &mut network).is_err());
    }

    #[test]
    fn sum_over_missing_slot_is_rejected() {
        let mut network = Network::new();
        let spec = RuleSpec::new("r", noop_body())
            .pattern(PatternSpec::matches("person"))
            .pattern(PatternSpec::accumulate(
                "order",
                Aggregate::Sum {
                    slot: "ghost".to_string(),
                },
            ));
        assert!(compile(spec, &templates(), &mut network).is_err());
    }

    #[test]
    fn compiled_rule_records_its_pattern_masks() {
        let mut map = templates();
        map.insert(
            "account".to_string(),
            Template::new("account", ["owner", "balance", "flags"]).slot_specific(),
        );

        let mut network = Network::new();
        let spec = RuleSpec::new("low_balance", noop_body())
            .pattern(
                PatternSpec::matches("account").test("balance", Relation::Lt, Value::Int(0)),
            )
            .pattern(PatternSpec::matches("person").join(0, "owner", Relation::Eq, "name"));
        let rule = compile(spec, &map, &mut network).unwrap();

        // Balance from the test plus owner read by the later join; the
        // non-slot-specific person pattern never gates.
        assert_eq!(rule.pattern_masks, vec![0b011, 0]);
    }

    #[test]
    fn negated_joins_are_never_shared() {
        let templates = templates();
        let mut network = Network::new();
        let spec = |name: &str| {
            RuleSpec::new(name, noop_body())
                .pattern(PatternSpec::matches("person"))
                .pattern(PatternSpec::negated("order"))
        };
        compile(spec("a"), &templates, &mut network).unwrap();
        let before = network.node_count();
        compile(spec("b"), &templates, &mut network).unwrap();
        // A fresh negated node and terminal, not just a terminal.
        assert_eq!(network.node_count(), before + 2);
    }

    #[test]
    fn logical_rule_gets_an_adapter() {
        let mut network = Network::new();
        compile(adult_rule("plain"), &templates(), &mut network).unwrap();
        let plain = network.node_count();

        let mut network = Network::new();
        compile(adult_rule("logical").logical(1), &templates(), &mut network).unwrap();
        assert_eq!(network.node_count(), plain + 1);
    }
}
