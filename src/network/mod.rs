//! The discrimination network.
//!
//! Nodes live in an arena addressed by integer handles; "sharing" a
//! sub-pattern between rules means pointing two rules' chains at the
//! same handle, never aliasing pointers. A single propagation function
//! dispatches on the node kind and the change tag.
//!
//! Propagation protocol: a node receiving a tag performs its local test
//! or join and forwards (tag, token) pairs to its successors. Additions
//! that fail a test stop; removals re-run the same deterministic tests
//! on the token's carried data, so a removal forwards exactly where the
//! matching addition did, even when working memory has since moved on.

pub mod accumulate;
pub mod join;
pub mod memory;
pub mod not;
pub mod single;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{RetortError, RetortResult};
use crate::fact::Fact;
use crate::rule::{RuleId, RuleRef};
use crate::token::Token;

use self::accumulate::AccumulateState;
use self::join::JoinState;
use self::not::NegatedState;
use self::single::{MultislotLength, SlotTest};

/// Change tags carried by every propagation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tag {
    /// A new fact or match.
    Add,
    /// A fact or match going away.
    Remove,
    /// The add half of an atomic modify.
    ModifyAdd,
    /// The remove half of an atomic modify.
    ModifyRemove,
    /// One-time re-scan for nodes inserted into a populated network.
    Update,
    /// Flush all memory.
    Clear,
}

impl Tag {
    /// Tags that add state.
    #[must_use]
    pub const fn is_addition(self) -> bool {
        matches!(self, Self::Add | Self::ModifyAdd | Self::Update)
    }

    /// Tags that remove state.
    #[must_use]
    pub const fn is_removal(self) -> bool {
        matches!(self, Self::Remove | Self::ModifyRemove)
    }

    /// The two halves of a modify.
    #[must_use]
    pub const fn is_modify(self) -> bool {
        matches!(self, Self::ModifyAdd | Self::ModifyRemove)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "ADD",
            Self::Remove => "REMOVE",
            Self::ModifyAdd => "MODIFY_ADD",
            Self::ModifyRemove => "MODIFY_REMOVE",
            Self::Update => "UPDATE",
            Self::Clear => "CLEAR",
        };
        write!(f, "{s}")
    }
}

/// Which input of a two-input node an edge feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Upstream partial-match input.
    Left,
    /// Single-fact pattern input.
    Right,
}

/// Handle of a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// The network root.
    pub const ROOT: Self = Self(0);

    /// Raw arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// An edge to a successor node.
#[derive(Debug, Clone)]
pub(crate) struct Edge {
    pub target: NodeId,
    pub side: Side,
    /// Bitmask of slots the target's branch tests; non-zero only on
    /// pattern-entry edges and only consulted for slot-specific modifies.
    pub slot_mask: u64,
}

/// The concrete node kinds.
pub(crate) enum NodeKind {
    Root,
    TypeGate { template: String },
    Slot(SlotTest),
    Multislot(MultislotLength),
    LogicalAdapter,
    Join(JoinState),
    Negated(NegatedState),
    Accumulate(AccumulateState),
    Terminal { rule: RuleRef },
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "Root"),
            Self::TypeGate { template } => write!(f, "TypeGate({template})"),
            Self::Slot(t) => write!(f, "Slot({t:?})"),
            Self::Multislot(t) => write!(f, "Multislot({t:?})"),
            Self::LogicalAdapter => write!(f, "LogicalAdapter"),
            Self::Join(j) => write!(f, "Join({} tests)", j.tests.len()),
            Self::Negated(_) => write!(f, "Negated"),
            Self::Accumulate(a) => write!(f, "Accumulate({})", a.accumulator_name()),
            Self::Terminal { rule } => write!(f, "Terminal({})", rule.name),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Node {
    pub kind: NodeKind,
    pub successors: Vec<Edge>,
    /// Set once the node has seen a full pass; old nodes do not mutate
    /// state on `Update`, and stateful old nodes only replay their left
    /// input so late-added successors get populated without duplicating
    /// activations at old terminals.
    pub old: bool,
}

/// A change the network wants applied to the agenda.
#[derive(Debug)]
pub(crate) enum AgendaChange {
    Add { rule: RuleRef, token: Arc<Token> },
    Remove { rule: RuleRef, token: Arc<Token> },
}

/// A token-arrival notification for tooling and debugging.
#[derive(Debug, Clone)]
pub struct NodeEvent {
    /// Node the token arrived at.
    pub node: NodeId,
    /// Input it arrived on.
    pub side: Side,
    /// Propagation tag.
    pub tag: Tag,
    /// The arriving token.
    pub token: Arc<Token>,
}

/// Mutable state threaded through one propagation.
#[derive(Debug, Default)]
pub(crate) struct PropagationContext {
    /// Terminal-node effects, committed to the agenda in one batch.
    pub agenda: Vec<AgendaChange>,
    /// Tokens whose removal passed a logical adapter.
    pub support_removals: Vec<Arc<Token>>,
    /// Node events, collected only when a listener asked for them.
    pub events: Option<Vec<NodeEvent>>,
    /// Changed-slot mask of an in-flight slot-specific modify.
    pub modify_mask: Option<u64>,
}

impl PropagationContext {
    pub(crate) fn new(collect_events: bool) -> Self {
        Self {
            events: collect_events.then(Vec::new),
            ..Self::default()
        }
    }
}

/// The node arena.
pub struct Network {
    nodes: Vec<Option<Node>>,
    /// Structural-signature index for node sharing.
    signatures: HashMap<[u8; 32], NodeId>,
    /// Terminal node per rule.
    terminals: HashMap<RuleId, NodeId>,
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("nodes", &self.node_count())
            .field("rules", &self.terminals.len())
            .finish()
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    /// Creates a network containing only the root.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![Some(Node {
                kind: NodeKind::Root,
                successors: Vec::new(),
                old: true,
            })],
            signatures: HashMap::new(),
            terminals: HashMap::new(),
        }
    }

    /// Number of live nodes, root included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    /// Successor handles of a node, for introspection.
    #[must_use]
    pub fn successors(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id)
            .map(|n| n.successors.iter().map(|e| e.target).collect())
            .unwrap_or_default()
    }

    pub(crate) fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> RetortResult<&mut Node> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| {
                RetortError::internal("Network::node_mut", format!("dangling node handle {id}"))
            })
    }

    /// Inserts a node, reusing an existing one when a structurally equal
    /// signature is registered. Pass `None` for kinds that must never be
    /// shared (negated and accumulate joins, terminals).
    pub(crate) fn intern(&mut self, kind: NodeKind, signature: Option<[u8; 32]>) -> NodeId {
        if let Some(sig) = signature {
            if let Some(&existing) = self.signatures.get(&sig) {
                if self.node(existing).is_some() {
                    return existing;
                }
            }
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(Node {
            kind,
            successors: Vec::new(),
            old: false,
        }));
        if let Some(sig) = signature {
            self.signatures.insert(sig, id);
        }
        let terminal_rule = match self.node(id) {
            Some(Node {
                kind: NodeKind::Terminal { rule },
                ..
            }) => Some(rule.id),
            _ => None,
        };
        if let Some(rule_id) = terminal_rule {
            self.terminals.insert(rule_id, id);
        }
        id
    }

    /// Wires `from` to feed `to` on `side`. Idempotent.
    pub(crate) fn connect(
        &mut self,
        from: NodeId,
        to: NodeId,
        side: Side,
        slot_mask: u64,
    ) -> RetortResult<()> {
        let node = self.node_mut(from)?;
        if node
            .successors
            .iter()
            .any(|e| e.target == to && e.side == side)
        {
            return Ok(());
        }
        node.successors.push(Edge {
            target: to,
            side,
            slot_mask,
        });
        Ok(())
    }

    /// Marks every node old. Called after a rule's update re-scan.
    pub(crate) fn set_all_old(&mut self) {
        for node in self.nodes.iter_mut().flatten() {
            node.old = true;
        }
    }

    /// Feeds one fact change into the root.
    pub(crate) fn feed(
        &mut self,
        tag: Tag,
        fact: Arc<Fact>,
        ctx: &mut PropagationContext,
    ) -> RetortResult<()> {
        let token = Token::seed(fact);
        let edges: Vec<Edge> = self
            .node(NodeId::ROOT)
            .map(|n| n.successors.clone())
            .unwrap_or_default();
        for edge in edges {
            self.propagate(&edge, tag, Arc::clone(&token), ctx)?;
        }
        Ok(())
    }

    fn propagate(
        &mut self,
        edge: &Edge,
        tag: Tag,
        token: Arc<Token>,
        ctx: &mut PropagationContext,
    ) -> RetortResult<()> {
        if tag.is_modify() && edge.slot_mask != 0 {
            if let Some(mask) = ctx.modify_mask {
                if mask & edge.slot_mask == 0 {
                    return Ok(());
                }
            }
        }

        if let Some(events) = ctx.events.as_mut() {
            events.push(NodeEvent {
                node: edge.target,
                side: edge.side,
                tag,
                token: Arc::clone(&token),
            });
        }

        let outputs = self.process(edge.target, edge.side, tag, &token, ctx)?;
        if outputs.is_empty() {
            return Ok(());
        }

        let succ: Vec<Edge> = self
            .node(edge.target)
            .map(|n| n.successors.clone())
            .unwrap_or_default();
        for (out_tag, out_token) in outputs {
            for e in &succ {
                self.propagate(e, out_tag, Arc::clone(&out_token), ctx)?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn process(
        &mut self,
        id: NodeId,
        side: Side,
        tag: Tag,
        token: &Arc<Token>,
        ctx: &mut PropagationContext,
    ) -> RetortResult<Vec<(Tag, Arc<Token>)>> {
        let node = self.node_mut(id)?;
        let old = node.old;

        if tag == Tag::Clear {
            match &mut node.kind {
                NodeKind::Join(j) => j.flush(),
                NodeKind::Negated(n) => n.flush(),
                NodeKind::Accumulate(a) => a.flush(),
                _ => {}
            }
            return Ok(match node.kind {
                NodeKind::Terminal { .. } => Vec::new(),
                _ => vec![(Tag::Clear, Arc::clone(token))],
            });
        }

        match &mut node.kind {
            NodeKind::Root => Ok(vec![(tag, Arc::clone(token))]),

            NodeKind::TypeGate { template } => {
                if token.fact.template.name == *template {
                    Ok(vec![(tag, Arc::clone(token))])
                } else {
                    Ok(Vec::new())
                }
            }

            NodeKind::Slot(test) => {
                if test.eval(&token.fact)? {
                    Ok(vec![(tag, Arc::clone(token))])
                } else {
                    Ok(Vec::new())
                }
            }

            NodeKind::Multislot(test) => {
                if test.eval(&token.fact)? {
                    Ok(vec![(tag, Arc::clone(token))])
                } else {
                    Ok(Vec::new())
                }
            }

            NodeKind::LogicalAdapter => {
                if tag.is_removal() {
                    ctx.support_removals.push(Arc::clone(token));
                }
                Ok(vec![(tag, Arc::clone(token))])
            }

            NodeKind::Join(state) => match (side, tag, old) {
                (Side::Left, Tag::Update, true) => state.left_replay(token),
                (Side::Right, Tag::Update, true) => Ok(Vec::new()),
                (Side::Left, ..) => state.left_event(tag, token),
                (Side::Right, ..) => state.right_event(tag, token),
            },

            NodeKind::Negated(state) => match (side, tag, old) {
                (Side::Left, Tag::Update, true) => state.left_replay(token),
                (Side::Right, Tag::Update, true) => Ok(Vec::new()),
                (Side::Left, ..) => state.left_event(tag, token),
                (Side::Right, ..) => state.right_event(tag, token),
            },

            NodeKind::Accumulate(state) => match (side, tag, old) {
                (Side::Left, Tag::Update, true) => state.left_replay(token),
                (Side::Right, Tag::Update, true) => Ok(Vec::new()),
                (Side::Left, ..) => state.left_event(tag, token),
                (Side::Right, ..) => state.right_event(tag, token),
            },

            NodeKind::Terminal { rule } => {
                if tag == Tag::Update && old {
                    return Ok(Vec::new());
                }
                if tag.is_addition() {
                    ctx.agenda.push(AgendaChange::Add {
                        rule: Arc::clone(rule),
                        token: Arc::clone(token),
                    });
                } else if tag.is_removal() {
                    ctx.agenda.push(AgendaChange::Remove {
                        rule: Arc::clone(rule),
                        token: Arc::clone(token),
                    });
                }
                Ok(Vec::new())
            }
        }
    }

    /// Flushes every node memory. Used by engine reset.
    pub(crate) fn flush_memories(&mut self) {
        for node in self.nodes.iter_mut().flatten() {
            match &mut node.kind {
                NodeKind::Join(j) => j.flush(),
                NodeKind::Negated(n) => n.flush(),
                NodeKind::Accumulate(a) => a.flush(),
                _ => {}
            }
        }
    }

    /// Detaches a rule's terminal and prunes nodes no rule reaches
    /// through anymore.
    pub(crate) fn remove_rule(&mut self, rule: RuleId) -> RetortResult<()> {
        let Some(terminal) = self.terminals.remove(&rule) else {
            return Err(RetortError::internal(
                "Network::remove_rule",
                format!("no terminal registered for rule {rule}"),
            ));
        };

        let mut dead = vec![terminal];
        while let Some(victim) = dead.pop() {
            self.nodes[victim.0] = None;
            self.signatures.retain(|_, v| *v != victim);

            // Unlink, then sweep nodes left with no successors.
            for (idx, slot) in self.nodes.iter_mut().enumerate() {
                let Some(node) = slot.as_mut() else { continue };
                node.successors.retain(|e| e.target != victim);
                if idx != NodeId::ROOT.0
                    && node.successors.is_empty()
                    && !matches!(node.kind, NodeKind::Terminal { .. })
                {
                    dead.push(NodeId(idx));
                }
            }
        }
        Ok(())
    }

    /// The rules with terminals in this network.
    #[must_use]
    pub fn rule_ids(&self) -> Vec<RuleId> {
        self.terminals.keys().copied().collect()
    }
}
