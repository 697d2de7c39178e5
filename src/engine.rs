//! The engine: working memory, match network, truth maintenance, and
//! the firing loop behind one facade.
//!
//! Locking is two-tier. A core mutex covers working memory, the node
//! graph, and the logical-support table, so every fact operation and
//! its full propagation is atomic. The agenda has its own lock plus a
//! condvar; propagation batches its queue changes and commits them in
//! one agenda acquisition after the core lock drops. Run loops pop and
//! fire one activation at a time, so an activation fires at most once
//! even with several threads running the engine.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::agenda::{Activation, Agenda, AgendaDelta, SalienceEvaluation, Strategy};
use crate::builder::{self, RuleSpec};
use crate::error::{EvalError, NetworkError, RetortResult};
use crate::fact::{Fact, FactId};
use crate::listener::{CallbackId, EngineEvent, EventDispatcher, EventKind, EventStream};
use crate::network::{AgendaChange, Network, PropagationContext, Tag};
use crate::rule::{RuleId, RuleRef, MAIN_MODULE};
use crate::support::LogicalSupport;
use crate::template::Template;
use crate::token::Token;
use crate::value::Value;
use crate::working_memory::{AssertOutcome, RuleContext, WmOp, WorkingMemory};

/// How long a blocking run sleeps between agenda checks while idle.
const IDLE_WAIT: Duration = Duration::from_millis(50);

struct Core {
    wm: WorkingMemory,
    network: Network,
    support: LogicalSupport,
    templates: HashMap<String, Arc<Template>>,
    rules: HashMap<String, RuleRef>,
    modules: HashSet<String>,
}

/// Everything a drained fact operation produced, applied to the agenda
/// and the event surface after the core lock drops.
#[derive(Default)]
struct Effects {
    agenda: Vec<AgendaChange>,
    events: Vec<EventKind>,
    node_events: Vec<EventKind>,
}

/// A forward-chaining production-rule engine.
pub struct Rete {
    core: Mutex<Core>,
    agenda: Agenda,
    halted: AtomicBool,
    dispatcher: EventDispatcher,
}

impl Rete {
    /// Creates an empty engine with no templates or rules and the MAIN
    /// module in focus.
    #[must_use]
    pub fn new() -> Self {
        let mut modules = HashSet::new();
        modules.insert(MAIN_MODULE.to_string());
        Self {
            core: Mutex::new(Core {
                wm: WorkingMemory::new(),
                network: Network::new(),
                support: LogicalSupport::new(),
                templates: HashMap::new(),
                rules: HashMap::new(),
                modules,
            }),
            agenda: Agenda::new(),
            halted: AtomicBool::new(false),
            dispatcher: EventDispatcher::new(),
        }
    }

    fn lock_core(&self) -> MutexGuard<'_, Core> {
        self.core
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    // ---- definitions -----------------------------------------------------

    /// Registers a template. Redefinition replaces the previous one;
    /// facts already asserted keep their old shape.
    pub fn add_template(&self, template: Arc<Template>) {
        let mut core = self.lock_core();
        core.templates.insert(template.name.clone(), template);
    }

    /// Looks up a registered template.
    pub fn template(&self, name: &str) -> RetortResult<Arc<Template>> {
        let core = self.lock_core();
        core.templates
            .get(name)
            .cloned()
            .ok_or_else(|| NetworkError::UnknownTemplate { name: name.to_string() }.into())
    }

    /// Declares an agenda module so rules and focus changes can target
    /// it.
    pub fn add_module(&self, name: impl Into<String>) {
        let mut core = self.lock_core();
        core.modules.insert(name.into());
    }

    /// Compiles a rule into the network. Facts already in working
    /// memory are re-scanned once, so matches that exist right now
    /// produce activations immediately.
    pub fn add_rule(&self, spec: RuleSpec) -> RetortResult<RuleId> {
        let mut guard = self.lock_core();
        let core = &mut *guard;
        if !core.modules.contains(&spec.module) {
            return Err(NetworkError::UnknownModule {
                name: spec.module.clone(),
            }
            .into());
        }
        if core.rules.contains_key(&spec.name) {
            return Err(NetworkError::InvalidPattern {
                rule: spec.name.clone(),
                pattern: 0,
                reason: "a rule with this name already exists".to_string(),
            }
            .into());
        }

        let rule = builder::compile(spec, &core.templates, &mut core.network)?;
        core.rules.insert(rule.name.clone(), Arc::clone(&rule));

        // One-time re-scan: stateless nodes forward, old stateful nodes
        // replay their left input, old terminals ignore, so exactly the
        // new terminal sees existing matches.
        let mut ctx = self.new_context();
        let facts = core.wm.facts();
        for fact in facts {
            core.network.feed(Tag::Update, fact, &mut ctx)?;
        }
        core.network.set_all_old();

        let mut effects = Effects::default();
        self.collect_node_events(&mut ctx, &mut effects);
        effects.agenda = std::mem::take(&mut ctx.agenda);
        let id = rule.id;
        drop(guard);

        self.apply_effects(effects);
        Ok(id)
    }

    /// Removes a rule by name: its terminal and any nodes only it used
    /// leave the network, and its queued activations are cancelled.
    pub fn remove_rule(&self, name: &str) -> RetortResult<()> {
        let mut core = self.lock_core();
        let Some(rule) = core.rules.remove(name) else {
            return Err(NetworkError::UnknownRule {
                name: name.to_string(),
            }
            .into());
        };
        core.network.remove_rule(rule.id)?;
        let module = rule.module.clone();
        drop(core);

        let stale: Vec<AgendaChange> = self
            .agenda
            .activations(&module)
            .into_iter()
            .filter(|act| act.rule.id == rule.id)
            .map(|act| AgendaChange::Remove {
                rule: Arc::clone(&act.rule),
                token: Arc::clone(&act.token),
            })
            .collect();
        let deltas = self.agenda.commit(stale);
        self.emit_deltas(deltas);
        Ok(())
    }

    /// Names of all defined rules.
    #[must_use]
    pub fn rule_names(&self) -> Vec<String> {
        let core = self.lock_core();
        let mut names: Vec<String> = core.rules.keys().cloned().collect();
        names.sort();
        names
    }

    // ---- fact operations -------------------------------------------------

    /// Asserts a fact built from a registered template.
    pub fn assert(&self, template: &str, slots: Vec<Value>) -> RetortResult<AssertOutcome> {
        let fact = {
            let core = self.lock_core();
            let template = core.templates.get(template).cloned().ok_or_else(|| {
                NetworkError::UnknownTemplate {
                    name: template.to_string(),
                }
            })?;
            Fact::new(template, slots)
        };
        self.assert_fact(fact)
    }

    /// Asserts a fact. A data-equal duplicate is not republished; an
    /// external duplicate assert makes the existing fact unconditional,
    /// detaching it from logical support.
    pub fn assert_fact(&self, fact: Fact) -> RetortResult<AssertOutcome> {
        let mut core = self.lock_core();
        let mut effects = Effects::default();
        let outcome = self.apply_assert(&mut core, fact, None, &mut effects)?;
        self.drain(&mut core, &mut effects)?;
        drop(core);
        self.apply_effects(effects);
        Ok(outcome)
    }

    /// Retracts a fact by id. Returns false when no such fact exists.
    /// Facts whose only justification was logical support from this
    /// fact are retracted in cascade.
    pub fn retract(&self, id: FactId) -> RetortResult<bool> {
        let mut core = self.lock_core();
        let mut effects = Effects::default();
        let found = self.apply_retract(&mut core, id, &mut effects)?;
        self.drain(&mut core, &mut effects)?;
        drop(core);
        self.apply_effects(effects);
        Ok(found)
    }

    /// Atomically replaces slots of a fact, keeping its id. Downstream
    /// matches see one remove half and one add half; slot-specific
    /// templates only re-trigger patterns that test a changed slot.
    pub fn modify(&self, id: FactId, changes: Vec<(String, Value)>) -> RetortResult<()> {
        let mut core = self.lock_core();
        let fact = core
            .wm
            .find_fact_by_id(id)
            .ok_or(EvalError::FactNotFound { id: id.as_u64() })?;
        let mut resolved = Vec::with_capacity(changes.len());
        for (slot, value) in changes {
            resolved.push((fact.template.require_slot(&slot)?, value));
        }

        let mut effects = Effects::default();
        self.apply_modify(&mut core, id, resolved, &mut effects)?;
        self.drain(&mut core, &mut effects)?;
        drop(core);
        self.apply_effects(effects);
        Ok(())
    }

    /// Retracts the stored fact data-equal to `fact`, resolving the
    /// canonical instance by template and slot values.
    pub fn retract_fact(&self, fact: &Fact) -> RetortResult<bool> {
        let id = {
            let core = self.lock_core();
            core.wm.id_for_key(&fact.key())
        };
        match id {
            Some(id) => self.retract(id),
            None => Ok(false),
        }
    }

    /// Looks up a fact by id.
    #[must_use]
    pub fn fact(&self, id: FactId) -> Option<Arc<Fact>> {
        self.lock_core().wm.find_fact_by_id(id)
    }

    /// All facts, in id order.
    #[must_use]
    pub fn facts(&self) -> Vec<Arc<Fact>> {
        self.lock_core().wm.facts()
    }

    /// Number of facts in working memory.
    #[must_use]
    pub fn fact_count(&self) -> usize {
        self.lock_core().wm.len()
    }

    /// Drops all facts, node memories, logical support, and queued
    /// activations. Rules and templates survive; fact ids restart.
    pub fn clear(&self) {
        let mut core = self.lock_core();
        core.wm.reset();
        core.network.flush_memories();
        core.support.clear();
        drop(core);
        self.agenda.clear();
        self.halted.store(false, Ordering::Release);
        self.dispatcher.emit(EventKind::EngineCleared);
    }

    // ---- running ---------------------------------------------------------

    /// Fires activations until the agenda empties, the limit is hit,
    /// or [`Rete::halt`] is called. Returns the number fired.
    pub fn run(&self, limit: Option<usize>) -> RetortResult<usize> {
        self.halted.store(false, Ordering::Release);
        let mut fired = 0;
        loop {
            if self.halted.load(Ordering::Acquire) {
                break;
            }
            if limit.is_some_and(|max| fired >= max) {
                break;
            }
            let (next, popped_foci) = self.agenda.next_activation();
            for _ in popped_foci {
                self.dispatcher.emit(EventKind::FocusChanged {
                    module: self.agenda.focus(),
                });
            }
            let Some(activation) = next else { break };
            if self.fire(activation)? {
                fired += 1;
            }
        }
        Ok(fired)
    }

    /// Runs until halted, sleeping while the agenda is empty. Intended
    /// for a dedicated engine thread fed by other threads.
    pub fn run_until_halt(&self) -> RetortResult<usize> {
        self.halted.store(false, Ordering::Release);
        let mut fired = 0;
        while !self.halted.load(Ordering::Acquire) {
            let (next, popped_foci) = self.agenda.next_activation();
            for _ in popped_foci {
                self.dispatcher.emit(EventKind::FocusChanged {
                    module: self.agenda.focus(),
                });
            }
            match next {
                Some(activation) => {
                    if self.fire(activation)? {
                        fired += 1;
                    }
                }
                None => {
                    self.agenda.wait_for_activations(IDLE_WAIT);
                }
            }
        }
        Ok(fired)
    }

    /// Stops the current run after the in-flight firing completes.
    /// Callable from rule bodies and other threads.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::Release);
        self.agenda.notify();
    }

    /// True after [`Rete::halt`] until the next run starts.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Fires one popped activation. Returns false when the activation
    /// went stale between pop and fire.
    fn fire(&self, activation: Activation) -> RetortResult<bool> {
        let mut core = self.lock_core();

        // A retract or modify may have invalidated the match after it
        // was popped. Pseudotime drift alone is not stale: a modify of
        // a slot-specific fact that only touched slots this rule never
        // reads was gated in the network and left the activation
        // queued, so it must still fire.
        let mut current = true;
        for position in 0..activation.token.size {
            let Some(snapshot) = activation.token.fact_at(position) else {
                continue;
            };
            if snapshot.id.is_synthetic() {
                continue;
            }
            let Some(live) = core.wm.find_fact_by_id(snapshot.id) else {
                current = false;
                break;
            };
            if live.pseudotime == snapshot.pseudotime {
                continue;
            }
            let mask = activation
                .rule
                .pattern_masks
                .get(position)
                .copied()
                .unwrap_or(0);
            if !gated_slots_unchanged(snapshot, &live, mask) {
                current = false;
                break;
            }
        }
        if !current {
            return Ok(false);
        }

        let mut ops = Vec::new();
        {
            let mut rule_ctx = RuleContext {
                wm: &core.wm,
                ops: &mut ops,
            };
            (activation.rule.body)(&activation.token, &mut rule_ctx).map_err(|source| {
                EvalError::RuleBody {
                    rule: activation.rule.name.clone(),
                    source: Box::new(source),
                }
            })?;
        }

        let logical_token = activation
            .rule
            .logical_prefix
            .and_then(|prefix| activation.token.prefix(prefix));

        let mut effects = Effects::default();
        for op in ops {
            self.apply_op(&mut core, op, logical_token.as_deref(), &mut effects)?;
        }
        self.drain(&mut core, &mut effects)?;
        drop(core);

        effects.events.push(EventKind::ActivationFired {
            rule: activation.rule.name.clone(),
            facts: activation.token.id_chain(),
        });
        self.apply_effects(effects);
        Ok(true)
    }

    // ---- agenda surface --------------------------------------------------

    /// Pushes a declared module onto the focus stack.
    pub fn set_focus(&self, module: &str) -> RetortResult<()> {
        {
            let core = self.lock_core();
            if !core.modules.contains(module) {
                return Err(NetworkError::UnknownModule {
                    name: module.to_string(),
                }
                .into());
            }
        }
        if self.agenda.set_focus(module) {
            self.dispatcher.emit(EventKind::FocusChanged {
                module: module.to_string(),
            });
        }
        Ok(())
    }

    /// Pops the focus stack, never below MAIN.
    pub fn pop_focus(&self) -> Option<String> {
        let popped = self.agenda.pop_focus();
        if popped.is_some() {
            self.dispatcher.emit(EventKind::FocusChanged {
                module: self.agenda.focus(),
            });
        }
        popped
    }

    /// The module currently in focus.
    #[must_use]
    pub fn focus(&self) -> String {
        self.agenda.focus()
    }

    /// Replaces the conflict-resolution strategy; queued activations
    /// are re-ordered in place.
    pub fn set_strategy(&self, strategy: Arc<dyn Strategy>) {
        let name = strategy.name();
        self.agenda.set_strategy(strategy);
        self.dispatcher
            .emit(EventKind::StrategyChanged { strategy: name });
    }

    /// Sets when dynamic salience is evaluated.
    pub fn set_salience_evaluation(&self, mode: SalienceEvaluation) {
        self.agenda.set_salience_evaluation(mode);
    }

    /// Queued activations for a module, in firing order.
    #[must_use]
    pub fn activations(&self, module: &str) -> Vec<Activation> {
        self.agenda.activations(module)
    }

    /// Total queued activations.
    #[must_use]
    pub fn activation_count(&self) -> usize {
        self.agenda.len()
    }

    // ---- events ----------------------------------------------------------

    /// Registers a synchronous event callback.
    pub fn add_listener(
        &self,
        callback: impl Fn(&EngineEvent) + Send + Sync + 'static,
    ) -> CallbackId {
        self.dispatcher.add_callback(Box::new(callback))
    }

    /// Removes a callback registered with [`Rete::add_listener`].
    pub fn remove_listener(&self, id: CallbackId) -> bool {
        self.dispatcher.remove_callback(id)
    }

    /// Opens a bounded event stream. Events are dropped, not blocked
    /// on, when the stream is full.
    #[must_use]
    pub fn subscribe(&self, capacity: usize) -> EventStream {
        self.dispatcher.subscribe(capacity)
    }

    /// Enables per-node token events for network debugging.
    pub fn set_node_events(&self, enabled: bool) {
        self.dispatcher.set_node_events(enabled);
    }

    /// Events dropped because a subscriber's stream was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dispatcher.dropped_events()
    }

    /// Number of live network nodes, for diagnostics.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.lock_core().network.node_count()
    }

    // ---- internals -------------------------------------------------------

    fn new_context(&self) -> PropagationContext {
        PropagationContext::new(
            self.dispatcher.is_active() && self.dispatcher.node_events_enabled(),
        )
    }

    fn apply_assert(
        &self,
        core: &mut Core,
        fact: Fact,
        logical: Option<&Token>,
        effects: &mut Effects,
    ) -> RetortResult<AssertOutcome> {
        if let Some(existing) = core.wm.id_for_key(&fact.key()) {
            match logical {
                Some(token) => core.support.add_support(existing, token),
                None => core.support.mark_unconditional(existing),
            }
            return Ok(AssertOutcome::AlreadyExisted(existing));
        }

        let fact = core.wm.publish(fact);
        if let Some(token) = logical {
            core.support.add_support(fact.id, token);
        }

        let mut ctx = self.new_context();
        core.network.feed(Tag::Add, Arc::clone(&fact), &mut ctx)?;
        self.absorb(core, ctx, effects);
        effects.events.push(EventKind::FactAsserted { fact: Arc::clone(&fact) });
        Ok(AssertOutcome::Asserted(fact.id))
    }

    fn apply_retract(
        &self,
        core: &mut Core,
        id: FactId,
        effects: &mut Effects,
    ) -> RetortResult<bool> {
        let Some(fact) = core.wm.withdraw(id) else {
            return Ok(false);
        };
        core.support.remove_fact(id);

        let mut ctx = self.new_context();
        core.network.feed(Tag::Remove, Arc::clone(&fact), &mut ctx)?;
        self.absorb(core, ctx, effects);
        effects.events.push(EventKind::FactRetracted { fact });
        Ok(true)
    }

    fn apply_modify(
        &self,
        core: &mut Core,
        id: FactId,
        changes: Vec<(usize, Value)>,
        effects: &mut Effects,
    ) -> RetortResult<()> {
        let (old, new) = core.wm.replace(id, &changes)?;

        let mut ctx = self.new_context();
        if old.template.slot_specific {
            let mut mask = 0u64;
            for (slot, _) in &changes {
                mask |= builder::slot_bit(*slot);
            }
            ctx.modify_mask = Some(mask);
        }

        core.network.feed(Tag::ModifyRemove, Arc::clone(&old), &mut ctx)?;
        core.network.feed(Tag::ModifyAdd, Arc::clone(&new), &mut ctx)?;
        self.absorb(core, ctx, effects);
        effects.events.push(EventKind::FactModified { old, new });
        Ok(())
    }

    /// Folds a finished propagation into the pending queue and effects:
    /// tokens that lost logical support doom their dependent facts.
    fn absorb(&self, core: &mut Core, mut ctx: PropagationContext, effects: &mut Effects) {
        for token in ctx.support_removals.drain(..) {
            for doomed in core.support.remove_token(&token) {
                core.wm.enqueue(WmOp::Retract(doomed));
            }
        }
        effects.agenda.append(&mut ctx.agenda);
        self.collect_node_events(&mut ctx, effects);
    }

    fn collect_node_events(&self, ctx: &mut PropagationContext, effects: &mut Effects) {
        if let Some(events) = ctx.events.take() {
            for event in events {
                effects.node_events.push(EventKind::NodeReached {
                    node: event.node,
                    tag: event.tag,
                    facts: event.token.id_chain(),
                });
            }
        }
    }

    fn apply_op(
        &self,
        core: &mut Core,
        op: WmOp,
        logical: Option<&Token>,
        effects: &mut Effects,
    ) -> RetortResult<()> {
        match op {
            WmOp::Assert(fact) => {
                self.apply_assert(core, fact, logical, effects)?;
            }
            WmOp::Retract(id) => {
                self.apply_retract(core, id, effects)?;
            }
            WmOp::Modify { id, changes } => {
                self.apply_modify(core, id, changes, effects)?;
            }
        }
        Ok(())
    }

    /// Runs the pending queue to exhaustion. Cascaded operations carry
    /// no logical context of their own.
    fn drain(&self, core: &mut Core, effects: &mut Effects) -> RetortResult<()> {
        while let Some(op) = core.wm.dequeue() {
            self.apply_op(core, op, None, effects)?;
        }
        Ok(())
    }

    fn apply_effects(&self, effects: Effects) {
        let deltas = self.agenda.commit(effects.agenda);
        self.emit_deltas(deltas);
        if self.dispatcher.is_active() {
            for kind in effects.node_events {
                self.dispatcher.emit(kind);
            }
            for kind in effects.events {
                self.dispatcher.emit(kind);
            }
        }
    }

    fn emit_deltas(&self, deltas: Vec<AgendaDelta>) {
        if !self.dispatcher.is_active() {
            return;
        }
        for delta in deltas {
            let kind = match delta {
                AgendaDelta::Added(act) => EventKind::ActivationAdded {
                    rule: act.rule.name.clone(),
                    facts: act.token.id_chain(),
                    salience: act.salience,
                },
                AgendaDelta::Cancelled(act) => EventKind::ActivationCancelled {
                    rule: act.rule.name.clone(),
                    facts: act.token.id_chain(),
                },
            };
            self.dispatcher.emit(kind);
        }
    }
}

/// True when a drifted fact still satisfies the slots a rule reads
/// from it. A zero mask means the template is not slot-specific; any
/// drift on such a fact re-propagated, so the popped match is stale.
fn gated_slots_unchanged(snapshot: &Fact, live: &Fact, mask: u64) -> bool {
    if mask == 0 || snapshot.slots.len() != live.slots.len() {
        return false;
    }
    snapshot
        .slots
        .iter()
        .zip(&live.slots)
        .enumerate()
        .all(|(slot, (a, b))| builder::slot_bit(slot) & mask == 0 || a == b)
}

impl Default for Rete {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Rete {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.lock_core();
        f.debug_struct("Rete")
            .field("facts", &core.wm.len())
            .field("rules", &core.rules.len())
            .field("nodes", &core.network.node_count())
            .field("queued", &self.agenda.len())
            .finish()
    }
}
