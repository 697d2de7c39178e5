//! The agenda: queued activations, conflict resolution, and module focus.
//!
//! Activations live in per-module queues; only the module on top of the
//! focus stack fires. The agenda has its own lock so match propagation
//! (under the core lock) can batch its queue changes and commit them in
//! a single acquisition, and so callers can block on new work without
//! holding the core lock.

pub mod activation;
pub mod strategy;

mod heap;

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

pub use activation::{Activation, ActivationKey};
pub use strategy::{BreadthStrategy, DepthStrategy, Strategy};

use crate::network::AgendaChange;
use crate::rule::MAIN_MODULE;
use heap::ActivationHeap;

/// When a rule's dynamic salience is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SalienceEvaluation {
    /// Only the static salience is ever used.
    #[default]
    WhenDefined,
    /// Evaluated once, when the activation is queued.
    WhenActivated,
    /// Re-evaluated for every queued activation before each firing.
    EveryCycle,
}

/// One applied queue change, reported back for event dispatch.
#[derive(Debug, Clone)]
pub(crate) enum AgendaDelta {
    Added(Activation),
    Cancelled(Activation),
}

struct AgendaState {
    modules: HashMap<String, ActivationHeap>,
    focus_stack: Vec<String>,
    strategy: Arc<dyn Strategy>,
    salience_eval: SalienceEvaluation,
    seq: u64,
}

/// The engine's activation queue.
pub struct Agenda {
    state: Mutex<AgendaState>,
    cond: Condvar,
}

impl Agenda {
    /// Creates an empty agenda focused on [`MAIN_MODULE`] with the
    /// depth strategy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AgendaState {
                modules: HashMap::new(),
                focus_stack: vec![MAIN_MODULE.to_string()],
                strategy: Arc::new(DepthStrategy),
                salience_eval: SalienceEvaluation::default(),
                seq: 0,
            }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AgendaState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Applies a propagation's queue changes in one lock acquisition.
    /// Returns the changes that actually took effect; duplicate adds
    /// and removes of never-queued activations are dropped silently.
    pub(crate) fn commit(&self, changes: Vec<AgendaChange>) -> Vec<AgendaDelta> {
        if changes.is_empty() {
            return Vec::new();
        }
        let mut state = self.lock();
        let mut deltas = Vec::new();
        let mut added = false;

        for change in changes {
            match change {
                AgendaChange::Add { rule, token } => {
                    let salience = match state.salience_eval {
                        SalienceEvaluation::WhenDefined => rule.salience,
                        SalienceEvaluation::WhenActivated | SalienceEvaluation::EveryCycle => {
                            rule.current_salience()
                        }
                    };
                    state.seq += 1;
                    let seq = state.seq;
                    let act = Activation::new(rule, token, salience, seq);
                    let strategy = Arc::clone(&state.strategy);
                    let heap = state
                        .modules
                        .entry(act.rule.module.clone())
                        .or_insert_with(ActivationHeap::new);
                    if heap.push(act.clone(), strategy.as_ref()) {
                        added = true;
                        deltas.push(AgendaDelta::Added(act));
                    }
                }
                AgendaChange::Remove { rule, token } => {
                    let key = (rule.id, token.id_chain());
                    let strategy = Arc::clone(&state.strategy);
                    if let Some(heap) = state.modules.get_mut(&rule.module) {
                        if let Some(act) = heap.remove(&key, strategy.as_ref()) {
                            deltas.push(AgendaDelta::Cancelled(act));
                        }
                    }
                }
            }
        }

        if added {
            self.cond.notify_all();
        }
        deltas
    }

    /// Pops the next activation from the focused module. Empty focused
    /// modules above the bottom of the stack are popped off; their
    /// names are returned so the caller can report focus changes.
    pub(crate) fn next_activation(&self) -> (Option<Activation>, Vec<String>) {
        let mut state = self.lock();
        let strategy = Arc::clone(&state.strategy);
        let mut popped_foci = Vec::new();

        loop {
            let focus = match state.focus_stack.last() {
                Some(module) => module.clone(),
                None => return (None, popped_foci),
            };

            if state.salience_eval == SalienceEvaluation::EveryCycle {
                if let Some(heap) = state.modules.get_mut(&focus) {
                    heap.refresh_salience(strategy.as_ref());
                }
            }

            let next = state
                .modules
                .get_mut(&focus)
                .and_then(|heap| heap.pop(strategy.as_ref()));
            match next {
                Some(act) => return (Some(act), popped_foci),
                None if state.focus_stack.len() > 1 => {
                    popped_foci.push(focus);
                    state.focus_stack.pop();
                }
                None => return (None, popped_foci),
            }
        }
    }

    /// Blocks until new activations may be available or the timeout
    /// elapses. Returns true when work is queued under the current
    /// focus stack.
    pub(crate) fn wait_for_activations(&self, timeout: Duration) -> bool {
        let mut state = self.lock();
        if Self::has_focused_work(&state) {
            return true;
        }
        let (guard, _) = self
            .cond
            .wait_timeout(state, timeout)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state = guard;
        Self::has_focused_work(&state)
    }

    /// Wakes any blocked waiters, used on halt and shutdown.
    pub(crate) fn notify(&self) {
        self.cond.notify_all();
    }

    fn has_focused_work(state: &AgendaState) -> bool {
        state.focus_stack.iter().any(|module| {
            state
                .modules
                .get(module)
                .is_some_and(|heap| !heap.is_empty())
        })
    }

    /// Pushes a module onto the focus stack. A push of the current
    /// focus is a no-op.
    pub fn set_focus(&self, module: &str) -> bool {
        let mut state = self.lock();
        if state.focus_stack.last().map(String::as_str) == Some(module) {
            return false;
        }
        state.focus_stack.push(module.to_string());
        self.cond.notify_all();
        true
    }

    /// Pops the current focus, never emptying the stack.
    pub fn pop_focus(&self) -> Option<String> {
        let mut state = self.lock();
        if state.focus_stack.len() <= 1 {
            return None;
        }
        let popped = state.focus_stack.pop();
        self.cond.notify_all();
        popped
    }

    /// The module currently in focus.
    #[must_use]
    pub fn focus(&self) -> String {
        let state = self.lock();
        state
            .focus_stack
            .last()
            .cloned()
            .unwrap_or_else(|| MAIN_MODULE.to_string())
    }

    /// Replaces the conflict-resolution strategy, re-sorting every
    /// module's queue in place.
    pub fn set_strategy(&self, strategy: Arc<dyn Strategy>) {
        let mut state = self.lock();
        state.strategy = Arc::clone(&strategy);
        for heap in state.modules.values_mut() {
            heap.reorder(strategy.as_ref());
        }
    }

    /// Name of the active strategy.
    #[must_use]
    pub fn strategy_name(&self) -> &'static str {
        self.lock().strategy.name()
    }

    /// Sets when dynamic salience is evaluated.
    pub fn set_salience_evaluation(&self, mode: SalienceEvaluation) {
        self.lock().salience_eval = mode;
    }

    /// Queued activations for a module, in firing order.
    #[must_use]
    pub fn activations(&self, module: &str) -> Vec<Activation> {
        let state = self.lock();
        state
            .modules
            .get(module)
            .map(|heap| heap.ordered(state.strategy.as_ref()))
            .unwrap_or_default()
    }

    /// Total queued activations across all modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().modules.values().map(ActivationHeap::len).sum()
    }

    /// True when no activations are queued anywhere.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops all activations and resets the focus stack to MAIN.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.modules.clear();
        state.focus_stack = vec![MAIN_MODULE.to_string()];
        state.seq = 0;
    }
}

impl Default for Agenda {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Agenda {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Agenda")
            .field("focus", &state.focus_stack)
            .field("strategy", &state.strategy.name())
            .field("queued", &state.modules.values().map(ActivationHeap::len).sum::<usize>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::{Fact, FactId};
    use crate::rule::{Rule, RuleId, RuleRef};
    use crate::template::Template;
    use crate::token::Token;
    use crate::value::Value;

    fn rule_in(module: &str, salience: i64) -> RuleRef {
        Arc::new(Rule {
            id: RuleId::new(),
            name: format!("r{salience}"),
            module: module.to_string(),
            salience,
            dynamic_salience: None,
            logical_prefix: None,
            pattern_masks: Vec::new(),
            body: Box::new(|_, _| Ok(())),
        })
    }

    fn token(fact_id: u64, time: u64) -> Arc<Token> {
        let t = Template::new("thing", ["v"]);
        let mut f = Fact::new(t, vec![Value::Int(0)]);
        f.id = FactId::new(fact_id);
        f.pseudotime = time;
        Token::seed(Arc::new(f))
    }

    fn add(rule: &RuleRef, fact_id: u64, time: u64) -> AgendaChange {
        AgendaChange::Add {
            rule: Arc::clone(rule),
            token: token(fact_id, time),
        }
    }

    #[test]
    fn commit_then_pop_in_salience_order() {
        let agenda = Agenda::new();
        let lo = rule_in(MAIN_MODULE, 0);
        let hi = rule_in(MAIN_MODULE, 10);
        agenda.commit(vec![add(&lo, 1, 1), add(&hi, 2, 2)]);

        let (first, _) = agenda.next_activation();
        assert_eq!(first.unwrap().salience, 10);
        let (second, _) = agenda.next_activation();
        assert_eq!(second.unwrap().salience, 0);
        let (none, _) = agenda.next_activation();
        assert!(none.is_none());
    }

    #[test]
    fn duplicate_add_is_dropped() {
        let agenda = Agenda::new();
        let r = rule_in(MAIN_MODULE, 0);
        let deltas = agenda.commit(vec![add(&r, 1, 1), add(&r, 1, 1)]);
        assert_eq!(deltas.len(), 1);
        assert_eq!(agenda.len(), 1);
    }

    #[test]
    fn remove_cancels_a_queued_activation() {
        let agenda = Agenda::new();
        let r = rule_in(MAIN_MODULE, 0);
        agenda.commit(vec![add(&r, 1, 1)]);
        let deltas = agenda.commit(vec![AgendaChange::Remove {
            rule: Arc::clone(&r),
            token: token(1, 1),
        }]);
        assert!(matches!(deltas[0], AgendaDelta::Cancelled(_)));
        assert!(agenda.is_empty());
    }

    #[test]
    fn remove_of_unknown_activation_is_silent() {
        let agenda = Agenda::new();
        let r = rule_in(MAIN_MODULE, 0);
        let deltas = agenda.commit(vec![AgendaChange::Remove {
            rule: r,
            token: token(1, 1),
        }]);
        assert!(deltas.is_empty());
    }

    #[test]
    fn focus_gates_firing_and_auto_pops() {
        let agenda = Agenda::new();
        let main_rule = rule_in(MAIN_MODULE, 0);
        let aux_rule = rule_in("AUX", 100);
        agenda.commit(vec![add(&main_rule, 1, 1), add(&aux_rule, 2, 2)]);

        // AUX outranks MAIN only once focused.
        let (first, _) = agenda.next_activation();
        assert_eq!(first.unwrap().rule.module, MAIN_MODULE);

        agenda.set_focus("AUX");
        let (second, _) = agenda.next_activation();
        assert_eq!(second.unwrap().rule.module, "AUX");

        // AUX is now empty; asking again falls back to MAIN and
        // reports the popped focus.
        agenda.commit(vec![add(&main_rule, 3, 3)]);
        let (third, popped) = agenda.next_activation();
        assert_eq!(third.unwrap().rule.module, MAIN_MODULE);
        assert_eq!(popped, vec!["AUX".to_string()]);
        assert_eq!(agenda.focus(), MAIN_MODULE);
    }

    #[test]
    fn strategy_switch_reorders_queued_work() {
        let agenda = Agenda::new();
        let r = rule_in(MAIN_MODULE, 0);
        let other = rule_in(MAIN_MODULE, 0);
        agenda.commit(vec![add(&r, 1, 1), add(&other, 2, 2)]);

        agenda.set_strategy(Arc::new(BreadthStrategy));
        assert_eq!(agenda.strategy_name(), "breadth");
        let (first, _) = agenda.next_activation();
        assert_eq!(first.unwrap().recency, 1);
    }

    #[test]
    fn wait_returns_immediately_when_work_is_queued() {
        let agenda = Agenda::new();
        let r = rule_in(MAIN_MODULE, 0);
        agenda.commit(vec![add(&r, 1, 1)]);
        assert!(agenda.wait_for_activations(Duration::from_millis(1)));
    }

    #[test]
    fn wait_times_out_when_idle() {
        let agenda = Agenda::new();
        assert!(!agenda.wait_for_activations(Duration::from_millis(1)));
    }

    #[test]
    fn unfocused_work_does_not_satisfy_wait() {
        let agenda = Agenda::new();
        let r = rule_in("ELSEWHERE", 0);
        agenda.commit(vec![add(&r, 1, 1)]);
        assert!(!agenda.wait_for_activations(Duration::from_millis(1)));
        agenda.set_focus("ELSEWHERE");
        assert!(agenda.wait_for_activations(Duration::from_millis(1)));
    }

    #[test]
    fn clear_resets_focus_and_queues() {
        let agenda = Agenda::new();
        let r = rule_in(MAIN_MODULE, 0);
        agenda.commit(vec![add(&r, 1, 1)]);
        agenda.set_focus("AUX");
        agenda.clear();
        assert!(agenda.is_empty());
        assert_eq!(agenda.focus(), MAIN_MODULE);
    }
}
