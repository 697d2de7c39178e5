//! Accumulate joins: aggregation over matching right facts.
//!
//! An accumulate join computes an aggregate (count, sum, collect, or a
//! caller-supplied [`Accumulator`]) over the right facts matching each
//! left prefix, and emits the result as a single synthetic fact appended
//! to the prefix. Aggregation state is inherently per rule; these nodes
//! are never shared across rules.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{EvalError, RetortResult};
use crate::fact::{Fact, FactId};
use crate::network::join::{memories_for, pick_index, JoinTest};
use crate::network::memory::TokenMemory;
use crate::network::Tag;
use crate::token::Token;
use crate::value::Value;

/// An aggregate function in three parts: initial value, per-match step,
/// final projection.
pub trait Accumulator: Send + Sync {
    /// Name used in error context.
    fn name(&self) -> &str;

    /// The starting accumulator value.
    fn init(&self) -> Value;

    /// Folds one matching fact into the accumulator.
    fn step(&self, acc: Value, fact: &Fact) -> RetortResult<Value>;

    /// Projects the accumulator into the emitted result.
    fn finish(&self, acc: Value) -> RetortResult<Value> {
        Ok(acc)
    }
}

/// Counts matching facts.
#[derive(Debug, Default, Clone, Copy)]
pub struct Count;

impl Accumulator for Count {
    fn name(&self) -> &str {
        "count"
    }

    fn init(&self) -> Value {
        Value::Int(0)
    }

    fn step(&self, acc: Value, _fact: &Fact) -> RetortResult<Value> {
        Ok(Value::Int(acc.as_int().unwrap_or(0) + 1))
    }
}

/// Sums a numeric slot of the matching facts.
#[derive(Debug, Clone, Copy)]
pub struct Sum {
    /// Slot index to sum.
    pub slot: usize,
}

impl Accumulator for Sum {
    fn name(&self) -> &str {
        "sum"
    }

    fn init(&self) -> Value {
        Value::Int(0)
    }

    /// Integer inputs keep an integer total; the first float input
    /// widens the whole sum to float.
    fn step(&self, acc: Value, fact: &Fact) -> RetortResult<Value> {
        let v = fact.slot(self.slot)?;
        match (&acc, v) {
            (Value::Int(total), Value::Int(n)) => Ok(Value::Int(total + n)),
            _ => {
                let Some(n) = v.as_float() else {
                    return Err(EvalError::TestFailed {
                        node: 0,
                        reason: format!("sum requires numeric slot, got {}", v.type_name()),
                    }
                    .into());
                };
                Ok(Value::Float(acc.as_float().unwrap_or(0.0) + n))
            }
        }
    }
}

/// Collects a slot of the matching facts into a list.
#[derive(Debug, Clone, Copy)]
pub struct Collect {
    /// Slot index to collect.
    pub slot: usize,
}

impl Accumulator for Collect {
    fn name(&self) -> &str {
        "collect"
    }

    fn init(&self) -> Value {
        Value::List(Vec::new())
    }

    fn step(&self, acc: Value, fact: &Fact) -> RetortResult<Value> {
        let v = fact.slot(self.slot)?.clone();
        let mut list = match acc {
            Value::List(l) => l,
            _ => Vec::new(),
        };
        list.push(v);
        Ok(Value::List(list))
    }
}

/// State of an accumulate join node.
pub struct AccumulateState {
    tests: Vec<JoinTest>,
    index: Option<usize>,
    left: TokenMemory,
    right: TokenMemory,
    accumulator: Arc<dyn Accumulator>,
    /// Result token last emitted for each left prefix, keyed by the
    /// prefix's fact-id chain.
    results: HashMap<Vec<FactId>, Arc<Token>>,
}

impl std::fmt::Debug for AccumulateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccumulateState")
            .field("tests", &self.tests)
            .field("accumulator", &self.accumulator.name())
            .field("left", &self.left.len())
            .field("right", &self.right.len())
            .finish()
    }
}

impl AccumulateState {
    /// Creates accumulate state for a test set and aggregate function.
    #[must_use]
    pub fn new(tests: Vec<JoinTest>, accumulator: Arc<dyn Accumulator>) -> Self {
        let index = pick_index(&tests);
        let (left, right) = memories_for(&tests, index);
        Self {
            tests,
            index,
            left,
            right,
            accumulator,
            results: HashMap::new(),
        }
    }

    fn passes(&self, left: &Token, right: &Fact) -> RetortResult<bool> {
        for t in &self.tests {
            if !t.eval(left, right)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn left_candidates(&self, fact: &Fact) -> RetortResult<Vec<Arc<Token>>> {
        match self.index {
            Some(i) => {
                let t = &self.tests[i];
                let code = fact.slot_at(t.right_slot, t.right_sub)?.bucket_code();
                Ok(self.left.candidates(code).cloned().collect())
            }
            None => Ok(self.left.iter().cloned().collect()),
        }
    }

    /// Runs initializer + step over every matching right fact.
    fn aggregate(&self, token: &Arc<Token>) -> RetortResult<Value> {
        let candidates: Vec<Arc<Token>> = match self.index {
            Some(i) => {
                let t = &self.tests[i];
                match token.fact_at(t.left_fact) {
                    Some(lf) => {
                        let code = lf.slot_at(t.left_slot, t.left_sub)?.bucket_code();
                        self.right.candidates(code).cloned().collect()
                    }
                    None => Vec::new(),
                }
            }
            None => self.right.iter().cloned().collect(),
        };

        let mut acc = self.accumulator.init();
        for c in &candidates {
            if self.passes(token, &c.fact)? {
                acc = self.accumulator.step(acc, &c.fact)?;
            }
        }
        self.accumulator.finish(acc)
    }

    fn emit(&mut self, token: &Arc<Token>) -> RetortResult<Arc<Token>> {
        let value = self.aggregate(token)?;
        let result = token.extend(Fact::accumulate_result(value));
        self.results.insert(token.id_chain(), Arc::clone(&result));
        Ok(result)
    }

    /// Handles an event on the left input.
    pub(crate) fn left_event(
        &mut self,
        tag: Tag,
        token: &Arc<Token>,
    ) -> RetortResult<Vec<(Tag, Arc<Token>)>> {
        if tag.is_addition() {
            self.left.add(Arc::clone(token))?;
            let result = self.emit(token)?;
            Ok(vec![(tag, result)])
        } else {
            self.left.remove(token)?;
            match self.results.remove(&token.id_chain()) {
                Some(old) => Ok(vec![(tag, old)]),
                None => Ok(Vec::new()),
            }
        }
    }

    /// Handles an event on the right input: re-runs only the affected
    /// prefixes' aggregations.
    pub(crate) fn right_event(
        &mut self,
        tag: Tag,
        token: &Arc<Token>,
    ) -> RetortResult<Vec<(Tag, Arc<Token>)>> {
        if tag.is_addition() {
            self.right.add(Arc::clone(token))?;
        } else {
            self.right.remove(token)?;
        }

        let (retract_tag, assert_tag) = if tag.is_modify() {
            (Tag::ModifyRemove, Tag::ModifyAdd)
        } else {
            (Tag::Remove, Tag::Add)
        };

        let mut out = Vec::new();
        for left in self.left_candidates(&token.fact)? {
            // A fact that never matched this prefix leaves its aggregate
            // untouched, for removals as much as for additions.
            if !self.passes(&left, &token.fact)? {
                continue;
            }
            if let Some(old) = self.results.remove(&left.id_chain()) {
                out.push((retract_tag, old));
            }
            let result = self.emit(&left)?;
            out.push((assert_tag, result));
        }
        Ok(out)
    }

    /// Replays a left token without touching state (old-node update pass).
    pub(crate) fn left_replay(&self, token: &Arc<Token>) -> RetortResult<Vec<(Tag, Arc<Token>)>> {
        match self.results.get(&token.id_chain()) {
            Some(result) => Ok(vec![(Tag::Update, Arc::clone(result))]),
            None => Ok(Vec::new()),
        }
    }

    /// Flushes memories and emitted results.
    pub(crate) fn flush(&mut self) {
        self.left.clear();
        self.right.clear();
        self.results.clear();
    }

    /// Accumulator name for error context.
    #[must_use]
    pub fn accumulator_name(&self) -> &str {
        self.accumulator.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::single::Relation;
    use crate::template::Template;
    use crate::value::Value;

    fn order(id: u64, customer: &str, total: f64) -> Arc<Token> {
        let t = Template::new("order", ["customer", "total"]);
        let mut f = Fact::new(t, vec![Value::symbol(customer), Value::Float(total)]);
        f.id = FactId::new(id);
        Token::seed(Arc::new(f))
    }

    fn customer(id: u64, name: &str) -> Arc<Token> {
        let t = Template::new("customer", ["name"]);
        let mut f = Fact::new(t, vec![Value::symbol(name)]);
        f.id = FactId::new(id);
        Token::seed(Arc::new(f))
    }

    fn sum_per_customer() -> AccumulateState {
        AccumulateState::new(
            vec![JoinTest {
                left_fact: 0,
                left_slot: 0,
                left_sub: None,
                right_slot: 0,
                right_sub: None,
                relation: Relation::Eq,
            }],
            Arc::new(Sum { slot: 1 }),
        )
    }

    fn result_value(token: &Token) -> Value {
        token.fact.slots[0].clone()
    }

    #[test]
    fn empty_aggregate_emits_initial_value() {
        let mut a = sum_per_customer();
        let out = a.left_event(Tag::Add, &customer(1, "al")).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(result_value(&out[0].1), Value::Int(0));
    }

    #[test]
    fn right_add_retracts_and_reemits() {
        let mut a = sum_per_customer();
        a.left_event(Tag::Add, &customer(1, "al")).unwrap();

        let out = a.right_event(Tag::Add, &order(2, "al", 10.0)).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].0, Tag::Remove);
        assert_eq!(result_value(&out[0].1), Value::Int(0));
        assert_eq!(out[1].0, Tag::Add);
        assert_eq!(result_value(&out[1].1), Value::Float(10.0));

        let out = a.right_event(Tag::Add, &order(3, "al", 5.0)).unwrap();
        assert_eq!(result_value(&out[1].1), Value::Float(15.0));
    }

    #[test]
    fn right_event_only_touches_matching_prefixes() {
        let mut a = sum_per_customer();
        a.left_event(Tag::Add, &customer(1, "al")).unwrap();
        a.left_event(Tag::Add, &customer(2, "bo")).unwrap();

        let out = a.right_event(Tag::Add, &order(3, "bo", 7.0)).unwrap();
        // Exactly one retract/re-emit pair, for bo.
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].1.fact_at(0).unwrap().id, FactId::new(2));
    }

    #[test]
    fn right_remove_recomputes() {
        let mut a = sum_per_customer();
        a.left_event(Tag::Add, &customer(1, "al")).unwrap();
        a.right_event(Tag::Add, &order(2, "al", 10.0)).unwrap();

        let out = a.right_event(Tag::Remove, &order(2, "al", 10.0)).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(result_value(&out[1].1), Value::Int(0));
    }

    #[test]
    fn left_remove_retracts_result() {
        let mut a = sum_per_customer();
        a.left_event(Tag::Add, &customer(1, "al")).unwrap();
        a.right_event(Tag::Add, &order(2, "al", 10.0)).unwrap();

        let out = a.left_event(Tag::Remove, &customer(1, "al")).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, Tag::Remove);
        assert_eq!(result_value(&out[0].1), Value::Float(10.0));
    }

    #[test]
    fn count_and_collect_accumulators() {
        let c = Count;
        let mut acc = c.init();
        let f = order(1, "al", 2.0);
        acc = c.step(acc, &f.fact).unwrap();
        acc = c.step(acc, &f.fact).unwrap();
        assert_eq!(c.finish(acc).unwrap(), Value::Int(2));

        let col = Collect { slot: 1 };
        let mut acc = col.init();
        acc = col.step(acc, &order(1, "al", 2.0).fact).unwrap();
        acc = col.step(acc, &order(2, "al", 3.0).fact).unwrap();
        assert_eq!(
            col.finish(acc).unwrap(),
            Value::List(vec![Value::Float(2.0), Value::Float(3.0)])
        );
    }

    #[test]
    fn sum_stays_integer_until_a_float_appears() {
        let s = Sum { slot: 1 };
        let int_order = |id, n| {
            let t = Template::new("order", ["customer", "total"]);
            let mut f = Fact::new(t, vec![Value::symbol("al"), Value::Int(n)]);
            f.id = FactId::new(id);
            Arc::new(f)
        };

        let mut acc = s.init();
        acc = s.step(acc, &int_order(1, 10)).unwrap();
        acc = s.step(acc, &int_order(2, 25)).unwrap();
        assert_eq!(acc, Value::Int(35));

        // One float input widens the running total for good.
        acc = s.step(acc, &order(3, "al", 0.5).fact).unwrap();
        assert_eq!(acc, Value::Float(35.5));
        acc = s.step(acc, &int_order(4, 1)).unwrap();
        assert_eq!(acc, Value::Float(36.5));
    }

    #[test]
    fn sum_type_error_propagates() {
        let s = Sum { slot: 0 };
        let f = order(1, "al", 2.0);
        let err = s.step(Value::Float(0.0), &f.fact).unwrap_err();
        assert!(err.is_eval());
    }
}
