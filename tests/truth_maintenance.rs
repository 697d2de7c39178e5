//! Logical support: derived facts live exactly as long as their
//! justifications.

use std::sync::Arc;

use retort::{Fact, PatternSpec, Relation, Rete, RuleSpec, Template, Value};

fn engine() -> Rete {
    let e = Rete::new();
    e.add_template(Template::new("person", ["name", "age"]));
    e.add_template(Template::new("adult", ["name"]));
    e.add_template(Template::new("can_vote", ["name"]));
    e
}

/// Rule deriving adult(name) from person(name, age >= 18) under
/// logical support from the person match.
fn derive_adult(e: &Rete) {
    let adult = e.template("adult").unwrap();
    e.add_rule(
        RuleSpec::new(
            "derive_adult",
            Box::new(move |token, ctx| {
                let name = token.fact_at(0).expect("person").slots[0].clone();
                ctx.assert_fact(Fact::new(Arc::clone(&adult), vec![name]));
                Ok(())
            }),
        )
        .logical(1)
        .pattern(PatternSpec::matches("person").test("age", Relation::Ge, Value::Int(18))),
    )
    .unwrap();
}

fn derive_can_vote(e: &Rete) {
    let can_vote = e.template("can_vote").unwrap();
    e.add_rule(
        RuleSpec::new(
            "derive_can_vote",
            Box::new(move |token, ctx| {
                let name = token.fact_at(0).expect("adult").slots[0].clone();
                ctx.assert_fact(Fact::new(Arc::clone(&can_vote), vec![name]));
                Ok(())
            }),
        )
        .logical(1)
        .pattern(PatternSpec::matches("adult")),
    )
    .unwrap();
}

fn has_fact(e: &Rete, template: &str, name: &str) -> bool {
    e.facts()
        .iter()
        .any(|f| f.template.name == template && f.slots[0] == Value::symbol(name))
}

#[test]
fn derived_fact_retracts_with_its_support() {
    let e = engine();
    derive_adult(&e);

    let al = e
        .assert("person", vec![Value::symbol("Al"), Value::Int(30)])
        .unwrap();
    e.run(None).unwrap();
    assert!(has_fact(&e, "adult", "Al"));

    e.retract(al.fact_id()).unwrap();
    assert!(!has_fact(&e, "adult", "Al"));
    assert_eq!(e.fact_count(), 0);
}

#[test]
fn retraction_cascades_through_derivation_chains() {
    let e = engine();
    derive_adult(&e);
    derive_can_vote(&e);

    let al = e
        .assert("person", vec![Value::symbol("Al"), Value::Int(30)])
        .unwrap();
    e.run(None).unwrap();
    assert!(has_fact(&e, "adult", "Al"));
    assert!(has_fact(&e, "can_vote", "Al"));

    e.retract(al.fact_id()).unwrap();
    assert!(!has_fact(&e, "adult", "Al"));
    assert!(!has_fact(&e, "can_vote", "Al"));
    assert_eq!(e.fact_count(), 0);
}

#[test]
fn modify_that_breaks_the_match_withdraws_the_derivation() {
    let e = engine();
    derive_adult(&e);

    let al = e
        .assert("person", vec![Value::symbol("Al"), Value::Int(30)])
        .unwrap();
    e.run(None).unwrap();
    assert!(has_fact(&e, "adult", "Al"));

    e.modify(al.fact_id(), vec![("age".to_string(), Value::Int(7))])
        .unwrap();
    assert!(!has_fact(&e, "adult", "Al"));
}

#[test]
fn external_assert_makes_a_derived_fact_unconditional() {
    let e = engine();
    derive_adult(&e);

    let al = e
        .assert("person", vec![Value::symbol("Al"), Value::Int(30)])
        .unwrap();
    e.run(None).unwrap();
    assert!(has_fact(&e, "adult", "Al"));

    // Asserting the same data externally detaches it from support.
    let dup = e.assert("adult", vec![Value::symbol("Al")]).unwrap();
    assert!(!dup.is_new());

    e.retract(al.fact_id()).unwrap();
    assert!(has_fact(&e, "adult", "Al"));
}

#[test]
fn independent_supports_keep_a_shared_derivation_alive() {
    let e = engine();
    // Both adults derive the same marker fact.
    let adult = e.template("adult").unwrap();
    e.add_rule(
        RuleSpec::new(
            "any_adult_present",
            Box::new(move |_token, ctx| {
                ctx.assert_fact(Fact::new(Arc::clone(&adult), vec![Value::symbol("somebody")]));
                Ok(())
            }),
        )
        .logical(1)
        .pattern(PatternSpec::matches("person").test("age", Relation::Ge, Value::Int(18))),
    )
    .unwrap();

    let al = e
        .assert("person", vec![Value::symbol("Al"), Value::Int(30)])
        .unwrap();
    let bo = e
        .assert("person", vec![Value::symbol("Bo"), Value::Int(40)])
        .unwrap();
    e.run(None).unwrap();
    assert!(has_fact(&e, "adult", "somebody"));

    // One support remains, so the marker stays.
    e.retract(al.fact_id()).unwrap();
    assert!(has_fact(&e, "adult", "somebody"));

    // The last support goes, and the marker with it.
    e.retract(bo.fact_id()).unwrap();
    assert!(!has_fact(&e, "adult", "somebody"));
}

#[test]
fn non_logical_rules_assert_unconditionally() {
    let e = engine();
    let adult = e.template("adult").unwrap();
    e.add_rule(
        RuleSpec::new(
            "derive_plain",
            Box::new(move |token, ctx| {
                let name = token.fact_at(0).expect("person").slots[0].clone();
                ctx.assert_fact(Fact::new(Arc::clone(&adult), vec![name]));
                Ok(())
            }),
        )
        .pattern(PatternSpec::matches("person").test("age", Relation::Ge, Value::Int(18))),
    )
    .unwrap();

    let al = e
        .assert("person", vec![Value::symbol("Al"), Value::Int(30)])
        .unwrap();
    e.run(None).unwrap();

    e.retract(al.fact_id()).unwrap();
    assert!(has_fact(&e, "adult", "Al"));
}

#[test]
fn cancelled_activation_never_derives() {
    let e = engine();
    derive_adult(&e);

    let al = e
        .assert("person", vec![Value::symbol("Al"), Value::Int(30)])
        .unwrap();
    // Retract before running: the queued activation is cancelled, so
    // nothing is derived.
    e.retract(al.fact_id()).unwrap();
    assert_eq!(e.run(None).unwrap(), 0);
    assert!(!has_fact(&e, "adult", "Al"));
}
