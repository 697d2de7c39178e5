use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use retort::{Aggregate, PatternSpec, Relation, Rete, RuleSpec, Template, Value};

fn make_engine() -> Rete {
    let engine = Rete::new();
    engine.add_template(Template::new("person", ["name", "age"]));
    engine.add_template(Template::new("order", ["customer", "total"]));
    engine
}

fn add_join_rule(engine: &Rete) {
    engine
        .add_rule(
            RuleSpec::new("customer_order", Box::new(|_, _| Ok(())))
                .pattern(
                    PatternSpec::matches("person").test("age", Relation::Ge, Value::Int(18)),
                )
                .pattern(PatternSpec::matches("order").join(
                    0,
                    "name",
                    Relation::Eq,
                    "customer",
                )),
        )
        .unwrap();
}

fn bench_alpha_assert(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/alpha_assert");
    group.throughput(Throughput::Elements(1024));
    group.bench_function("1024_facts_one_rule", |b| {
        b.iter_custom(|iters| {
            let mut total = std::time::Duration::ZERO;
            for _ in 0..iters {
                // Fresh state per sample so memories do not accumulate.
                let engine = make_engine();
                engine
                    .add_rule(
                        RuleSpec::new("adult", Box::new(|_, _| Ok(()))).pattern(
                            PatternSpec::matches("person")
                                .test("age", Relation::Ge, Value::Int(18)),
                        ),
                    )
                    .unwrap();

                let start = Instant::now();
                for i in 0..1024i64 {
                    engine
                        .assert(
                            "person",
                            vec![Value::symbol(format!("p{i}")), Value::Int(i % 90)],
                        )
                        .unwrap();
                }
                total += start.elapsed();
            }
            total
        });
    });
    group.finish();
}

fn bench_join_assert(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/join_assert");
    group.throughput(Throughput::Elements(256));
    group.bench_function("256_orders_against_256_people", |b| {
        b.iter_custom(|iters| {
            let mut total = std::time::Duration::ZERO;
            for _ in 0..iters {
                let engine = make_engine();
                add_join_rule(&engine);
                for i in 0..256i64 {
                    engine
                        .assert(
                            "person",
                            vec![Value::symbol(format!("p{i}")), Value::Int(20 + i % 60)],
                        )
                        .unwrap();
                }

                let start = Instant::now();
                for i in 0..256i64 {
                    engine
                        .assert(
                            "order",
                            vec![Value::symbol(format!("p{i}")), Value::Int(i)],
                        )
                        .unwrap();
                }
                total += start.elapsed();
            }
            total
        });
    });
    group.finish();
}

fn bench_fire_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/fire");
    group.throughput(Throughput::Elements(512));
    group.bench_function("512_activations", |b| {
        b.iter_custom(|iters| {
            let mut total = std::time::Duration::ZERO;
            for _ in 0..iters {
                let engine = make_engine();
                engine
                    .add_rule(
                        RuleSpec::new("any_person", Box::new(|_, _| Ok(())))
                            .pattern(PatternSpec::matches("person")),
                    )
                    .unwrap();
                for i in 0..512i64 {
                    engine
                        .assert(
                            "person",
                            vec![Value::symbol(format!("p{i}")), Value::Int(i)],
                        )
                        .unwrap();
                }

                let start = Instant::now();
                let fired = engine.run(None).unwrap();
                total += start.elapsed();
                assert_eq!(fired, 512);
            }
            total
        });
    });
    group.finish();
}

fn bench_accumulate_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/accumulate");
    group.throughput(Throughput::Elements(128));
    group.bench_function("128_orders_into_count", |b| {
        b.iter_custom(|iters| {
            let mut total = std::time::Duration::ZERO;
            for _ in 0..iters {
                let engine = make_engine();
                engine
                    .add_rule(
                        RuleSpec::new("order_count", Box::new(|_, _| Ok(())))
                            .pattern(PatternSpec::matches("person"))
                            .pattern(
                                PatternSpec::accumulate("order", Aggregate::Count).join(
                                    0,
                                    "name",
                                    Relation::Eq,
                                    "customer",
                                ),
                            ),
                    )
                    .unwrap();
                engine
                    .assert("person", vec![Value::symbol("al"), Value::Int(30)])
                    .unwrap();

                let start = Instant::now();
                for i in 0..128i64 {
                    engine
                        .assert("order", vec![Value::symbol("al"), Value::Int(i)])
                        .unwrap();
                }
                total += start.elapsed();
            }
            total
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_alpha_assert,
    bench_join_assert,
    bench_fire_loop,
    bench_accumulate_update
);
criterion_main!(benches);
