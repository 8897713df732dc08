//! 规则执行性能基准测试
//!
//! 覆盖单条件评估、规则集前向链式执行和带缓存引擎的端到端调用。

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rule_engine::{
    CachedRuleEngine, ConditionEvaluator, FactBag, Operator, RuleCompiler, RuleEngine,
    RuleExecutor,
};
use serde_json::{Value, json};
use std::hint::black_box;

fn facts(value: Value) -> FactBag {
    match value {
        Value::Object(map) => FactBag::from(map),
        _ => FactBag::new(),
    }
}

/// 生成 n 条链式规则：第 i 条规则依赖第 i-1 条写入的字段
fn chained_ruleset(n: usize) -> String {
    let rules: Vec<Value> = (0..n)
        .map(|i| {
            let field = if i == 0 {
                "seed".to_string()
            } else {
                format!("step{}", i - 1)
            };
            json!({
                "name": format!("rule_{}", i),
                "salience": (n - i) as i64,
                "when": { "type": "condition", "field": field, "operator": "exists" },
                "then": [{ "action": "set", "field": format!("step{}", i), "value": i }]
            })
        })
        .collect();
    json!({ "rules": rules }).to_string()
}

fn bench_condition(c: &mut Criterion) {
    let mut group = c.benchmark_group("condition");
    let number = json!(1000);
    let text = json!("user@example.com");

    group.bench_function("gt", |b| {
        b.iter(|| {
            ConditionEvaluator::evaluate(
                black_box(Some(&number)),
                black_box(Operator::Gt),
                black_box(&json!(500)),
            )
        })
    });

    group.bench_function("regex", |b| {
        b.iter(|| {
            ConditionEvaluator::evaluate(
                black_box(Some(&text)),
                black_box(Operator::Regex),
                black_box(&json!(r"^[\w.-]+@[\w.-]+\.\w+$")),
            )
        })
    });

    group.finish();
}

fn bench_forward_chaining(c: &mut Criterion) {
    let mut group = c.benchmark_group("forward_chaining");
    let executor = RuleExecutor::new();

    for size in [1usize, 10, 50] {
        let compiled = RuleCompiler::new()
            .compile("chain", &chained_ruleset(size), 1, 0)
            .expect("ruleset compiles");

        group.bench_with_input(BenchmarkId::from_parameter(size), &compiled, |b, ruleset| {
            b.iter(|| {
                let mut bag = facts(json!({ "seed": true }));
                executor.execute(black_box(ruleset), &mut bag)
            })
        });
    }

    group.finish();
}

fn bench_cached_engine(c: &mut Criterion) {
    let engine = CachedRuleEngine::default();
    engine
        .add_rule("chain", &chained_ruleset(10), 0)
        .expect("ruleset registers");

    c.bench_function("cached_engine_execute", |b| {
        b.iter(|| {
            let mut bag = facts(json!({ "seed": true }));
            engine.execute(black_box("chain"), &mut bag)
        })
    });
}

criterion_group!(
    benches,
    bench_condition,
    bench_forward_chaining,
    bench_cached_engine
);
criterion_main!(benches);
