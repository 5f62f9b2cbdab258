use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flowgate::{CallContext, RuleManager, RuleSpec, StatsNode};

#[derive(Debug)]
struct Steady(f64);

impl StatsNode for Steady {
    fn current_qps(&self, _resource: &str) -> f64 {
        self.0
    }
    fn current_concurrency(&self, _resource: &str) -> u32 {
        0
    }
}

fn loaded_manager() -> RuleManager {
    let manager = RuleManager::new();
    let mut specs = Vec::new();
    for i in 0..100 {
        specs.push(RuleSpec::qps(format!("resource-{i}"), 1_000.0));
        specs.push(RuleSpec::qps(format!("resource-{i}"), 50.0).with_caller("batch"));
    }
    specs.push(RuleSpec::qps("warm", 1_000.0).warm_up(10, None));
    specs.push(RuleSpec::qps("paced", 1e9).queueing(1_000));
    manager.load_rules(specs);
    manager
}

fn bench_threshold(c: &mut Criterion) {
    let manager = loaded_manager();
    let node = Steady(10.0);
    let ctx = CallContext::new("web");
    c.bench_function("threshold_admit", |b| {
        b.iter(|| black_box(manager.evaluate(black_box("resource-42"), &ctx, &node, 1)))
    });
    c.bench_function("unknown_resource", |b| {
        b.iter(|| black_box(manager.evaluate(black_box("nothing-here"), &ctx, &node, 1)))
    });
}

fn bench_shaping(c: &mut Criterion) {
    let manager = loaded_manager();
    let node = Steady(0.0);
    let ctx = CallContext::anonymous();
    c.bench_function("warm_up_evaluate", |b| {
        b.iter(|| black_box(manager.evaluate(black_box("warm"), &ctx, &node, 1)))
    });
    c.bench_function("pacing_evaluate", |b| {
        b.iter(|| black_box(manager.evaluate(black_box("paced"), &ctx, &node, 1)))
    });
}

fn bench_reload(c: &mut Criterion) {
    let manager = RuleManager::new();
    let a: Vec<RuleSpec> = (0..200).map(|i| RuleSpec::qps(format!("r{i}"), 10.0)).collect();
    let b: Vec<RuleSpec> = (0..200).map(|i| RuleSpec::qps(format!("r{i}"), 20.0)).collect();
    let mut flip = false;
    c.bench_function("reload_200_rules", |bench| {
        bench.iter(|| {
            flip = !flip;
            manager.load_rules(if flip { a.clone() } else { b.clone() })
        })
    });
}

fn bench_async_admission(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let manager = loaded_manager();
    let node = Steady(10.0);
    let ctx = CallContext::new("batch");
    c.bench_function("check_admission_async", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(manager.check_admission("resource-7", &ctx, &node, 1).await.is_ok())
        })
    });
}

criterion_group!(benches, bench_threshold, bench_shaping, bench_reload, bench_async_admission);
criterion_main!(benches);
