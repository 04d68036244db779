//! Actuator transform benchmark.
//!
//! One demand vector through every stage combination, at a DAC-sized and
//! a socket-sized actuator count.

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use rtc_mirror::transform::apply;
use rtc_mirror::{ActStages, ActuatorMapConfig};

fn config(n: usize, stages: ActStages) -> ActuatorMapConfig {
    let per = |on: bool, v: f32| on.then(|| Arc::from(vec![v; n]));
    ActuatorMapConfig {
        nacts: n,
        dim: n,
        hw_count: n,
        mapping: None,
        source: stages
            .contains(ActStages::SOURCE)
            .then(|| (0..n as i32).rev().collect::<Vec<_>>().into()),
        scale: per(stages.contains(ActStages::SCALE), 1.7),
        offset: per(stages.contains(ActStages::OFFSET), 250.0),
        power: per(stages.contains(ActStages::POWER), 1.1),
        min: vec![0u16; n].into(),
        max: vec![u16::MAX; n].into(),
        init: None,
        oscillation: None,
    }
}

fn bench_transform(c: &mut Criterion) {
    let combos = [
        ("plain", ActStages::empty()),
        ("scale", ActStages::SCALE),
        ("scale_offset", ActStages::SCALE | ActStages::OFFSET),
        ("source_scale_offset", ActStages::SOURCE | ActStages::SCALE | ActStages::OFFSET),
        ("all", ActStages::all()),
    ];

    let mut group = c.benchmark_group("mirror_transform");
    for n in [32usize, 4096] {
        let demand: Vec<f32> = (0..n).map(|i| (i % 1000) as f32 * 3.3).collect();
        let mut out = vec![0u16; n];
        group.throughput(Throughput::Elements(n as u64));
        for (name, stages) in combos {
            let cfg = config(n, stages);
            group.bench_with_input(BenchmarkId::new(name, n), &cfg, |b, cfg| {
                b.iter(|| apply(cfg, std::hint::black_box(&demand), &mut out))
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_transform);
criterion_main!(benches);
