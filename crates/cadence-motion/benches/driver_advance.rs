//! Benchmarks for per-tick driver advancement.
//!
//! The frame loop advances every active driver once per display refresh;
//! these benches keep an eye on the per-driver cost of each kind.

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use web_time::Duration;

use cadence_core::Value;
use cadence_motion::{
    AnimationSpec, Driver, Easing, RepeatCount, SpringConfig, TimingConfig,
};

fn bench_timing(c: &mut Criterion) {
    c.bench_function("timing_advance", |b| {
        let spec = AnimationSpec::timing(
            100.0,
            TimingConfig {
                duration: Duration::from_millis(1000),
                easing: Easing::in_out(Easing::Cubic),
            },
        );
        let start = Value::Number(0.0);
        b.iter_batched(
            || {
                let mut driver = Driver::new(&spec, &start).unwrap();
                driver.advance(Duration::ZERO, &start);
                driver
            },
            |mut driver| {
                black_box(driver.advance(Duration::from_millis(500), &start));
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

fn bench_spring(c: &mut Criterion) {
    c.bench_function("spring_advance_16ms", |b| {
        let spec = AnimationSpec::spring(100.0, SpringConfig::default());
        let start = Value::Number(0.0);
        b.iter_batched(
            || {
                let mut driver = Driver::new(&spec, &start).unwrap();
                driver.advance(Duration::ZERO, &start);
                driver
            },
            |mut driver| {
                black_box(driver.advance(Duration::from_millis(16), &start));
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

fn bench_repeat_sequence(c: &mut Criterion) {
    c.bench_function("repeat_sequence_advance", |b| {
        let spec = AnimationSpec::repeat(
            AnimationSpec::sequence(vec![
                AnimationSpec::timing(
                    10.0,
                    TimingConfig {
                        duration: Duration::from_millis(100),
                        easing: Easing::Linear,
                    },
                ),
                AnimationSpec::timing(
                    0.0,
                    TimingConfig {
                        duration: Duration::from_millis(100),
                        easing: Easing::Linear,
                    },
                ),
            ]),
            RepeatCount::Infinite,
            false,
        );
        let start = Value::Number(0.0);
        b.iter_batched(
            || {
                let mut driver = Driver::new(&spec, &start).unwrap();
                driver.advance(Duration::ZERO, &start);
                driver
            },
            |mut driver| {
                black_box(driver.advance(Duration::from_millis(50), &start));
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_timing, bench_spring, bench_repeat_sequence);
criterion_main!(benches);
