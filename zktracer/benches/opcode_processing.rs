//! Benchmarks the hub over a transaction executing a tight loop, and the
//! commitment of the resulting trace.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use zktracer::module::trace::Trace;
use zktracer::testing_utils::{address, bytecode, call_tx, contract, eoa, Driver};
use zktracer::TracerConfig;

/// Counts to 255, writing the counter to memory at every step.
const COUNTER_LOOP: &str = "60005b600101806000528060ff1160025700";

fn driver() -> Driver {
    Driver::new(TracerConfig::default())
        .with_account(address(0xaa), eoa(1_000_000_000_000))
        .with_account(address(0xc0), contract(bytecode(COUNTER_LOOP).unwrap()))
}

fn criterion_benchmark(c: &mut Criterion) {
    let tx = call_tx(address(0xaa), address(0xc0), 0, 1_000_000, vec![]);
    let mut group = c.benchmark_group("Opcode processing");

    group.bench_function("Counter loop, 255 iterations", |b| {
        b.iter_batched(
            driver,
            |mut driver| driver.run_block(std::slice::from_ref(&tx)).unwrap(),
            BatchSize::SmallInput,
        )
    });

    let mut traced = driver();
    traced.run_block(std::slice::from_ref(&tx)).unwrap();
    group.bench_function("Trace commitment", |b| {
        b.iter_batched(
            Trace::new,
            |mut trace| {
                traced.hub.commit(&mut trace);
                trace
            },
            BatchSize::SmallInput,
        )
    });

    group.finish()
}

criterion_group!(
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = criterion_benchmark);
criterion_main!(benches);
