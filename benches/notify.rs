#![allow(unused)]
extern crate lwsync;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use lwsync::wait::{PollerConfig, WaitEngine, WaiterRegistry, Waiter};
use lwsync::thread::ThreadControl;
use std::hint::black_box;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

/// Builds a registry populated with `count` unresolved waiters spread over
/// disjoint 16-byte ranges starting at `base`.
fn populate(registry: &WaiterRegistry, base: u32, count: u32) -> Vec<u64> {
    let thread = ThreadControl::current();
    let mut ids = Vec::with_capacity(count as usize);
    for i in 0..count {
        let waiter = Arc::new(
            Waiter::new(
                base + i * 16,
                16,
                Arc::clone(&thread),
                Box::new(|| Ok(false)),
            )
            .unwrap(),
        );
        ids.push(waiter.id());
        registry.register(waiter);
    }
    ids
}

/// Benchmark the range-overlap scan with a populated registry.
///
/// The scanned waiters all carry a false predicate, so every iteration pays
/// the full cost of the scan plus per-match predicate evaluation without any
/// waiter leaving the registry.
fn bench_notify_scan(c: &mut Criterion) {
    for &count in &[16u32, 256, 1024] {
        let registry = WaiterRegistry::new();
        let ids = populate(&registry, 0x10000, count);

        let mut group = c.benchmark_group(format!("notify_scan_{count}"));
        group.throughput(Throughput::Elements(u64::from(count)));

        // Targeted notify matching exactly one waiter's range.
        group.bench_function("notify_at_single_match", |b| {
            b.iter(|| black_box(registry.notify_at(black_box(0x10000), 16)));
        });

        // Full sweep over every registered waiter.
        group.bench_function("notify_all", |b| {
            b.iter(|| black_box(registry.notify_all()));
        });

        group.finish();

        for id in ids {
            registry.unregister(id);
        }
    }
}

/// Benchmark an end-to-end wait/notify handshake between two threads.
fn bench_wait_roundtrip(c: &mut Criterion) {
    let engine = Arc::new(WaitEngine::with_config(PollerConfig {
        idle_interval: Duration::from_secs(60),
        retry_interval: Duration::from_secs(60),
    }));

    c.bench_function("wait_notify_roundtrip", |b| {
        b.iter(|| {
            let ready = Arc::new(AtomicBool::new(false));
            let waiter = {
                let (engine, ready) = (Arc::clone(&engine), Arc::clone(&ready));
                std::thread::spawn(move || {
                    engine.wait_on(0x1000, 16, move || Ok(ready.load(Ordering::Acquire)))
                })
            };
            while engine.waiter_count() == 0 {
                std::hint::spin_loop();
            }
            ready.store(true, Ordering::Release);
            engine.notify_at(0x1000, 16);
            waiter.join().unwrap().unwrap();
        });
    });
}

criterion_group!(benches, bench_notify_scan, bench_wait_roundtrip);
criterion_main!(benches);
