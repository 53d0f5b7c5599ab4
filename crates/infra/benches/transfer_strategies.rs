use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use ledgerlock_accounts::Strategy;
use ledgerlock_core::AccountId;
use ledgerlock_infra::{AccountStore, StoreOptions, TransferEngine};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::thread;

const ACCOUNTS: u64 = 8;

fn engine() -> Arc<TransferEngine> {
    let store = Arc::new(AccountStore::in_memory(StoreOptions::default()));
    store
        .seed((1..=ACCOUNTS).map(|raw| (AccountId::new(raw), Decimal::from(1_000_000))))
        .expect("seed accounts");
    Arc::new(TransferEngine::new(store))
}

/// Single-threaded cost of one transfer per strategy (no contention).
fn bench_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("uncontended_transfer");
    group.throughput(Throughput::Elements(1));

    for strategy in [Strategy::Naive, Strategy::Ordered, Strategy::Pessimistic] {
        let engine = engine();
        group.bench_with_input(
            BenchmarkId::from_parameter(strategy.as_str()),
            &strategy,
            |b, &strategy| {
                b.iter(|| {
                    engine
                        .transfer(
                            strategy,
                            black_box(AccountId::new(1)),
                            black_box(AccountId::new(2)),
                            Decimal::ONE,
                        )
                        .expect("transfer")
                })
            },
        );
    }
    group.finish();
}

/// Threads walking a ring of accounts in the same direction.
///
/// Four threads each holding two adjacent locks cannot close the eight-account
/// ring, so caller-order locking does not deadlock here either.
fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_transfer");
    let threads = 4;
    let per_thread = 200u64;
    group.throughput(Throughput::Elements(threads * per_thread));

    for strategy in [Strategy::Ordered, Strategy::Pessimistic] {
        let engine = engine();
        group.bench_with_input(
            BenchmarkId::from_parameter(strategy.as_str()),
            &strategy,
            |b, &strategy| {
                b.iter(|| {
                    let handles: Vec<_> = (0..threads)
                        .map(|t| {
                            let engine = engine.clone();
                            thread::spawn(move || {
                                for i in 0..per_thread {
                                    let from = AccountId::new(1 + (t + i) % ACCOUNTS);
                                    let to = AccountId::new(1 + (t + i + 1) % ACCOUNTS);
                                    let _ = engine.transfer(strategy, from, to, Decimal::ONE);
                                }
                            })
                        })
                        .collect();
                    for h in handles {
                        h.join().expect("worker panicked");
                    }
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_uncontended, bench_contended);
criterion_main!(benches);
