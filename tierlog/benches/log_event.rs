//! Microbenchmarks for the `log_event()` hot path.
//!
//! Measures write latency in steady state (every log evicts) and the cost
//! of promotion under mixed-importance load.
//!
//! Run with: `cargo bench -p tierlog -- log_event`

#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use tierlog::{ChainSpec, EventChain, EventSchema, Importance, LogOptions, TierSpec};

/// Creates a chain with `tier_count` tiers of `capacity` bytes each.
fn setup_chain(tier_count: usize, capacity: usize) -> EventChain {
    let ceilings = [Importance::Debug, Importance::Info, Importance::Critical];
    let tiers = ceilings[..tier_count]
        .iter()
        .map(|&ceiling| TierSpec { capacity, ceiling })
        .collect();
    EventChain::new(ChainSpec::new(tiers, Importance::Debug).unwrap()).unwrap()
}

fn bench_log_event_steady_state(c: &mut Criterion) {
    let mut chain = setup_chain(1, 4096);
    let schema = EventSchema { source_id: 1, event_kind: 1, importance: Importance::Debug };
    let payload = [0xABu8; 32];
    let mut ts = 1_700_000_000_000u64;

    c.bench_function("log_event/steady_state_32b", |b| {
        b.iter(|| {
            ts += 10;
            chain
                .log_event(
                    black_box(&schema),
                    |w| w.write_all(black_box(&payload)),
                    &LogOptions { timestamp: Some(ts) },
                )
                .unwrap();
        });
    });
}

fn bench_log_event_payload_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_event/payload_size");

    for size in [8usize, 64, 256, 1024] {
        let mut chain = setup_chain(1, 8192);
        let schema = EventSchema { source_id: 1, event_kind: 1, importance: Importance::Debug };
        let payload = vec![0xCDu8; size];
        let mut ts = 1_700_000_000_000u64;

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                ts += 10;
                chain
                    .log_event(
                        black_box(&schema),
                        |w| w.write_all(black_box(&payload)),
                        &LogOptions { timestamp: Some(ts) },
                    )
                    .unwrap();
            });
        });
    }

    group.finish();
}

fn bench_log_event_with_promotion(c: &mut Criterion) {
    // 1-in-10 events is Critical in a 3-tier chain, so steady state pays
    // for eviction plus the occasional cross-tier promotion.
    let mut chain = setup_chain(3, 4096);
    let debug = EventSchema { source_id: 1, event_kind: 1, importance: Importance::Debug };
    let critical = EventSchema { source_id: 1, event_kind: 2, importance: Importance::Critical };
    let payload = [0xEFu8; 32];
    let mut ts = 1_700_000_000_000u64;
    let mut i = 0u64;

    c.bench_function("log_event/mixed_importance_promotion", |b| {
        b.iter(|| {
            ts += 10;
            i += 1;
            let schema = if i % 10 == 0 { &critical } else { &debug };
            chain
                .log_event(
                    black_box(schema),
                    |w| w.write_all(black_box(&payload)),
                    &LogOptions { timestamp: Some(ts) },
                )
                .unwrap();
        });
    });
}

fn bench_fetch_full_tier(c: &mut Criterion) {
    let mut chain = setup_chain(1, 4096);
    let schema = EventSchema { source_id: 1, event_kind: 1, importance: Importance::Debug };
    let payload = [0x11u8; 32];
    for i in 0..200u64 {
        chain
            .log_event(
                &schema,
                |w| w.write_all(&payload),
                &LogOptions { timestamp: Some(1_000 + i * 10) },
            )
            .unwrap();
    }
    let start = chain.first_sequence_number(Importance::Debug);

    c.bench_function("fetch_events_since/full_tier", |b| {
        let mut out = Vec::with_capacity(8192);
        b.iter(|| {
            out.clear();
            let mut cursor = black_box(start);
            chain
                .fetch_events_since(Importance::Debug, &mut cursor, &mut out)
                .unwrap();
            black_box(out.len());
        });
    });
}

criterion_group!(
    benches,
    bench_log_event_steady_state,
    bench_log_event_payload_size,
    bench_log_event_with_promotion,
    bench_fetch_full_tier,
);
criterion_main!(benches);
