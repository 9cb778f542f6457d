//! Benchmarks for DIAS hot paths

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use dias_core::{PeerId, PeerInfo, VectorClock};
use dias_crdt::{CrdtKind, Mutation};
use dias_crypto::CollaborationKeys;
use dias_membership::membership_digest;
use dias_ring::{DiasSet, RingConfig, RingSnapshot};
use dias_store::{CollaborationStore, MemoryKv, Shared, StoreConfig};

fn spread_id(i: u32) -> PeerId {
    let mut bytes = [0u8; 32];
    bytes[..4].copy_from_slice(&i.wrapping_mul(2_654_435_761).to_be_bytes());
    bytes[28..].copy_from_slice(&i.to_be_bytes());
    PeerId::from_bytes(bytes)
}

fn snapshot(size: u32) -> RingSnapshot {
    RingSnapshot::from_peers(
        (0..size).map(|i| PeerInfo::new(spread_id(i)).with_addr(format!("/memory/{}", i))),
    )
}

fn bench_dias_set_compute(c: &mut Criterion) {
    let config = RingConfig::default();
    let dias = DiasSet::new(spread_id(u32::MAX), &config);
    for size in [16u32, 256, 4096] {
        let ring = snapshot(size);
        c.bench_function(&format!("dias_set_compute_{}", size), |b| {
            b.iter(|| black_box(dias.compute(black_box(&ring))))
        });
    }
}

fn bench_clock_merge(c: &mut Criterion) {
    let mut a = VectorClock::new();
    let mut b = VectorClock::new();
    for i in 0..32 {
        a.set(spread_id(i), u64::from(i) + 1);
        b.set(spread_id(i + 16), u64::from(i) * 2 + 1);
    }

    c.bench_function("vector_clock_merge", |bench| {
        bench.iter(|| black_box(a.merge(black_box(&b))))
    });

    c.bench_function("vector_clock_dominates", |bench| {
        bench.iter(|| black_box(a.dominates(black_box(&b))))
    });
}

fn bench_membership_digest(c: &mut Criterion) {
    let ring = snapshot(256);
    c.bench_function("membership_digest_256", |b| {
        b.iter(|| black_box(membership_digest(ring.peers())))
    });
}

fn bench_save_delta(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let keys = Arc::new(CollaborationKeys::generate());
    let id = spread_id(1);

    c.bench_function("store_save_delta_gcounter", |b| {
        b.iter_batched(
            || {
                let store = CollaborationStore::new(
                    id,
                    "bench",
                    Arc::new(MemoryKv::new()),
                    Some(keys.cipher()),
                    StoreConfig::default(),
                );
                let shared =
                    Arc::new(Shared::new("bench", CrdtKind::GCounter, id, Arc::clone(&keys)));
                store.set_shared(Arc::clone(&shared));
                let payload = shared.mutate(Mutation::Increment(1)).unwrap();
                (store, payload)
            },
            |(store, payload)| {
                runtime.block_on(async {
                    black_box(store.save_delta(None, None, payload).await.unwrap())
                })
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_dias_set_compute,
    bench_clock_merge,
    bench_membership_digest,
    bench_save_delta,
);
criterion_main!(benches);
