//! Replication scenarios

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use dias_core::VectorClock;
use dias_crdt::{CrdtKind, CrdtValue, Mutation};
use dias_crypto::CollaborationKeys;
use dias_protocol::{DeltaMode, ProtocolConfig};
use dias_store::SaveOutcome;
use dias_test::{
    eventually, eventually_async, fast_app_config, store_pair, Replica, Swarm, DEFAULT_TIMEOUT,
};

#[tokio::test]
async fn test_basic_replication() {
    let (a, b) = store_pair(CrdtKind::GSet, ProtocolConfig::default()).await.unwrap();
    a.add("x").await.unwrap();

    assert!(eventually(DEFAULT_TIMEOUT, || b.text() == "x").await);
    assert_eq!(b.value(), CrdtValue::Text("x".into()));
}

#[tokio::test]
async fn test_relay_chaining() {
    let keys = Arc::new(CollaborationKeys::generate());
    let a = Replica::start(1, CrdtKind::GSet, Arc::clone(&keys), ProtocolConfig::default())
        .await
        .unwrap();
    let b = Replica::start(2, CrdtKind::GSet, Arc::clone(&keys), ProtocolConfig::default())
        .await
        .unwrap();
    a.replicate_to(&b);
    for element in ["a", "b", "c"] {
        a.add(element).await.unwrap();
    }
    assert!(eventually(DEFAULT_TIMEOUT, || b.text() == "abc").await);
    let (a_ref, b_ref) = (&a, &b);
    let caught_up = eventually_async(DEFAULT_TIMEOUT, move || async move {
        b_ref.clock().await.unwrap() == a_ref.clock().await.unwrap()
    })
    .await;
    assert!(caught_up);
    let b_clock = b.clock().await.unwrap();

    // c runs on b's datastore and relays what b received to d
    let c = b.sharing_store(3).await.unwrap();
    assert_eq!(c.text(), "abc");
    let d = Replica::start(4, CrdtKind::GSet, keys, ProtocolConfig::default()).await.unwrap();
    c.replicate_to(&d);

    assert!(eventually(DEFAULT_TIMEOUT, || d.text() == "abc").await);
    let (d_ref, b_clock) = (&d, &b_clock);
    let relayed = eventually_async(DEFAULT_TIMEOUT, move || async move {
        d_ref.clock().await.unwrap().dominates(b_clock)
    })
    .await;
    assert!(relayed);
}

#[tokio::test]
async fn test_streamed_deltas_keep_order() {
    let config = ProtocolConfig::default().with_delta_mode(DeltaMode::Stream);
    let (a, b) = store_pair(CrdtKind::GCounter, config).await.unwrap();
    for by in 1..=5 {
        a.mutate(Mutation::Increment(by)).await.unwrap();
    }
    assert!(eventually(DEFAULT_TIMEOUT, || b.value().as_counter() == Some(15)).await);
}

#[tokio::test]
async fn test_stale_write_is_dropped() {
    let keys = Arc::new(CollaborationKeys::generate());
    let a = Replica::start(1, CrdtKind::GSet, keys, ProtocolConfig::default()).await.unwrap();
    let before = a.clock().await.unwrap();

    let stale = a.shared().mutate(Mutation::Add("late".into())).unwrap();
    a.add("first").await.unwrap();
    let current = a.clock().await.unwrap();

    let outcome = a.store().save_delta(Some(before), None, stale).await.unwrap();
    assert_eq!(outcome, SaveOutcome::NotApplied);
    assert_eq!(a.text(), "first");
    assert_eq!(a.clock().await.unwrap(), current);
}

#[tokio::test]
async fn test_replicated_log_replays_causally() {
    let config = ProtocolConfig::default().with_delta_mode(DeltaMode::Stream);
    let (a, b) = store_pair(CrdtKind::GSet, config)
        .await
        .unwrap();
    for element in ["p", "q", "r"] {
        a.add(element).await.unwrap();
    }
    assert!(eventually(DEFAULT_TIMEOUT, || b.text() == "pqr").await);

    let mut stream = b.store().delta_stream(&VectorClock::new()).await.unwrap();
    let mut watermark = VectorClock::new();
    let mut replayed = 0;
    for record in stream.by_ref() {
        assert!(record.previous_clock.is_identical(&watermark));
        watermark = record.next_clock();
        replayed += 1;
    }
    assert!(replayed >= 1);
    assert!(watermark.is_identical(&b.clock().await.unwrap()));

    let current = b.clock().await.unwrap();
    assert_eq!(b.store().delta_stream(&current).await.unwrap().count(), 0);
}

#[tokio::test]
async fn test_swarm_replicates_between_nodes() {
    let swarm = Swarm::start(2, fast_app_config("notes")).await.unwrap();
    let collaborations = swarm.collaborate("doc", CrdtKind::GSet).await.unwrap();

    collaborations[0].shared().add("x").await.unwrap();
    assert!(eventually(DEFAULT_TIMEOUT, || collaborations[1].shared().text() == "x").await);

    collaborations[1].shared().add("y").await.unwrap();
    assert!(eventually(DEFAULT_TIMEOUT, || collaborations[0].shared().text() == "xy").await);
    swarm.stop().await;
}

#[tokio::test]
async fn test_swarm_replicates_maps() {
    let swarm = Swarm::start(3, fast_app_config("settings")).await.unwrap();
    let collaborations = swarm.collaborate("prefs", CrdtKind::OrMap).await.unwrap();

    collaborations[0].shared().insert("theme", b"dark".to_vec()).await.unwrap();
    collaborations[2].shared().insert("lang", b"en".to_vec()).await.unwrap();

    let converged = eventually(DEFAULT_TIMEOUT, || {
        collaborations.iter().all(|c| {
            let entries = c.shared().entries();
            entries.get("theme") == Some(&vec![b"dark".to_vec()])
                && entries.get("lang") == Some(&vec![b"en".to_vec()])
        })
    })
    .await;
    assert!(converged);
    swarm.stop().await;
}

async fn converge(increments: Vec<(usize, u64)>) -> (Vec<u64>, u64) {
    let keys = Arc::new(CollaborationKeys::generate());
    let mut replicas = Vec::new();
    for n in 1..=3u8 {
        replicas.push(
            Replica::start(n, CrdtKind::GCounter, Arc::clone(&keys), ProtocolConfig::default())
                .await
                .unwrap(),
        );
    }
    for (i, a) in replicas.iter().enumerate() {
        for (j, b) in replicas.iter().enumerate() {
            if i != j {
                a.replicate_to(b);
            }
        }
    }

    let expected: u64 = increments.iter().map(|(_, by)| by).sum();
    for (i, by) in increments {
        replicas[i].mutate(Mutation::Increment(by)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    eventually(DEFAULT_TIMEOUT, || {
        replicas.iter().all(|r| r.value().as_counter() == Some(expected))
    })
    .await;
    let values = replicas.iter().map(|r| r.value().as_counter().unwrap_or(0)).collect();
    (values, expected)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn test_interleaved_writes_converge(
        increments in prop::collection::vec((0usize..3, 1u64..10), 1..12),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (values, expected) = runtime.block_on(converge(increments));
        prop_assert!(
            values.iter().all(|v| *v == expected),
            "values {:?}, expected {}",
            values,
            expected
        );
    }
}
