//! Membership scenarios

use proptest::prelude::*;

use dias_core::{PeerId, PeerInfo};
use dias_crdt::CrdtKind;
use dias_membership::membership_digest;
use dias_ring::{DiasSet, RingConfig, RingSnapshot};
use dias_test::{eventually, fast_app_config, peer_info, Swarm, DEFAULT_TIMEOUT};

#[tokio::test]
async fn test_unreachable_member_is_evicted() {
    let swarm = Swarm::start(3, fast_app_config("notes")).await.unwrap();
    let collaborations = swarm.collaborate("doc", CrdtKind::GSet).await.unwrap();
    let found = eventually(DEFAULT_TIMEOUT, || {
        collaborations.iter().all(|c| c.membership().peer_count() == 3)
    })
    .await;
    assert!(found);

    let gone = swarm.ids()[2];
    swarm.kill(2).await;

    let evicted = eventually(DEFAULT_TIMEOUT, || {
        collaborations[..2]
            .iter()
            .all(|c| c.membership().peer_count() == 2 && !c.membership().ring().has(&gone))
    })
    .await;
    assert!(evicted);

    for (i, c) in collaborations[..2].iter().enumerate() {
        let dias = DiasSet::new(swarm.ids()[i], &RingConfig::default());
        let neighbours = dias.compute(&c.membership().ring().snapshot());
        assert!(!neighbours.contains_key(&gone));
        assert_eq!(neighbours.len(), 1);
    }
    for app in &swarm.nodes()[..2] {
        app.stop().await;
    }
}

#[tokio::test]
async fn test_digest_short_circuit() {
    let swarm = Swarm::start(2, fast_app_config("notes")).await.unwrap();
    let collaborations = swarm.collaborate("doc", CrdtKind::GSet).await.unwrap();
    let found = eventually(DEFAULT_TIMEOUT, || {
        collaborations.iter().all(|c| c.membership().peer_count() == 2)
    })
    .await;
    assert!(found);

    let digests: Vec<String> = collaborations
        .iter()
        .map(|c| c.membership().summary_digest().unwrap())
        .collect();
    assert_eq!(digests[0], digests[1]);

    let mut members = vec![peer_info(1), peer_info(2)];
    assert_eq!(membership_digest(&members).unwrap(), digests[0]);
    members[1] = members[1].clone().with_addr("/memory/2b");
    assert_ne!(membership_digest(&members).unwrap(), digests[0]);
    swarm.stop().await;
}

#[tokio::test]
async fn test_late_joiner_learns_everyone() {
    let mut swarm = Swarm::start(2, fast_app_config("notes")).await.unwrap();
    let mut collaborations = swarm.collaborate("doc", CrdtKind::GSet).await.unwrap();
    collaborations[0].shared().add("early").await.unwrap();

    swarm.add_node().await.unwrap();
    collaborations = swarm.collaborate("doc", CrdtKind::GSet).await.unwrap();
    assert_eq!(collaborations.len(), 3);

    let joined = eventually(DEFAULT_TIMEOUT, || {
        collaborations.iter().all(|c| c.membership().peer_count() == 3)
            && collaborations[2].shared().text() == "early"
    })
    .await;
    assert!(joined);
    swarm.stop().await;
}

fn ids() -> impl Strategy<Value = Vec<PeerId>> {
    prop::collection::vec(prop::array::uniform32(any::<u8>()), 0..40)
        .prop_map(|raw| raw.into_iter().map(PeerId::from_bytes).collect())
}

proptest! {
    #[test]
    fn test_dias_set_is_deterministic(
        self_raw in prop::array::uniform32(any::<u8>()),
        peers in ids(),
        preamble in 0usize..4,
    ) {
        let self_id = PeerId::from_bytes(self_raw);
        let config = RingConfig::default().with_preamble_byte_count(preamble);
        let forward = RingSnapshot::from_peers(peers.iter().copied().map(PeerInfo::new));
        let backward = RingSnapshot::from_peers(peers.iter().rev().copied().map(PeerInfo::new));

        let first = DiasSet::new(self_id, &config).compute(&forward);
        let second = DiasSet::new(self_id, &config).compute(&backward);
        prop_assert_eq!(&first, &second);
        prop_assert!(!first.contains_key(&self_id));
        prop_assert!(first.len() <= config.max_dias_peers());
    }
}
