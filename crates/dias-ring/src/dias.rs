//! Dias peer set
//!
//! Deterministic neighbour selection on the circular id space:
//! - the successor and the predecessor of the local position
//! - one finger per preamble bit, at distances 1/2, 1/4, ... of the ring
//!
//! A position is the first `byte_count` bytes of a peer id read as a
//! big-endian number. The result is a pure function of the snapshot and
//! the local id, so two peers looking at the same ring agree on who their
//! neighbours are.

use std::collections::BTreeMap;

use dias_core::{PeerId, PeerInfo};

use crate::{RingConfig, RingSnapshot};

/// Neighbour selection for one local peer
#[derive(Clone, Debug)]
pub struct DiasSet {
    self_id: PeerId,
    byte_count: usize,
    preamble_byte_count: usize,
}

impl DiasSet {
    pub fn new(self_id: PeerId, config: &RingConfig) -> Self {
        DiasSet {
            self_id,
            byte_count: config.byte_count.clamp(1, dias_core::PEER_ID_LEN),
            preamble_byte_count: config.preamble_byte_count,
        }
    }

    pub fn self_id(&self) -> PeerId {
        self.self_id
    }

    /// Peers the local node must be connected to
    pub fn compute(&self, snapshot: &RingSnapshot) -> BTreeMap<PeerId, PeerInfo> {
        let others: Vec<(&[u8], &PeerInfo)> = snapshot
            .peers()
            .iter()
            .filter(|p| p.id != self.self_id)
            .map(|p| (p.id.preamble(self.byte_count), p))
            .collect();

        let mut selected = BTreeMap::new();
        if others.is_empty() {
            return selected;
        }

        let own = self.self_id.preamble(self.byte_count);
        let mut pick = |peer: &PeerInfo| {
            selected.entry(peer.id).or_insert_with(|| peer.clone());
        };

        // successor: first position strictly after ours, wrapping
        let after = others.partition_point(|(pos, _)| *pos <= own);
        pick(others[after % others.len()].1);

        // predecessor: last position strictly before ours, wrapping
        let before = others.partition_point(|(pos, _)| *pos < own);
        let pred = if before == 0 { others.len() - 1 } else { before - 1 };
        pick(others[pred].1);

        let bits = 8 * self.byte_count;
        let fingers = (8 * self.preamble_byte_count).min(bits);
        for k in 1..=fingers {
            let target = add_power_of_two(own, bits - k);
            let at = others.partition_point(|(pos, _)| *pos < target.as_slice());
            pick(others[at % others.len()].1);
        }

        selected
    }
}

/// `position + 2^exponent` modulo `2^(8 * position.len())`
fn add_power_of_two(position: &[u8], exponent: usize) -> Vec<u8> {
    let mut out = position.to_vec();
    let len = out.len();
    let mut index = len - 1 - exponent / 8;
    let mut carry = 1u16 << (exponent % 8);
    loop {
        let sum = out[index] as u16 + carry;
        out[index] = sum as u8;
        carry = sum >> 8;
        if carry == 0 || index == 0 {
            break;
        }
        index -= 1;
    }
    out
}
