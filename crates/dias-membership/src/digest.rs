//! Membership digest
//!
//! base64(sha1(json([[peerId, [addr, ...]], ...]))) with peers sorted by
//! their id string and addresses sorted. Two nodes with the same member
//! table produce the same digest, so a matching summary needs no full
//! exchange.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};

use dias_core::{DiasError, DiasResult, PeerInfo};

/// Digest of a member list
pub fn membership_digest<'a, I>(members: I) -> DiasResult<String>
where
    I: IntoIterator<Item = &'a PeerInfo>,
{
    let mut list: Vec<(String, Vec<String>)> = members
        .into_iter()
        .map(|peer| (peer.id.to_base58(), peer.sorted_addrs()))
        .collect();
    list.sort();

    let json = serde_json::to_string(&list).map_err(|e| DiasError::Encode(e.to_string()))?;
    let hash = Sha1::digest(json.as_bytes());
    Ok(STANDARD.encode(hash))
}
