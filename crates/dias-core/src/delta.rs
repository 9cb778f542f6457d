//! Delta records
//!
//! A delta is stored and replicated together with the clock it was produced
//! against and the increment its author contributed. On the wire a record is
//! the array `[previousClock, authorClock, payload]`.

use serde::{Deserialize, Serialize};

use crate::VectorClock;

/// One entry of a collaboration's delta log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawDelta", into = "RawDelta")]
pub struct DeltaRecord {
    /// Clock of the store right before the delta was applied
    pub previous_clock: VectorClock,
    /// Increment contributed by the author
    pub author_clock: VectorClock,
    /// Encoded shared-object payload
    pub payload: Vec<u8>,
}

impl DeltaRecord {
    pub fn new(previous_clock: VectorClock, author_clock: VectorClock, payload: Vec<u8>) -> Self {
        DeltaRecord {
            previous_clock,
            author_clock,
            payload,
        }
    }

    /// Clock a replica reaches after applying this delta on top of
    /// `previous_clock`
    pub fn next_clock(&self) -> VectorClock {
        self.previous_clock.increment_all(&self.author_clock)
    }
}

#[derive(Serialize, Deserialize)]
struct RawDelta(VectorClock, VectorClock, #[serde(with = "serde_bytes")] Vec<u8>);

impl From<RawDelta> for DeltaRecord {
    fn from(raw: RawDelta) -> Self {
        DeltaRecord::new(raw.0, raw.1, raw.2)
    }
}

impl From<DeltaRecord> for RawDelta {
    fn from(record: DeltaRecord) -> Self {
        RawDelta(record.previous_clock, record.author_clock, record.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PeerId;

    #[test]
    fn test_next_clock() {
        let a = PeerId::from_bytes([1u8; 32]);
        let b = PeerId::from_bytes([2u8; 32]);
        let prev: VectorClock = [(a, 2), (b, 1)].into_iter().collect();
        let record = DeltaRecord::new(prev, VectorClock::single(b, 1), vec![1, 2, 3]);
        let next = record.next_clock();
        assert_eq!(next.get(&a), 2);
        assert_eq!(next.get(&b), 2);
    }
}
