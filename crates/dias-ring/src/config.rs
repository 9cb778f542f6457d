//! Ring configuration

/// Ring and Dias set parameters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RingConfig {
    /// Bytes of the peer id used as its ring position
    pub byte_count: usize,
    /// Bytes used to bucket peers; also bounds the number of fingers
    pub preamble_byte_count: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        RingConfig {
            byte_count: dias_core::PEER_ID_LEN,
            preamble_byte_count: 2,
        }
    }
}

impl RingConfig {
    pub fn with_byte_count(mut self, byte_count: usize) -> Self {
        self.byte_count = byte_count.clamp(1, dias_core::PEER_ID_LEN);
        self
    }

    pub fn with_preamble_byte_count(mut self, preamble_byte_count: usize) -> Self {
        self.preamble_byte_count = preamble_byte_count.min(dias_core::PEER_ID_LEN);
        self
    }

    /// Upper bound of the Dias set size
    pub fn max_dias_peers(&self) -> usize {
        2 + (8 * self.preamble_byte_count).min(8 * self.byte_count)
    }
}
