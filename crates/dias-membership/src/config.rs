//! Membership configuration

use std::time::Duration;

use dias_core::{DiasError, DiasResult};
use dias_ring::RingConfig;
use dias_transport::ConnectionManagerConfig;

/// Settings of one collaboration's membership
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MembershipConfig {
    pub ring: RingConfig,
    pub connections: ConnectionManagerConfig,
    /// Shortest pause between gossip ticks
    pub gossip_interval_min: Duration,
    /// Longest pause between gossip ticks once membership has converged
    pub gossip_interval_max: Duration,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        MembershipConfig {
            ring: RingConfig::default(),
            connections: ConnectionManagerConfig::default(),
            gossip_interval_min: Duration::from_millis(1000),
            gossip_interval_max: Duration::from_millis(15000),
        }
    }
}

impl MembershipConfig {
    pub fn with_ring(mut self, ring: RingConfig) -> Self {
        self.ring = ring;
        self
    }

    pub fn with_connections(mut self, connections: ConnectionManagerConfig) -> Self {
        self.connections = connections;
        self
    }

    pub fn with_gossip_interval(mut self, min: Duration, max: Duration) -> Self {
        self.gossip_interval_min = min;
        self.gossip_interval_max = max;
        self
    }

    pub fn validate(&self) -> DiasResult<()> {
        if self.gossip_interval_min.is_zero() {
            return Err(DiasError::Config("gossip_interval_min must be positive".into()));
        }
        if self.gossip_interval_max < self.gossip_interval_min {
            return Err(DiasError::Config(
                "gossip_interval_max must not be below gossip_interval_min".into(),
            ));
        }
        Ok(())
    }
}
