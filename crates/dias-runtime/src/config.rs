//! Runtime configuration
//!
//! Both configs load from JSON. Missing fields take their defaults; unknown
//! fields are rejected. Durations are given in milliseconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use dias_core::{DiasError, DiasResult, PEER_ID_LEN};
use dias_membership::MembershipConfig;
use dias_protocol::{DeltaMode, ProtocolConfig};
use dias_ring::RingConfig;
use dias_store::StoreConfig;
use dias_transport::{AppTransportConfig, ConnectionManagerConfig, DiscoveryConfig};

/// How replicas ship runs of deltas
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaModeSetting {
    Stream,
    #[default]
    Batch,
}

impl From<DeltaModeSetting> for DeltaMode {
    fn from(setting: DeltaModeSetting) -> Self {
        match setting {
            DeltaModeSetting::Stream => DeltaMode::Stream,
            DeltaModeSetting::Batch => DeltaMode::Batch,
        }
    }
}

/// Settings of one collaboration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollaborationConfig {
    pub byte_count: usize,
    pub preamble_byte_count: usize,
    pub debounce_reset_connections_ms: u64,
    pub reset_connection_interval_ms: u64,
    pub max_unreachable_before_eviction: u32,
    pub gossip_interval_min_ms: u64,
    pub gossip_interval_max_ms: u64,
    pub delta_mode: DeltaModeSetting,
    pub max_delta_retention: u64,
    pub delta_trim_timeout_ms: u64,
}

impl Default for CollaborationConfig {
    fn default() -> Self {
        CollaborationConfig {
            byte_count: PEER_ID_LEN,
            preamble_byte_count: 2,
            debounce_reset_connections_ms: 1000,
            reset_connection_interval_ms: 6000,
            max_unreachable_before_eviction: 10,
            gossip_interval_min_ms: 1000,
            gossip_interval_max_ms: 15000,
            delta_mode: DeltaModeSetting::Batch,
            max_delta_retention: 1000,
            delta_trim_timeout_ms: 1000,
        }
    }
}

impl CollaborationConfig {
    pub fn from_json(text: &str) -> DiasResult<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| DiasError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_delta_mode(mut self, mode: DeltaModeSetting) -> Self {
        self.delta_mode = mode;
        self
    }

    pub fn with_connection_timing(mut self, debounce_ms: u64, interval_ms: u64) -> Self {
        self.debounce_reset_connections_ms = debounce_ms;
        self.reset_connection_interval_ms = interval_ms;
        self
    }

    pub fn with_max_unreachable(mut self, max: u32) -> Self {
        self.max_unreachable_before_eviction = max;
        self
    }

    pub fn with_gossip_interval(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.gossip_interval_min_ms = min_ms;
        self.gossip_interval_max_ms = max_ms;
        self
    }

    pub fn with_max_delta_retention(mut self, retention: u64) -> Self {
        self.max_delta_retention = retention;
        self
    }

    pub fn validate(&self) -> DiasResult<()> {
        validate_ring(self.byte_count, self.preamble_byte_count)?;
        validate_connections(
            self.debounce_reset_connections_ms,
            self.reset_connection_interval_ms,
            self.max_unreachable_before_eviction,
        )?;
        if self.delta_trim_timeout_ms == 0 {
            return Err(DiasError::Config("delta_trim_timeout_ms must be positive".into()));
        }
        self.membership_config().validate()
    }

    pub fn ring_config(&self) -> RingConfig {
        RingConfig::default()
            .with_byte_count(self.byte_count)
            .with_preamble_byte_count(self.preamble_byte_count)
    }

    pub fn connection_config(&self) -> ConnectionManagerConfig {
        ConnectionManagerConfig::default()
            .with_debounce(Duration::from_millis(self.debounce_reset_connections_ms))
            .with_interval(Duration::from_millis(self.reset_connection_interval_ms))
            .with_max_unreachable(self.max_unreachable_before_eviction)
    }

    pub fn membership_config(&self) -> MembershipConfig {
        MembershipConfig::default()
            .with_ring(self.ring_config())
            .with_connections(self.connection_config())
            .with_gossip_interval(
                Duration::from_millis(self.gossip_interval_min_ms),
                Duration::from_millis(self.gossip_interval_max_ms),
            )
    }

    pub fn protocol_config(&self) -> ProtocolConfig {
        ProtocolConfig::default().with_delta_mode(self.delta_mode.into())
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::default()
            .with_max_delta_retention(self.max_delta_retention)
            .with_delta_trim_timeout(Duration::from_millis(self.delta_trim_timeout_ms))
    }
}

/// Log output
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Filter used when `DIAS_LOG` is not set
    pub level: String,
    /// One JSON object per line instead of the human format
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".into(),
            json: false,
        }
    }
}

/// Settings of a node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Application name; peers gossip on `dias/app/<name>`
    pub name: String,
    pub byte_count: usize,
    pub preamble_byte_count: usize,
    pub debounce_reset_connections_ms: u64,
    pub reset_connection_interval_ms: u64,
    pub max_unreachable_before_eviction: u32,
    pub max_throttle_delay_ms: u64,
    pub discovery_poll_interval_ms: u64,
    pub discovery_poll_timeout_ms: u64,
    /// Join collaborations announced by others when keys are available
    pub pin_collaborations: bool,
    /// Used for pinned collaborations
    pub collaboration: CollaborationConfig,
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            name: "dias".into(),
            byte_count: PEER_ID_LEN,
            preamble_byte_count: 2,
            debounce_reset_connections_ms: 1000,
            reset_connection_interval_ms: 6000,
            max_unreachable_before_eviction: 10,
            max_throttle_delay_ms: 5000,
            discovery_poll_interval_ms: 2000,
            discovery_poll_timeout_ms: 5000,
            pin_collaborations: false,
            collaboration: CollaborationConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn new(name: impl Into<String>) -> Self {
        AppConfig {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn from_json(text: &str) -> DiasResult<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| DiasError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> DiasResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DiasError::Config(format!("reading {}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    pub fn with_connection_timing(mut self, debounce_ms: u64, interval_ms: u64) -> Self {
        self.debounce_reset_connections_ms = debounce_ms;
        self.reset_connection_interval_ms = interval_ms;
        self
    }

    pub fn with_discovery_timing(
        mut self,
        throttle_ms: u64,
        poll_interval_ms: u64,
        poll_timeout_ms: u64,
    ) -> Self {
        self.max_throttle_delay_ms = throttle_ms;
        self.discovery_poll_interval_ms = poll_interval_ms;
        self.discovery_poll_timeout_ms = poll_timeout_ms;
        self
    }

    pub fn with_pinning(mut self, pin: bool) -> Self {
        self.pin_collaborations = pin;
        self
    }

    pub fn with_collaboration(mut self, collaboration: CollaborationConfig) -> Self {
        self.collaboration = collaboration;
        self
    }

    pub fn validate(&self) -> DiasResult<()> {
        if self.name.is_empty() || self.name.contains('/') {
            return Err(DiasError::Config(format!("invalid application name {:?}", self.name)));
        }
        validate_ring(self.byte_count, self.preamble_byte_count)?;
        validate_connections(
            self.debounce_reset_connections_ms,
            self.reset_connection_interval_ms,
            self.max_unreachable_before_eviction,
        )?;
        if self.discovery_poll_interval_ms == 0
            || self.discovery_poll_timeout_ms < self.discovery_poll_interval_ms
        {
            return Err(DiasError::Config(
                "discovery poll interval must be positive and within the poll timeout".into(),
            ));
        }
        self.collaboration.validate()
    }

    pub fn transport_config(&self) -> AppTransportConfig {
        let ring = RingConfig::default()
            .with_byte_count(self.byte_count)
            .with_preamble_byte_count(self.preamble_byte_count);
        let discovery = DiscoveryConfig::default()
            .with_max_throttle_delay(Duration::from_millis(self.max_throttle_delay_ms))
            .with_poll_interval(Duration::from_millis(self.discovery_poll_interval_ms))
            .with_poll_timeout(Duration::from_millis(self.discovery_poll_timeout_ms));
        let connections = ConnectionManagerConfig::default()
            .with_debounce(Duration::from_millis(self.debounce_reset_connections_ms))
            .with_interval(Duration::from_millis(self.reset_connection_interval_ms))
            .with_max_unreachable(self.max_unreachable_before_eviction);
        AppTransportConfig::new(&self.name)
            .with_ring(ring)
            .with_discovery(discovery)
            .with_connections(connections)
    }
}

fn validate_ring(byte_count: usize, preamble_byte_count: usize) -> DiasResult<()> {
    if byte_count == 0 || byte_count > PEER_ID_LEN {
        return Err(DiasError::Config(format!(
            "byte_count must be within 1..={}, got {}",
            PEER_ID_LEN, byte_count
        )));
    }
    if preamble_byte_count > byte_count {
        return Err(DiasError::Config(format!(
            "preamble_byte_count {} exceeds byte_count {}",
            preamble_byte_count, byte_count
        )));
    }
    Ok(())
}

fn validate_connections(
    debounce_ms: u64,
    interval_ms: u64,
    max_unreachable: u32,
) -> DiasResult<()> {
    if debounce_ms == 0 || interval_ms == 0 {
        return Err(DiasError::Config("connection timings must be positive".into()));
    }
    if max_unreachable == 0 {
        return Err(DiasError::Config("max_unreachable_before_eviction must be at least 1".into()));
    }
    Ok(())
}
