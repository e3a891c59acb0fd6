use std::time::Duration;

use roomseal_crypto::RotationPolicy;
use serde::Deserialize;

use crate::keys::DEFAULT_QUERY_TIMEOUT_MS;

/// Tunables of an [`E2eeMachine`](crate::E2eeMachine), loadable from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct E2eeConfig {
    /// Server-advertised ceiling of the one-time key pool.
    #[serde(default = "default_max_one_time_keys")]
    pub max_one_time_keys: usize,

    /// Keys generated and published by `initialize`. Clamped to the ceiling.
    #[serde(default = "default_initial_one_time_keys")]
    pub initial_one_time_keys: usize,

    #[serde(default = "default_key_query_timeout_ms")]
    pub key_query_timeout_ms: u64,

    /// Period of the background prekey replenisher.
    #[serde(default = "default_replenish_interval_secs")]
    pub replenish_interval_secs: u64,

    /// Rotate a room's outbound session after this many messages.
    #[serde(default)]
    pub rotation_period_msgs: Option<u64>,

    /// Rotate a room's outbound session once it is this old.
    #[serde(default)]
    pub rotation_period_secs: Option<u64>,
}

fn default_max_one_time_keys() -> usize {
    100
}

fn default_initial_one_time_keys() -> usize {
    50
}

fn default_key_query_timeout_ms() -> u64 {
    DEFAULT_QUERY_TIMEOUT_MS
}

fn default_replenish_interval_secs() -> u64 {
    60
}

impl Default for E2eeConfig {
    fn default() -> Self {
        Self {
            max_one_time_keys: default_max_one_time_keys(),
            initial_one_time_keys: default_initial_one_time_keys(),
            key_query_timeout_ms: default_key_query_timeout_ms(),
            replenish_interval_secs: default_replenish_interval_secs(),
            rotation_period_msgs: None,
            rotation_period_secs: None,
        }
    }
}

impl E2eeConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(input)
    }

    pub fn rotation_policy(&self) -> RotationPolicy {
        RotationPolicy {
            max_messages: self.rotation_period_msgs,
            max_age: self.rotation_period_secs.map(Duration::from_secs),
        }
    }

    pub fn replenish_interval(&self) -> Duration {
        // tokio::time::interval panics on a zero period
        Duration::from_secs(self.replenish_interval_secs.max(1))
    }
}
