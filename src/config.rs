use std::sync::LazyLock;

use es_bus::config::TransferConfig;
use serde::Deserialize;

/// Environment variable naming a JSON file with a [`PlayerConfig`].
pub const CONFIG_ENV: &str = "ES_PLAYER_CONFIG";

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub transfer: TransferConfig,
    pub simulation: SimulationConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub video_packets: u64,
    pub audio_packets: u64,
    pub frame_rate: u32,
    // audio frame duration
    pub audio_frame_ms: u64,
    /// Video packet index at which a new video configuration is sent.
    pub resolution_switch_at: Option<u64>,
    /// Switch codec (sink reset) instead of only resolution.
    pub incompatible_switch: bool,
    pub encrypted: bool,
    pub sink_capacity: usize,
    pub sink_drain_ms: u64,
    pub producer_interval_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            video_packets: 250,
            audio_packets: 500,
            frame_rate: 25,
            audio_frame_ms: 20,
            resolution_switch_at: Some(125),
            incompatible_switch: true,
            encrypted: true,
            sink_capacity: 32,
            sink_drain_ms: 10,
            producer_interval_ms: 2,
        }
    }
}

impl PlayerConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).map_err(|e| anyhow::anyhow!("invalid player config: {}", e))
    }

    pub fn load() -> anyhow::Result<Self> {
        let Ok(path) = std::env::var(CONFIG_ENV) else {
            return Ok(Self::default());
        };
        let json = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("read config {}: {}", path, e))?;
        Self::from_json(&json)
    }
}

pub fn config() -> &'static PlayerConfig {
    static CONFIG: LazyLock<PlayerConfig> = LazyLock::new(|| {
        PlayerConfig::load().unwrap_or_else(|e| {
            log::warn!("{:#}, using defaults", e);
            PlayerConfig::default()
        })
    });
    &CONFIG
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
