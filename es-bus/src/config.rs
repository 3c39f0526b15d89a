use std::time::Duration;

use serde::Deserialize;

/// Tunables of a transfer engine.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TransferConfig {
    /// Wait before resubmitting when the sink is not prepared yet.
    pub not_ready_delay_ms: u64,
    /// Wait before resubmitting when the sink buffer is full.
    pub full_delay_ms: u64,
    pub max_video_width: u32,
    pub max_video_height: u32,
    /// Capacity of the stream event broadcast channel.
    pub event_capacity: usize,
}

impl TransferConfig {
    pub fn not_ready_delay(&self) -> Duration {
        Duration::from_millis(self.not_ready_delay_ms)
    }

    pub fn full_delay(&self) -> Duration {
        Duration::from_millis(self.full_delay_ms)
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            not_ready_delay_ms: 1000,
            full_delay_ms: 500,
            max_video_width: 3840,
            max_video_height: 2160,
            event_capacity: 64,
        }
    }
}
