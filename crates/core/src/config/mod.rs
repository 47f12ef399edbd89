use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub audio: AudioConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing fields fall back to defaults.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Timing and filtering knobs for the movement scheduler.
///
/// The hop duration is not configurable here: it is owned by the envelope
/// engine so the schedule always matches the records it produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Delay between the arrival of the first chunk and its first hop.
    pub latency_ms: u64,
    /// How long the dispatch thread waits on an empty queue before it
    /// re-checks the stop flag.
    pub poll_interval_ms: u64,
    /// Rotational magnitude (radians) at or below which a hop is not sent.
    pub deadband_rad: f64,
    /// Duration of the move back to the base pose on stop and reset.
    pub restore_duration_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            latency_ms: 80,
            poll_interval_ms: 80,
            deadband_rad: 0.001,
            restore_duration_ms: 500,
        }
    }
}

impl SchedulerConfig {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn restore_duration(&self) -> Duration {
        Duration::from_millis(self.restore_duration_ms)
    }
}

/// Configuration specific to the incoming speech audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate stamped on chunks decoded by `feed`.
    pub sample_rate: u32,
    /// Slice length used when replaying recorded audio.
    pub chunk_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            chunk_ms: 40,
        }
    }
}
