use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{AuraError, Result};

/// Top-level configuration structure for the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub audio: AudioConfig,
    pub generator: GeneratorConfig,
    pub scheduler: SchedulerConfig,
    pub playback: PlaybackConfig,
}

impl EngineConfig {
    /// Reads a JSON configuration file. Missing sections fall back to their
    /// defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the scheduler or generator cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(AuraError::InvalidInput("sample rate must be non-zero"));
        }
        if self.audio.block_size == 0 {
            return Err(AuraError::InvalidInput("block size must be non-zero"));
        }
        if self.audio.fft_size < 2 {
            return Err(AuraError::InvalidInput("fft size must be at least two"));
        }
        if self.generator.tempo_min == 0 {
            return Err(AuraError::InvalidInput("minimum tempo must be positive"));
        }
        if self.generator.tempo_min > self.generator.tempo_max {
            return Err(AuraError::InvalidInput(
                "minimum tempo must not exceed maximum tempo",
            ));
        }
        if self.scheduler.lookahead_secs <= 0.0 {
            return Err(AuraError::InvalidInput("lookahead window must be positive"));
        }
        if self.scheduler.wake_interval().as_secs_f64() >= self.scheduler.lookahead_secs {
            return Err(AuraError::InvalidInput(
                "wake interval must be shorter than the lookahead window",
            ));
        }
        Ok(())
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Samples per device render block. Also the reverb partition length.
    pub block_size: usize,
    /// Number of tap samples fed into each analysis FFT.
    pub fft_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_size: 1024,
            fft_size: 2048,
        }
    }
}

/// Bounds applied while deriving songs from seeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub tempo_min: u32,
    pub tempo_max: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            tempo_min: 40,
            tempo_max: 65,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How far past the audio clock events are queued.
    pub lookahead_secs: f64,
    /// How often the driver is expected to call the scheduler.
    pub wake_interval_ms: u64,
    /// Gap between `start` and the first beat.
    pub start_offset_secs: f64,
}

impl SchedulerConfig {
    pub fn wake_interval(&self) -> Duration {
        Duration::from_millis(self.wake_interval_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lookahead_secs: 0.2,
            wake_interval_ms: 50,
            start_offset_secs: 0.05,
        }
    }
}

/// Master gain targets and fade lengths used by the playback controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub master_gain: f32,
    pub fade_in_secs: f64,
    pub pause_fade_secs: f64,
    pub stop_fade_secs: f64,
    /// Extra wait after the pause fade before the clock is suspended.
    pub suspend_grace_secs: f64,
    /// Extra wait after the stop fade before instruments are released.
    pub release_grace_secs: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            master_gain: 0.7,
            fade_in_secs: 0.5,
            pause_fade_secs: 0.2,
            stop_fade_secs: 0.5,
            suspend_grace_secs: 0.05,
            release_grace_secs: 0.05,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        let config =
            EngineConfig::from_json_str(r#"{ "generator": { "tempo_min": 50, "tempo_max": 60 } }"#)
                .unwrap();

        assert_eq!(config.generator.tempo_min, 50);
        assert_eq!(config.generator.tempo_max, 60);
        assert_eq!(config.scheduler, SchedulerConfig::default());
        assert_eq!(config.audio.sample_rate, 48_000);
    }

    #[test]
    fn rejects_inverted_tempo_range() {
        let err = EngineConfig::from_json_str(r#"{ "generator": { "tempo_min": 90, "tempo_max": 60 } }"#)
            .unwrap_err();
        assert!(matches!(err, AuraError::InvalidInput(_)));
    }

    #[test]
    fn rejects_wake_interval_longer_than_lookahead() {
        let mut config = EngineConfig::default();
        config.scheduler.wake_interval_ms = 500;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_block_size() {
        let err = EngineConfig::from_json_str(r#"{ "audio": { "block_size": 0 } }"#).unwrap_err();
        assert!(matches!(err, AuraError::InvalidInput(_)));
    }
}
