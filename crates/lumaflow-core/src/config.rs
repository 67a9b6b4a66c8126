//! Pipeline configuration.

use crate::audio::SpectralConfig;
use crate::context::ContextConfig;
use crate::harmony::HarmonyConfig;
use crate::prediction::PredictionConfig;
use crate::rhythm::RhythmConfig;
use crate::section::SectionConfig;
use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Where harmony analysis runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarmonyMode {
    /// On the tick thread, at the throttled cadence
    Inline,
    /// On a dedicated worker thread
    #[default]
    Worker,
}

/// Settings for every stage of the pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Spectral frontend
    pub spectral: SpectralConfig,
    /// Rhythm analyzer
    pub rhythm: RhythmConfig,
    /// Harmony detector
    pub harmony: HarmonyConfig,
    /// Section tracker
    pub section: SectionConfig,
    /// Context engine
    pub context: ContextConfig,
    /// Prediction matrix
    pub prediction: PredictionConfig,
    /// Pipeline driver
    pub driver: DriverConfig,
}

/// Tick driver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Where harmony runs
    pub harmony_mode: HarmonyMode,
    /// Pending jobs/results on the harmony worker queues
    pub worker_queue: usize,
    /// Time without frames before the source is declared lost
    pub silence_limit_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            harmony_mode: HarmonyMode::Worker,
            worker_queue: 2,
            silence_limit_ms: 5000,
        }
    }
}

impl PipelineConfig {
    /// Parse from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject settings the stages cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.spectral.sample_rate == 0 {
            return Err(CoreError::InvalidConfig("sample_rate must be positive".into()));
        }
        if !self.spectral.fft_size.is_power_of_two() || self.spectral.fft_size < 256 {
            return Err(CoreError::InvalidConfig(format!(
                "fft_size must be a power of two >= 256, got {}",
                self.spectral.fft_size
            )));
        }
        if self.rhythm.min_bpm <= 0.0 || self.rhythm.min_bpm >= self.rhythm.max_bpm {
            return Err(CoreError::InvalidConfig(format!(
                "invalid tempo range {}..{}",
                self.rhythm.min_bpm, self.rhythm.max_bpm
            )));
        }
        if !(0.0..=1.0).contains(&self.context.fallback_threshold) {
            return Err(CoreError::InvalidConfig(
                "fallback_threshold must be within 0..=1".into(),
            ));
        }
        if self.section.window_secs == 0 || self.section.bucket_ms == 0 {
            return Err(CoreError::InvalidConfig("section window must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.spectral.sample_rate, 44_100);
        assert_eq!(config.spectral.fft_size, 4096);
        assert_eq!(config.rhythm.beat_threshold, 0.3);
        assert_eq!(config.rhythm.min_interval_ms, 250);
        assert_eq!(config.harmony.throttle_ms, 500);
        assert_eq!(config.section.window_secs, 30);
        assert_eq!(config.context.fallback_threshold, 0.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [rhythm]
            min_interval_ms = 300

            [driver]
            harmony_mode = "inline"
            "#,
        )
        .unwrap();
        assert_eq!(config.rhythm.min_interval_ms, 300);
        assert_eq!(config.rhythm.history_frames, 43);
        assert_eq!(config.driver.harmony_mode, HarmonyMode::Inline);
    }

    #[test]
    fn test_invalid_fft_size() {
        let err = PipelineConfig::from_toml_str("[spectral]\nfft_size = 1000\n").unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig(_)));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, "[context]\nfallback_threshold = 0.6\n").unwrap();
        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.context.fallback_threshold, 0.6);

        let missing = PipelineConfig::load(dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(CoreError::Io(_))));
    }
}
