//! Deterministic test-signal generator.
//!
//! Produces a sustained A minor pad with a 55 Hz kick on every beat. The
//! pad is scaled so the frame's `RMS * sqrt(2)` tracks the configured level,
//! which makes it easy to script energy changes for tests and the simulator.

use super::AudioFrame;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Pad partials in Hz (A3, C4, E4)
const PAD_HZ: [f64; 3] = [220.0, 261.63, 329.63];
const KICK_HZ: f64 = 55.0;
/// Kick envelope time constant in seconds
const KICK_TAU_S: f64 = 0.050;

/// Settings for [`SyntheticSource`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Samples per frame
    pub frame_len: usize,
    /// Tempo of the kick
    pub bpm: f32,
    /// Initial signal level in [0, 1]
    pub level: f32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            frame_len: 1024,
            bpm: 128.0,
            level: 0.2,
        }
    }
}

/// Frame generator with a settable level.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    config: SyntheticConfig,
    level: f32,
    frame_index: u64,
}

impl SyntheticSource {
    /// Create a source at the configured level
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            level: config.level.clamp(0.0, 1.0),
            frame_index: 0,
            config,
        }
    }

    /// Change the level for subsequent frames
    pub fn set_level(&mut self, level: f32) {
        self.level = if level.is_finite() {
            level.clamp(0.0, 1.0)
        } else {
            0.0
        };
    }

    /// Current level
    pub fn level(&self) -> f32 {
        self.level
    }

    /// Timestamp of the next frame in milliseconds
    pub fn next_timestamp_ms(&self) -> u64 {
        self.frame_index * self.config.frame_len as u64 * 1000 / self.config.sample_rate.max(1) as u64
    }

    /// Nominal frame period in milliseconds
    pub fn frame_period_ms(&self) -> f64 {
        self.config.frame_len as f64 * 1000.0 / self.config.sample_rate.max(1) as f64
    }

    /// Generate the next frame
    pub fn next_frame(&mut self) -> AudioFrame {
        let sr = self.config.sample_rate.max(1) as f64;
        let start = self.frame_index * self.config.frame_len as u64;
        let timestamp_ms = self.next_timestamp_ms();
        let beat_s = 60.0 / self.config.bpm.max(1.0) as f64;

        let level = self.level as f64;
        let pad_amp = level / 3f64.sqrt();
        let kick_amp = 2.0 * level;

        let samples = (start..start + self.config.frame_len as u64)
            .map(|n| {
                let t = n as f64 / sr;
                let pad: f64 = PAD_HZ
                    .iter()
                    .map(|f| pad_amp * (2.0 * PI * (f * t).fract()).sin())
                    .sum();
                let since_beat = t % beat_s;
                let kick = kick_amp
                    * (-since_beat / KICK_TAU_S).exp()
                    * (2.0 * PI * (KICK_HZ * since_beat).fract()).sin();
                (pad + kick).clamp(-1.0, 1.0) as f32
            })
            .collect();

        self.frame_index += 1;
        AudioFrame::new(samples, timestamp_ms, self.config.sample_rate)
    }

    /// Restart from time zero
    pub fn rewind(&mut self) {
        self.frame_index = 0;
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new(SyntheticConfig::default())
    }
}

impl Iterator for SyntheticSource {
    type Item = AudioFrame;

    fn next(&mut self) -> Option<AudioFrame> {
        Some(self.next_frame())
    }
}
