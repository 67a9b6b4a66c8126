//! Automatic gain control
//!
//! Two independent stages:
//! - [`SignalAgc`] scales the raw sample buffer toward a target RMS before
//!   the FFT (optional, off by default).
//! - [`BandAgc`] keeps a per-band gain so quiet bands stay usable while the
//!   un-gained bands remain available next to the adjusted ones.

use super::spectral::{BandEnergies, SpectralBand};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Configuration for [`SignalAgc`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalAgcConfig {
    /// RMS the output is steered toward
    pub target_rms: f32,
    /// Per-frame decay applied to the tracked peak RMS
    pub peak_decay: f32,
    /// Largest gain applied
    pub max_gain: f32,
    /// Smallest gain applied
    pub min_gain: f32,
    /// Frames over which the gain fades in from unity
    pub warmup_frames: u32,
    /// Input below this RMS is left untouched
    pub noise_floor: f32,
    /// Number of frames the gain is averaged over
    pub smoothing_frames: usize,
}

impl Default for SignalAgcConfig {
    fn default() -> Self {
        Self {
            target_rms: 0.25,
            peak_decay: 0.997,
            max_gain: 8.0,
            min_gain: 0.25,
            warmup_frames: 60,
            noise_floor: 0.005,
            smoothing_frames: 15,
        }
    }
}

/// Buffer-level gain control with a slowly decaying peak tracker.
#[derive(Debug, Clone)]
pub struct SignalAgc {
    config: SignalAgcConfig,
    peak_rms: f32,
    gain: f32,
    frame_count: u32,
    gain_history: VecDeque<f32>,
}

impl SignalAgc {
    /// Create a new signal AGC
    pub fn new(config: SignalAgcConfig) -> Self {
        Self {
            peak_rms: config.target_rms,
            gain: 1.0,
            frame_count: 0,
            gain_history: VecDeque::with_capacity(config.smoothing_frames.max(1)),
            config,
        }
    }

    /// Scale `samples` in place and return the gain that was applied.
    pub fn process(&mut self, samples: &mut [f32]) -> f32 {
        self.frame_count = self.frame_count.saturating_add(1);
        let input_rms = super::mean_square(samples).sqrt();

        if input_rms > self.peak_rms {
            self.peak_rms = input_rms;
        } else {
            self.peak_rms *= self.config.peak_decay;
        }
        self.peak_rms = self.peak_rms.max(self.config.noise_floor);

        let mut target_gain = 1.0;
        if input_rms > self.config.noise_floor {
            target_gain = self.config.target_rms / self.peak_rms;
        }
        let target_gain = target_gain.clamp(self.config.min_gain, self.config.max_gain);

        self.gain_history.push_back(target_gain);
        while self.gain_history.len() > self.config.smoothing_frames.max(1) {
            self.gain_history.pop_front();
        }
        let smoothed = self.gain_history.iter().sum::<f32>() / self.gain_history.len() as f32;

        let warmup = if self.config.warmup_frames == 0 {
            1.0
        } else {
            (self.frame_count as f32 / self.config.warmup_frames as f32).min(1.0)
        };
        self.gain = (1.0 - warmup) + smoothed * warmup;

        if input_rms > self.config.noise_floor {
            for s in samples.iter_mut() {
                *s = if s.is_finite() {
                    (*s * self.gain).clamp(-1.0, 1.0)
                } else {
                    0.0
                };
            }
        }

        if self.frame_count % 60 == 0 {
            debug!(
                "SignalAgc: gain={:.2} in_rms={:.3} peak={:.3}",
                self.gain, input_rms, self.peak_rms
            );
        }

        self.gain
    }

    /// Gain applied to the most recent frame
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Reset to unity gain
    pub fn reset(&mut self) {
        self.peak_rms = self.config.target_rms;
        self.gain = 1.0;
        self.frame_count = 0;
        self.gain_history.clear();
    }
}

/// Gain-tracking parameters for one band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandAgcParams {
    /// Time constant when the gain has to fall (signal got louder)
    pub attack_ms: f32,
    /// Time constant when the gain has to rise (signal got quieter)
    pub release_ms: f32,
    /// Level the band is steered toward
    pub target_rms: f32,
    /// Largest gain applied to the band
    pub max_gain: f32,
}

impl BandAgcParams {
    const fn new(attack_ms: f32, release_ms: f32, target_rms: f32, max_gain: f32) -> Self {
        Self {
            attack_ms,
            release_ms,
            target_rms,
            max_gain,
        }
    }

    /// Tuned defaults for a band; low bands move slowly, air moves fast
    pub fn for_band(band: SpectralBand) -> Self {
        match band {
            SpectralBand::SubBass => Self::new(150.0, 50.0, 0.4, 3.0),
            SpectralBand::Bass => Self::new(120.0, 60.0, 0.45, 2.5),
            SpectralBand::LowMid => Self::new(100.0, 80.0, 0.5, 2.0),
            SpectralBand::Mid => Self::new(80.0, 100.0, 0.5, 2.0),
            SpectralBand::HighMid => Self::new(60.0, 120.0, 0.45, 2.5),
            SpectralBand::Treble => Self::new(40.0, 150.0, 0.4, 3.0),
            SpectralBand::UltraAir => Self::new(30.0, 180.0, 0.3, 4.0),
        }
    }
}

const BAND_HISTORY: usize = 20;
const MIN_GAIN: f32 = 0.1;
const SILENCE: f32 = 0.001;

#[derive(Debug, Clone)]
struct BandState {
    params: BandAgcParams,
    history: VecDeque<f32>,
    gain: f32,
}

/// Per-band gain tracking.
#[derive(Debug, Clone)]
pub struct BandAgc {
    bands: Vec<BandState>,
    last_timestamp_ms: Option<u64>,
}

impl BandAgc {
    /// Create a band AGC with the default per-band parameters
    pub fn new() -> Self {
        let bands = SpectralBand::ALL
            .iter()
            .map(|&band| BandState {
                params: BandAgcParams::for_band(band),
                history: VecDeque::with_capacity(BAND_HISTORY),
                gain: 1.0,
            })
            .collect();
        Self {
            bands,
            last_timestamp_ms: None,
        }
    }

    /// Apply gain to a set of raw bands and return the adjusted copy
    pub fn process(&mut self, raw: &BandEnergies, timestamp_ms: u64) -> BandEnergies {
        let dt_ms = match self.last_timestamp_ms {
            Some(last) => timestamp_ms.saturating_sub(last) as f32,
            // First frame: assume one nominal frame period
            None => 23.0,
        };
        self.last_timestamp_ms = Some(timestamp_ms);

        let mut out = BandEnergies::default();
        for (i, state) in self.bands.iter_mut().enumerate() {
            let value = raw.values[i];
            state.history.push_back(value);
            while state.history.len() > BAND_HISTORY {
                state.history.pop_front();
            }
            let avg = state.history.iter().sum::<f32>() / state.history.len() as f32;

            let target_gain = if avg > SILENCE {
                (state.params.target_rms / avg).clamp(MIN_GAIN, state.params.max_gain)
            } else {
                state.gain
            };

            let time_constant = if target_gain < state.gain {
                state.params.attack_ms
            } else {
                state.params.release_ms
            };
            let alpha = if time_constant > 0.0 {
                (dt_ms / time_constant).min(1.0)
            } else {
                1.0
            };
            state.gain += (target_gain - state.gain) * alpha;

            out.values[i] = (value * state.gain).clamp(0.0, 1.0);
        }
        out
    }

    /// Current gain for a band
    pub fn gain(&self, band: SpectralBand) -> f32 {
        self.bands[band.index()].gain
    }

    /// Return every band to unity gain
    pub fn reset(&mut self) {
        for state in &mut self.bands {
            state.history.clear();
            state.gain = 1.0;
        }
        self.last_timestamp_ms = None;
    }
}

impl Default for BandAgc {
    fn default() -> Self {
        Self::new()
    }
}
