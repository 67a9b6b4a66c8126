//! Audio input and spectral analysis
//!
//! Frames arrive from an external capture or simulation source at a steady
//! cadence. The [`SpectralFrontend`] turns each frame into [`SpectralBands`]
//! which every downstream analyzer consumes.

pub mod agc;
pub mod normalizer;
pub mod spectral;
pub mod synthetic;

pub use agc::{BandAgc, BandAgcParams, SignalAgc, SignalAgcConfig};
pub use normalizer::{AdaptiveEnergyNormalizer, NormalizerConfig};
pub use spectral::{
    BandEnergies, SpectralBand, SpectralBands, SpectralConfig, SpectralFrontend, SpectralMetrics,
    BAND_EDGES_HZ,
};
pub use synthetic::{SyntheticConfig, SyntheticSource};

use std::sync::Arc;

/// One fixed-length block of mono samples.
///
/// Frames are immutable once emitted; the sample buffer is shared so a frame
/// can be handed to several stages without copying.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono samples, nominally in [-1, 1]
    pub samples: Arc<[f32]>,
    /// Capture time in milliseconds
    pub timestamp_ms: u64,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Create a frame from owned samples
    pub fn new(samples: Vec<f32>, timestamp_ms: u64, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            timestamp_ms,
            sample_rate,
        }
    }

    /// Number of samples in the frame
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when the frame carries no samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Frame duration in milliseconds
    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 * 1000.0 / self.sample_rate as f64
    }
}

/// Mean square of a sample block with non-finite samples counted as silence.
pub(crate) fn mean_square(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples
        .iter()
        .map(|&s| if s.is_finite() { s * s } else { 0.0 })
        .sum();
    sum / samples.len() as f32
}
