//! Rolling-peak energy normalization.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Configuration for [`AdaptiveEnergyNormalizer`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Number of samples in the rolling window (about 15 s at the analysis rate)
    pub window_size: usize,
    /// The peak never falls below this value
    pub min_peak: f32,
    /// Peak floor used while the window is still filling
    pub initial_peak: f32,
    /// Perceptual curve exponent
    pub exponent: f32,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            window_size: 645,
            min_peak: 0.05,
            initial_peak: 0.3,
            exponent: 0.85,
        }
    }
}

/// Divides raw energy by the maximum seen in a trailing window.
///
/// Output is `clamp((raw / peak)^exponent, 0, 1)`; the exponent below one
/// spreads low levels over more of the output range.
#[derive(Debug, Clone)]
pub struct AdaptiveEnergyNormalizer {
    config: NormalizerConfig,
    window: VecDeque<f32>,
    peak: f32,
}

impl AdaptiveEnergyNormalizer {
    /// Create a normalizer with an empty window
    pub fn new(config: NormalizerConfig) -> Self {
        let capacity = config.window_size.max(1);
        Self {
            peak: config.initial_peak.max(config.min_peak),
            window: VecDeque::with_capacity(capacity),
            config,
        }
    }

    /// Push a raw energy sample and return its normalized value.
    ///
    /// Non-finite or negative input is treated as silence.
    pub fn normalize(&mut self, raw: f32) -> f32 {
        let raw = if raw.is_finite() { raw.max(0.0) } else { 0.0 };

        self.window.push_back(raw);
        while self.window.len() > self.config.window_size.max(1) {
            self.window.pop_front();
        }

        let window_max = self.window.iter().copied().fold(0.0f32, f32::max);
        let mut peak = window_max.max(self.config.min_peak);
        if !self.is_warm() {
            peak = peak.max(self.config.initial_peak);
        }
        self.peak = peak;

        if peak <= 0.0 {
            return 0.0;
        }
        (raw / peak).powf(self.config.exponent).clamp(0.0, 1.0)
    }

    /// Current rolling peak
    pub fn peak(&self) -> f32 {
        self.peak
    }

    /// True once the rolling window has filled
    pub fn is_warm(&self) -> bool {
        self.window.len() >= self.config.window_size.max(1)
    }

    /// Number of samples currently held
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// True when no samples are held
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Forget all history, e.g. on a source change
    pub fn reset(&mut self) {
        self.window.clear();
        self.peak = self.config.initial_peak.max(self.config.min_peak);
    }
}

impl Default for AdaptiveEnergyNormalizer {
    fn default() -> Self {
        Self::new(NormalizerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_window() -> AdaptiveEnergyNormalizer {
        AdaptiveEnergyNormalizer::new(NormalizerConfig {
            window_size: 4,
            ..NormalizerConfig::default()
        })
    }

    #[test]
    fn test_initial_peak_protects_startup() {
        let mut n = AdaptiveEnergyNormalizer::default();
        // A quiet first sample must not be blown up to full scale
        let out = n.normalize(0.06);
        assert!(out < 0.5, "startup output too hot: {}", out);
        assert!((n.peak() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_peak_equals_raw_gives_one() {
        let mut n = small_window();
        for _ in 0..4 {
            n.normalize(0.5);
        }
        assert!(n.is_warm());
        assert_eq!(n.normalize(0.5), 1.0);
    }

    #[test]
    fn test_window_forgets_old_peak() {
        let mut n = small_window();
        n.normalize(0.9);
        for _ in 0..4 {
            n.normalize(0.4);
        }
        assert!((n.peak() - 0.4).abs() < 1e-6, "peak {}", n.peak());
    }

    #[test]
    fn test_min_peak_floor() {
        let mut n = small_window();
        for _ in 0..8 {
            n.normalize(0.001);
        }
        assert!((n.peak() - 0.05).abs() < 1e-6);
        assert!(n.normalize(0.001) < 0.1);
    }

    #[test]
    fn test_reset_clears_window() {
        let mut n = small_window();
        for _ in 0..4 {
            n.normalize(0.8);
        }
        n.reset();
        assert!(n.is_empty());
        assert!(!n.is_warm());
    }

    #[test]
    fn test_bad_input_is_silence() {
        let mut n = small_window();
        assert_eq!(n.normalize(f32::NAN), 0.0);
        assert_eq!(n.normalize(-1.0), 0.0);
    }
}
