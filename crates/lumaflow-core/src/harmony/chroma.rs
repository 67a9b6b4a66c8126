//! Chromagram extraction from a magnitude spectrum.

use serde::{Deserialize, Serialize};

/// Lowest frequency folded into the chromagram (A0)
const MIN_HZ: f32 = 27.5;
/// Highest frequency folded into the chromagram (C8)
const MAX_HZ: f32 = 4186.0;

/// Twelve pitch-class energies plus the frame loudness they came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Chroma {
    /// Power per pitch class, C = 0
    pub bins: [f32; 12],
    /// Raw frame energy in [0, 1], used for the silence gate
    pub energy: f32,
}

impl Chroma {
    /// Fold a magnitude spectrum into pitch classes.
    ///
    /// `bin_hz` is the width of one FFT bin. Every bin between A0 and C8
    /// adds its power to the pitch class nearest its centre frequency.
    pub fn from_spectrum(magnitudes: &[f32], bin_hz: f32, energy: f32) -> Self {
        let mut bins = [0.0f32; 12];
        if bin_hz > 0.0 {
            for (i, &m) in magnitudes.iter().enumerate().skip(1) {
                let freq = i as f32 * bin_hz;
                if freq < MIN_HZ {
                    continue;
                }
                if freq > MAX_HZ {
                    break;
                }
                if !m.is_finite() {
                    continue;
                }
                bins[pitch_class(freq)] += m * m;
            }
        }
        Self {
            bins,
            energy: if energy.is_finite() { energy } else { 0.0 },
        }
    }

    /// Copy with the bins scaled so the strongest is 1
    pub fn normalized(&self) -> [f32; 12] {
        let max = self.bins.iter().copied().fold(0.0f32, f32::max);
        if max <= 0.0 {
            return [0.0; 12];
        }
        let mut out = self.bins;
        for v in out.iter_mut() {
            *v /= max;
        }
        out
    }
}

/// Pitch class (C = 0) of a frequency
pub fn pitch_class(freq_hz: f32) -> usize {
    let midi = 12.0 * (freq_hz / 440.0).log2() + 69.0;
    (midi.round() as i64).rem_euclid(12) as usize
}
