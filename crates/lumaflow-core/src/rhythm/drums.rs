//! Slope-based drum hit detection
//!
//! A real hit rises within one or two frames, a volume ramp rises over many.
//! Each instrument compares its band value against the average of the
//! previous frames; only a steep rise on a loud enough band counts.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const SLOPE_HISTORY: usize = 4;
const HIT_COOLDOWN_FRAMES: u64 = 3;
const CONFIRMATION_FRAMES: u32 = 2;
/// Threshold moves by up to +/-30 % with clarity
const CLARITY_ADAPTATION: f32 = 0.3;

/// Hits detected on one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DrumHits {
    /// Kick drum (bass band)
    pub kick: bool,
    /// Snare (mid band)
    pub snare: bool,
    /// Hi-hat (treble band)
    pub hihat: bool,
    /// Crash: very loud treble on top of bass
    pub crash: bool,
}

impl DrumHits {
    /// Number of kick/snare/hihat hits on this frame
    pub fn count(&self) -> usize {
        [self.kick, self.snare, self.hihat]
            .iter()
            .filter(|&&hit| hit)
            .count()
    }
}

#[derive(Debug, Clone, Default)]
struct SlopeState {
    history: VecDeque<f32>,
    confirmations: u32,
    last_hit_frame: Option<u64>,
}

impl SlopeState {
    fn update(&mut self, value: f32) -> f32 {
        self.history.push_back(value);
        while self.history.len() > SLOPE_HISTORY {
            self.history.pop_front();
        }
        if self.history.len() < 2 {
            return 0.0;
        }
        let previous = self.history.len() - 1;
        let avg = self.history.iter().take(previous).sum::<f32>() / previous as f32;
        ((value - avg) * 2.0).max(0.0)
    }

    fn confirm(&mut self, frame: u64, slope: f32, threshold: f32, level_ok: bool) -> bool {
        if let Some(last) = self.last_hit_frame {
            if frame.saturating_sub(last) < HIT_COOLDOWN_FRAMES {
                return false;
            }
        }
        if slope > threshold && level_ok {
            self.confirmations += 1;
            if self.confirmations >= CONFIRMATION_FRAMES {
                self.last_hit_frame = Some(frame);
                self.confirmations = 0;
                return true;
            }
        } else {
            self.confirmations = 0;
        }
        false
    }
}

/// Per-instrument slope detectors
#[derive(Debug, Clone, Default)]
pub struct DrumDetector {
    kick: SlopeState,
    snare: SlopeState,
    hihat: SlopeState,
    frame: u64,
}

impl DrumDetector {
    /// Create a detector
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one frame of band levels.
    ///
    /// `clarity` in [0, 1] scales the slope thresholds: clean signals get a
    /// lower threshold, noisy signals a higher one.
    pub fn detect(&mut self, bass: f32, mid: f32, treble: f32, clarity: f32) -> DrumHits {
        self.frame += 1;
        let factor = 1.0 - (clarity.clamp(0.0, 1.0) - 0.5) * CLARITY_ADAPTATION * 2.0;

        let kick_slope = self.kick.update(bass);
        let snare_slope = self.snare.update(mid);
        let hihat_slope = self.hihat.update(treble);

        let hihat_threshold = 0.25 * factor;
        DrumHits {
            kick: self
                .kick
                .confirm(self.frame, kick_slope, 0.45 * factor, bass > 0.35),
            snare: self
                .snare
                .confirm(self.frame, snare_slope, 0.35 * factor, mid > 0.3),
            hihat: self
                .hihat
                .confirm(self.frame, hihat_slope, hihat_threshold, treble > 0.25),
            crash: treble > 0.75 && bass > 0.55 && hihat_slope > hihat_threshold * 1.5,
        }
    }

    /// Forget all slope history
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steep_rise_confirms_after_two_frames() {
        let mut drums = DrumDetector::new();
        for _ in 0..4 {
            assert!(!drums.detect(0.05, 0.0, 0.0, 0.5).kick);
        }
        // slope = (0.9 - 0.05) * 2 = 1.7
        assert!(!drums.detect(0.9, 0.0, 0.0, 0.5).kick, "needs confirmation");
        // slope = (0.95 - avg(0.05, 0.05, 0.9)) * 2 = 1.27
        assert!(drums.detect(0.95, 0.0, 0.0, 0.5).kick);
    }

    #[test]
    fn test_slow_ramp_is_not_a_hit() {
        let mut drums = DrumDetector::new();
        let mut hits = 0;
        for i in 0..100 {
            let level = i as f32 / 100.0;
            if drums.detect(level, 0.0, 0.0, 0.5).kick {
                hits += 1;
            }
        }
        assert_eq!(hits, 0);
    }

    #[test]
    fn test_quiet_band_is_gated() {
        let mut drums = DrumDetector::new();
        drums.detect(0.0, 0.0, 0.0, 0.5);
        drums.detect(0.0, 0.0, 0.0, 0.5);
        // Steep but below the 0.3 mid level gate
        assert!(!drums.detect(0.0, 0.29, 0.0, 1.0).snare);
        assert!(!drums.detect(0.0, 0.29, 0.0, 1.0).snare);
    }

    #[test]
    fn test_cooldown_blocks_retrigger() {
        let mut drums = DrumDetector::new();
        drums.detect(0.0, 0.0, 0.0, 0.5);
        drums.detect(0.0, 0.0, 0.0, 0.5);
        drums.detect(0.0, 0.0, 0.9, 0.5);
        assert!(drums.detect(0.0, 0.0, 0.95, 0.5).hihat);
        // Next frame is inside the 3-frame cooldown
        assert!(!drums.detect(0.0, 0.0, 1.0, 0.5).hihat);
    }

    #[test]
    fn test_hit_count() {
        let hits = DrumHits {
            kick: true,
            snare: true,
            hihat: false,
            crash: true,
        };
        assert_eq!(hits.count(), 2);
    }
}
