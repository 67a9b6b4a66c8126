//! Energy-onset beat detection with interval-based tempo tracking.

use super::RhythmConfig;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, trace};

const DEFAULT_BPM: f32 = 120.0;

/// An accepted onset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    /// Time of the onset
    pub timestamp_ms: u64,
    /// How far the onset rose above the running mean, in [0, 1]
    pub strength: f32,
    /// Energy variance relative to the mean, in [0, 1]
    pub confidence: f32,
    /// Tempo estimate after this beat
    pub bpm: f32,
}

/// Detects onsets against an adaptive threshold and tracks tempo.
///
/// The threshold is `mean + k * sigma` over the energy history. An onset
/// also has to clear `ratio * mean` and respect the minimum inter-beat
/// interval, so the detector can never emit beats faster than
/// `60000 / min_interval_ms` per minute.
#[derive(Debug, Clone)]
pub struct BeatDetector {
    config: RhythmConfig,
    energy_history: VecDeque<f32>,
    intervals: VecDeque<u64>,
    last_beat_ms: Option<u64>,
    bpm: f32,
    beat_count: u64,
}

impl BeatDetector {
    /// Create a detector
    pub fn new(config: RhythmConfig) -> Self {
        Self {
            energy_history: VecDeque::with_capacity(config.history_frames),
            intervals: VecDeque::with_capacity(config.interval_window),
            last_beat_ms: None,
            bpm: DEFAULT_BPM.clamp(config.min_bpm, config.max_bpm),
            beat_count: 0,
            config,
        }
    }

    /// Feed one frame of samples; returns the beat if one was accepted.
    pub fn detect(&mut self, samples: &[f32], timestamp_ms: u64) -> Option<BeatEvent> {
        let energy = crate::audio::mean_square(samples);
        let event = self.check_onset(energy, timestamp_ms);

        self.energy_history.push_back(energy);
        while self.energy_history.len() > self.config.history_frames.max(1) {
            self.energy_history.pop_front();
        }
        event
    }

    fn check_onset(&mut self, energy: f32, timestamp_ms: u64) -> Option<BeatEvent> {
        if self.energy_history.len() < self.config.min_history_frames {
            return None;
        }

        let n = self.energy_history.len() as f32;
        let mean = self.energy_history.iter().sum::<f32>() / n;
        let variance = self
            .energy_history
            .iter()
            .map(|e| (e - mean).powi(2))
            .sum::<f32>()
            / n;
        let threshold = mean + self.config.threshold_sigma * variance.sqrt();

        if energy <= threshold || energy <= self.config.mean_ratio * mean {
            return None;
        }
        if let Some(last) = self.last_beat_ms {
            if timestamp_ms.saturating_sub(last) < self.config.min_interval_ms {
                trace!(
                    "Onset at {} ms suppressed, {} ms since last beat",
                    timestamp_ms,
                    timestamp_ms.saturating_sub(last)
                );
                return None;
            }
        }

        let safe_mean = mean.max(1e-9);
        let strength = ((energy - mean) / (2.0 * safe_mean)).clamp(0.0, 1.0);
        let confidence = (variance / (0.5 * safe_mean)).clamp(0.0, 1.0);

        if let Some(last) = self.last_beat_ms {
            self.push_interval(timestamp_ms.saturating_sub(last));
        }
        self.last_beat_ms = Some(timestamp_ms);
        self.beat_count += 1;

        Some(BeatEvent {
            timestamp_ms,
            strength,
            confidence,
            bpm: self.bpm,
        })
    }

    fn push_interval(&mut self, interval_ms: u64) {
        if interval_ms == 0 || interval_ms > self.config.max_interval_ms {
            // A long gap is a resync, not a tempo
            return;
        }
        self.intervals.push_back(interval_ms);
        while self.intervals.len() > self.config.interval_window.max(1) {
            self.intervals.pop_front();
        }

        let values: Vec<f32> = self.intervals.iter().map(|&i| i as f32).collect();
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32)
            .sqrt();
        let consistency = 1.0 - std / mean;

        if consistency >= self.config.beat_threshold {
            let candidate = 60_000.0 / median(&values);
            let bpm = candidate.clamp(self.config.min_bpm, self.config.max_bpm);
            if (bpm - self.bpm).abs() > 1.0 {
                debug!(
                    "Tempo {:.1} -> {:.1} BPM (consistency {:.2})",
                    self.bpm, bpm, consistency
                );
            }
            self.bpm = bpm;
        }
    }

    /// Current tempo estimate, always inside the configured BPM range
    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    /// Beat period in milliseconds
    pub fn beat_duration_ms(&self) -> f32 {
        60_000.0 / self.bpm
    }

    /// Position within the current beat in [0, 1)
    pub fn phase_at(&self, now_ms: u64) -> f32 {
        let Some(last) = self.last_beat_ms else {
            return 0.0;
        };
        let dur = self.beat_duration_ms();
        let since = now_ms.saturating_sub(last) as f32;
        (since % dur) / dur
    }

    /// Position within a 4/4 bar in [0, 1). The first accepted beat is the
    /// downbeat; beats that should have landed since the last one still count.
    pub fn bar_phase_at(&self, now_ms: u64) -> f32 {
        let Some(last) = self.last_beat_ms else {
            return 0.0;
        };
        let dur = self.beat_duration_ms();
        let since = now_ms.saturating_sub(last) as f32;
        let beats = self.beat_count.saturating_sub(1) + (since / dur) as u64;
        (((beats % 4) as f32 + (since % dur) / dur) / 4.0).fract()
    }

    /// Tempo confidence: interval regularity scaled by how recent the last beat is.
    pub fn confidence_at(&self, now_ms: u64) -> f32 {
        if self.intervals.len() < 3 {
            return 0.0;
        }
        let Some(last) = self.last_beat_ms else {
            return 0.0;
        };

        let values: Vec<f32> = self.intervals.iter().map(|&i| i as f32).collect();
        let med = median(&values);
        if med <= 0.0 {
            return 0.0;
        }
        let deviations: Vec<f32> = values.iter().map(|v| (v - med).abs()).collect();
        let mad = median(&deviations);
        let regularity = (1.0 - mad / med).clamp(0.0, 1.0);

        let periods = now_ms.saturating_sub(last) as f32 / self.beat_duration_ms();
        let freshness = if periods <= 2.0 {
            1.0
        } else {
            (1.0 - (periods - 2.0) / 2.0).clamp(0.0, 1.0)
        };

        regularity * freshness
    }

    /// Time of the last accepted beat
    pub fn last_beat_ms(&self) -> Option<u64> {
        self.last_beat_ms
    }

    /// Beats accepted since creation or reset
    pub fn beat_count(&self) -> u64 {
        self.beat_count
    }

    /// Inter-beat intervals currently in the tempo window
    pub fn intervals(&self) -> impl Iterator<Item = u64> + '_ {
        self.intervals.iter().copied()
    }

    /// Clear energy history, intervals and tempo
    pub fn reset(&mut self) {
        self.energy_history.clear();
        self.intervals.clear();
        self.last_beat_ms = None;
        self.bpm = DEFAULT_BPM.clamp(self.config.min_bpm, self.config.max_bpm);
        self.beat_count = 0;
    }
}

fn median(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
