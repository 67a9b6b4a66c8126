//! Rhythm analysis
//!
//! Beat onsets and tempo come from the time-domain energy of each frame
//! ([`BeatDetector`]). Drum hits, groove and pattern classification work on
//! the spectral bands of the same frame.

pub mod beat;
pub mod drums;
pub mod groove;

pub use beat::{BeatDetector, BeatEvent};
pub use drums::{DrumDetector, DrumHits};
pub use groove::{Complexity, DrumPattern, FillDetector, GrooveDescriptor, GrooveTracker};

use crate::audio::{AudioFrame, SpectralBands};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Rhythm analyzer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RhythmConfig {
    /// Energy history length in frames
    pub history_frames: usize,
    /// Frames of history needed before any onset is accepted
    pub min_history_frames: usize,
    /// Onset threshold in standard deviations above the mean
    pub threshold_sigma: f32,
    /// Onset must also exceed this multiple of the mean
    pub mean_ratio: f32,
    /// Minimum time between accepted beats
    pub min_interval_ms: u64,
    /// Intervals longer than this are treated as a resync
    pub max_interval_ms: u64,
    /// Inter-beat intervals kept for the tempo estimate
    pub interval_window: usize,
    /// Lower tempo bound
    pub min_bpm: f32,
    /// Upper tempo bound
    pub max_bpm: f32,
    /// Interval consistency (1 - std/mean) required to update the tempo
    pub beat_threshold: f32,
    /// Frames in the syncopation buffer
    pub syncopation_frames: usize,
}

impl Default for RhythmConfig {
    fn default() -> Self {
        Self {
            history_frames: 43,
            min_history_frames: 8,
            threshold_sigma: 1.5,
            mean_ratio: 1.3,
            min_interval_ms: 250,
            max_interval_ms: 2000,
            interval_window: 8,
            min_bpm: 60.0,
            max_bpm: 200.0,
            beat_threshold: 0.3,
            syncopation_frames: 64,
        }
    }
}

/// Per-frame rhythm snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RhythmAnalysis {
    /// Frame time
    pub timestamp_ms: u64,
    /// Smoothed tempo in [min_bpm, max_bpm]
    pub bpm: f32,
    /// Tempo confidence in [0, 1]
    pub confidence: f32,
    /// Position within the current beat in [0, 1)
    pub beat_phase: f32,
    /// Position within a 4/4 bar in [0, 1)
    pub bar_phase: f32,
    /// Beat accepted on this frame
    pub beat: Option<BeatEvent>,
    /// Off-beat energy over total energy
    pub syncopation: f32,
    /// Drum hits on this frame
    pub drums: DrumHits,
    /// Groove descriptor
    pub groove: GrooveDescriptor,
    /// Pattern family
    pub pattern: DrumPattern,
    /// Confidence of the pattern family
    pub pattern_confidence: f32,
    /// A drum fill is in progress
    pub fill_in_progress: bool,
    /// Beats seen since the last reset
    pub beat_count: u64,
}

impl Default for RhythmAnalysis {
    fn default() -> Self {
        Self {
            timestamp_ms: 0,
            bpm: 120.0,
            confidence: 0.0,
            beat_phase: 0.0,
            bar_phase: 0.0,
            beat: None,
            syncopation: 0.0,
            drums: DrumHits::default(),
            groove: GrooveDescriptor::default(),
            pattern: DrumPattern::Unknown,
            pattern_confidence: 0.0,
            fill_in_progress: false,
            beat_count: 0,
        }
    }
}

impl RhythmAnalysis {
    /// True when a beat landed on this frame
    pub fn on_beat(&self) -> bool {
        self.beat.is_some()
    }
}

/// Combines beat, drum, groove and fill tracking.
pub struct RhythmAnalyzer {
    beats: BeatDetector,
    drums: DrumDetector,
    groove: GrooveTracker,
    fills: FillDetector,
    frame_count: u64,
}

impl RhythmAnalyzer {
    /// Create an analyzer
    pub fn new(config: RhythmConfig) -> Self {
        Self {
            groove: GrooveTracker::new(config.syncopation_frames),
            beats: BeatDetector::new(config),
            drums: DrumDetector::new(),
            fills: FillDetector::default(),
            frame_count: 0,
        }
    }

    /// Analyze one frame together with its spectral bands
    pub fn analyze(&mut self, frame: &AudioFrame, bands: &SpectralBands) -> RhythmAnalysis {
        let now = frame.timestamp_ms;
        self.frame_count += 1;

        let beat = self.beats.detect(&frame.samples, now);
        let phase = self.beats.phase_at(now);

        let levels = &bands.agc;
        let drums = self
            .drums
            .detect(levels.bass(), levels.mid(), levels.treble(), bands.clarity);
        self.groove
            .push(phase, levels.bass(), levels.mid(), bands.energy, &drums);

        let groove = self.groove.groove();
        let bpm = self.beats.bpm();
        let (pattern, pattern_confidence) =
            self.groove
                .classify(&groove, bands.energy, levels.bass(), bpm);
        let fill_in_progress =
            self.fills
                .update(bands.energy, levels.bass(), levels.mid(), &drums, now);

        let analysis = RhythmAnalysis {
            timestamp_ms: now,
            bpm,
            confidence: self.beats.confidence_at(now),
            beat_phase: phase,
            bar_phase: self.beats.bar_phase_at(now),
            beat,
            syncopation: self.groove.syncopation_ratio(),
            drums,
            groove,
            pattern,
            pattern_confidence,
            fill_in_progress,
            beat_count: self.beats.beat_count(),
        };

        if self.frame_count % 100 == 0 {
            trace!(
                "Rhythm: bpm={:.1} conf={:.2} sync={:.2} pattern={:?}",
                analysis.bpm,
                analysis.confidence,
                analysis.syncopation,
                analysis.pattern
            );
        }
        analysis
    }

    /// Direct access to the beat detector
    pub fn beat_detector(&self) -> &BeatDetector {
        &self.beats
    }

    /// Clear every rolling window
    pub fn reset(&mut self) {
        self.beats.reset();
        self.drums.reset();
        self.groove.reset();
        self.fills.reset();
        self.frame_count = 0;
    }
}
