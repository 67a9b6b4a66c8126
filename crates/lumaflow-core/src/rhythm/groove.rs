//! Groove, syncopation, pattern and fill tracking.

use super::drums::DrumHits;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Frames used for the groove descriptor
const GROOVE_FRAMES: usize = 16;
/// Hit phases remembered per instrument
const PHASE_HISTORY: usize = 32;
const SYNC_SMOOTHING_ALPHA: f32 = 0.08;

/// Coarse rhythmic complexity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    /// Few hits on predictable phases
    #[default]
    Low,
    /// Moderate spread or density
    Medium,
    /// Scattered phases or dense hits
    High,
}

/// Drum pattern family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrumPattern {
    /// Kick on every beat, straight feel
    FourOnFloor,
    /// Snare on the half bar with heavy bass
    HalfTime,
    /// Fast, syncopated and busy
    Breakbeat,
    /// Snare on 2 and 4
    RockStandard,
    /// Syncopated with medium complexity
    Latin,
    /// Quiet, sparse kicks
    Minimal,
    /// Nothing matched
    #[default]
    Unknown,
}

/// Groove summary for the recent frames
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GrooveDescriptor {
    /// Smoothed syncopation from peak dominance and off-beat ratio
    pub syncopation: f32,
    /// Late versus early off-beat energy, 0 = straight
    pub swing: f32,
    /// Phase spread and hit density class
    pub complexity: Complexity,
    /// Average kick deviation from the grid, at most 0.15
    pub humanization: f32,
}

impl Default for GrooveDescriptor {
    fn default() -> Self {
        Self {
            syncopation: 0.0,
            swing: 0.0,
            complexity: Complexity::Low,
            humanization: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PhaseFrame {
    phase: f32,
    /// bass + 0.5 * mid
    weighted: f32,
    total: f32,
}

/// Rolling phase/energy buffer with hit phase histories.
#[derive(Debug, Clone)]
pub struct GrooveTracker {
    frames: VecDeque<PhaseFrame>,
    capacity: usize,
    kick_phases: VecDeque<f32>,
    snare_phases: VecDeque<f32>,
    hihat_phases: VecDeque<f32>,
    smoothed_syncopation: f32,
}

fn is_on_beat(phase: f32) -> bool {
    !(0.15..=0.85).contains(&phase)
}

fn push_phase(history: &mut VecDeque<f32>, phase: f32) {
    history.push_back(phase);
    while history.len() > PHASE_HISTORY {
        history.pop_front();
    }
}

/// Share of the last eight phases that fall in any of `ranges`
fn phase_share(history: &VecDeque<f32>, ranges: &[(f32, f32)]) -> f32 {
    let recent: Vec<f32> = history.iter().rev().take(8).copied().collect();
    if recent.is_empty() {
        return 0.0;
    }
    let hits = recent
        .iter()
        .filter(|&&p| ranges.iter().any(|&(lo, hi)| p > lo && p < hi))
        .count();
    hits as f32 / recent.len() as f32
}

impl GrooveTracker {
    /// Create a tracker keeping `capacity` frames for the syncopation ratio
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            kick_phases: VecDeque::with_capacity(PHASE_HISTORY),
            snare_phases: VecDeque::with_capacity(PHASE_HISTORY),
            hihat_phases: VecDeque::with_capacity(PHASE_HISTORY),
            smoothed_syncopation: 0.0,
        }
    }

    /// Record one frame and the hits that landed on it
    pub fn push(&mut self, phase: f32, bass: f32, mid: f32, total: f32, hits: &DrumHits) {
        self.frames.push_back(PhaseFrame {
            phase,
            weighted: bass + 0.5 * mid,
            total,
        });
        while self.frames.len() > self.capacity {
            self.frames.pop_front();
        }
        if hits.kick {
            push_phase(&mut self.kick_phases, phase);
        }
        if hits.snare {
            push_phase(&mut self.snare_phases, phase);
        }
        if hits.hihat {
            push_phase(&mut self.hihat_phases, phase);
        }
    }

    /// Off-beat energy over total energy across the whole buffer
    pub fn syncopation_ratio(&self) -> f32 {
        let (mut off, mut total) = (0.0f32, 0.0f32);
        for frame in &self.frames {
            total += frame.weighted;
            if !is_on_beat(frame.phase) {
                off += frame.weighted;
            }
        }
        if total > 0.0 {
            (off / total).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Update and return the groove descriptor from the most recent frames
    pub fn groove(&mut self) -> GrooveDescriptor {
        let skip = self.frames.len().saturating_sub(GROOVE_FRAMES);
        let recent: Vec<PhaseFrame> = self.frames.iter().skip(skip).copied().collect();
        if recent.len() < 4 {
            return GrooveDescriptor {
                syncopation: self.smoothed_syncopation,
                ..GrooveDescriptor::default()
            };
        }

        let (mut on, mut off, mut peak_on, mut peak_off) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
        for frame in &recent {
            if is_on_beat(frame.phase) {
                on += frame.weighted;
                peak_on = peak_on.max(frame.weighted);
            } else {
                off += frame.weighted;
                peak_off = peak_off.max(frame.weighted);
            }
        }
        let total = on + off;
        let off_ratio = if total > 0.0 { off / total } else { 0.0 };
        let peak_dominance = if peak_on > 0.01 {
            (peak_off / peak_on).min(1.0)
        } else if peak_off > 0.3 {
            1.0
        } else {
            0.0
        };
        let raw = (0.7 * peak_dominance + 0.3 * off_ratio).clamp(0.0, 1.0);
        self.smoothed_syncopation =
            SYNC_SMOOTHING_ALPHA * raw + (1.0 - SYNC_SMOOTHING_ALPHA) * self.smoothed_syncopation;

        let (mut early, mut late) = (0.0f32, 0.0f32);
        for frame in &recent {
            if frame.phase > 0.2 && frame.phase < 0.4 {
                early += frame.total;
            } else if frame.phase > 0.6 && frame.phase < 0.8 {
                late += frame.total;
            }
        }
        let swing = if early + late > 0.01 {
            ((late / (early + late) - 0.5) * 2.0).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let spread = self.phase_spread();
        let density = (self.kick_phases.len() + self.snare_phases.len() + self.hihat_phases.len())
            as f32
            / PHASE_HISTORY as f32;
        let complexity = if spread > 0.3 || density > 0.5 {
            Complexity::High
        } else if spread > 0.15 || density > 0.3 {
            Complexity::Medium
        } else {
            Complexity::Low
        };

        GrooveDescriptor {
            syncopation: self.smoothed_syncopation,
            swing,
            complexity,
            humanization: self.humanization(),
        }
    }

    fn phase_spread(&self) -> f32 {
        let phases: Vec<f32> = self
            .kick_phases
            .iter()
            .chain(self.snare_phases.iter())
            .copied()
            .collect();
        if phases.len() < 3 {
            return 0.0;
        }
        let mean = phases.iter().sum::<f32>() / phases.len() as f32;
        (phases.iter().map(|p| (p - mean).powi(2)).sum::<f32>() / phases.len() as f32).sqrt()
    }

    fn humanization(&self) -> f32 {
        if self.kick_phases.len() < 4 {
            return 0.05;
        }
        let deviation: f32 = self
            .kick_phases
            .iter()
            .map(|&p| p.min(1.0 - p).min((p - 0.5).abs()))
            .sum();
        (deviation / self.kick_phases.len() as f32 * 2.0).min(0.15)
    }

    /// Classify the current pattern; returns the family and its confidence
    pub fn classify(
        &self,
        groove: &GrooveDescriptor,
        energy: f32,
        bass: f32,
        bpm: f32,
    ) -> (DrumPattern, f32) {
        let sync = groove.syncopation;
        let regular_kicks = self.kick_phases.len() >= 4
            && phase_share(&self.kick_phases, &[(-1.0, 0.15), (0.85, 2.0)]) > 0.7;
        let half_time_snare =
            self.snare_phases.len() >= 4 && phase_share(&self.snare_phases, &[(0.45, 0.55)]) > 0.5;
        let rock_snare = self.snare_phases.len() >= 4
            && phase_share(&self.snare_phases, &[(0.2, 0.3), (0.7, 0.8)]) > 0.5;

        if sync < 0.15 && groove.swing < 0.1 && regular_kicks {
            (DrumPattern::FourOnFloor, ((1.0 - sync) * 0.5 + 0.4).min(0.9))
        } else if half_time_snare && bass > 0.65 && groove.complexity == Complexity::Low {
            (DrumPattern::HalfTime, 0.75)
        } else if sync > 0.5 && groove.complexity == Complexity::High && bpm > 150.0 {
            (DrumPattern::Breakbeat, 0.75)
        } else if (0.15..=0.35).contains(&sync) && rock_snare {
            (DrumPattern::RockStandard, 0.7)
        } else if sync > 0.35 && groove.complexity == Complexity::Medium {
            (DrumPattern::Latin, 0.6)
        } else if energy < 0.3 && self.kick_phases.len() < 4 {
            (DrumPattern::Minimal, 0.5)
        } else {
            (DrumPattern::Unknown, 0.3)
        }
    }

    /// Clear all buffers
    pub fn reset(&mut self) {
        self.frames.clear();
        self.kick_phases.clear();
        self.snare_phases.clear();
        self.hihat_phases.clear();
        self.smoothed_syncopation = 0.0;
    }
}

/// Detects drum fills: sustained loud frames with several simultaneous hits.
#[derive(Debug, Clone, Default)]
pub struct FillDetector {
    consecutive: u32,
    last_fill_ms: Option<u64>,
}

const FILL_ENERGY: f32 = 0.75;
const FILL_FRAMES: u32 = 4;
const MIN_FILL_INTERVAL_MS: u64 = 2000;

impl FillDetector {
    /// Returns true while a fill is in progress
    pub fn update(&mut self, energy: f32, bass: f32, mid: f32, hits: &DrumHits, now_ms: u64) -> bool {
        if let Some(last) = self.last_fill_ms {
            if now_ms.saturating_sub(last) < MIN_FILL_INTERVAL_MS && self.consecutive >= FILL_FRAMES {
                return true;
            }
        }

        let busy = energy > FILL_ENERGY && hits.count() >= 2;
        let extreme = energy > 0.85 && bass > 0.7 && mid > 0.7;
        if busy || extreme {
            self.consecutive += 1;
            if self.consecutive >= FILL_FRAMES {
                self.last_fill_ms = Some(now_ms);
                return true;
            }
        } else {
            self.consecutive = self.consecutive.saturating_sub(1);
        }
        false
    }

    /// Time the current or most recent fill was confirmed
    pub fn last_fill_ms(&self) -> Option<u64> {
        self.last_fill_ms
    }

    /// Forget fill state
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
