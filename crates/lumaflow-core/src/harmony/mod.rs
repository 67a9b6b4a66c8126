//! Harmony detection
//!
//! Runs at a throttled cadence. Each update folds the spectrum into a
//! chromagram, smooths it over the last few updates, then matches scales,
//! estimates the current chord and scores interval dissonance.

pub mod chroma;
pub mod scales;

pub use chroma::{pitch_class, Chroma};
pub use scales::{
    identify_scale, note_name, Mood, ScaleKind, ScaleMatch, Temperature, NOTE_NAMES,
};

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};

/// Interval classes counted as dissonant (minor second, major second, tritone)
const DISSONANT_INTERVALS: [usize; 3] = [1, 2, 6];
const TRITONE: usize = 6;
/// Chroma value above which a note takes part in chord and dissonance estimates
const CHORD_NOTE_THRESHOLD: f32 = 0.2;

/// Harmony detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarmonyConfig {
    /// Minimum time between updates, enforced by the caller
    pub throttle_ms: u64,
    /// Chromas averaged per update
    pub history: usize,
    /// Below this frame energy the update is treated as silence
    pub min_energy: f32,
    /// Below this smoothed chroma total there is no tonal content
    pub min_chroma_total: f32,
    /// Key changes are only reported above this confidence
    pub key_change_confidence: f32,
}

impl Default for HarmonyConfig {
    fn default() -> Self {
        Self {
            throttle_ms: 500,
            history: 5,
            min_energy: 0.05,
            min_chroma_total: 0.1,
            key_change_confidence: 0.6,
        }
    }
}

/// Chord quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChordQuality {
    /// Major third and perfect fifth
    Major,
    /// Minor third and perfect fifth
    Minor,
    /// Minor third and diminished fifth
    Diminished,
    /// Major third and augmented fifth
    Augmented,
    /// No third, second or fourth present
    Suspended,
}

/// Chord guess from the strongest notes
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChordEstimate {
    /// Root pitch class
    pub root: Option<usize>,
    /// Quality, when the intervals match a known shape
    pub quality: Option<ChordQuality>,
    /// Confidence in [0, 1]
    pub confidence: f32,
}

/// Interval dissonance summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Dissonance {
    /// Dissonance level in [0, 1]
    pub level: f32,
    /// A tritone pair is present
    pub has_tritone: bool,
    /// Level above 0.5 or a tritone
    pub suggest_tension: bool,
}

/// Reported when the detected key moves with enough confidence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyChange {
    /// Previous root pitch class
    pub from: usize,
    /// New root pitch class
    pub to: usize,
    /// Confidence of the new analysis
    pub confidence: f32,
}

/// One harmony update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarmonyAnalysis {
    /// Time of the update
    pub timestamp_ms: u64,
    /// Root pitch class of the detected key; `None` on silence
    pub key: Option<usize>,
    /// Detected scale or mode
    pub scale: Option<ScaleKind>,
    /// Scale match confidence
    pub scale_confidence: f32,
    /// Mood of the scale
    pub mood: Mood,
    /// Colour temperature of the mood
    pub temperature: Temperature,
    /// Current chord guess
    pub chord: ChordEstimate,
    /// Dissonance of the present intervals
    pub dissonance: Dissonance,
    /// Overall confidence in [0, 1]
    pub confidence: f32,
    /// Set when the key moved on this update
    pub key_change: Option<KeyChange>,
}

impl HarmonyAnalysis {
    /// Analysis carrying no tonal information
    pub fn empty(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            ..Self::default()
        }
    }

    /// Key name such as "A", if a key was detected
    pub fn key_name(&self) -> Option<&'static str> {
        self.key.map(note_name)
    }
}

/// Stateful harmony detector.
pub struct HarmonyDetector {
    config: HarmonyConfig,
    chroma_history: VecDeque<[f32; 12]>,
    last_key: Option<usize>,
    updates: u64,
}

impl HarmonyDetector {
    /// Create a detector
    pub fn new(config: HarmonyConfig) -> Self {
        Self {
            chroma_history: VecDeque::with_capacity(config.history.max(1)),
            config,
            last_key: None,
            updates: 0,
        }
    }

    /// Analyze a chroma vector
    pub fn update(&mut self, chroma: &Chroma, now_ms: u64) -> HarmonyAnalysis {
        if chroma.energy < self.config.min_energy {
            return HarmonyAnalysis::empty(now_ms);
        }

        self.chroma_history.push_back(chroma.normalized());
        while self.chroma_history.len() > self.config.history.max(1) {
            self.chroma_history.pop_front();
        }
        let smoothed = self.average_chroma();
        let total: f32 = smoothed.iter().sum();
        if total < self.config.min_chroma_total {
            return HarmonyAnalysis::empty(now_ms);
        }

        let scale = identify_scale(&smoothed);
        let mood = scale.scale.mood();
        let chord = estimate_chord(&smoothed);
        let dissonance = detect_dissonance(&smoothed);
        let confidence =
            scale.confidence * 0.4 + chord.confidence * 0.3 + (total / 6.0).min(1.0) * 0.3;

        let key_change = match self.last_key {
            Some(prev) if prev != scale.root && confidence > self.config.key_change_confidence => {
                info!(
                    "Key change {} -> {} (confidence {:.2})",
                    note_name(prev),
                    note_name(scale.root),
                    confidence
                );
                Some(KeyChange {
                    from: prev,
                    to: scale.root,
                    confidence,
                })
            }
            _ => None,
        };
        self.last_key = Some(scale.root);

        self.updates += 1;
        debug!(
            "Harmony #{}: {} {:?} conf={:.2} dissonance={:.2}",
            self.updates,
            note_name(scale.root),
            scale.scale,
            confidence,
            dissonance.level
        );

        HarmonyAnalysis {
            timestamp_ms: now_ms,
            key: Some(scale.root),
            scale: Some(scale.scale),
            scale_confidence: scale.confidence,
            mood,
            temperature: mood.temperature(),
            chord,
            dissonance,
            confidence: confidence.clamp(0.0, 1.0),
            key_change,
        }
    }

    fn average_chroma(&self) -> [f32; 12] {
        let mut avg = [0.0f32; 12];
        if self.chroma_history.is_empty() {
            return avg;
        }
        for chroma in &self.chroma_history {
            for (a, v) in avg.iter_mut().zip(chroma) {
                *a += v;
            }
        }
        let n = self.chroma_history.len() as f32;
        for a in avg.iter_mut() {
            *a /= n;
        }
        avg
    }

    /// Forget chroma history and the last key
    pub fn reset(&mut self) {
        self.chroma_history.clear();
        self.last_key = None;
        self.updates = 0;
    }
}

/// Guess a chord from the (up to) four strongest notes.
pub fn estimate_chord(chroma: &[f32; 12]) -> ChordEstimate {
    let mut notes: Vec<(usize, f32)> = chroma
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, e)| e > CHORD_NOTE_THRESHOLD)
        .collect();
    notes.sort_by(|a, b| b.1.total_cmp(&a.1));
    notes.truncate(4);

    if notes.len() < 2 {
        return ChordEstimate::default();
    }

    let root = notes[0].0;
    let intervals: Vec<usize> = notes[1..].iter().map(|&(pc, _)| (pc + 12 - root) % 12).collect();
    let has = |i: usize| intervals.contains(&i);

    let quality = if has(4) && has(7) {
        Some(ChordQuality::Major)
    } else if has(3) && has(7) {
        Some(ChordQuality::Minor)
    } else if has(3) && has(6) {
        Some(ChordQuality::Diminished)
    } else if has(4) && has(8) {
        Some(ChordQuality::Augmented)
    } else if !has(3) && !has(4) && (has(5) || has(2)) {
        Some(ChordQuality::Suspended)
    } else {
        None
    };

    let confidence = if notes.len() < 3 {
        0.3
    } else {
        let top: f32 = notes.iter().take(3).map(|&(_, e)| e).sum();
        (top / 3.0 * 1.5).min(1.0)
    };

    ChordEstimate {
        root: Some(root),
        quality,
        confidence,
    }
}

/// Score dissonant interval pairs among the present notes.
pub fn detect_dissonance(chroma: &[f32; 12]) -> Dissonance {
    let present: Vec<(usize, f32)> = chroma
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, e)| e > CHORD_NOTE_THRESHOLD)
        .collect();

    let mut score = 0.0f32;
    let mut has_tritone = false;
    for (i, &(a, ea)) in present.iter().enumerate() {
        for &(b, eb) in &present[i + 1..] {
            let mut interval = b.abs_diff(a);
            if interval > 6 {
                interval = 12 - interval;
            }
            if DISSONANT_INTERVALS.contains(&interval) {
                let weight = (ea + eb) / 2.0;
                score += weight;
                if interval == TRITONE {
                    has_tritone = true;
                    score += weight * 0.5;
                }
            }
        }
    }

    let level = (score / 2.0).min(1.0);
    Dissonance {
        level,
        has_tritone,
        suggest_tension: level > 0.5 || has_tritone,
    }
}
