//! Section tracking (song structure)
//!
//! Energy is compared against local extrema taken over a 30 second sliding
//! window of one-second buckets, never against a session-wide baseline. Each
//! update casts weighted votes for section labels from several independent
//! signals; votes decay every update, and the current label only changes when
//! a challenger leads it by the hysteresis margin for several consecutive
//! updates.

use crate::audio::SpectralBands;
use crate::harmony::HarmonyAnalysis;
use crate::rhythm::RhythmAnalysis;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};

/// Structural section label
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    /// Not enough evidence yet
    #[default]
    Unknown,
    /// Quiet opening
    Intro,
    /// Steady mid-energy section
    Verse,
    /// Rising tension before a drop
    Buildup,
    /// Peak-energy release
    Drop,
    /// Stripped-back low-energy section
    Breakdown,
    /// Sustained high energy
    Chorus,
    /// Fading ending
    Outro,
}

impl SectionType {
    /// Number of labels
    pub const COUNT: usize = 8;

    /// Every label in index order
    pub const ALL: [SectionType; Self::COUNT] = [
        SectionType::Unknown,
        SectionType::Intro,
        SectionType::Verse,
        SectionType::Buildup,
        SectionType::Drop,
        SectionType::Breakdown,
        SectionType::Chorus,
        SectionType::Outro,
    ];

    /// Position in [`SectionType::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Typical duration range in seconds
    pub fn typical_duration_secs(self) -> (u64, u64) {
        match self {
            SectionType::Unknown => (4, 120),
            SectionType::Intro => (8, 32),
            SectionType::Verse => (16, 64),
            SectionType::Buildup => (8, 32),
            SectionType::Drop => (16, 64),
            SectionType::Breakdown => (8, 32),
            SectionType::Chorus => (16, 32),
            SectionType::Outro => (8, 32),
        }
    }

    /// Usual successors with their base probabilities
    pub fn transitions(self) -> &'static [(SectionType, f32)] {
        use SectionType::*;
        match self {
            Unknown => &[(Intro, 0.5), (Verse, 0.3), (Drop, 0.2)],
            Intro => &[(Verse, 0.5), (Buildup, 0.3), (Drop, 0.2)],
            Verse => &[(Chorus, 0.7), (Buildup, 0.2), (Breakdown, 0.1)],
            Chorus => &[(Verse, 0.35), (Breakdown, 0.3), (Buildup, 0.2), (Outro, 0.15)],
            Buildup => &[(Drop, 0.8), (Chorus, 0.15), (Breakdown, 0.05)],
            Drop => &[(Breakdown, 0.4), (Buildup, 0.3), (Verse, 0.15), (Outro, 0.15)],
            Breakdown => &[(Buildup, 0.5), (Verse, 0.25), (Drop, 0.15), (Outro, 0.1)],
            Outro => &[(Unknown, 1.0)],
        }
    }
}

/// Direction of the recent intensity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    /// Rising
    Rising,
    /// Falling
    Falling,
    /// Neither
    #[default]
    Stable,
}

/// Section tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionConfig {
    /// Sliding window length for local extrema
    pub window_secs: u64,
    /// Width of one energy bucket
    pub bucket_ms: u64,
    /// Frames before the window extrema replace the defaults
    pub warmup_frames: u32,
    /// Frames the open bucket needs before it counts toward the extrema
    pub min_bucket_frames: u32,
    /// Local max/min used during warm-up
    pub default_max: f32,
    /// Local max/min used during warm-up
    pub default_min: f32,
    /// Minimum max-min range for relative intensity
    pub relative_min_range: f32,
    /// Vote multiplier applied every update
    pub vote_decay: f32,
    /// Votes below this are dropped
    pub vote_floor: f32,
    /// Vote added to the current label every update
    pub incumbent_bonus: f32,
    /// Lead a challenger needs over the current label
    pub hysteresis_margin: f32,
    /// Consecutive updates the lead has to hold
    pub confirm_updates: u32,
    /// Minimum time in a section before it can change
    pub min_section_ms: u64,
    /// A drop never lasts longer than this
    pub drop_max_ms: u64,
    /// A drop ends when intensity falls below this
    pub drop_kill_intensity: f32,
    /// No drop votes for this long after a drop ends
    pub drop_cooldown_ms: u64,
    /// Intensity samples used for the trend
    pub trend_frames: usize,
    /// Half-window mean difference counted as a trend
    pub trend_threshold: f32,
    /// Spectral samples used for the buildup signature
    pub spectral_frames: usize,
    /// Intro votes are only cast this early in a session
    pub intro_window_ms: u64,
    /// Tempo confidence needed before syncopation takes part in the consensus
    pub min_rhythm_confidence: f32,
}

impl Default for SectionConfig {
    fn default() -> Self {
        Self {
            window_secs: 30,
            bucket_ms: 1000,
            warmup_frames: 10,
            min_bucket_frames: 10,
            default_max: 0.8,
            default_min: 0.2,
            relative_min_range: 0.1,
            vote_decay: 0.85,
            vote_floor: 0.1,
            incumbent_bonus: 0.3,
            hysteresis_margin: 1.0,
            confirm_updates: 6,
            min_section_ms: 8000,
            drop_max_ms: 30_000,
            drop_kill_intensity: 0.6,
            drop_cooldown_ms: 5000,
            trend_frames: 20,
            trend_threshold: 0.0625,
            spectral_frames: 20,
            intro_window_ms: 45_000,
            min_rhythm_confidence: 0.3,
        }
    }
}

/// A label change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionChange {
    /// Previous label
    pub from: SectionType,
    /// New label
    pub to: SectionType,
}

/// Forecast of the next section
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictedSection {
    /// Most likely successor
    pub section: SectionType,
    /// Normalized probability
    pub probability: f32,
    /// Expected time until the change
    pub estimated_in_ms: u64,
}

/// Section tracker output for one update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectionAnalysis {
    /// Time of the update
    pub timestamp_ms: u64,
    /// Current label
    pub current: SectionType,
    /// Confidence in [0, 1]
    pub confidence: f32,
    /// Intensity in [0, 1], relative to the local extrema when they are far enough apart
    pub intensity: f32,
    /// Largest bucket mean in the window
    pub local_max: f32,
    /// Smallest bucket mean in the window
    pub local_min: f32,
    /// Intensity was computed relative to the extrema
    pub relative: bool,
    /// Intensity trend
    pub trend: Trend,
    /// Spectral buildup signature score in [0, 1]
    pub buildup_score: f32,
    /// Current vote per label, indexed by [`SectionType::index`]
    pub votes: [f32; SectionType::COUNT],
    /// When the current section started
    pub started_at_ms: u64,
    /// Time spent in the current section
    pub duration_ms: u64,
    /// Set on the update that changed the label
    pub changed: Option<SectionChange>,
    /// Forecast of the next section
    pub predicted: Option<PredictedSection>,
}

impl SectionAnalysis {
    /// Vote held by a label
    pub fn vote(&self, section: SectionType) -> f32 {
        self.votes[section.index()]
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    index: u64,
    sum: f32,
    count: u32,
}

impl Bucket {
    fn mean(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f32
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SpectralSample {
    rolloff: f32,
    flatness: f32,
    sub_bass: f32,
}

/// Sliding-window section tracker with consensus voting.
pub struct SectionTracker {
    config: SectionConfig,
    buckets: VecDeque<Bucket>,
    frames_seen: u32,
    intensities: VecDeque<f32>,
    spectral: VecDeque<SpectralSample>,
    votes: [f32; SectionType::COUNT],
    current: SectionType,
    section_start_ms: u64,
    session_start_ms: Option<u64>,
    candidate: Option<SectionType>,
    candidate_updates: u32,
    drop_cooldown_until: Option<u64>,
}

impl SectionTracker {
    /// Create a tracker in the unknown state
    pub fn new(config: SectionConfig) -> Self {
        Self {
            config,
            buckets: VecDeque::new(),
            frames_seen: 0,
            intensities: VecDeque::new(),
            spectral: VecDeque::new(),
            votes: [0.0; SectionType::COUNT],
            current: SectionType::Unknown,
            section_start_ms: 0,
            session_start_ms: None,
            candidate: None,
            candidate_updates: 0,
            drop_cooldown_until: None,
        }
    }

    /// Current label
    pub fn current(&self) -> SectionType {
        self.current
    }

    /// Process one frame
    pub fn update(
        &mut self,
        bands: &SpectralBands,
        rhythm: &RhythmAnalysis,
        harmony: Option<&HarmonyAnalysis>,
        now_ms: u64,
    ) -> SectionAnalysis {
        let session_start = *self.session_start_ms.get_or_insert(now_ms);
        if self.frames_seen == 0 {
            self.section_start_ms = now_ms;
        }
        let energy = if bands.raw_energy.is_finite() {
            bands.raw_energy.clamp(0.0, 1.0)
        } else {
            0.0
        };

        self.push_energy(energy, now_ms);
        let (local_max, local_min) = self.extrema();
        let range = local_max - local_min;
        let relative = range >= self.config.relative_min_range;
        let intensity = if relative {
            ((energy - local_min) / range).clamp(0.0, 1.0)
        } else {
            energy
        };

        push_bounded(&mut self.intensities, intensity, self.config.trend_frames);
        push_bounded(
            &mut self.spectral,
            SpectralSample {
                rolloff: bands.rolloff_hz,
                flatness: bands.flatness,
                sub_bass: bands.raw.sub_bass(),
            },
            self.config.spectral_frames,
        );
        let trend = self.trend();
        let buildup_score = self.buildup_score();

        for v in self.votes.iter_mut() {
            *v *= self.config.vote_decay;
            if *v < self.config.vote_floor {
                *v = 0.0;
            }
        }

        let drop_allowed = self
            .drop_cooldown_until
            .map_or(true, |until| now_ms >= until);

        // Energy extrema
        let warm = self.frames_seen >= self.config.warmup_frames;
        if relative && warm {
            if energy > 0.8 * local_max && intensity > 0.6 && drop_allowed {
                self.add_vote(SectionType::Drop, 2.5);
            } else if energy < 1.2 * local_min {
                self.add_vote(SectionType::Breakdown, 2.0);
            }
        }

        // Filter sweep / riser signature
        if buildup_score >= 0.3 {
            self.add_vote(SectionType::Buildup, 2.5 * buildup_score);
        }

        // Rhythm and spectral consensus
        let sync = rhythm.syncopation;
        let clarity = bands.clarity;
        // Syncopation means nothing until the beat grid is known
        if rhythm.confidence >= self.config.min_rhythm_confidence {
            if intensity > 0.7 && sync > 0.3 && clarity > 0.6 {
                if intensity <= 0.85 {
                    self.add_vote(SectionType::Chorus, 2.5);
                } else if drop_allowed {
                    self.add_vote(SectionType::Drop, 2.5);
                }
            } else if intensity < 0.35 && sync < 0.2 && clarity > 0.5 {
                self.add_vote(SectionType::Breakdown, 2.0);
            } else if (0.35..=0.65).contains(&intensity) && sync < 0.4 && clarity > 0.4 {
                self.add_vote(SectionType::Verse, 1.5);
            }
        }

        // Energy trend
        match trend {
            Trend::Rising => {
                if intensity > 0.4 && intensity < 0.85 {
                    self.add_vote(SectionType::Buildup, 0.8);
                }
                if rhythm.fill_in_progress {
                    self.add_vote(SectionType::Buildup, 0.4);
                }
                if harmony.map_or(false, |h| h.dissonance.suggest_tension) {
                    self.add_vote(SectionType::Buildup, 0.5);
                }
            }
            Trend::Falling => {
                if intensity < 0.4 {
                    self.add_vote(SectionType::Breakdown, 0.7);
                }
            }
            Trend::Stable => {
                if (0.35..=0.65).contains(&intensity) {
                    self.add_vote(SectionType::Verse, 0.5);
                } else if intensity > 0.65 && intensity < 0.85 {
                    self.add_vote(SectionType::Chorus, 0.6);
                }
            }
        }

        if matches!(self.current, SectionType::Unknown | SectionType::Intro)
            && intensity < 0.35
            && now_ms.saturating_sub(session_start) < self.config.intro_window_ms
        {
            self.add_vote(SectionType::Intro, 0.8);
        }
        if matches!(self.current, SectionType::Drop | SectionType::Chorus)
            && trend == Trend::Falling
            && intensity < 0.3
        {
            self.add_vote(SectionType::Outro, 0.5);
        }
        if self.current != SectionType::Unknown {
            self.add_vote(self.current, self.config.incumbent_bonus);
        }

        let changed = if self.current == SectionType::Drop
            && (intensity < self.config.drop_kill_intensity
                || now_ms.saturating_sub(self.section_start_ms) > self.config.drop_max_ms)
        {
            Some(self.exit_drop(now_ms, intensity))
        } else {
            self.consider_transition(now_ms)
        };

        let duration_ms = now_ms.saturating_sub(self.section_start_ms);
        let total: f32 = self.votes.iter().sum();
        let share = if total > 0.0 {
            self.votes[self.current.index()] / total
        } else {
            0.0
        };
        let confidence = (0.6 * share + 0.4 * (duration_ms as f32 / 10_000.0).min(1.0)).clamp(0.0, 1.0);

        SectionAnalysis {
            timestamp_ms: now_ms,
            current: self.current,
            confidence,
            intensity,
            local_max,
            local_min,
            relative,
            trend,
            buildup_score,
            votes: self.votes,
            started_at_ms: self.section_start_ms,
            duration_ms,
            changed,
            predicted: self.predict_next(trend, rhythm.fill_in_progress, duration_ms),
        }
    }

    fn add_vote(&mut self, section: SectionType, weight: f32) {
        self.votes[section.index()] += weight;
    }

    fn push_energy(&mut self, energy: f32, now_ms: u64) {
        self.frames_seen = self.frames_seen.saturating_add(1);
        let index = now_ms / self.config.bucket_ms.max(1);
        match self.buckets.back_mut() {
            Some(bucket) if bucket.index == index => {
                bucket.sum += energy;
                bucket.count += 1;
            }
            _ => self.buckets.push_back(Bucket {
                index,
                sum: energy,
                count: 1,
            }),
        }
        let span = self.config.window_secs * 1000 / self.config.bucket_ms.max(1);
        while let Some(front) = self.buckets.front() {
            if index.saturating_sub(front.index) >= span.max(1) {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn extrema(&self) -> (f32, f32) {
        if self.frames_seen < self.config.warmup_frames || self.buckets.is_empty() {
            return (self.config.default_max, self.config.default_min);
        }
        let last = self.buckets.len() - 1;
        let (mut max, mut min) = (f32::MIN, f32::MAX);
        for (i, bucket) in self.buckets.iter().enumerate() {
            if i == last && bucket.count < self.config.min_bucket_frames && last > 0 {
                continue;
            }
            let mean = bucket.mean();
            max = max.max(mean);
            min = min.min(mean);
        }
        (max, min)
    }

    fn trend(&self) -> Trend {
        let n = self.intensities.len();
        if n < 4 {
            return Trend::Stable;
        }
        let half = n / 2;
        let first = self.intensities.iter().take(half).sum::<f32>() / half as f32;
        let second = self.intensities.iter().skip(n - half).sum::<f32>() / half as f32;
        let delta = second - first;
        if delta > self.config.trend_threshold {
            Trend::Rising
        } else if delta < -self.config.trend_threshold {
            Trend::Falling
        } else {
            Trend::Stable
        }
    }

    /// Rolloff and flatness rising while sub-bass falls
    fn buildup_score(&self) -> f32 {
        let n = self.spectral.len();
        if n < self.config.spectral_frames.max(2) {
            return 0.0;
        }
        let half = n / 2;
        let mean = |skip: usize, f: fn(&SpectralSample) -> f32| {
            self.spectral.iter().skip(skip).take(half).map(f).sum::<f32>() / half as f32
        };
        let (r1, r2) = (mean(0, |s| s.rolloff), mean(n - half, |s| s.rolloff));
        let (f1, f2) = (mean(0, |s| s.flatness), mean(n - half, |s| s.flatness));
        let (s1, s2) = (mean(0, |s| s.sub_bass), mean(n - half, |s| s.sub_bass));

        let mut score = 0.0;
        if r1 > 0.0 {
            let rise = (r2 - r1) / r1;
            if rise > 0.10 {
                score += (rise * 0.5).min(0.35);
            }
        }
        let flat_rise = f2 - f1;
        if flat_rise > 0.05 {
            score += (flat_rise * 3.5).min(0.35);
        }
        if s1 > 0.0 {
            let fall = (s1 - s2) / s1;
            if fall > 0.15 {
                score += (fall * 0.5).min(0.30);
            }
        }
        score
    }

    fn leader(&self, exclude: Option<SectionType>) -> SectionType {
        let mut best = SectionType::Unknown;
        let mut best_vote = f32::MIN;
        for section in SectionType::ALL {
            if Some(section) == exclude || section == SectionType::Unknown {
                continue;
            }
            let vote = self.votes[section.index()];
            if vote > best_vote {
                best = section;
                best_vote = vote;
            }
        }
        best
    }

    fn consider_transition(&mut self, now_ms: u64) -> Option<SectionChange> {
        let challenger = self.leader(Some(self.current));
        let lead = self.votes[challenger.index()] - self.votes[self.current.index()];
        if lead < self.config.hysteresis_margin || self.votes[challenger.index()] <= 0.0 {
            self.candidate = None;
            self.candidate_updates = 0;
            return None;
        }

        if self.candidate == Some(challenger) {
            self.candidate_updates += 1;
        } else {
            self.candidate = Some(challenger);
            self.candidate_updates = 1;
        }

        let settled = self.current == SectionType::Unknown
            || now_ms.saturating_sub(self.section_start_ms) >= self.config.min_section_ms;
        if self.candidate_updates >= self.config.confirm_updates && settled {
            Some(self.switch_to(challenger, now_ms))
        } else {
            None
        }
    }

    fn exit_drop(&mut self, now_ms: u64, intensity: f32) -> SectionChange {
        self.votes[SectionType::Drop.index()] = 0.0;
        self.add_vote(SectionType::Chorus, 3.0);
        self.add_vote(SectionType::Breakdown, 2.0);
        self.drop_cooldown_until = Some(now_ms.saturating_add(self.config.drop_cooldown_ms));
        let next = self.leader(Some(SectionType::Drop));
        debug!(
            "Drop exit after {} ms (intensity {:.2}), cooldown until {} ms",
            now_ms.saturating_sub(self.section_start_ms),
            intensity,
            now_ms.saturating_add(self.config.drop_cooldown_ms)
        );
        self.switch_to(next, now_ms)
    }

    fn switch_to(&mut self, next: SectionType, now_ms: u64) -> SectionChange {
        let change = SectionChange {
            from: self.current,
            to: next,
        };
        info!(
            "Section {:?} -> {:?} after {} ms",
            change.from,
            change.to,
            now_ms.saturating_sub(self.section_start_ms)
        );
        self.current = next;
        self.section_start_ms = now_ms;
        self.candidate = None;
        self.candidate_updates = 0;
        change
    }

    fn predict_next(&self, trend: Trend, fill: bool, duration_ms: u64) -> Option<PredictedSection> {
        let transitions = self.current.transitions();
        let adjusted: Vec<(SectionType, f32)> = transitions
            .iter()
            .map(|&(to, base)| {
                let mut p = base;
                let toward_peak = matches!(to, SectionType::Buildup | SectionType::Drop);
                let toward_rest = matches!(to, SectionType::Breakdown | SectionType::Outro);
                match trend {
                    Trend::Rising if toward_peak => p *= 1.5,
                    Trend::Rising if toward_rest => p *= 0.5,
                    Trend::Falling if toward_rest => p *= 1.5,
                    Trend::Falling if toward_peak => p *= 0.5,
                    _ => {}
                }
                if fill && matches!(to, SectionType::Drop | SectionType::Chorus) {
                    p *= 1.3;
                }
                (to, p.min(1.0))
            })
            .collect();

        let total: f32 = adjusted.iter().map(|&(_, p)| p).sum();
        if total <= 0.0 {
            return None;
        }
        let (section, p) = adjusted
            .iter()
            .copied()
            .fold((SectionType::Unknown, f32::MIN), |best, item| {
                if item.1 > best.1 {
                    item
                } else {
                    best
                }
            });

        let (lo, hi) = self.current.typical_duration_secs();
        let typical_ms = (lo + hi) * 1000 / 2;
        Some(PredictedSection {
            section,
            probability: p / total,
            estimated_in_ms: typical_ms.saturating_sub(duration_ms).max(1000),
        })
    }

    /// Drop all window state and return to the unknown label
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}

fn push_bounded<T>(buf: &mut VecDeque<T>, value: T, cap: usize) {
    buf.push_back(value);
    while buf.len() > cap.max(1) {
        buf.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bands(energy: f32, clarity: f32) -> SpectralBands {
        SpectralBands {
            raw_energy: energy,
            clarity,
            rolloff_hz: 2000.0,
            flatness: 0.1,
            ..SpectralBands::default()
        }
    }

    fn rhythm(sync: f32) -> RhythmAnalysis {
        RhythmAnalysis {
            syncopation: sync,
            confidence: 0.9,
            ..RhythmAnalysis::default()
        }
    }

    fn feed(
        tracker: &mut SectionTracker,
        from_ms: u64,
        to_ms: u64,
        energy: f32,
        sync: f32,
        clarity: f32,
    ) -> SectionAnalysis {
        let mut last = SectionAnalysis::default();
        let mut t = from_ms;
        while t < to_ms {
            last = tracker.update(&bands(energy, clarity), &rhythm(sync), None, t);
            t += 23;
        }
        last
    }

    #[test]
    fn test_steady_mid_energy_is_verse() {
        let mut tracker = SectionTracker::new(SectionConfig::default());
        let analysis = feed(&mut tracker, 0, 20_000, 0.5, 0.1, 0.6);
        assert_eq!(analysis.current, SectionType::Verse);
        assert!(!analysis.relative);
        assert!((analysis.intensity - 0.5).abs() < 1e-6);
        assert!(analysis.confidence > 0.8, "confidence {}", analysis.confidence);
    }

    #[test]
    fn test_quiet_start_is_intro() {
        let mut tracker = SectionTracker::new(SectionConfig::default());
        let analysis = feed(&mut tracker, 0, 5_000, 0.15, 0.5, 0.6);
        assert_eq!(analysis.current, SectionType::Intro);
    }

    #[test]
    fn test_extrema_use_buckets() {
        let mut tracker = SectionTracker::new(SectionConfig::default());
        feed(&mut tracker, 0, 3_000, 0.2, 0.5, 0.6);
        let analysis = tracker.update(&bands(1.0, 0.6), &rhythm(0.5), None, 2_995);
        // One loud frame barely moves the open bucket mean
        assert!(analysis.local_max < 0.3, "max {}", analysis.local_max);
    }

    #[test]
    fn test_drop_after_sustained_jump() {
        let mut tracker = SectionTracker::new(SectionConfig::default());
        let before = feed(&mut tracker, 0, 12_000, 0.2, 0.5, 0.6);
        assert_eq!(before.current, SectionType::Intro);

        let mut reached_at = None;
        let mut t = 12_000;
        while t < 17_000 {
            let a = tracker.update(&bands(0.95, 0.6), &rhythm(0.5), None, t);
            if a.current == SectionType::Drop && reached_at.is_none() {
                reached_at = Some(t);
            }
            t += 23;
        }
        let reached_at = reached_at.expect("drop reached");
        assert!(reached_at < 13_000, "drop only at {}", reached_at);
        assert_eq!(tracker.current(), SectionType::Drop);
    }

    #[test]
    fn test_drop_exits_when_energy_falls() {
        let mut tracker = SectionTracker::new(SectionConfig::default());
        feed(&mut tracker, 0, 12_000, 0.2, 0.5, 0.6);
        feed(&mut tracker, 12_000, 16_000, 0.95, 0.5, 0.6);
        assert_eq!(tracker.current(), SectionType::Drop);

        let after = tracker.update(&bands(0.3, 0.6), &rhythm(0.5), None, 16_010);
        let change = after.changed.expect("drop exit");
        assert_eq!(change.from, SectionType::Drop);
        assert_ne!(change.to, SectionType::Drop);
        assert_eq!(after.vote(SectionType::Drop), 0.0);

        // Cooldown: loud frames right after cannot cast drop votes
        let loud = tracker.update(&bands(0.95, 0.6), &rhythm(0.5), None, 16_033);
        assert_eq!(loud.vote(SectionType::Drop), 0.0);
    }

    #[test]
    fn test_prediction_from_buildup() {
        let mut tracker = SectionTracker::new(SectionConfig::default());
        tracker.current = SectionType::Buildup;
        let predicted = tracker.predict_next(Trend::Rising, false, 0).expect("prediction");
        assert_eq!(predicted.section, SectionType::Drop);
        assert!(predicted.probability > 0.8);
        assert_eq!(predicted.estimated_in_ms, 20_000);
    }

    #[test]
    fn test_reset() {
        let mut tracker = SectionTracker::new(SectionConfig::default());
        feed(&mut tracker, 0, 20_000, 0.5, 0.1, 0.6);
        tracker.reset();
        assert_eq!(tracker.current(), SectionType::Unknown);
        let a = tracker.update(&bands(0.5, 0.6), &rhythm(0.1), None, 0);
        assert_eq!(a.local_max, 0.8);
        assert_eq!(a.local_min, 0.2);
    }
}
