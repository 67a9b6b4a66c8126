//! Prediction matrix
//!
//! Forecasts the next structural event from the context trend and attaches
//! a recommended list of lighting actions. Results are cached by a coarse
//! fingerprint (section label plus energy bucket) so a static musical
//! situation is not re-evaluated every tick.

use crate::context::MusicalContext;
use crate::section::{SectionType, Trend};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Kind of predicted event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionKind {
    /// A drop is about to hit
    DropIncoming,
    /// A buildup is about to start
    BuildupStarting,
    /// Energy is about to fall away
    BreakdownImminent,
    /// A section boundary on the next downbeat
    TransitionBeat,
    /// A drum fill is due
    FillExpected,
    /// The key changed
    KeyChange,
}

/// When an action runs relative to the predicted event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStage {
    /// Ahead of the event
    Prepare,
    /// At the event
    Execute,
    /// After the event
    Recover,
}

/// A recommended compositor trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightingAction {
    /// Stage of the action
    pub stage: ActionStage,
    /// Effect library id
    pub effect: String,
    /// Effect intensity in [0, 1]
    pub intensity: f32,
    /// Sustain duration
    pub duration_ms: u64,
    /// Offset from the event time, negative means before
    pub timing_ms: i64,
}

impl LightingAction {
    fn new(stage: ActionStage, effect: &str, intensity: f32, duration_ms: u64, timing_ms: i64) -> Self {
        Self {
            stage,
            effect: effect.to_string(),
            intensity,
            duration_ms,
            timing_ms,
        }
    }

    /// Absolute time the action should fire for an event at `event_at_ms`
    pub fn fire_at(&self, event_at_ms: u64) -> u64 {
        if self.timing_ms >= 0 {
            event_at_ms.saturating_add(self.timing_ms as u64)
        } else {
            event_at_ms.saturating_sub(self.timing_ms.unsigned_abs())
        }
    }
}

impl PredictionKind {
    /// Recommended actions, in firing order
    pub fn actions(self) -> Vec<LightingAction> {
        use ActionStage::*;
        match self {
            PredictionKind::DropIncoming => vec![
                LightingAction::new(Prepare, "intensity_ramp", 0.8, 2000, -2000),
                LightingAction::new(Execute, "flash", 1.0, 200, 0),
                LightingAction::new(Recover, "strobe", 0.9, 4000, 200),
            ],
            PredictionKind::BuildupStarting => vec![
                LightingAction::new(Prepare, "color_shift", 0.5, 500, -500),
                LightingAction::new(Execute, "intensity_ramp", 0.7, 8000, 0),
            ],
            PredictionKind::BreakdownImminent => vec![
                LightingAction::new(Prepare, "breathe", 0.4, 1000, -1000),
                LightingAction::new(Execute, "breathe", 0.3, 4000, 0),
            ],
            PredictionKind::TransitionBeat => {
                vec![LightingAction::new(Execute, "pulse", 0.6, 500, 0)]
            }
            PredictionKind::FillExpected => {
                vec![LightingAction::new(Execute, "flash", 0.7, 300, 0)]
            }
            PredictionKind::KeyChange => vec![
                LightingAction::new(Prepare, "color_shift", 0.6, 1000, -500),
                LightingAction::new(Execute, "color_shift", 0.8, 2000, 0),
            ],
        }
    }
}

/// A forecast structural event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Increases with every freshly computed prediction
    pub id: u64,
    /// What is expected
    pub kind: PredictionKind,
    /// Probability in [0, 1]
    pub probability: f32,
    /// When the prediction was made
    pub predicted_at_ms: u64,
    /// Expected time until the event
    pub lead_time_ms: u64,
    /// Section label the prediction was made in
    pub section: SectionType,
    /// Recommended actions
    pub actions: Vec<LightingAction>,
}

impl Prediction {
    /// Expected absolute event time
    pub fn event_at_ms(&self) -> u64 {
        self.predicted_at_ms.saturating_add(self.lead_time_ms)
    }
}

/// Prediction matrix configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Candidates below this are discarded
    pub min_probability: f32,
    /// Distinct section labels remembered
    pub history_len: usize,
    /// Width of the energy bucket in the cache key
    pub energy_bucket: f32,
    /// Change in combined context confidence that invalidates the cache
    pub confidence_drift: f32,
    /// Bars of buildup before a drop is predicted
    pub min_buildup_bars: f32,
    /// Bars a buildup usually lasts
    pub typical_buildup_bars: f32,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            min_probability: 0.6,
            history_len: 8,
            energy_bucket: 0.1,
            confidence_drift: 0.05,
            min_buildup_bars: 2.0,
            typical_buildup_bars: 8.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CacheKey {
    section: SectionType,
    energy_bucket: u32,
}

struct CacheEntry {
    key: CacheKey,
    confidence: f32,
    prediction: Option<Prediction>,
}

/// Pattern-based forecaster with a fingerprint cache.
pub struct PredictionMatrix {
    config: PredictionConfig,
    history: VecDeque<SectionType>,
    fills: VecDeque<u64>,
    cache: Option<CacheEntry>,
    next_id: u64,
    hits: u64,
    misses: u64,
}

impl PredictionMatrix {
    /// Create an empty matrix
    pub fn new(config: PredictionConfig) -> Self {
        Self {
            config,
            history: VecDeque::new(),
            fills: VecDeque::new(),
            cache: None,
            next_id: 1,
            hits: 0,
            misses: 0,
        }
    }

    /// Cache hits since creation
    pub fn cache_hits(&self) -> u64 {
        self.hits
    }

    /// Cache misses since creation
    pub fn cache_misses(&self) -> u64 {
        self.misses
    }

    /// Distinct section labels seen, oldest first
    pub fn history(&self) -> impl Iterator<Item = SectionType> + '_ {
        self.history.iter().copied()
    }

    /// Forecast the next event for an intelligent-mode context
    pub fn predict(&mut self, ctx: &MusicalContext) -> Option<Prediction> {
        let section = ctx.section.current;
        self.record(ctx);

        let key = CacheKey {
            section,
            energy_bucket: bucket(ctx.energy, self.config.energy_bucket),
        };
        if let Some(entry) = &self.cache {
            if entry.key == key
                && (entry.confidence - ctx.confidence).abs() <= self.config.confidence_drift
            {
                self.hits += 1;
                return entry.prediction.clone();
            }
        }
        self.misses += 1;

        let prediction = self.evaluate(ctx).map(|(kind, probability, lead_time_ms)| {
            let id = self.next_id;
            self.next_id += 1;
            debug!(
                "Prediction #{}: {:?} p={:.2} in {} ms (section {:?})",
                id, kind, probability, lead_time_ms, section
            );
            Prediction {
                id,
                kind,
                probability,
                predicted_at_ms: ctx.timestamp_ms,
                lead_time_ms,
                section,
                actions: kind.actions(),
            }
        });
        self.cache = Some(CacheEntry {
            key,
            confidence: ctx.confidence,
            prediction: prediction.clone(),
        });
        prediction
    }

    fn record(&mut self, ctx: &MusicalContext) {
        let section = ctx.section.current;
        if self.history.back() != Some(&section) {
            self.history.push_back(section);
            while self.history.len() > self.config.history_len.max(2) {
                self.history.pop_front();
            }
        }
        if ctx.rhythm.fill_in_progress && self.fills.back().map_or(true, |&t| ctx.timestamp_ms > t + 1000) {
            self.fills.push_back(ctx.timestamp_ms);
            while self.fills.len() > 4 {
                self.fills.pop_front();
            }
        }
    }

    fn evaluate(&self, ctx: &MusicalContext) -> Option<(PredictionKind, f32, u64)> {
        let bpm = ctx.rhythm.bpm.clamp(60.0, 200.0);
        let bar_ms = 4.0 * 60_000.0 / bpm;
        let section_conf = ctx.section.confidence.clamp(0.0, 1.0);
        let forecast_ms = ctx
            .section
            .predicted
            .map_or((4.0 * bar_ms) as u64, |p| p.estimated_in_ms);

        let mut candidates: Vec<(PredictionKind, f32, u64)> = Vec::new();

        match (ctx.section.current, ctx.section.trend) {
            (SectionType::Buildup, Trend::Rising) => {
                let bars = ctx.section.duration_ms as f32 / bar_ms;
                if bars >= self.config.min_buildup_bars {
                    let typical = self.config.typical_buildup_bars.max(1.0);
                    let p = (0.7 + 0.25 * (bars / typical).min(1.0)).min(0.95);
                    let bars_until = (typical - bars.floor()).max(1.0);
                    candidates.push((
                        PredictionKind::DropIncoming,
                        p * section_conf,
                        (bars_until * bar_ms) as u64,
                    ));
                }
            }
            (SectionType::Breakdown, _) => {
                candidates.push((PredictionKind::BuildupStarting, 0.8 * section_conf, forecast_ms));
            }
            (SectionType::Intro, _) => {
                candidates.push((PredictionKind::TransitionBeat, 0.85 * section_conf, forecast_ms));
            }
            (SectionType::Drop, Trend::Falling) => {
                candidates.push((PredictionKind::BreakdownImminent, 0.75 * section_conf, forecast_ms));
            }
            (SectionType::Verse, _) => {
                let back_to_chorus = self.history.len() >= 2
                    && self.history.iter().rev().nth(1) == Some(&SectionType::Chorus);
                let p = if back_to_chorus { 0.6 } else { 0.65 };
                candidates.push((PredictionKind::TransitionBeat, p * section_conf, forecast_ms));
            }
            _ => {}
        }

        // Fill now means a boundary on the next bar
        if ctx.rhythm.fill_in_progress {
            let to_bar = ((1.0 - ctx.rhythm.bar_phase) * bar_ms).max(0.0) as u64;
            candidates.push((PredictionKind::TransitionBeat, 0.75, to_bar));
        } else if let Some(due) = self.next_periodic_fill() {
            if due >= ctx.timestamp_ms && due - ctx.timestamp_ms <= bar_ms as u64 {
                candidates.push((PredictionKind::FillExpected, 0.65, due - ctx.timestamp_ms));
            }
        }

        if let Some(p) = ctx.section.predicted {
            if p.probability > 0.6 && p.section != ctx.section.current {
                candidates.push((PredictionKind::TransitionBeat, p.probability, p.estimated_in_ms));
            }
        }

        if let Some(change) = ctx.harmony.as_ref().and_then(|h| h.key_change) {
            if !ctx.harmony_stale {
                candidates.push((PredictionKind::KeyChange, change.confidence, 0));
            }
        }

        candidates
            .into_iter()
            .filter(|c| c.1 >= self.config.min_probability)
            .fold(None, |best: Option<(PredictionKind, f32, u64)>, c| match best {
                Some(b) if b.1 >= c.1 => Some(b),
                _ => Some(c),
            })
    }

    /// Next fill time if the last fills came at a steady interval
    fn next_periodic_fill(&self) -> Option<u64> {
        if self.fills.len() < 2 {
            return None;
        }
        let last = *self.fills.back()?;
        let prev = *self.fills.iter().rev().nth(1)?;
        Some(last + (last - prev))
    }

    /// Forget history, fills and the cache
    pub fn reset(&mut self) {
        self.history.clear();
        self.fills.clear();
        self.cache = None;
    }
}

fn bucket(energy: f32, width: f32) -> u32 {
    if !energy.is_finite() || width <= 0.0 {
        return 0;
    }
    (energy.clamp(0.0, 1.0) / width).floor() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OperatingMode;
    use crate::section::SectionAnalysis;

    fn context(section: SectionType, trend: Trend, duration_ms: u64, confidence: f32) -> MusicalContext {
        let mut ctx = MusicalContext {
            timestamp_ms: 60_000,
            energy: 0.55,
            mode: OperatingMode::Intelligent,
            section: SectionAnalysis {
                current: section,
                trend,
                duration_ms,
                confidence,
                ..SectionAnalysis::default()
            },
            ..MusicalContext::default()
        };
        ctx.rhythm.bpm = 120.0;
        ctx
    }

    #[test]
    fn test_buildup_predicts_drop() {
        let mut matrix = PredictionMatrix::new(PredictionConfig::default());
        // 120 BPM: one bar is 2000 ms, 4 bars in
        let ctx = context(SectionType::Buildup, Trend::Rising, 8000, 1.0);
        let p = matrix.predict(&ctx).expect("prediction");
        assert_eq!(p.kind, PredictionKind::DropIncoming);
        assert!((p.probability - 0.825).abs() < 1e-5, "p {}", p.probability);
        assert_eq!(p.lead_time_ms, 8000);
        assert_eq!(p.actions.len(), 3);
        assert_eq!(p.actions[0].fire_at(p.event_at_ms()), 66_000);
    }

    #[test]
    fn test_short_buildup_not_enough() {
        let mut matrix = PredictionMatrix::new(PredictionConfig::default());
        let ctx = context(SectionType::Buildup, Trend::Rising, 3000, 1.0);
        assert!(matrix.predict(&ctx).is_none());
    }

    #[test]
    fn test_low_section_confidence_filtered() {
        let mut matrix = PredictionMatrix::new(PredictionConfig::default());
        let ctx = context(SectionType::Breakdown, Trend::Stable, 5000, 0.5);
        assert!(matrix.predict(&ctx).is_none());
        let ctx = context(SectionType::Breakdown, Trend::Stable, 5000, 0.9);
        let p = matrix.predict(&ctx).expect("prediction");
        assert_eq!(p.kind, PredictionKind::BuildupStarting);
    }

    #[test]
    fn test_cache_hits_and_invalidation() {
        let mut matrix = PredictionMatrix::new(PredictionConfig::default());
        let mut ctx = context(SectionType::Intro, Trend::Stable, 4000, 0.9);
        ctx.confidence = 0.7;
        let first = matrix.predict(&ctx).expect("prediction");
        ctx.confidence = 0.72;
        let second = matrix.predict(&ctx).expect("cached");
        assert_eq!(first.id, second.id);
        assert_eq!(matrix.cache_hits(), 1);
        assert_eq!(matrix.cache_misses(), 1);

        // Combined confidence moved past the drift limit
        ctx.confidence = 0.8;
        let third = matrix.predict(&ctx).expect("recomputed");
        assert_ne!(third.id, first.id);
        assert_eq!(matrix.cache_misses(), 2);

        // Label change always recomputes
        let mut verse = context(SectionType::Verse, Trend::Stable, 4000, 0.9);
        verse.confidence = 0.8;
        matrix.predict(&verse);
        assert_eq!(matrix.cache_misses(), 3);
    }

    #[test]
    fn test_history_keeps_distinct_labels() {
        let mut matrix = PredictionMatrix::new(PredictionConfig::default());
        for s in [
            SectionType::Intro,
            SectionType::Intro,
            SectionType::Verse,
            SectionType::Chorus,
            SectionType::Verse,
        ] {
            matrix.predict(&context(s, Trend::Stable, 1000, 1.0));
        }
        let history: Vec<SectionType> = matrix.history().collect();
        assert_eq!(
            history,
            vec![SectionType::Intro, SectionType::Verse, SectionType::Chorus, SectionType::Verse]
        );
    }

    #[test]
    fn test_fill_in_progress() {
        let mut matrix = PredictionMatrix::new(PredictionConfig::default());
        let mut ctx = context(SectionType::Chorus, Trend::Stable, 1000, 0.3);
        ctx.rhythm.fill_in_progress = true;
        ctx.rhythm.bar_phase = 0.5;
        let p = matrix.predict(&ctx).expect("prediction");
        assert_eq!(p.kind, PredictionKind::TransitionBeat);
        assert_eq!(p.lead_time_ms, 1000);
    }
}
