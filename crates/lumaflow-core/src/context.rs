//! Musical context engine
//!
//! Fuses the rhythm, harmony and section analyses of a tick into one
//! [`MusicalContext`] and decides the operating mode. The snapshot is
//! published through an [`ArcSwap`], so readers always see a complete context
//! from a single tick.

use crate::audio::SpectralBands;
use crate::events::PipelineEvent;
use crate::harmony::HarmonyAnalysis;
use crate::rhythm::RhythmAnalysis;
use crate::section::{SectionAnalysis, SectionType, Trend};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, trace};

/// Whether higher-level labels may be trusted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// Only instantaneous energy and beats drive the lights
    #[default]
    Reactive,
    /// Section labels and predictions are authoritative
    Intelligent,
}

/// Context engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Weight of the rhythm confidence
    pub rhythm_weight: f32,
    /// Weight of the harmony confidence
    pub harmony_weight: f32,
    /// Weight of the section confidence
    pub section_weight: f32,
    /// Combined confidence below this selects reactive mode
    pub fallback_threshold: f32,
    /// Harmony results older than this count as absent
    pub harmony_stale_ms: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            rhythm_weight: 0.5,
            harmony_weight: 0.25,
            section_weight: 0.25,
            fallback_threshold: 0.5,
            harmony_stale_ms: 2000,
        }
    }
}

/// Instantaneous signals usable in either mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReactiveSignals {
    /// bass^0.8
    pub pulse: f32,
    /// 0.7·treble + 0.3·high-mid
    pub shimmer: f32,
    /// A beat landed this tick
    pub flash: bool,
    /// 0.4·bass + 0.3·mid + 0.3·treble
    pub intensity: f32,
}

impl ReactiveSignals {
    /// Derive from the AGC bands and the beat flag
    pub fn from_bands(bands: &SpectralBands, beat: bool) -> Self {
        let b = &bands.agc;
        Self {
            pulse: b.bass().max(0.0).powf(0.8),
            shimmer: (0.7 * b.treble() + 0.3 * b.high_mid()).clamp(0.0, 1.0),
            flash: beat,
            intensity: (0.4 * b.bass() + 0.3 * b.mid() + 0.3 * b.treble()).clamp(0.0, 1.0),
        }
    }
}

/// Where the song is heading
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NarrativeContext {
    /// Current section label
    pub section: SectionType,
    /// Section-relative intensity
    pub intensity: f32,
    /// Intensity trend
    pub trend: Trend,
    /// Spectral buildup signature
    pub buildup_score: f32,
    /// Time in the current section
    pub section_duration_ms: u64,
}

/// Timbre summary of the tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SpectralContext {
    /// Spectral centroid in Hz
    pub centroid_hz: f32,
    /// Spectral flatness
    pub flatness: f32,
    /// 85 % rolloff in Hz
    pub rolloff_hz: f32,
    /// Clarity
    pub clarity: f32,
}

/// Fused snapshot of one tick
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MusicalContext {
    /// Tick time
    pub timestamp_ms: u64,
    /// Normalized energy
    pub energy: f32,
    /// Operating mode
    pub mode: OperatingMode,
    /// Weighted average of the source confidences
    pub confidence: f32,
    /// Rhythm confidence used in the average
    pub rhythm_confidence: f32,
    /// Harmony confidence used in the average, 0 when absent or stale
    pub harmony_confidence: f32,
    /// Section confidence used in the average
    pub section_confidence: f32,
    /// Rhythm analysis of this tick
    pub rhythm: RhythmAnalysis,
    /// Latest harmony result, possibly from an earlier tick
    pub harmony: Option<HarmonyAnalysis>,
    /// The harmony result is older than the staleness limit
    pub harmony_stale: bool,
    /// Section analysis of this tick
    pub section: SectionAnalysis,
    /// Instantaneous signals
    pub reactive: ReactiveSignals,
    /// Narrative sub-context
    pub narrative: NarrativeContext,
    /// Spectral sub-context
    pub spectral: SpectralContext,
}

impl MusicalContext {
    /// True in intelligent mode
    pub fn is_intelligent(&self) -> bool {
        self.mode == OperatingMode::Intelligent
    }

    /// The section label, only when it may be acted on
    pub fn trusted_section(&self) -> Option<SectionType> {
        self.is_intelligent().then_some(self.section.current)
    }

    /// The harmony result, only when it may be acted on
    pub fn trusted_harmony(&self) -> Option<&HarmonyAnalysis> {
        if self.is_intelligent() && !self.harmony_stale {
            self.harmony.as_ref()
        } else {
            None
        }
    }
}

/// Builds contexts and tracks the operating mode.
pub struct ContextEngine {
    config: ContextConfig,
    mode: OperatingMode,
    current: ArcSwap<MusicalContext>,
}

impl ContextEngine {
    /// Create an engine in reactive mode
    pub fn new(config: ContextConfig) -> Self {
        Self {
            config,
            mode: OperatingMode::Reactive,
            current: ArcSwap::from_pointee(MusicalContext::default()),
        }
    }

    /// Weighted average of the three source confidences
    pub fn combined_confidence(&self, rhythm: f32, harmony: f32, section: f32) -> f32 {
        let c = &self.config;
        let total = c.rhythm_weight + c.harmony_weight + c.section_weight;
        if total <= 0.0 {
            return 0.0;
        }
        let sum = c.rhythm_weight * sanitize(rhythm)
            + c.harmony_weight * sanitize(harmony)
            + c.section_weight * sanitize(section);
        (sum / total).clamp(0.0, 1.0)
    }

    /// Mode for a combined confidence
    pub fn mode_for(&self, confidence: f32) -> OperatingMode {
        if confidence < self.config.fallback_threshold {
            OperatingMode::Reactive
        } else {
            OperatingMode::Intelligent
        }
    }

    /// Current operating mode
    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    /// Most recently published snapshot
    pub fn snapshot(&self) -> Arc<MusicalContext> {
        self.current.load_full()
    }

    /// Fuse one tick's analyses, publish the snapshot and collect the
    /// mode and section change events it caused
    pub fn fuse(
        &mut self,
        bands: &SpectralBands,
        rhythm: &RhythmAnalysis,
        harmony: Option<&HarmonyAnalysis>,
        section: &SectionAnalysis,
        now_ms: u64,
        events: &mut Vec<PipelineEvent>,
    ) -> Arc<MusicalContext> {
        let harmony_stale = harmony.map_or(true, |h| {
            now_ms.saturating_sub(h.timestamp_ms) > self.config.harmony_stale_ms
        });
        let harmony_confidence = match harmony {
            Some(h) if !harmony_stale => h.confidence,
            _ => 0.0,
        };
        let confidence =
            self.combined_confidence(rhythm.confidence, harmony_confidence, section.confidence);

        let mode = self.mode_for(confidence);
        if mode != self.mode {
            info!(
                "Operating mode {:?} -> {:?} (confidence {:.2})",
                self.mode, mode, confidence
            );
            events.push(PipelineEvent::ModeChanged {
                from: self.mode,
                to: mode,
                confidence,
                timestamp_ms: now_ms,
            });
            self.mode = mode;
        }
        if let Some(change) = section.changed {
            events.push(PipelineEvent::SectionChanged {
                from: change.from,
                to: change.to,
                confidence: section.confidence,
                timestamp_ms: now_ms,
            });
        }

        let context = Arc::new(MusicalContext {
            timestamp_ms: now_ms,
            energy: bands.energy,
            mode,
            confidence,
            rhythm_confidence: sanitize(rhythm.confidence),
            harmony_confidence: sanitize(harmony_confidence),
            section_confidence: sanitize(section.confidence),
            rhythm: rhythm.clone(),
            harmony: harmony.cloned(),
            harmony_stale,
            section: section.clone(),
            reactive: ReactiveSignals::from_bands(bands, rhythm.on_beat()),
            narrative: NarrativeContext {
                section: section.current,
                intensity: section.intensity,
                trend: section.trend,
                buildup_score: section.buildup_score,
                section_duration_ms: section.duration_ms,
            },
            spectral: SpectralContext {
                centroid_hz: bands.centroid_hz,
                flatness: bands.flatness,
                rolloff_hz: bands.rolloff_hz,
                clarity: bands.clarity,
            },
        });
        trace!(
            "Context: mode={:?} conf={:.2} energy={:.2} section={:?}",
            context.mode,
            context.confidence,
            context.energy,
            context.section.current
        );
        self.current.store(Arc::clone(&context));
        context
    }

    /// Back to reactive mode with an empty snapshot
    pub fn reset(&mut self) {
        self.mode = OperatingMode::Reactive;
        self.current.store(Arc::new(MusicalContext::default()));
    }
}

fn sanitize(v: f32) -> f32 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rhythm(confidence: f32) -> RhythmAnalysis {
        RhythmAnalysis {
            confidence,
            ..RhythmAnalysis::default()
        }
    }

    fn harmony(confidence: f32, ts: u64) -> HarmonyAnalysis {
        HarmonyAnalysis {
            confidence,
            ..HarmonyAnalysis::empty(ts)
        }
    }

    fn section(confidence: f32) -> SectionAnalysis {
        SectionAnalysis {
            confidence,
            ..SectionAnalysis::default()
        }
    }

    #[test]
    fn test_low_confidence_is_reactive() {
        let mut engine = ContextEngine::new(ContextConfig::default());
        let mut events = Vec::new();
        let ctx = engine.fuse(
            &SpectralBands::default(),
            &rhythm(0.3),
            Some(&harmony(0.1, 0)),
            &section(0.2),
            0,
            &mut events,
        );
        assert!((ctx.confidence - 0.225).abs() < 1e-6);
        assert_eq!(ctx.mode, OperatingMode::Reactive);
        assert!(ctx.trusted_section().is_none());
        assert!(ctx.trusted_harmony().is_none());
        assert!(events.is_empty());
    }

    #[test]
    fn test_mode_change_event() {
        let mut engine = ContextEngine::new(ContextConfig::default());
        let mut events = Vec::new();
        let ctx = engine.fuse(
            &SpectralBands::default(),
            &rhythm(0.9),
            Some(&harmony(0.8, 0)),
            &section(0.6),
            100,
            &mut events,
        );
        assert_eq!(ctx.mode, OperatingMode::Intelligent);
        assert!(matches!(
            events.as_slice(),
            [PipelineEvent::ModeChanged {
                from: OperatingMode::Reactive,
                to: OperatingMode::Intelligent,
                ..
            }]
        ));

        // Falls back on the very next tick
        events.clear();
        let ctx = engine.fuse(
            &SpectralBands::default(),
            &rhythm(0.2),
            None,
            &section(0.2),
            123,
            &mut events,
        );
        assert_eq!(ctx.mode, OperatingMode::Reactive);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_stale_harmony_counts_zero() {
        let mut engine = ContextEngine::new(ContextConfig::default());
        let mut events = Vec::new();
        let ctx = engine.fuse(
            &SpectralBands::default(),
            &rhythm(1.0),
            Some(&harmony(1.0, 0)),
            &section(1.0),
            10_000,
            &mut events,
        );
        assert!(ctx.harmony_stale);
        assert_eq!(ctx.harmony_confidence, 0.0);
        assert!((ctx.confidence - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_snapshot_is_swapped() {
        let mut engine = ContextEngine::new(ContextConfig::default());
        let before = engine.snapshot();
        let mut events = Vec::new();
        engine.fuse(
            &SpectralBands::default(),
            &rhythm(0.5),
            None,
            &section(0.5),
            42,
            &mut events,
        );
        assert_eq!(before.timestamp_ms, 0);
        assert_eq!(engine.snapshot().timestamp_ms, 42);
    }

    #[test]
    fn test_nan_confidence_sanitized() {
        let engine = ContextEngine::new(ContextConfig::default());
        assert_eq!(engine.combined_confidence(f32::NAN, 0.0, 0.0), 0.0);
        assert_eq!(engine.mode_for(0.5), OperatingMode::Intelligent);
        assert_eq!(engine.mode_for(0.4999), OperatingMode::Reactive);
    }
}
