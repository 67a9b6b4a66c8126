//! Context-to-light director
//!
//! Reads each tick's [`MusicalContext`] and drives the [`Compositor`]:
//!
//! - reactive mode: a `beat_pulse` per detected beat, nothing else
//! - intelligent mode: beat pulses plus section looks on section changes,
//!   prediction actions scheduled at their firing time, and a base colour
//!   that follows the harmonic temperature
//!
//! Predictions are deduplicated by id. A fresh prediction replaces whatever
//! the previous one had scheduled, and falling back to reactive mode drops
//! the schedule entirely.

use lumaflow_core::{
    LightingAction, MusicalContext, OperatingMode, Prediction, SectionType, Temperature,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::compositor::{Compositor, EffectOverrides, Mechanism};

/// Director settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorConfig {
    /// Resting dimmer level of every fixture
    pub base_dimmer: f32,
    /// Peak of a beat pulse at full energy
    pub beat_pulse_intensity: f32,
    pub warm_color: [f32; 3],
    pub cool_color: [f32; 3],
    pub neutral_color: [f32; 3],
    /// Move prisms and gobos on section changes
    pub section_optics: bool,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            base_dimmer: 0.4,
            beat_pulse_intensity: 0.6,
            warm_color: [1.0, 0.55, 0.2],
            cool_color: [0.25, 0.4, 1.0],
            neutral_color: [1.0, 1.0, 1.0],
            section_optics: true,
        }
    }
}

#[derive(Debug, Clone)]
struct ScheduledAction {
    prediction_id: u64,
    fire_at_ms: u64,
    action: LightingAction,
}

/// Effect, prism and gobo for a section
fn section_look(section: SectionType) -> (Option<&'static str>, f32, f32) {
    match section {
        SectionType::Drop => (Some("drop_burst"), 1.0, 0.0),
        SectionType::Buildup => (Some("intensity_ramp"), 0.0, 0.0),
        SectionType::Breakdown => (Some("breathe"), 0.0, 0.5),
        SectionType::Chorus => (Some("pulse"), 0.0, 0.25),
        _ => (None, 0.0, 0.0),
    }
}

/// Turns musical context into compositor calls.
#[derive(Debug, Clone)]
pub struct Director {
    config: DirectorConfig,
    mode: OperatingMode,
    last_prediction_id: Option<u64>,
    scheduled: Vec<ScheduledAction>,
    temperature: Option<Temperature>,
    triggered: u64,
}

impl Director {
    pub fn new(config: DirectorConfig) -> Self {
        Self {
            config,
            mode: OperatingMode::Reactive,
            last_prediction_id: None,
            scheduled: Vec::new(),
            temperature: None,
            triggered: 0,
        }
    }

    pub fn config(&self) -> &DirectorConfig {
        &self.config
    }

    /// Put the base layer in its resting state
    pub fn attach(&self, compositor: &mut Compositor) {
        compositor.set_base_dimmer_all(self.config.base_dimmer);
        compositor.set_base_color_all(self.config.neutral_color);
    }

    /// Effects started so far
    pub fn triggered(&self) -> u64 {
        self.triggered
    }

    /// Prediction actions waiting for their time
    pub fn scheduled_len(&self) -> usize {
        self.scheduled.len()
    }

    /// Forget schedule and tracking state, e.g. after an audio source switch
    pub fn reset(&mut self) {
        self.mode = OperatingMode::Reactive;
        self.last_prediction_id = None;
        self.scheduled.clear();
        self.temperature = None;
    }

    /// React to one tick of the pipeline
    pub fn apply(
        &mut self,
        ctx: &MusicalContext,
        prediction: Option<&Prediction>,
        compositor: &mut Compositor,
    ) {
        let now_ms = ctx.timestamp_ms;

        if ctx.mode != self.mode {
            if ctx.mode == OperatingMode::Reactive && !self.scheduled.is_empty() {
                info!(dropped = self.scheduled.len(), "Reactive fallback, schedule cleared");
                self.scheduled.clear();
            }
            self.mode = ctx.mode;
        }

        if ctx.rhythm.beat.is_some() {
            let intensity =
                self.config.beat_pulse_intensity * (0.5 + 0.5 * ctx.energy.clamp(0.0, 1.0));
            self.fire(compositor, "beat_pulse", &EffectOverrides::intensity(intensity), now_ms);
        }

        if ctx.is_intelligent() {
            self.follow_section(ctx, compositor, now_ms);
            self.follow_harmony(ctx, compositor);
            if let Some(prediction) = prediction {
                self.schedule(prediction, now_ms);
            }
        }

        self.tick(now_ms, compositor);
    }

    /// Fire scheduled actions that are due; also call this when no audio arrives
    pub fn tick(&mut self, now_ms: u64, compositor: &mut Compositor) {
        if self.scheduled.is_empty() {
            return;
        }
        let (due, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.scheduled)
            .into_iter()
            .partition(|s| s.fire_at_ms <= now_ms);
        self.scheduled = later;
        for scheduled in due {
            let overrides = EffectOverrides {
                intensity: Some(scheduled.action.intensity),
                duration_ms: Some(scheduled.action.duration_ms),
                ..EffectOverrides::default()
            };
            debug!(
                prediction = scheduled.prediction_id,
                effect = %scheduled.action.effect,
                stage = ?scheduled.action.stage,
                "Predicted action fired"
            );
            self.fire(compositor, &scheduled.action.effect, &overrides, now_ms);
        }
    }

    fn fire(
        &mut self,
        compositor: &mut Compositor,
        effect_id: &str,
        overrides: &EffectOverrides,
        now_ms: u64,
    ) {
        if compositor.trigger(effect_id, overrides, now_ms) {
            self.triggered += 1;
        }
    }

    fn follow_section(&mut self, ctx: &MusicalContext, compositor: &mut Compositor, now_ms: u64) {
        let Some(change) = ctx.section.changed else {
            return;
        };
        let (effect, prism, gobo) = section_look(change.to);
        info!(from = ?change.from, to = ?change.to, effect, "Section look");
        if let Some(effect) = effect {
            self.fire(compositor, effect, &EffectOverrides::default(), now_ms);
        }
        if self.config.section_optics {
            compositor.request_optics_all(Mechanism::Prism, prism, now_ms);
            compositor.request_optics_all(Mechanism::Gobo, gobo, now_ms);
        }
    }

    fn follow_harmony(&mut self, ctx: &MusicalContext, compositor: &mut Compositor) {
        let Some(harmony) = ctx.trusted_harmony() else {
            return;
        };
        if self.temperature == Some(harmony.temperature) {
            return;
        }
        let color = match harmony.temperature {
            Temperature::Warm => self.config.warm_color,
            Temperature::Cool => self.config.cool_color,
            Temperature::Neutral => self.config.neutral_color,
        };
        debug!(temperature = ?harmony.temperature, "Base colour follows harmony");
        compositor.set_base_color_all(color);
        self.temperature = Some(harmony.temperature);
    }

    fn schedule(&mut self, prediction: &Prediction, now_ms: u64) {
        if self.last_prediction_id == Some(prediction.id) {
            return;
        }
        self.last_prediction_id = Some(prediction.id);
        if !self.scheduled.is_empty() {
            debug!(
                superseded = self.scheduled.len(),
                "Newer prediction replaces scheduled actions"
            );
        }
        let event_at_ms = prediction.event_at_ms();
        self.scheduled = prediction
            .actions
            .iter()
            .map(|action| ScheduledAction {
                prediction_id: prediction.id,
                fire_at_ms: action.fire_at(event_at_ms).max(now_ms),
                action: action.clone(),
            })
            .collect();
        debug!(
            id = prediction.id,
            kind = ?prediction.kind,
            probability = prediction.probability,
            event_at_ms,
            actions = self.scheduled.len(),
            "Prediction scheduled"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::{CompositorConfig, EffectKind};
    use crate::dmx::{Fixture, FixtureProfile};
    use lumaflow_core::section::SectionChange;
    use lumaflow_core::{ActionStage, BeatEvent, HarmonyAnalysis, PredictionKind};

    fn compositor() -> Compositor {
        Compositor::new(
            CompositorConfig::default(),
            vec![
                Fixture::new(1, "Par".to_string(), FixtureProfile::dimmer_rgb_par(), 0, 1),
                Fixture::new(2, "Spot".to_string(), FixtureProfile::moving_head(), 0, 10),
            ],
        )
        .unwrap()
    }

    fn context(mode: OperatingMode, now_ms: u64) -> MusicalContext {
        MusicalContext {
            timestamp_ms: now_ms,
            mode,
            energy: 0.5,
            ..MusicalContext::default()
        }
    }

    fn beat(now_ms: u64) -> BeatEvent {
        BeatEvent {
            timestamp_ms: now_ms,
            strength: 0.8,
            confidence: 0.8,
            bpm: 128.0,
        }
    }

    fn drop_prediction(id: u64, now_ms: u64) -> Prediction {
        Prediction {
            id,
            kind: PredictionKind::DropIncoming,
            probability: 0.9,
            predicted_at_ms: now_ms,
            lead_time_ms: 4000,
            section: SectionType::Buildup,
            actions: PredictionKind::DropIncoming.actions(),
        }
    }

    #[test]
    fn test_attach_sets_base() {
        let mut c = compositor();
        Director::new(DirectorConfig::default()).attach(&mut c);
        assert_eq!(c.merge(0).get(0, 1), 102);
    }

    #[test]
    fn test_reactive_only_pulses_on_beats() {
        let mut c = compositor();
        let mut director = Director::new(DirectorConfig::default());

        let mut ctx = context(OperatingMode::Reactive, 1000);
        ctx.section.changed = Some(SectionChange {
            from: SectionType::Verse,
            to: SectionType::Drop,
        });
        director.apply(&ctx, Some(&drop_prediction(1, 1000)), &mut c);
        assert!(c.effects().is_empty());
        assert_eq!(director.scheduled_len(), 0);
        assert!(c.optics().commit_log().next().is_none());

        ctx.rhythm.beat = Some(beat(1000));
        director.apply(&ctx, None, &mut c);
        assert_eq!(c.effects().len(), 1);
        assert!(c.effects().is_active(EffectKind::BeatPulse));
    }

    #[test]
    fn test_section_change_triggers_look() {
        let mut c = compositor();
        let mut director = Director::new(DirectorConfig::default());
        let mut ctx = context(OperatingMode::Intelligent, 5000);
        ctx.section.changed = Some(SectionChange {
            from: SectionType::Buildup,
            to: SectionType::Drop,
        });
        director.apply(&ctx, None, &mut c);
        assert!(c.effects().is_active(EffectKind::DropBurst));
        assert_eq!(c.optics().committed(2, Mechanism::Prism), Some(1.0));
        // The par has no prism
        assert_eq!(c.optics().committed(1, Mechanism::Prism), None);
    }

    #[test]
    fn test_prediction_actions_fire_on_time() {
        let mut c = compositor();
        let mut director = Director::new(DirectorConfig::default());
        let prediction = drop_prediction(7, 10_000);

        // Event at 14000: ramp at 12000, flash at 14000, strobe at 14200
        director.apply(&context(OperatingMode::Intelligent, 10_000), Some(&prediction), &mut c);
        assert_eq!(director.scheduled_len(), 3);
        assert!(c.effects().is_empty());

        // Same id again does not reschedule
        director.apply(&context(OperatingMode::Intelligent, 11_000), Some(&prediction), &mut c);
        assert_eq!(director.scheduled_len(), 3);

        director.tick(12_000, &mut c);
        assert!(c.effects().is_active(EffectKind::IntensityRamp));
        assert_eq!(director.scheduled_len(), 2);

        director.tick(14_200, &mut c);
        assert_eq!(director.scheduled_len(), 0);
        assert!(c.effects().is_active(EffectKind::Flash));
        assert!(c.effects().is_active(EffectKind::Strobe));
        assert_eq!(director.triggered(), 3);
    }

    #[test]
    fn test_late_actions_fire_immediately() {
        let mut c = compositor();
        let mut director = Director::new(DirectorConfig::default());
        let mut prediction = drop_prediction(1, 10_000);
        prediction.lead_time_ms = 500;
        prediction.actions.retain(|a| a.stage == ActionStage::Prepare);
        director.apply(&context(OperatingMode::Intelligent, 10_000), Some(&prediction), &mut c);
        assert!(c.effects().is_active(EffectKind::IntensityRamp));
        assert_eq!(director.scheduled_len(), 0);
    }

    #[test]
    fn test_fallback_clears_schedule() {
        let mut c = compositor();
        let mut director = Director::new(DirectorConfig::default());
        director.apply(
            &context(OperatingMode::Intelligent, 10_000),
            Some(&drop_prediction(3, 10_000)),
            &mut c,
        );
        assert_eq!(director.scheduled_len(), 3);

        director.apply(&context(OperatingMode::Reactive, 10_100), None, &mut c);
        assert_eq!(director.scheduled_len(), 0);
        director.tick(20_000, &mut c);
        assert!(c.effects().is_empty());
    }

    #[test]
    fn test_reset_accepts_reused_prediction_ids() {
        let mut c = compositor();
        let mut director = Director::new(DirectorConfig::default());
        let ctx = context(OperatingMode::Intelligent, 10_000);
        director.apply(&ctx, Some(&drop_prediction(1, 10_000)), &mut c);
        director.reset();
        assert_eq!(director.scheduled_len(), 0);
        director.apply(&ctx, Some(&drop_prediction(1, 10_000)), &mut c);
        assert_eq!(director.scheduled_len(), 3);
    }

    #[test]
    fn test_newer_prediction_replaces_schedule() {
        let mut c = compositor();
        let mut director = Director::new(DirectorConfig::default());
        director.apply(
            &context(OperatingMode::Intelligent, 10_000),
            Some(&drop_prediction(1, 10_000)),
            &mut c,
        );
        let mut transition = drop_prediction(2, 10_500);
        transition.kind = PredictionKind::TransitionBeat;
        transition.actions = PredictionKind::TransitionBeat.actions();
        director.apply(&context(OperatingMode::Intelligent, 10_500), Some(&transition), &mut c);
        assert_eq!(director.scheduled_len(), 1);
    }

    #[test]
    fn test_base_color_follows_temperature() {
        let mut c = compositor();
        let mut director = Director::new(DirectorConfig::default());
        let mut ctx = context(OperatingMode::Intelligent, 1000);
        ctx.harmony = Some(HarmonyAnalysis {
            temperature: Temperature::Cool,
            ..HarmonyAnalysis::empty(1000)
        });
        director.apply(&ctx, None, &mut c);
        let frame = c.merge(1000);
        assert_eq!(frame.get(0, 2), 63);
        assert_eq!(frame.get(0, 4), 255);

        // Stale harmony is not trusted
        let mut c = compositor();
        let mut director = Director::new(DirectorConfig::default());
        ctx.harmony_stale = true;
        director.apply(&ctx, None, &mut c);
        assert!(c.base().levels(1).is_none());
    }
}
