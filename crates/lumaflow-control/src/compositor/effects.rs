//! Timed effect library and the effects layer
//!
//! Every instance runs Trigger (attack) -> Sustain -> Decay and is removed
//! once the decay has run out. The phase is a pure function of the start
//! time, so advancing twice with the same timestamp is harmless.

use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;
use tracing::debug;

use super::layers::ChannelLevels;
use crate::dmx::ChannelType;

/// Built-in effects, addressed by string id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Flash,
    Strobe,
    Pulse,
    Breathe,
    IntensityRamp,
    ColorShift,
    DropBurst,
    BeatPulse,
}

impl EffectKind {
    pub const ALL: [EffectKind; 8] = [
        EffectKind::Flash,
        EffectKind::Strobe,
        EffectKind::Pulse,
        EffectKind::Breathe,
        EffectKind::IntensityRamp,
        EffectKind::ColorShift,
        EffectKind::DropBurst,
        EffectKind::BeatPulse,
    ];

    pub fn id(self) -> &'static str {
        match self {
            EffectKind::Flash => "flash",
            EffectKind::Strobe => "strobe",
            EffectKind::Pulse => "pulse",
            EffectKind::Breathe => "breathe",
            EffectKind::IntensityRamp => "intensity_ramp",
            EffectKind::ColorShift => "color_shift",
            EffectKind::DropBurst => "drop_burst",
            EffectKind::BeatPulse => "beat_pulse",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }

    /// Whether a trigger while active restarts the instance
    pub fn retriggerable(self) -> bool {
        !matches!(self, EffectKind::IntensityRamp | EffectKind::Breathe)
    }

    pub fn defaults(self) -> EffectParams {
        let (intensity, speed, attack_ms, duration_ms, decay_ms, priority) = match self {
            EffectKind::Flash => (1.0, 0.0, 0, 100, 200, 6),
            EffectKind::Strobe => (1.0, 10.0, 0, 2000, 0, 5),
            EffectKind::Pulse => (0.8, 2.0, 50, 1000, 300, 3),
            EffectKind::Breathe => (0.6, 0.25, 500, 4000, 1000, 2),
            EffectKind::IntensityRamp => (0.9, 0.0, 0, 4000, 500, 4),
            EffectKind::ColorShift => (1.0, 0.1, 300, 2000, 500, 2),
            EffectKind::DropBurst => (1.0, 0.0, 50, 2000, 1500, 9),
            EffectKind::BeatPulse => (0.6, 0.0, 0, 60, 180, 1),
        };
        EffectParams {
            intensity,
            speed,
            attack_ms,
            duration_ms,
            decay_ms,
            priority,
            curve: DecayCurve::Linear,
            color: None,
        }
    }
}

/// Lifecycle phase of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Trigger,
    Sustain,
    Decay,
}

/// Shape of the decay fade
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayCurve {
    #[default]
    Linear,
    /// Smoothstep ease-out
    Smooth,
}

/// Resolved parameters of one instance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectParams {
    /// Peak level in [0, 1]
    pub intensity: f32,
    /// Waveform rate in Hz (strobe, pulse, breathe, colour cycle)
    pub speed: f32,
    pub attack_ms: u64,
    /// Sustain length
    pub duration_ms: u64,
    pub decay_ms: u64,
    /// Higher survives eviction
    pub priority: u8,
    pub curve: DecayCurve,
    /// Fixed colour for colour-writing effects
    pub color: Option<[f32; 3]>,
}

/// Caller-supplied changes to an effect's defaults
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectOverrides {
    pub intensity: Option<f32>,
    pub speed: Option<f32>,
    pub duration_ms: Option<u64>,
    pub attack_ms: Option<u64>,
    pub decay_ms: Option<u64>,
    pub priority: Option<u8>,
    pub color: Option<[f32; 3]>,
    /// Limit the effect to one fixture; all fixtures otherwise
    pub fixture: Option<u32>,
}

impl EffectOverrides {
    pub fn intensity(intensity: f32) -> Self {
        Self {
            intensity: Some(intensity),
            ..Self::default()
        }
    }

    pub fn resolve(&self, kind: EffectKind) -> EffectParams {
        let mut params = kind.defaults();
        if let Some(intensity) = self.intensity.filter(|v| v.is_finite()) {
            params.intensity = intensity.clamp(0.0, 1.0);
        }
        if let Some(speed) = self.speed.filter(|v| v.is_finite()) {
            params.speed = speed.max(0.0);
        }
        params.duration_ms = self.duration_ms.unwrap_or(params.duration_ms);
        params.attack_ms = self.attack_ms.unwrap_or(params.attack_ms);
        params.decay_ms = self.decay_ms.unwrap_or(params.decay_ms);
        params.priority = self.priority.unwrap_or(params.priority);
        params.color = self.color.or(params.color);
        params
    }
}

/// One running effect
#[derive(Debug, Clone, PartialEq)]
pub struct EffectInstance {
    pub kind: EffectKind,
    pub params: EffectParams,
    pub fixture: Option<u32>,
    pub started_at_ms: u64,
    phase: Phase,
}

impl EffectInstance {
    pub fn new(kind: EffectKind, params: EffectParams, fixture: Option<u32>, now_ms: u64) -> Self {
        let mut instance = Self {
            kind,
            params,
            fixture,
            started_at_ms: now_ms,
            phase: Phase::Trigger,
        };
        instance.advance(now_ms);
        instance
    }

    /// Back to Trigger with new parameters
    pub fn retrigger(&mut self, params: EffectParams, now_ms: u64) {
        self.params = params;
        self.started_at_ms = now_ms;
        self.phase = Phase::Trigger;
        self.advance(now_ms);
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Attack + sustain + decay
    pub fn total_ms(&self) -> u64 {
        self.sustain_end_ms().saturating_add(self.params.decay_ms)
    }

    /// Elapsed time at which the decay starts
    fn sustain_end_ms(&self) -> u64 {
        self.params.attack_ms.saturating_add(self.params.duration_ms)
    }

    fn elapsed(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.started_at_ms)
    }

    /// Update the phase; false once the decay is complete
    pub fn advance(&mut self, now_ms: u64) -> bool {
        let elapsed = self.elapsed(now_ms);
        let p = &self.params;
        if elapsed >= self.total_ms() {
            return false;
        }
        self.phase = if elapsed < p.attack_ms {
            Phase::Trigger
        } else if elapsed < self.sustain_end_ms() {
            Phase::Sustain
        } else {
            Phase::Decay
        };
        true
    }

    /// Lifecycle gain in [0, 1]
    pub fn envelope(&self, now_ms: u64) -> f32 {
        let elapsed = self.elapsed(now_ms);
        let p = &self.params;
        if elapsed >= self.total_ms() {
            return 0.0;
        }
        if elapsed < p.attack_ms {
            return elapsed as f32 / p.attack_ms as f32;
        }
        let decay_start = self.sustain_end_ms();
        if elapsed < decay_start {
            return 1.0;
        }
        let x = 1.0 - (elapsed - decay_start) as f32 / p.decay_ms.max(1) as f32;
        match p.curve {
            DecayCurve::Linear => x,
            DecayCurve::Smooth => x * x * (3.0 - 2.0 * x),
        }
    }

    pub fn applies_to(&self, fixture_id: u32) -> bool {
        self.fixture.map_or(true, |id| id == fixture_id)
    }

    /// Seconds since start, for periodic waveforms
    fn seconds(&self, now_ms: u64) -> f32 {
        self.elapsed(now_ms) as f32 / 1000.0
    }

    /// Add this effect's output into `levels`; `weights` records how much
    /// each non-dimmer channel is taken over from the base layer.
    pub fn contribute(&self, now_ms: u64, levels: &mut ChannelLevels, weights: &mut ChannelLevels) {
        let env = self.envelope(now_ms);
        if env <= 0.0 {
            return;
        }
        let p = &self.params;
        let t = self.seconds(now_ms);
        match self.kind {
            EffectKind::Flash => {
                levels.raise(ChannelType::Dimmer, p.intensity * env);
                write_color(levels, weights, p.color.unwrap_or([1.0, 1.0, 1.0]), env);
            }
            EffectKind::Strobe => {
                let on = if p.speed > 0.0 {
                    (t * p.speed).fract() < 0.5
                } else {
                    true
                };
                levels.raise(ChannelType::Dimmer, if on { p.intensity * env } else { 0.0 });
            }
            EffectKind::Pulse => {
                let wave = 0.5 + 0.5 * (TAU * p.speed * t).cos();
                levels.raise(ChannelType::Dimmer, p.intensity * env * wave);
            }
            EffectKind::Breathe => {
                let wave = 0.5 - 0.5 * (TAU * p.speed * t).cos();
                levels.raise(ChannelType::Dimmer, p.intensity * env * wave);
            }
            EffectKind::IntensityRamp => {
                let ramp_ms = self.sustain_end_ms().max(1) as f32;
                let progress = (self.elapsed(now_ms) as f32 / ramp_ms).min(1.0);
                levels.raise(ChannelType::Dimmer, p.intensity * progress * env);
            }
            EffectKind::ColorShift => {
                let rgb = p.color.unwrap_or_else(|| hue_to_rgb(t * p.speed));
                let scaled = rgb.map(|c| c * p.intensity);
                write_color(levels, weights, scaled, env);
            }
            EffectKind::DropBurst | EffectKind::BeatPulse => {
                levels.raise(ChannelType::Dimmer, p.intensity * env);
            }
        }
    }
}

fn write_color(levels: &mut ChannelLevels, weights: &mut ChannelLevels, rgb: [f32; 3], env: f32) {
    for (channel, value) in [ChannelType::Red, ChannelType::Green, ChannelType::Blue]
        .into_iter()
        .zip(rgb)
    {
        levels.add(channel, value * env);
        weights.raise(channel, env);
    }
}

/// Fully saturated colour for a hue in turns
fn hue_to_rgb(hue: f32) -> [f32; 3] {
    let h = hue.rem_euclid(1.0) * 6.0;
    let x = 1.0 - (h % 2.0 - 1.0).abs();
    match h as u32 {
        0 => [1.0, x, 0.0],
        1 => [x, 1.0, 0.0],
        2 => [0.0, 1.0, x],
        3 => [0.0, x, 1.0],
        4 => [x, 0.0, 1.0],
        _ => [1.0, 0.0, x],
    }
}

/// Active instances, one per (effect, target)
#[derive(Debug, Clone)]
pub struct EffectsLayer {
    active: Vec<EffectInstance>,
    max_instances: usize,
}

impl EffectsLayer {
    pub fn new(max_instances: usize) -> Self {
        Self {
            active: Vec::with_capacity(max_instances),
            max_instances: max_instances.max(1),
        }
    }

    /// Start or restart an instance. Returns false when nothing changed.
    pub fn trigger(
        &mut self,
        kind: EffectKind,
        params: EffectParams,
        fixture: Option<u32>,
        now_ms: u64,
    ) -> bool {
        if let Some(existing) = self
            .active
            .iter_mut()
            .find(|e| e.kind == kind && e.fixture == fixture)
        {
            if !kind.retriggerable() {
                debug!(effect = kind.id(), "Effect already running, trigger ignored");
                return false;
            }
            existing.retrigger(params, now_ms);
            return true;
        }

        if self.active.len() >= self.max_instances {
            // Lowest priority goes first, oldest among equals
            let victim = self
                .active
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| (e.params.priority, e.started_at_ms))
                .map(|(i, e)| (i, e.params.priority));
            match victim {
                Some((index, priority)) if priority <= params.priority => {
                    let evicted = self.active.remove(index);
                    debug!(
                        evicted = evicted.kind.id(),
                        effect = kind.id(),
                        "Effect limit reached, evicting"
                    );
                }
                _ => {
                    debug!(effect = kind.id(), "Effect limit reached, trigger dropped");
                    return false;
                }
            }
        }

        let instance = EffectInstance::new(kind, params, fixture, now_ms);
        if instance.total_ms() == 0 {
            return false;
        }
        self.active.push(instance);
        true
    }

    /// Advance every instance and drop the finished ones
    pub fn advance(&mut self, now_ms: u64) {
        self.active.retain_mut(|e| e.advance(now_ms));
    }

    /// Combined output of all instances for one fixture
    pub fn contribute(
        &self,
        fixture_id: u32,
        now_ms: u64,
        levels: &mut ChannelLevels,
        weights: &mut ChannelLevels,
    ) {
        for effect in self.active.iter().filter(|e| e.applies_to(fixture_id)) {
            effect.contribute(now_ms, levels, weights);
        }
    }

    pub fn instances(&self) -> &[EffectInstance] {
        &self.active
    }

    pub fn is_active(&self, kind: EffectKind) -> bool {
        self.active.iter().any(|e| e.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }
}
