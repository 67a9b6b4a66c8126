//! Layered effects compositor
//!
//! Three layers are merged in a fixed order into one [`DmxFrame`] per tick:
//!
//! | Channel            | Base | Effects                          | Optics    |
//! |--------------------|------|----------------------------------|-----------|
//! | Dimmer             | HTP  | HTP                              | -         |
//! | Colour, position   | set  | overrides base, weighted by envelope | -     |
//! | Gobo, prism, zoom  | -    | -                                | owns them |
//!
//! The compositor is the only writer of fixture channel state. Unknown
//! effect ids are ignored and optics requests are debounced rather than
//! rejected, so the control surface never fails on musical input. Only
//! addressing a fixture that is not patched is an error.

mod effects;
mod layers;
mod optics;

pub use effects::{
    DecayCurve, EffectInstance, EffectKind, EffectOverrides, EffectParams, EffectsLayer, Phase,
};
pub use layers::{BaseLayer, ChannelLevels};
pub use optics::{Mechanism, OpticsCommit, OpticsLayer, OpticsOutcome};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dmx::{ChannelType, DmxFrame, Fixture};
use crate::error::ControlError;
use crate::Result;

/// Compositor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// Minimum time between commits to one optics mechanism
    pub debounce_ms: u64,
    /// Concurrent effect instances before eviction
    pub max_effects: usize,
    /// Optics commits kept for inspection
    pub commit_log_len: usize,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2000,
            max_effects: 16,
            commit_log_len: 64,
        }
    }
}

/// Owns the layer stack and the patched fixtures.
#[derive(Debug, Clone)]
pub struct Compositor {
    config: CompositorConfig,
    fixtures: Vec<Fixture>,
    base: BaseLayer,
    effects: EffectsLayer,
    optics: OpticsLayer,
    blackout: bool,
}

impl Compositor {
    /// Create a compositor for a patch; overlapping or out-of-range fixtures are rejected
    pub fn new(config: CompositorConfig, fixtures: Vec<Fixture>) -> Result<Self> {
        for (i, fixture) in fixtures.iter().enumerate() {
            if !fixture.fits() {
                return Err(ControlError::InvalidParameter(format!(
                    "fixture {} ('{}') does not fit universe {} at address {}",
                    fixture.id, fixture.name, fixture.universe, fixture.start_address
                )));
            }
            for other in &fixtures[..i] {
                if other.id == fixture.id {
                    return Err(ControlError::InvalidParameter(format!(
                        "duplicate fixture id {}",
                        fixture.id
                    )));
                }
                if other.overlaps(fixture) {
                    return Err(ControlError::InvalidParameter(format!(
                        "fixtures {} and {} overlap in universe {}",
                        other.id, fixture.id, fixture.universe
                    )));
                }
            }
        }

        info!(fixtures = fixtures.len(), "Compositor ready");
        Ok(Self {
            effects: EffectsLayer::new(config.max_effects),
            optics: OpticsLayer::new(config.debounce_ms, config.commit_log_len),
            base: BaseLayer::default(),
            blackout: false,
            fixtures,
            config,
        })
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    pub fn fixtures(&self) -> &[Fixture] {
        &self.fixtures
    }

    pub fn fixture(&self, fixture_id: u32) -> Option<&Fixture> {
        self.fixtures.iter().find(|f| f.id == fixture_id)
    }

    fn require(&self, fixture_id: u32) -> Result<&Fixture> {
        self.fixture(fixture_id)
            .ok_or(ControlError::UnknownFixture(fixture_id))
    }

    pub fn effects(&self) -> &EffectsLayer {
        &self.effects
    }

    pub fn optics(&self) -> &OpticsLayer {
        &self.optics
    }

    pub fn base(&self) -> &BaseLayer {
        &self.base
    }

    /// Set one base channel. Optics channels go through the debounce.
    pub fn set_base_channel(
        &mut self,
        fixture_id: u32,
        channel: ChannelType,
        level: f32,
        now_ms: u64,
    ) -> Result<()> {
        self.require(fixture_id)?;
        match Mechanism::from_channel(channel) {
            Some(mechanism) => {
                self.optics.request(fixture_id, mechanism, level, now_ms);
            }
            None => self.base.levels_mut(fixture_id).set(channel, level),
        }
        Ok(())
    }

    pub fn set_base_color(&mut self, fixture_id: u32, rgb: [f32; 3]) -> Result<()> {
        self.require(fixture_id)?;
        self.base.levels_mut(fixture_id).set_rgb(rgb);
        Ok(())
    }

    pub fn set_base_color_all(&mut self, rgb: [f32; 3]) {
        for fixture in &self.fixtures {
            self.base.levels_mut(fixture.id).set_rgb(rgb);
        }
    }

    pub fn set_base_dimmer(&mut self, fixture_id: u32, level: f32) -> Result<()> {
        self.require(fixture_id)?;
        self.base.levels_mut(fixture_id).set(ChannelType::Dimmer, level);
        Ok(())
    }

    pub fn set_base_dimmer_all(&mut self, level: f32) {
        for fixture in &self.fixtures {
            self.base.levels_mut(fixture.id).set(ChannelType::Dimmer, level);
        }
    }

    /// Pan/tilt target in [0, 1]
    pub fn set_base_position(&mut self, fixture_id: u32, pan: f32, tilt: f32) -> Result<()> {
        self.require(fixture_id)?;
        let levels = self.base.levels_mut(fixture_id);
        levels.set(ChannelType::Pan, pan);
        levels.set(ChannelType::Tilt, tilt);
        Ok(())
    }

    /// Start an effect by id. Unknown ids and blackout make this a no-op.
    pub fn trigger(&mut self, effect_id: &str, overrides: &EffectOverrides, now_ms: u64) -> bool {
        let Some(kind) = EffectKind::from_id(effect_id) else {
            debug!(effect_id, "Unknown effect id ignored");
            return false;
        };
        if self.blackout {
            debug!(effect_id, "Trigger ignored during blackout");
            return false;
        }
        if let Some(id) = overrides.fixture {
            if self.fixture(id).is_none() {
                debug!(effect_id, fixture_id = id, "Trigger for unknown fixture ignored");
                return false;
            }
        }
        let started = self
            .effects
            .trigger(kind, overrides.resolve(kind), overrides.fixture, now_ms);
        if started {
            debug!(effect_id, now_ms, "Effect triggered");
        }
        started
    }

    /// Move a gobo, prism or zoom, subject to the mechanical debounce
    pub fn request_optics(
        &mut self,
        fixture_id: u32,
        mechanism: Mechanism,
        value: f32,
        now_ms: u64,
    ) -> Result<OpticsOutcome> {
        let fixture = self.require(fixture_id)?;
        if !fixture.profile.has(mechanism.channel_type()) {
            return Err(ControlError::InvalidParameter(format!(
                "fixture {} has no {:?} channel",
                fixture_id, mechanism
            )));
        }
        Ok(self.optics.request(fixture_id, mechanism, value, now_ms))
    }

    /// Request optics on every fixture that has the mechanism
    pub fn request_optics_all(&mut self, mechanism: Mechanism, value: f32, now_ms: u64) {
        for fixture in &self.fixtures {
            if fixture.profile.has(mechanism.channel_type()) {
                self.optics.request(fixture.id, mechanism, value, now_ms);
            }
        }
    }

    /// Zero everything on the next merge, bypassing effect timing and debounce
    pub fn blackout(&mut self, now_ms: u64) {
        if !self.blackout {
            warn!(now_ms, "Blackout");
        }
        self.blackout = true;
        self.effects.clear();
        self.optics.force_zero(now_ms);
    }

    pub fn release_blackout(&mut self) {
        if self.blackout {
            info!("Blackout released");
        }
        self.blackout = false;
    }

    pub fn is_blackout(&self) -> bool {
        self.blackout
    }

    /// Merged levels for one fixture at `now_ms`, without advancing anything
    pub fn levels(&self, fixture_id: u32, now_ms: u64) -> Option<ChannelLevels> {
        self.fixture(fixture_id)?;
        Some(self.compose(fixture_id, now_ms))
    }

    fn compose(&self, fixture_id: u32, now_ms: u64) -> ChannelLevels {
        let mut out = self.base.levels(fixture_id).copied().unwrap_or_default();

        let mut fx = ChannelLevels::new();
        let mut weights = ChannelLevels::new();
        self.effects.contribute(fixture_id, now_ms, &mut fx, &mut weights);
        for (channel, value) in fx.iter() {
            if channel == ChannelType::Dimmer {
                out.raise(channel, value);
            } else if !channel.is_optics() {
                let weight = weights.get(channel).unwrap_or(1.0);
                let base = out.get(channel).unwrap_or(0.0);
                out.set(channel, base * (1.0 - weight) + value);
            }
        }

        self.optics.contribute(fixture_id, &mut out);
        out
    }

    /// Advance effect phases and pending optics, then build the output frame.
    ///
    /// Call once per tick.
    pub fn merge(&mut self, now_ms: u64) -> DmxFrame {
        self.effects.advance(now_ms);
        self.optics.tick(now_ms);

        let mut frame = DmxFrame::new();
        if self.blackout {
            for fixture in &self.fixtures {
                frame.universe_mut(fixture.universe);
            }
            return frame;
        }

        for fixture in &self.fixtures {
            let levels = self.compose(fixture.id, now_ms);
            // Fixtures without a dimmer get it folded into their colour
            let folded_dimmer = (!fixture.profile.has(ChannelType::Dimmer))
                .then(|| levels.get(ChannelType::Dimmer))
                .flatten();

            let data = frame.universe_mut(fixture.universe);
            fixture.write_defaults(data);
            for (channel, level) in levels.iter() {
                let level = match folded_dimmer {
                    Some(dimmer) if channel.is_color() => level * dimmer,
                    _ => level,
                };
                fixture.set_level(data, channel, level);
            }
        }
        frame
    }
}
