//! Per-fixture channel levels and the persistent base layer

use std::collections::HashMap;

use crate::dmx::ChannelType;

/// Normalized level per channel type; `None` means the layer leaves it alone.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelLevels {
    levels: [Option<f32>; ChannelType::COUNT],
}

impl ChannelLevels {
    /// All channels unset
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, channel: ChannelType) -> Option<f32> {
        self.levels[channel.index()]
    }

    /// Set a level, clamped to [0, 1]; NaN clears the channel
    pub fn set(&mut self, channel: ChannelType, level: f32) {
        self.levels[channel.index()] = level.is_finite().then(|| level.clamp(0.0, 1.0));
    }

    pub fn clear(&mut self, channel: ChannelType) {
        self.levels[channel.index()] = None;
    }

    /// Highest-takes-precedence write
    pub fn raise(&mut self, channel: ChannelType, level: f32) {
        if !level.is_finite() {
            return;
        }
        let slot = &mut self.levels[channel.index()];
        let level = level.clamp(0.0, 1.0);
        *slot = Some(slot.map_or(level, |current| current.max(level)));
    }

    /// Additive write, saturating at 1
    pub fn add(&mut self, channel: ChannelType, level: f32) {
        if !level.is_finite() {
            return;
        }
        let slot = &mut self.levels[channel.index()];
        *slot = Some((slot.unwrap_or(0.0) + level.max(0.0)).min(1.0));
    }

    pub fn set_rgb(&mut self, rgb: [f32; 3]) {
        self.set(ChannelType::Red, rgb[0]);
        self.set(ChannelType::Green, rgb[1]);
        self.set(ChannelType::Blue, rgb[2]);
    }

    /// Set channels in ascending [`ChannelType`] order
    pub fn iter(&self) -> impl Iterator<Item = (ChannelType, f32)> + '_ {
        ChannelType::ALL
            .iter()
            .zip(self.levels.iter())
            .filter_map(|(ty, level)| level.map(|l| (*ty, l)))
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(Option::is_none)
    }
}

/// Persistent colour, position and dimmer targets per fixture.
#[derive(Debug, Clone, Default)]
pub struct BaseLayer {
    fixtures: HashMap<u32, ChannelLevels>,
}

impl BaseLayer {
    pub fn levels(&self, fixture_id: u32) -> Option<&ChannelLevels> {
        self.fixtures.get(&fixture_id)
    }

    pub fn levels_mut(&mut self, fixture_id: u32) -> &mut ChannelLevels {
        self.fixtures.entry(fixture_id).or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_is_htp() {
        let mut levels = ChannelLevels::new();
        levels.raise(ChannelType::Dimmer, 0.4);
        levels.raise(ChannelType::Dimmer, 0.2);
        assert_eq!(levels.get(ChannelType::Dimmer), Some(0.4));
        levels.raise(ChannelType::Dimmer, 0.9);
        assert_eq!(levels.get(ChannelType::Dimmer), Some(0.9));
    }

    #[test]
    fn test_add_saturates() {
        let mut levels = ChannelLevels::new();
        levels.add(ChannelType::Red, 0.7);
        levels.add(ChannelType::Red, 0.7);
        assert_eq!(levels.get(ChannelType::Red), Some(1.0));
        levels.add(ChannelType::Green, f32::NAN);
        assert_eq!(levels.get(ChannelType::Green), None);
    }

    #[test]
    fn test_set_clamps_and_iterates_in_order() {
        let mut levels = ChannelLevels::new();
        assert!(levels.is_empty());
        levels.set(ChannelType::Blue, 2.0);
        levels.set(ChannelType::Dimmer, -1.0);
        let set: Vec<_> = levels.iter().collect();
        assert_eq!(set, vec![(ChannelType::Dimmer, 0.0), (ChannelType::Blue, 1.0)]);
        levels.set(ChannelType::Blue, f32::NAN);
        assert_eq!(levels.get(ChannelType::Blue), None);
    }
}
