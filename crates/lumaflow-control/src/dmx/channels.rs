//! Universe buffers and value encoding

use std::collections::BTreeMap;

/// Slots per DMX universe
pub const UNIVERSE_SIZE: usize = 512;

/// Convert a normalized level to a DMX value (0-255)
pub fn to_dmx(value: f32) -> u8 {
    let value = if value.is_finite() { value } else { 0.0 };
    (value.clamp(0.0, 1.0) * 255.0) as u8
}

/// Convert a normalized level, remapping into `range` when given
pub fn encode(value: f32, range: Option<(u8, u8)>) -> u8 {
    match range {
        Some((min, max)) => {
            let value = if value.is_finite() { value } else { 0.0 };
            let span = max.saturating_sub(min) as f32;
            min + (value.clamp(0.0, 1.0) * span) as u8
        }
        None => to_dmx(value),
    }
}

/// Per-tick output: one 512-slot buffer per universe in use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DmxFrame {
    universes: BTreeMap<u16, [u8; UNIVERSE_SIZE]>,
}

impl DmxFrame {
    /// Create an empty frame
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer for a universe, if anything was written to it
    pub fn universe(&self, universe: u16) -> Option<&[u8; UNIVERSE_SIZE]> {
        self.universes.get(&universe)
    }

    /// Get or create a universe buffer
    pub fn universe_mut(&mut self, universe: u16) -> &mut [u8; UNIVERSE_SIZE] {
        self.universes.entry(universe).or_insert([0u8; UNIVERSE_SIZE])
    }

    /// Value at a 1-based address; untouched slots read as 0
    pub fn get(&self, universe: u16, address: u16) -> u8 {
        let index = (address as usize).saturating_sub(1);
        self.universes
            .get(&universe)
            .and_then(|data| data.get(index))
            .copied()
            .unwrap_or(0)
    }

    /// Set a 1-based address
    pub fn set(&mut self, universe: u16, address: u16, value: u8) {
        let index = (address as usize).saturating_sub(1);
        if index < UNIVERSE_SIZE {
            self.universe_mut(universe)[index] = value;
        }
    }

    /// Iterate universes in ascending order
    pub fn iter(&self) -> impl Iterator<Item = (u16, &[u8; UNIVERSE_SIZE])> {
        self.universes.iter().map(|(u, data)| (*u, data))
    }

    /// Get all universes that have data
    pub fn used_universes(&self) -> Vec<u16> {
        self.universes.keys().copied().collect()
    }

    /// True when every slot of every universe is zero
    pub fn is_dark(&self) -> bool {
        self.universes
            .values()
            .all(|data| data.iter().all(|v| *v == 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_dmx() {
        assert_eq!(to_dmx(0.0), 0);
        assert_eq!(to_dmx(1.0), 255);
        assert_eq!(to_dmx(0.5), 127);
        assert_eq!(to_dmx(1.7), 255);
        assert_eq!(to_dmx(-0.3), 0);
        assert_eq!(to_dmx(f32::NAN), 0);
    }

    #[test]
    fn test_range_remapping() {
        assert_eq!(encode(0.0, Some((100, 200))), 100);
        assert_eq!(encode(1.0, Some((100, 200))), 200);
        assert_eq!(encode(0.5, Some((100, 200))), 150);
        // Inverted ranges pin to the first bound
        assert_eq!(encode(1.0, Some((200, 100))), 200);
    }

    #[test]
    fn test_frame_addressing() {
        let mut frame = DmxFrame::new();
        assert_eq!(frame.get(0, 1), 0);
        assert!(frame.universe(0).is_none());

        frame.set(0, 1, 10);
        frame.set(2, 512, 20);
        frame.set(2, 513, 30);

        assert_eq!(frame.get(0, 1), 10);
        assert_eq!(frame.get(2, 512), 20);
        assert_eq!(frame.used_universes(), vec![0, 2]);
        assert!(!frame.is_dark());
    }

    #[test]
    fn test_dark_frame() {
        let mut frame = DmxFrame::new();
        frame.universe_mut(0);
        frame.universe_mut(1);
        assert!(frame.is_dark());
    }
}
