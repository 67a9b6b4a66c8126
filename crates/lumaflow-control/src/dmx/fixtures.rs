//! DMX fixture profiles

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::dmx::channels::{encode, UNIVERSE_SIZE};
use crate::error::ControlError;
use crate::Result;

/// DMX fixture profile defining channel layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureProfile {
    pub name: String,
    pub manufacturer: String,
    pub channels: Vec<FixtureChannel>,
}

/// A channel in a fixture profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureChannel {
    pub name: String,
    pub channel_type: ChannelType,
    pub default_value: u8,
    /// Usable DMX range, for channels that only respond to part of 0-255
    #[serde(default)]
    pub range: Option<(u8, u8)>,
}

/// Type of DMX channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelType {
    Dimmer,
    Red,
    Green,
    Blue,
    Amber,
    White,
    Pan,
    Tilt,
    ColorWheel,
    Gobo,
    Prism,
    Zoom,
    Shutter,
    Speed,
    Generic,
}

impl ChannelType {
    pub const COUNT: usize = 15;

    pub const ALL: [ChannelType; Self::COUNT] = [
        ChannelType::Dimmer,
        ChannelType::Red,
        ChannelType::Green,
        ChannelType::Blue,
        ChannelType::Amber,
        ChannelType::White,
        ChannelType::Pan,
        ChannelType::Tilt,
        ChannelType::ColorWheel,
        ChannelType::Gobo,
        ChannelType::Prism,
        ChannelType::Zoom,
        ChannelType::Shutter,
        ChannelType::Speed,
        ChannelType::Generic,
    ];

    /// Position in [`ChannelType::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Channels driven by a motor that needs debouncing
    pub fn is_optics(self) -> bool {
        matches!(self, ChannelType::Gobo | ChannelType::Prism | ChannelType::Zoom)
    }

    /// Colour mixing channels
    pub fn is_color(self) -> bool {
        matches!(
            self,
            ChannelType::Red
                | ChannelType::Green
                | ChannelType::Blue
                | ChannelType::Amber
                | ChannelType::White
        )
    }
}

fn channel(name: &str, channel_type: ChannelType, default_value: u8) -> FixtureChannel {
    FixtureChannel {
        name: name.to_string(),
        channel_type,
        default_value,
        range: None,
    }
}

impl FixtureProfile {
    /// Create a generic dimmer fixture (1 channel)
    pub fn generic_dimmer() -> Self {
        Self {
            name: "Generic Dimmer".to_string(),
            manufacturer: "Generic".to_string(),
            channels: vec![channel("Dimmer", ChannelType::Dimmer, 0)],
        }
    }

    /// Create an RGB fixture (3 channels, no dimmer)
    pub fn rgb_par() -> Self {
        Self {
            name: "RGB Par".to_string(),
            manufacturer: "Generic".to_string(),
            channels: vec![
                channel("Red", ChannelType::Red, 0),
                channel("Green", ChannelType::Green, 0),
                channel("Blue", ChannelType::Blue, 0),
            ],
        }
    }

    /// Create a dimmer + RGB fixture (4 channels)
    pub fn dimmer_rgb_par() -> Self {
        Self {
            name: "Dimmer RGB Par".to_string(),
            manufacturer: "Generic".to_string(),
            channels: vec![
                channel("Dimmer", ChannelType::Dimmer, 0),
                channel("Red", ChannelType::Red, 0),
                channel("Green", ChannelType::Green, 0),
                channel("Blue", ChannelType::Blue, 0),
            ],
        }
    }

    /// Create a spot moving head with gobo, prism and zoom (11 channels)
    pub fn moving_head() -> Self {
        let mut zoom = channel("Zoom", ChannelType::Zoom, 0);
        // Lens stops responding above 230 on most spots
        zoom.range = Some((0, 230));
        Self {
            name: "Spot Moving Head".to_string(),
            manufacturer: "Generic".to_string(),
            channels: vec![
                channel("Pan", ChannelType::Pan, 128),
                channel("Tilt", ChannelType::Tilt, 128),
                channel("Speed", ChannelType::Speed, 0),
                channel("Dimmer", ChannelType::Dimmer, 0),
                channel("Shutter", ChannelType::Shutter, 255),
                channel("Red", ChannelType::Red, 0),
                channel("Green", ChannelType::Green, 0),
                channel("Blue", ChannelType::Blue, 0),
                channel("Gobo", ChannelType::Gobo, 0),
                channel("Prism", ChannelType::Prism, 0),
                zoom,
            ],
        }
    }

    /// Parse a profile from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let profile: Self = serde_json::from_str(json)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Load a profile from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Reject empty or oversized profiles
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(ControlError::InvalidParameter(format!(
                "profile '{}' has no channels",
                self.name
            )));
        }
        if self.channels.len() > UNIVERSE_SIZE {
            return Err(ControlError::InvalidParameter(format!(
                "profile '{}' has {} channels",
                self.name,
                self.channels.len()
            )));
        }
        Ok(())
    }

    /// Get the number of channels this fixture uses
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Whether any channel has this type
    pub fn has(&self, channel_type: ChannelType) -> bool {
        self.channels.iter().any(|c| c.channel_type == channel_type)
    }
}

/// A fixture instance with a starting DMX address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub id: u32,
    pub name: String,
    pub profile: FixtureProfile,
    pub universe: u16,
    pub start_address: u16, // 1-512
}

impl Fixture {
    /// Create a new fixture instance
    pub fn new(
        id: u32,
        name: String,
        profile: FixtureProfile,
        universe: u16,
        start_address: u16,
    ) -> Self {
        Self {
            id,
            name,
            profile,
            universe,
            start_address,
        }
    }

    /// Get the end address of this fixture
    pub fn end_address(&self) -> u16 {
        self.start_address + self.profile.channel_count() as u16 - 1
    }

    /// Whether the whole footprint fits in one universe
    pub fn fits(&self) -> bool {
        self.start_address >= 1
            && self.profile.channel_count() > 0
            && (self.end_address() as usize) <= UNIVERSE_SIZE
    }

    /// Whether two fixtures share any slot
    pub fn overlaps(&self, other: &Fixture) -> bool {
        self.universe == other.universe
            && self.start_address <= other.end_address()
            && other.start_address <= self.end_address()
    }

    /// 1-based address of the first channel of this type
    pub fn address_of(&self, channel_type: ChannelType) -> Option<u16> {
        self.profile
            .channels
            .iter()
            .position(|c| c.channel_type == channel_type)
            .map(|i| self.start_address + i as u16)
    }

    /// Buffer index (0-based) of every slot this fixture occupies, with its channel
    fn slots(&self) -> impl Iterator<Item = (usize, &FixtureChannel)> + '_ {
        self.profile
            .channels
            .iter()
            .enumerate()
            .map(|(i, channel)| ((self.start_address as usize + i).saturating_sub(1), channel))
            .filter(|(slot, _)| *slot < UNIVERSE_SIZE)
    }

    /// Write a normalized level, honoring each channel's usable range
    pub fn set_level(&self, dmx_data: &mut [u8; 512], channel_type: ChannelType, level: f32) {
        for (slot, channel) in self.slots() {
            if channel.channel_type == channel_type {
                dmx_data[slot] = encode(level, channel.range);
            }
        }
    }

    /// Write every channel's profile default
    pub fn write_defaults(&self, dmx_data: &mut [u8; 512]) {
        for (slot, channel) in self.slots() {
            dmx_data[slot] = channel.default_value;
        }
    }
}
