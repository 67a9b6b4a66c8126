//! DMX fixture model
//!
//! Fixtures are described by a [`FixtureProfile`] (ordered channel list) and
//! patched at a universe and start address. The compositor writes into a
//! [`DmxFrame`], one 512-slot buffer per universe, which a [`DmxOutput`]
//! implementation hands to the transport.
//!
//! ## Example Usage
//!
//! ```rust
//! use lumaflow_control::dmx::{ChannelType, DmxFrame, Fixture, FixtureProfile};
//!
//! let fixture = Fixture::new(1, "Front Par".to_string(), FixtureProfile::dimmer_rgb_par(), 0, 1);
//!
//! let mut frame = DmxFrame::new();
//! fixture.set_level(frame.universe_mut(0), ChannelType::Dimmer, 1.0);
//! fixture.set_level(frame.universe_mut(0), ChannelType::Green, 0.2);
//!
//! assert_eq!(frame.get(0, 1), 255);
//! assert_eq!(frame.get(0, 3), 51);
//! ```

pub mod channels;
pub mod driver;
pub mod fixtures;

pub use channels::{encode, to_dmx, DmxFrame, UNIVERSE_SIZE};
pub use driver::{DmxOutput, RecordingOutput};
pub use fixtures::{ChannelType, Fixture, FixtureChannel, FixtureProfile};
