//! LumaFlow Control - fixture output side of the pipeline
//!
//! This crate turns musical judgments into channel values:
//! - DMX fixture profiles, universe buffers and the output driver seam
//! - Layered effects compositor (Base, Effects, Optics) with mechanical debounce
//! - Director that maps context, section changes and predictions to compositor calls

#![allow(missing_docs)]

pub mod compositor;
pub mod director;
pub mod dmx;
pub mod error;

pub use compositor::{
    ChannelLevels, Compositor, CompositorConfig, DecayCurve, EffectInstance, EffectKind,
    EffectOverrides, EffectParams, Mechanism, OpticsCommit, OpticsOutcome, Phase,
};
pub use director::{Director, DirectorConfig};
pub use dmx::{ChannelType, DmxFrame, DmxOutput, Fixture, FixtureChannel, FixtureProfile, RecordingOutput};
pub use error::{ControlError, Result};
