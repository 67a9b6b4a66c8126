//! LumaFlow Core - Audio-to-Light Decision Pipeline
//!
//! This crate turns a stream of audio frames into musical judgments:
//! - Spectral frontend (FFT bands, metrics, adaptive normalization)
//! - Rhythm analysis (beats, tempo, syncopation, drums, groove)
//! - Harmony detection (chroma, key, mood, dissonance)
//! - Section tracking over a sliding window
//! - Confidence-weighted context with reactive/intelligent modes
//! - Prediction of upcoming structural events

#![warn(missing_docs)]

use thiserror::Error;

// Analysis stages
pub mod audio;
pub mod harmony;
pub mod rhythm;
pub mod section;

// Fusion & forecasting
pub mod context;
pub mod prediction;

// Driver
pub mod config;
pub mod events;
pub mod logging;
pub mod pipeline;

// --- Re-exports grouped by category ---

// Audio
pub use audio::{
    AdaptiveEnergyNormalizer, AudioFrame, BandEnergies, NormalizerConfig, SpectralBand,
    SpectralBands, SpectralConfig, SpectralFrontend, SyntheticConfig, SyntheticSource,
};

// Rhythm & Harmony
pub use harmony::{
    Chroma, HarmonyAnalysis, HarmonyConfig, HarmonyDetector, KeyChange, Mood, ScaleKind,
    Temperature,
};
pub use rhythm::{BeatDetector, BeatEvent, DrumPattern, RhythmAnalysis, RhythmAnalyzer, RhythmConfig};

// Structure & Context
pub use context::{ContextConfig, ContextEngine, MusicalContext, OperatingMode, ReactiveSignals};
pub use prediction::{
    ActionStage, LightingAction, Prediction, PredictionConfig, PredictionKind, PredictionMatrix,
};
pub use section::{SectionAnalysis, SectionConfig, SectionTracker, SectionType, Trend};

// Pipeline
pub use config::{DriverConfig, HarmonyMode, PipelineConfig};
pub use events::{EventBus, PipelineEvent};
pub use logging::LogConfig;
pub use pipeline::{AudioPipeline, PipelineStats, SourceResetHandle, TickOutput};

/// Core error types
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No audio arrived for longer than the silence limit
    #[error("Audio source lost ({silent_ms} ms without frames)")]
    SourceLost {
        /// Time since the last frame
        silent_ms: u64,
    },

    /// The harmony worker could not be started
    #[error("Worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// File access failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
