//! Spectral frontend - windowed FFT, named bands and spectral shape metrics
//!
//! Each [`AudioFrame`] is appended to a rolling FFT input buffer, Hann
//! windowed and transformed with rustfft. Bins are grouped into seven named
//! bands through a fixed frequency-edge table. Shape metrics (centroid,
//! flatness, rolloff, crest, clarity) are derived from the same magnitude
//! spectrum.

use super::agc::{BandAgc, SignalAgc, SignalAgcConfig};
use super::normalizer::{AdaptiveEnergyNormalizer, NormalizerConfig};
use super::AudioFrame;
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};

/// Named frequency band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectralBand {
    /// 20-60 Hz
    SubBass,
    /// 60-250 Hz
    Bass,
    /// 250-500 Hz
    LowMid,
    /// 500-2000 Hz
    Mid,
    /// 2-6 kHz
    HighMid,
    /// 6-16 kHz
    Treble,
    /// 16-22 kHz
    UltraAir,
}

impl SpectralBand {
    /// All bands, lowest first
    pub const ALL: [SpectralBand; 7] = [
        SpectralBand::SubBass,
        SpectralBand::Bass,
        SpectralBand::LowMid,
        SpectralBand::Mid,
        SpectralBand::HighMid,
        SpectralBand::Treble,
        SpectralBand::UltraAir,
    ];

    /// Position of the band in [`SpectralBand::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Lower and upper edge in Hz
    pub fn edges_hz(self) -> (f32, f32) {
        BAND_EDGES_HZ[self.index()]
    }
}

/// Band edge table in Hz, indexed like [`SpectralBand::ALL`]
pub const BAND_EDGES_HZ: [(f32, f32); 7] = [
    (20.0, 60.0),
    (60.0, 250.0),
    (250.0, 500.0),
    (500.0, 2000.0),
    (2000.0, 6000.0),
    (6000.0, 16000.0),
    (16000.0, 22000.0),
];

/// Energy per named band, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandEnergies {
    /// Values indexed by [`SpectralBand::index`]
    pub values: [f32; 7],
}

impl BandEnergies {
    /// Value of one band
    pub fn get(&self, band: SpectralBand) -> f32 {
        self.values[band.index()]
    }

    /// Set one band
    pub fn set(&mut self, band: SpectralBand, value: f32) {
        self.values[band.index()] = value;
    }

    /// Shorthand for the sub-bass band
    pub fn sub_bass(&self) -> f32 {
        self.get(SpectralBand::SubBass)
    }

    /// Shorthand for the bass band
    pub fn bass(&self) -> f32 {
        self.get(SpectralBand::Bass)
    }

    /// Shorthand for the mid band
    pub fn mid(&self) -> f32 {
        self.get(SpectralBand::Mid)
    }

    /// Shorthand for the high-mid band
    pub fn high_mid(&self) -> f32 {
        self.get(SpectralBand::HighMid)
    }

    /// Shorthand for the treble band
    pub fn treble(&self) -> f32 {
        self.get(SpectralBand::Treble)
    }

    /// True when every value is finite and inside [0, 1]
    pub fn is_valid(&self) -> bool {
        self.values
            .iter()
            .all(|v| v.is_finite() && (0.0..=1.0).contains(v))
    }
}

/// Output of the spectral frontend for one frame
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpectralBands {
    /// Timestamp of the source frame
    pub timestamp_ms: u64,
    /// Band energies before gain control
    pub raw: BandEnergies,
    /// Band energies after per-band gain control (equal to `raw` when disabled)
    pub agc: BandEnergies,
    /// Frame loudness, `RMS * sqrt(2)` clamped to [0, 1]
    pub raw_energy: f32,
    /// Loudness relative to the rolling peak, in [0, 1]
    pub energy: f32,
    /// Power-weighted mean frequency in Hz
    pub centroid_hz: f32,
    /// Spectral flatness in [0, 1] (1 = noise, 0 = pure tone)
    pub flatness: f32,
    /// Frequency below which 85 % of the power lies, in Hz
    pub rolloff_hz: f32,
    /// Peak to RMS ratio of the magnitude spectrum
    pub crest: f32,
    /// Combined tonal clarity score in [0, 1]
    pub clarity: f32,
    /// Magnitude spectrum (positive frequencies only)
    #[serde(skip)]
    pub magnitudes: Vec<f32>,
    /// Width of one FFT bin in Hz
    pub bin_hz: f32,
}

/// Configuration for the spectral frontend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    /// Nominal sample rate; each frame's own rate takes precedence
    pub sample_rate: u32,
    /// FFT size (power of 2)
    pub fft_size: usize,
    /// Apply per-band gain control
    pub band_agc: bool,
    /// Apply buffer-level gain control before the FFT
    pub signal_agc: bool,
    /// Parameters for the buffer-level gain control
    pub signal_agc_config: SignalAgcConfig,
    /// Parameters for the rolling-peak normalizer
    pub normalizer: NormalizerConfig,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            fft_size: 4096,
            band_agc: true,
            signal_agc: false,
            signal_agc_config: SignalAgcConfig::default(),
            normalizer: NormalizerConfig::default(),
        }
    }
}

const ROLLOFF_FRACTION: f32 = 0.85;
const FLATNESS_FLOOR: f32 = 1e-10;

/// Windowed FFT analysis with band grouping and normalization.
pub struct SpectralFrontend {
    /// FFT instance
    fft: Arc<dyn Fft<f32>>,
    /// Configuration
    config: SpectralConfig,
    /// Most recent `fft_size` samples
    input_buffer: VecDeque<f32>,
    /// FFT complex buffer
    fft_buffer: Vec<Complex<f32>>,
    /// FFT scratch buffer
    scratch_buffer: Vec<Complex<f32>>,
    /// Hann window coefficients
    window: Vec<f32>,
    /// 2 / sum(window), maps a full-scale sine to magnitude ~1
    magnitude_scale: f32,
    /// Per-band gain control
    band_agc: BandAgc,
    /// Buffer-level gain control
    signal_agc: SignalAgc,
    /// Rolling peak normalizer
    normalizer: AdaptiveEnergyNormalizer,
    /// Last valid output, held when a frame cannot be analyzed
    last_valid: SpectralBands,
    /// Debug: frames analyzed
    frame_count: u64,
}

impl SpectralFrontend {
    /// Create a new frontend
    pub fn new(config: SpectralConfig) -> Self {
        let fft_size = config.fft_size.max(16);

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let scratch_len = fft.get_inplace_scratch_len();

        // Pre-compute Hann window
        let window: Vec<f32> = (0..fft_size)
            .map(|i| {
                let t = i as f32 / (fft_size - 1) as f32;
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * t).cos())
            })
            .collect();
        let window_sum: f32 = window.iter().sum();
        let magnitude_scale = if window_sum > 0.0 {
            2.0 / window_sum
        } else {
            0.0
        };

        debug!(
            "SpectralFrontend created: sample_rate={}, fft_size={}, band_agc={}, signal_agc={}",
            config.sample_rate, fft_size, config.band_agc, config.signal_agc
        );

        Self {
            fft,
            input_buffer: VecDeque::from(vec![0.0; fft_size]),
            fft_buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scratch_buffer: vec![Complex::new(0.0, 0.0); scratch_len],
            window,
            magnitude_scale,
            band_agc: BandAgc::new(),
            signal_agc: SignalAgc::new(config.signal_agc_config.clone()),
            normalizer: AdaptiveEnergyNormalizer::new(config.normalizer.clone()),
            last_valid: SpectralBands::default(),
            frame_count: 0,
            config,
        }
    }

    /// Analyze one frame.
    ///
    /// Empty frames or frames without a sample rate yield the previous valid
    /// result unchanged.
    pub fn analyze(&mut self, frame: &AudioFrame) -> SpectralBands {
        if frame.is_empty() || frame.sample_rate == 0 {
            trace!("SpectralFrontend: empty frame at {} ms, holding", frame.timestamp_ms);
            return self.last_valid.clone();
        }

        // Sanitize input samples: replace NaN/Inf with 0.0
        let mut samples: Vec<f32> = frame
            .samples
            .iter()
            .map(|&s| if s.is_finite() { s } else { 0.0 })
            .collect();

        if self.config.signal_agc {
            self.signal_agc.process(&mut samples);
        }

        let raw_energy = (super::mean_square(&samples).sqrt() * std::f32::consts::SQRT_2)
            .clamp(0.0, 1.0);
        let energy = self.normalizer.normalize(raw_energy);

        let fft_size = self.fft_buffer.len();
        for &s in &samples {
            self.input_buffer.push_back(s);
        }
        while self.input_buffer.len() > fft_size {
            self.input_buffer.pop_front();
        }

        for (i, (sample, w)) in self.input_buffer.iter().zip(&self.window).enumerate() {
            self.fft_buffer[i] = Complex::new(sample * w, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.fft_buffer, &mut self.scratch_buffer);

        let half = fft_size / 2;
        let magnitudes: Vec<f32> = self.fft_buffer[..half]
            .iter()
            .map(|c| c.norm() * self.magnitude_scale)
            .collect();
        let bin_hz = frame.sample_rate as f32 / fft_size as f32;

        let raw = band_energies(&magnitudes, bin_hz);
        let agc = if self.config.band_agc {
            self.band_agc.process(&raw, frame.timestamp_ms)
        } else {
            raw
        };

        let metrics = SpectralMetrics::from_magnitudes(&magnitudes, bin_hz);

        self.frame_count += 1;
        if self.frame_count % 100 == 0 {
            trace!(
                "Spectral #{}: energy={:.3} raw={:.3} centroid={:.0}Hz clarity={:.2}",
                self.frame_count,
                energy,
                raw_energy,
                metrics.centroid_hz,
                metrics.clarity
            );
        }

        let bands = SpectralBands {
            timestamp_ms: frame.timestamp_ms,
            raw,
            agc,
            raw_energy,
            energy,
            centroid_hz: metrics.centroid_hz,
            flatness: metrics.flatness,
            rolloff_hz: metrics.rolloff_hz,
            crest: metrics.crest,
            clarity: metrics.clarity,
            magnitudes,
            bin_hz,
        };
        self.last_valid = bands.clone();
        bands
    }

    /// Clear every rolling state: input buffer, gain controls and normalizer
    pub fn reset(&mut self) {
        for s in self.input_buffer.iter_mut() {
            *s = 0.0;
        }
        self.band_agc.reset();
        self.signal_agc.reset();
        self.normalizer.reset();
        self.last_valid = SpectralBands::default();
        self.frame_count = 0;
    }

    /// Get current configuration
    pub fn config(&self) -> &SpectralConfig {
        &self.config
    }

    /// The normalizer's current rolling peak
    pub fn energy_peak(&self) -> f32 {
        self.normalizer.peak()
    }
}

/// Group magnitude bins into the named bands.
fn band_energies(magnitudes: &[f32], bin_hz: f32) -> BandEnergies {
    let mut out = BandEnergies::default();
    if magnitudes.is_empty() || bin_hz <= 0.0 {
        return out;
    }
    let last_bin = magnitudes.len() - 1;

    for band in SpectralBand::ALL {
        let (lo, hi) = band.edges_hz();
        let min_bin = ((lo / bin_hz).ceil() as usize).max(1);
        let max_bin = ((hi / bin_hz) as usize).min(last_bin);
        if max_bin < min_bin {
            continue;
        }
        let power: f32 = magnitudes[min_bin..=max_bin].iter().map(|m| m * m).sum();
        out.set(band, power.sqrt().clamp(0.0, 1.0));
    }
    out
}

/// Spectral shape descriptors
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpectralMetrics {
    /// Power-weighted mean frequency
    pub centroid_hz: f32,
    /// Geometric over arithmetic mean of the power spectrum
    pub flatness: f32,
    /// 85 % cumulative power frequency
    pub rolloff_hz: f32,
    /// Peak over RMS magnitude
    pub crest: f32,
    /// Tonal clarity score
    pub clarity: f32,
}

impl SpectralMetrics {
    /// Compute all metrics; DC is skipped
    pub fn from_magnitudes(magnitudes: &[f32], bin_hz: f32) -> Self {
        if magnitudes.len() < 2 {
            return Self::default();
        }
        let bins = &magnitudes[1..];
        let nyquist = magnitudes.len() as f32 * bin_hz;

        let mut total_power = 0.0f32;
        let mut weighted = 0.0f32;
        let mut log_sum = 0.0f64;
        let mut peak = 0.0f32;
        for (i, &m) in bins.iter().enumerate() {
            let p = m * m;
            total_power += p;
            weighted += (i + 1) as f32 * bin_hz * p;
            log_sum += (p.max(FLATNESS_FLOOR) as f64).ln();
            peak = peak.max(m);
        }

        if total_power <= FLATNESS_FLOOR {
            return Self {
                rolloff_hz: nyquist,
                ..Self::default()
            };
        }

        let n = bins.len() as f32;
        let centroid_hz = weighted / total_power;

        let geometric = (log_sum / bins.len() as f64).exp() as f32;
        let arithmetic = total_power / n;
        let flatness = (geometric / arithmetic.max(FLATNESS_FLOOR)).clamp(0.0, 1.0);

        let mut rolloff_hz = nyquist;
        let mut cumulative = 0.0f32;
        for (i, &m) in bins.iter().enumerate() {
            cumulative += m * m;
            if cumulative >= ROLLOFF_FRACTION * total_power {
                rolloff_hz = (i + 1) as f32 * bin_hz;
                break;
            }
        }

        let rms = (total_power / n).sqrt();
        let crest = if rms > 0.0 { peak / rms } else { 0.0 };

        let top_start = bins.len() - (bins.len() / 10).max(1);
        let top_power: f32 = bins[top_start..].iter().map(|m| m * m).sum();
        let hf_ratio = top_power / total_power;

        let clarity = (0.4 * (1.0 - flatness) + 0.3 * (crest / 6.0).min(1.0) + 0.3 * hf_ratio)
            .clamp(0.0, 1.0);

        Self {
            centroid_hz,
            flatness,
            rolloff_hz,
            crest,
            clarity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_frame(freq: f32, amplitude: f32, start: usize, len: usize, t0: u64) -> AudioFrame {
        let samples = (start..start + len)
            .map(|n| {
                let phase = (freq as f64 * n as f64 / 44100.0).fract();
                amplitude * (2.0 * std::f64::consts::PI * phase).sin() as f32
            })
            .collect();
        AudioFrame::new(samples, t0, 44100)
    }

    fn warm(frontend: &mut SpectralFrontend, freq: f32, amplitude: f32) -> SpectralBands {
        let mut out = SpectralBands::default();
        for i in 0..6u64 {
            let frame = sine_frame(freq, amplitude, i as usize * 1024, 1024, i * 23);
            out = frontend.analyze(&frame);
        }
        out
    }

    #[test]
    fn test_create_frontend() {
        let frontend = SpectralFrontend::new(SpectralConfig::default());
        assert_eq!(frontend.config().fft_size, 4096);
    }

    #[test]
    fn test_band_mapping() {
        let mut frontend = SpectralFrontend::new(SpectralConfig::default());
        let bands = warm(&mut frontend, 100.0, 0.8);
        assert!(
            bands.raw.bass() > 0.5,
            "100 Hz should land in bass, got {:?}",
            bands.raw
        );
        assert!(bands.raw.treble() < 0.05, "treble leak {:?}", bands.raw);

        let mut frontend = SpectralFrontend::new(SpectralConfig::default());
        let bands = warm(&mut frontend, 8000.0, 0.8);
        assert!(bands.raw.treble() > 0.5, "8 kHz should land in treble");
        assert!(bands.raw.bass() < 0.05);
    }

    #[test]
    fn test_raw_energy_of_sine() {
        let mut frontend = SpectralFrontend::new(SpectralConfig::default());
        let bands = warm(&mut frontend, 440.0, 0.5);
        assert!(
            (bands.raw_energy - 0.5).abs() < 0.02,
            "sine RMS*sqrt2 should equal amplitude, got {}",
            bands.raw_energy
        );
        assert!((0.0..=1.0).contains(&bands.energy));
    }

    #[test]
    fn test_pure_tone_metrics() {
        let mut frontend = SpectralFrontend::new(SpectralConfig::default());
        let bands = warm(&mut frontend, 1000.0, 0.7);
        assert!(bands.flatness < 0.1, "tone flatness {}", bands.flatness);
        assert!(
            (bands.centroid_hz - 1000.0).abs() < 100.0,
            "centroid {}",
            bands.centroid_hz
        );
        assert!(bands.rolloff_hz < 1200.0, "rolloff {}", bands.rolloff_hz);
        assert!(bands.crest > 6.0);
        assert!(bands.clarity > 0.6, "clarity {}", bands.clarity);
    }

    #[test]
    fn test_silence_metrics() {
        let metrics = SpectralMetrics::from_magnitudes(&[0.0; 64], 10.0);
        assert_eq!(metrics.centroid_hz, 0.0);
        assert_eq!(metrics.rolloff_hz, 640.0);
        assert_eq!(metrics.clarity, 0.0);
    }

    #[test]
    fn test_flat_spectrum_is_flat() {
        let metrics = SpectralMetrics::from_magnitudes(&[0.5; 128], 10.0);
        assert!((metrics.flatness - 1.0).abs() < 1e-3);
        assert!((metrics.crest - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_resilience_to_bad_input() {
        let mut frontend = SpectralFrontend::new(SpectralConfig::default());
        let mut samples = vec![0.1f32; 1024];
        samples[10] = f32::NAN;
        samples[20] = f32::INFINITY;
        let bands = frontend.analyze(&AudioFrame::new(samples, 0, 44100));
        assert!(bands.raw.is_valid());
        assert!(bands.agc.is_valid());
        assert!(bands.energy.is_finite());
        assert!(bands.clarity.is_finite());
    }

    #[test]
    fn test_empty_frame_holds_previous() {
        let mut frontend = SpectralFrontend::new(SpectralConfig::default());
        let before = warm(&mut frontend, 200.0, 0.5);
        let held = frontend.analyze(&AudioFrame::new(Vec::new(), 500, 44100));
        assert_eq!(held.timestamp_ms, before.timestamp_ms);
        assert_eq!(held.raw, before.raw);
    }

    #[test]
    fn test_reset() {
        let mut frontend = SpectralFrontend::new(SpectralConfig::default());
        warm(&mut frontend, 200.0, 0.9);
        frontend.reset();
        let bands = frontend.analyze(&AudioFrame::new(vec![0.0; 1024], 0, 44100));
        assert_eq!(bands.raw_energy, 0.0);
        assert!(bands.raw.bass() < 1e-6, "input buffer not cleared");
    }
}
