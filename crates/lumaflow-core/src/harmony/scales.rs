//! Scale templates, scale matching and mood mapping.

use serde::{Deserialize, Serialize};

/// Pitch-class names, C = 0
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Name of a pitch class
pub fn note_name(pitch_class: usize) -> &'static str {
    NOTE_NAMES[pitch_class % 12]
}

/// Chroma value above which a pitch class counts as present
pub const NOTE_THRESHOLD: f32 = 0.15;

/// Known scales and modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleKind {
    /// Ionian
    Major,
    /// Aeolian
    Minor,
    /// Minor with a major sixth
    Dorian,
    /// Minor with a flat second
    Phrygian,
    /// Major with a sharp fourth
    Lydian,
    /// Major with a flat seventh
    Mixolydian,
    /// Flat second and flat fifth
    Locrian,
    /// Minor with a major seventh
    HarmonicMinor,
    /// Minor with major sixth and seventh
    MelodicMinor,
    /// Five-note major
    PentatonicMajor,
    /// Five-note minor
    PentatonicMinor,
    /// Minor pentatonic plus the flat fifth
    Blues,
    /// All twelve pitch classes
    Chromatic,
}

impl ScaleKind {
    /// Match order; ties keep the earlier entry
    pub const ALL: [ScaleKind; 13] = [
        ScaleKind::Major,
        ScaleKind::Minor,
        ScaleKind::Dorian,
        ScaleKind::Phrygian,
        ScaleKind::Lydian,
        ScaleKind::Mixolydian,
        ScaleKind::Locrian,
        ScaleKind::HarmonicMinor,
        ScaleKind::MelodicMinor,
        ScaleKind::PentatonicMajor,
        ScaleKind::PentatonicMinor,
        ScaleKind::Blues,
        ScaleKind::Chromatic,
    ];

    /// Semitone offsets from the root
    pub fn intervals(self) -> &'static [usize] {
        match self {
            ScaleKind::Major => &[0, 2, 4, 5, 7, 9, 11],
            ScaleKind::Minor => &[0, 2, 3, 5, 7, 8, 10],
            ScaleKind::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            ScaleKind::Phrygian => &[0, 1, 3, 5, 7, 8, 10],
            ScaleKind::Lydian => &[0, 2, 4, 6, 7, 9, 11],
            ScaleKind::Mixolydian => &[0, 2, 4, 5, 7, 9, 10],
            ScaleKind::Locrian => &[0, 1, 3, 5, 6, 8, 10],
            ScaleKind::HarmonicMinor => &[0, 2, 3, 5, 7, 8, 11],
            ScaleKind::MelodicMinor => &[0, 2, 3, 5, 7, 9, 11],
            ScaleKind::PentatonicMajor => &[0, 2, 4, 7, 9],
            ScaleKind::PentatonicMinor => &[0, 3, 5, 7, 10],
            ScaleKind::Blues => &[0, 3, 5, 6, 7, 10],
            ScaleKind::Chromatic => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
        }
    }

    /// Intervals that distinguish this scale from its neighbours
    fn characteristic(self) -> &'static [usize] {
        match self {
            ScaleKind::Major => &[4, 11],
            ScaleKind::Minor => &[3, 10],
            ScaleKind::Dorian => &[3, 9],
            ScaleKind::Phrygian => &[1, 3],
            ScaleKind::Lydian => &[4, 6],
            ScaleKind::Mixolydian => &[4, 10],
            ScaleKind::Locrian => &[1, 6],
            ScaleKind::HarmonicMinor => &[3, 11],
            ScaleKind::MelodicMinor => &[3, 9, 11],
            ScaleKind::PentatonicMajor => &[4, 9],
            ScaleKind::PentatonicMinor => &[3, 10],
            ScaleKind::Blues => &[3, 6],
            ScaleKind::Chromatic => &[],
        }
    }

    /// Emotional category of the scale
    pub fn mood(self) -> Mood {
        match self {
            ScaleKind::Major => Mood::Happy,
            ScaleKind::Lydian => Mood::Dreamy,
            ScaleKind::Mixolydian | ScaleKind::PentatonicMinor | ScaleKind::Blues => Mood::Bluesy,
            ScaleKind::Minor => Mood::Sad,
            ScaleKind::Dorian | ScaleKind::MelodicMinor => Mood::Jazzy,
            ScaleKind::HarmonicMinor | ScaleKind::Locrian | ScaleKind::Chromatic => Mood::Tense,
            ScaleKind::Phrygian => Mood::SpanishExotic,
            ScaleKind::PentatonicMajor => Mood::Universal,
        }
    }

    /// Pitch classes of the scale on `root`
    pub fn notes(self, root: usize) -> impl Iterator<Item = usize> {
        self.intervals().iter().map(move |i| (root + i) % 12)
    }
}

/// Emotional category derived from the detected scale
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    /// Major
    Happy,
    /// Minor
    Sad,
    /// Dorian, melodic minor
    Jazzy,
    /// Harmonic minor, locrian, chromatic
    Tense,
    /// Lydian
    Dreamy,
    /// Mixolydian, minor pentatonic, blues
    Bluesy,
    /// Phrygian
    SpanishExotic,
    /// Major pentatonic, or no tonal information
    #[default]
    Universal,
}

impl Mood {
    /// Colour temperature associated with the mood
    pub fn temperature(self) -> Temperature {
        match self {
            Mood::Happy | Mood::Bluesy | Mood::SpanishExotic => Temperature::Warm,
            Mood::Dreamy | Mood::Sad | Mood::Jazzy => Temperature::Cool,
            Mood::Tense | Mood::Universal => Temperature::Neutral,
        }
    }
}

/// Colour temperature hint for lighting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Temperature {
    /// Ambers and reds
    Warm,
    /// Blues and violets
    Cool,
    /// White
    #[default]
    Neutral,
}

/// Best scale/root fit for a chroma vector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleMatch {
    /// Root pitch class
    pub root: usize,
    /// Scale or mode
    pub scale: ScaleKind,
    /// Match quality in [0, 1]
    pub confidence: f32,
    /// Present notes that are in the scale
    pub matched_notes: usize,
}

/// Find the best-fitting root and scale.
///
/// Every root is tried against every template; a later candidate only wins
/// with a strictly higher score.
pub fn identify_scale(chroma: &[f32; 12]) -> ScaleMatch {
    let present: Vec<usize> = (0..12).filter(|&i| chroma[i] > NOTE_THRESHOLD).collect();
    if present.is_empty() {
        return ScaleMatch {
            root: 0,
            scale: ScaleKind::Chromatic,
            confidence: 0.0,
            matched_notes: 0,
        };
    }

    let max = chroma.iter().copied().fold(0.0f32, f32::max);
    let mut best: Option<ScaleMatch> = None;
    for root in 0..12 {
        for scale in ScaleKind::ALL {
            let candidate = score(root, scale, &present, chroma, max);
            if best.map_or(true, |b| candidate.confidence > b.confidence) {
                best = Some(candidate);
            }
        }
    }
    best.unwrap_or(ScaleMatch {
        root: 0,
        scale: ScaleKind::Chromatic,
        confidence: 0.0,
        matched_notes: 0,
    })
}

fn score(root: usize, scale: ScaleKind, present: &[usize], chroma: &[f32; 12], max: f32) -> ScaleMatch {
    let mut in_scale = [false; 12];
    for note in scale.notes(root) {
        in_scale[note] = true;
    }

    let (mut matched, mut in_energy, mut out_energy) = (0usize, 0.0f32, 0.0f32);
    for &note in present {
        if in_scale[note] {
            matched += 1;
            in_energy += chroma[note];
        } else {
            out_energy += chroma[note];
        }
    }

    let total = in_energy + out_energy;
    let energy_ratio = if total > 0.0 { in_energy / total } else { 0.0 };
    let note_ratio = matched as f32 / present.len() as f32;
    let root_dominance = if max > 0.0 { chroma[root] / max } else { 0.0 };

    let characteristic = scale.characteristic();
    let bonus = if characteristic.is_empty() {
        0.0
    } else {
        characteristic
            .iter()
            .map(|i| chroma[(root + i) % 12])
            .filter(|&v| v > NOTE_THRESHOLD)
            .sum::<f32>()
            / characteristic.len() as f32
    };
    let size_penalty = if scale.intervals().len() > 8 { 0.2 } else { 0.0 };

    let confidence = (note_ratio * 0.35 + energy_ratio * 0.25 + root_dominance * 0.25
        + bonus * 0.15
        - size_penalty)
        .clamp(0.0, 1.0);

    ScaleMatch {
        root,
        scale,
        confidence,
        matched_notes: matched,
    }
}
