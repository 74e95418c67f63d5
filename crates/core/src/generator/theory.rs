//! Musical vocabulary shared by the generator, the scheduler context and the
//! reference voicing.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{AuraError, Result};

/// MIDI pitch of C4.
pub const MIDI_C4: u8 = 60;

/// Octave the progression roots are anchored in.
pub const CHORD_ROOT_OCTAVE: i32 = 3;

/// The twelve pitch classes, in draw order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PitchClass {
    C,
    #[serde(rename = "C#")]
    CSharp,
    D,
    #[serde(rename = "D#")]
    DSharp,
    E,
    F,
    #[serde(rename = "F#")]
    FSharp,
    G,
    #[serde(rename = "G#")]
    GSharp,
    A,
    #[serde(rename = "A#")]
    ASharp,
    B,
}

impl PitchClass {
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    /// Semitones above C.
    pub fn semitone(self) -> u8 {
        self as u8
    }

    pub fn from_semitone(semitone: u8) -> Self {
        Self::ALL[usize::from(semitone % 12)]
    }

    pub fn name(self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::CSharp => "C#",
            PitchClass::D => "D",
            PitchClass::DSharp => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::FSharp => "F#",
            PitchClass::G => "G",
            PitchClass::GSharp => "G#",
            PitchClass::A => "A",
            PitchClass::ASharp => "A#",
            PitchClass::B => "B",
        }
    }

    /// MIDI pitch of this pitch class in the given octave (`C4` = 60).
    pub fn midi_in_octave(self, octave: i32) -> i32 {
        i32::from(self.semitone()) + (octave + 1) * 12
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Named scales in draw order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScaleName {
    Lydian,
    Dorian,
    NaturalMinor,
    Aeolian,
    MixolydianFlat6,
}

impl ScaleName {
    pub const ALL: [ScaleName; 5] = [
        ScaleName::Lydian,
        ScaleName::Dorian,
        ScaleName::NaturalMinor,
        ScaleName::Aeolian,
        ScaleName::MixolydianFlat6,
    ];

    /// Ascending semitone offsets from the root, always starting at 0.
    pub fn intervals(self) -> &'static [u8] {
        match self {
            ScaleName::Lydian => &[0, 2, 4, 6, 7, 9, 11],
            ScaleName::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            ScaleName::NaturalMinor | ScaleName::Aeolian => &[0, 2, 3, 5, 7, 8, 10],
            ScaleName::MixolydianFlat6 => &[0, 2, 4, 5, 7, 8, 10],
        }
    }
}

impl fmt::Display for ScaleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScaleName::Lydian => "Lydian",
            ScaleName::Dorian => "Dorian",
            ScaleName::NaturalMinor => "Natural Minor",
            ScaleName::Aeolian => "Aeolian",
            ScaleName::MixolydianFlat6 => "Mixolydian b6",
        };
        f.write_str(name)
    }
}

/// Chord qualities the engine knows how to name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChordQuality {
    #[serde(rename = "MAJOR_7")]
    Major7,
    #[serde(rename = "MINOR_7")]
    Minor7,
    #[serde(rename = "MAJOR_9")]
    Major9,
    #[serde(rename = "MINOR_9")]
    Minor9,
    #[serde(rename = "ADD_9")]
    Add9,
    #[serde(rename = "MINOR_ADD_9")]
    MinorAdd9,
    #[serde(rename = "DOMINANT_7")]
    Dominant7,
}

impl ChordQuality {
    /// The soft extended qualities drawn for progressions, in draw order.
    /// Dominant 7 is deliberately absent.
    pub const DREAMY: [ChordQuality; 6] = [
        ChordQuality::Major7,
        ChordQuality::Minor7,
        ChordQuality::Major9,
        ChordQuality::Minor9,
        ChordQuality::Add9,
        ChordQuality::MinorAdd9,
    ];

    /// Semitone offsets of the chord tones above the root.
    pub fn intervals(self) -> &'static [u8] {
        match self {
            ChordQuality::Major7 => &[0, 4, 7, 11],
            ChordQuality::Minor7 => &[0, 3, 7, 10],
            ChordQuality::Dominant7 => &[0, 4, 7, 10],
            ChordQuality::Minor9 => &[0, 3, 7, 10, 14],
            ChordQuality::Major9 => &[0, 4, 7, 11, 14],
            ChordQuality::Add9 => &[0, 4, 7, 14],
            ChordQuality::MinorAdd9 => &[0, 3, 7, 14],
        }
    }

    /// Chord-symbol suffix, e.g. `maj7`.
    pub fn suffix(self) -> &'static str {
        match self {
            ChordQuality::Major7 => "maj7",
            ChordQuality::Minor7 => "m7",
            ChordQuality::Major9 => "maj9",
            ChordQuality::Minor9 => "m9",
            ChordQuality::Add9 => "add9",
            ChordQuality::MinorAdd9 => "madd9",
            ChordQuality::Dominant7 => "7",
        }
    }

    /// A dominant 7 sitting on the fifth degree is too strong for the
    /// intended mood and is replaced by a major 7.
    pub fn softened_for_degree(self, degree_index: usize) -> Self {
        if degree_index == 4 && self == ChordQuality::Dominant7 {
            ChordQuality::Major7
        } else {
            self
        }
    }
}

/// Parses names such as `C#4`, `Eb3` or `a2` into MIDI pitches.
pub fn note_name_to_midi(name: &str) -> Result<i32> {
    let mut chars = name.chars();
    let letter = chars
        .next()
        .ok_or(AuraError::InvalidInput("note name is empty"))?;
    let base = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return Err(AuraError::msg(format!("invalid note name `{name}`"))),
    };

    let rest = chars.as_str();
    let (accidental, octave) = match rest.chars().next() {
        Some('#') => (1, &rest[1..]),
        Some('b') => (-1, &rest[1..]),
        _ => (0, rest),
    };
    let octave: i32 = octave
        .parse()
        .map_err(|_| AuraError::msg(format!("invalid octave in note name `{name}`")))?;

    Ok(base + accidental + (octave + 1) * 12)
}

/// Equal-tempered frequency of a MIDI pitch with A4 = 440 Hz.
pub fn midi_to_frequency(midi: f64) -> f64 {
    440.0 * 2f64.powf((midi - 69.0) / 12.0)
}

/// Absolute MIDI pitches of a chord built on `root`.
pub fn chord_tones(root: i32, quality: ChordQuality) -> Vec<i32> {
    quality
        .intervals()
        .iter()
        .map(|interval| root + i32::from(*interval))
        .collect()
}
