//! Seeded song generation.
//!
//! A seed string is hashed into an [`Lcg`] and every musical choice consumes
//! exactly one draw, in this order:
//!
//! 1. key
//! 2. scale
//! 3. tempo
//! 4. progression length
//! 5. degree pattern, then one quality draw per chord
//! 6. rhythmic DNA: base pulse, syncopation, density
//! 7. per section (Intro, Build, Peak, Drift, Outro): duration, then intensity
//!
//! Reordering any of these changes the song every existing seed maps to.

pub mod rng;
pub mod theory;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::GeneratorConfig;

pub use rng::{fresh_seed, hash_seed, Lcg};
pub use theory::{ChordQuality, PitchClass, ScaleName};

/// Probability of a four-chord loop; eight chords otherwise.
const FOUR_CHORD_PROBABILITY: f64 = 0.6;

/// Scale-degree sequences the progression is drawn from.
const DEGREE_PATTERNS: [[usize; 4]; 4] = [
    [0, 3, 5, 1], // I-IV-vi-ii
    [0, 5, 2, 4], // I-vi-iii-V
    [0, 3, 0, 5], // I-IV-I-vi
    [1, 3, 5, 0], // ii-IV-vi-I
];

/// Everything the engine needs to play one song. Immutable once generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongParameters {
    /// The exact seed the song was derived from. Replaying it reproduces the
    /// song.
    pub seed: String,
    pub key: PitchClass,
    pub scale_name: ScaleName,
    pub scale: Vec<u8>,
    pub tempo: u32,
    pub chord_progression: Vec<ChordEntry>,
    #[serde(rename = "rhythmicDNA")]
    pub rhythmic_dna: RhythmicDna,
    pub song_structure: Vec<SongSection>,
}

impl SongParameters {
    /// Total length of the arrangement in bars.
    pub fn total_bars(&self) -> u32 {
        self.song_structure
            .iter()
            .map(|section| section.duration_bars)
            .sum()
    }
}

/// One chord of the looping progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChordEntry {
    /// 0-based position within the active scale.
    pub scale_degree_index: usize,
    /// MIDI pitch of the chord root.
    pub root_pitch: i32,
    pub quality_name: ChordQuality,
}

impl ChordEntry {
    pub fn tones(&self) -> Vec<i32> {
        theory::chord_tones(self.root_pitch, self.quality_name)
    }

    /// Chord symbol such as `F#m9`.
    pub fn symbol(&self) -> String {
        let root = PitchClass::from_semitone(self.root_pitch.rem_euclid(12) as u8);
        format!("{}{}", root, self.quality_name.suffix())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasePulse {
    Whole,
    Half,
    QuarterDotted,
}

impl BasePulse {
    pub const ALL: [BasePulse; 3] = [BasePulse::Whole, BasePulse::Half, BasePulse::QuarterDotted];

    /// Pulse length in beats.
    pub fn beats(self) -> f64 {
        match self {
            BasePulse::Whole => 4.0,
            BasePulse::Half => 2.0,
            BasePulse::QuarterDotted => 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Syncopation {
    None,
    Low,
    MediumGentle,
}

impl Syncopation {
    pub const ALL: [Syncopation; 3] = [Syncopation::None, Syncopation::Low, Syncopation::MediumGentle];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Density {
    Sparse,
    MediumSparse,
    Medium,
}

impl Density {
    pub const ALL: [Density; 3] = [Density::Sparse, Density::MediumSparse, Density::Medium];

    /// Rough share of eligible slots that should sound.
    pub fn fill(self) -> f64 {
        match self {
            Density::Sparse => 0.25,
            Density::MediumSparse => 0.4,
            Density::Medium => 0.55,
        }
    }
}

/// Qualitative rhythmic tendencies consumed by instrument logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RhythmicDna {
    pub base_pulse: BasePulse,
    pub syncopation: Syncopation,
    pub density: Density,
}

/// The five sections every song walks through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SectionName {
    Intro,
    Build,
    Peak,
    Drift,
    Outro,
}

impl SectionName {
    pub const ORDER: [SectionName; 5] = [
        SectionName::Intro,
        SectionName::Build,
        SectionName::Peak,
        SectionName::Drift,
        SectionName::Outro,
    ];

    pub fn blueprint(self) -> SectionBlueprint {
        match self {
            SectionName::Intro => SectionBlueprint::new(4, 8, 0.2, 0.1),
            SectionName::Build => SectionBlueprint::new(8, 16, 0.5, 0.2),
            SectionName::Peak => SectionBlueprint::new(8, 16, 0.8, 0.15),
            SectionName::Drift => SectionBlueprint::new(8, 16, 0.4, 0.2),
            SectionName::Outro => SectionBlueprint::new(4, 12, 0.1, 0.1),
        }
    }
}

impl fmt::Display for SectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Bar range and intensity envelope of a section type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SectionBlueprint {
    pub min_bars: u32,
    pub max_bars: u32,
    pub intensity_target: f64,
    pub intensity_jitter: f64,
}

impl SectionBlueprint {
    const fn new(min_bars: u32, max_bars: u32, intensity_target: f64, intensity_jitter: f64) -> Self {
        Self {
            min_bars,
            max_bars,
            intensity_target,
            intensity_jitter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongSection {
    pub name: SectionName,
    pub duration_bars: u32,
    /// 0..=1, rounded to two decimals.
    pub intensity: f64,
}

/// Derives songs from seeds within configured bounds.
#[derive(Debug, Clone, Default)]
pub struct SongGenerator {
    config: GeneratorConfig,
}

impl SongGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// Derives a complete song. An empty seed is replaced by a fresh one,
    /// which is recorded in the result so the song can be replayed.
    pub fn generate(&self, seed: &str) -> SongParameters {
        let seed = if seed.is_empty() {
            let fresh = fresh_seed();
            tracing::debug!(seed = %fresh, "empty seed replaced with a fresh one");
            fresh
        } else {
            seed.to_string()
        };

        let mut rng = Lcg::from_seed_str(&seed);

        let key = *rng.pick(&PitchClass::ALL);
        let scale_name = *rng.pick(&ScaleName::ALL);
        let scale = scale_name.intervals().to_vec();

        let (min, max) = (self.config.tempo_min, self.config.tempo_max.max(self.config.tempo_min));
        let tempo = rng.range_inclusive(min, max).clamp(min, max);

        let length = if rng.next_unit() < FOUR_CHORD_PROBABILITY { 4 } else { 8 };
        let chord_progression = build_progression(&mut rng, key, &scale, length);
        let rhythmic_dna = build_rhythmic_dna(&mut rng);
        let song_structure = build_structure(&mut rng);

        SongParameters {
            seed,
            key,
            scale_name,
            scale,
            tempo,
            chord_progression,
            rhythmic_dna,
            song_structure,
        }
    }
}

/// Derives a song with the default tempo range.
pub fn generate(seed: &str) -> SongParameters {
    SongGenerator::default().generate(seed)
}

fn build_progression(rng: &mut Lcg, key: PitchClass, scale: &[u8], length: usize) -> Vec<ChordEntry> {
    let pattern = rng.pick(&DEGREE_PATTERNS);
    let key_root = key.midi_in_octave(theory::CHORD_ROOT_OCTAVE);

    (0..length)
        .map(|position| {
            // Scales shorter than seven degrees wrap instead of failing.
            let degree = pattern[position % pattern.len()] % scale.len();
            let quality = rng.pick(&ChordQuality::DREAMY).softened_for_degree(degree);
            ChordEntry {
                scale_degree_index: degree,
                root_pitch: key_root + i32::from(scale[degree]),
                quality_name: quality,
            }
        })
        .collect()
}

fn build_rhythmic_dna(rng: &mut Lcg) -> RhythmicDna {
    RhythmicDna {
        base_pulse: *rng.pick(&BasePulse::ALL),
        syncopation: *rng.pick(&Syncopation::ALL),
        density: *rng.pick(&Density::ALL),
    }
}

fn build_structure(rng: &mut Lcg) -> Vec<SongSection> {
    SectionName::ORDER
        .iter()
        .map(|&name| {
            let blueprint = name.blueprint();
            let duration_bars = rng.range_inclusive(blueprint.min_bars, blueprint.max_bars);
            let intensity = rng
                .jitter(blueprint.intensity_target, blueprint.intensity_jitter)
                .clamp(0.0, 1.0);
            SongSection {
                name,
                duration_bars,
                intensity: (intensity * 100.0).round() / 100.0,
            }
        })
        .collect()
}

/// Renders the URL fragment a seed is shared through, e.g. `#seed=demo`.
pub fn share_fragment(seed: &str) -> String {
    let mut fragment = String::from("#seed=");
    for byte in seed.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            fragment.push(char::from(byte));
        } else {
            fragment.push_str(&format!("%{byte:02X}"));
        }
    }
    fragment
}

/// Extracts the seed from a fragment produced by [`share_fragment`]. Returns
/// `None` when the fragment carries no seed or is not valid percent-encoding.
pub fn seed_from_fragment(fragment: &str) -> Option<String> {
    let query = fragment.strip_prefix('#').unwrap_or(fragment);
    let encoded = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("seed="))?;

    let bytes = encoded.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'%' => {
                let hex = encoded.get(index + 1..index + 3)?;
                decoded.push(u8::from_str_radix(hex, 16).ok()?);
                index += 3;
            }
            byte => {
                decoded.push(byte);
                index += 1;
            }
        }
    }

    let seed = String::from_utf8(decoded).ok()?;
    (!seed.is_empty()).then_some(seed)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn assert_structure_valid(params: &SongParameters) {
        let names: Vec<_> = params.song_structure.iter().map(|s| s.name).collect();
        assert_eq!(names, SectionName::ORDER.to_vec());
        for section in &params.song_structure {
            let blueprint = section.name.blueprint();
            assert!(section.duration_bars >= blueprint.min_bars);
            assert!(section.duration_bars <= blueprint.max_bars);
            assert!((0.0..=1.0).contains(&section.intensity));
        }
    }

    #[test]
    fn demo_seed_is_reproducible() {
        let first = generate("demo");
        let second = generate("demo");

        assert_eq!(first, second);
        assert_eq!(first.seed, "demo");
        assert!((40..=65).contains(&first.tempo));
        assert!(matches!(first.chord_progression.len(), 4 | 8));
        assert_structure_valid(&first);
    }

    #[test]
    fn demo_seed_follows_the_draw_order() {
        let mut rng = Lcg::from_seed_str("demo");
        let key = PitchClass::ALL[rng.pick_index(12)];
        let scale = ScaleName::ALL[rng.pick_index(5)];
        let tempo = rng.range_inclusive(40, 65);

        let params = generate("demo");
        assert_eq!(params.key, key);
        assert_eq!(params.scale_name, scale);
        assert_eq!(params.tempo, tempo);
    }

    fn chord(scale_degree_index: usize, root_pitch: i32, quality_name: ChordQuality) -> ChordEntry {
        ChordEntry {
            scale_degree_index,
            root_pitch,
            quality_name,
        }
    }

    fn section(name: SectionName, duration_bars: u32, intensity: f64) -> SongSection {
        SongSection {
            name,
            duration_bars,
            intensity,
        }
    }

    #[test]
    fn demo_seed_maps_to_a_fixed_song() {
        use ChordQuality::*;
        use SectionName::*;

        let expected = SongParameters {
            seed: "demo".to_string(),
            key: PitchClass::A,
            scale_name: ScaleName::Dorian,
            scale: vec![0, 2, 3, 5, 7, 9, 10],
            tempo: 48,
            chord_progression: vec![
                chord(1, 59, Major7),
                chord(3, 62, MinorAdd9),
                chord(5, 66, Major7),
                chord(0, 57, Minor9),
            ],
            rhythmic_dna: RhythmicDna {
                base_pulse: BasePulse::QuarterDotted,
                syncopation: Syncopation::Low,
                density: Density::Sparse,
            },
            song_structure: vec![
                section(Intro, 5, 0.3),
                section(Build, 12, 0.36),
                section(Peak, 10, 0.94),
                section(Drift, 12, 0.52),
                section(Outro, 6, 0.19),
            ],
        };
        assert_eq!(generate("demo"), expected);
    }

    #[test]
    fn eight_chord_seed_maps_to_a_fixed_song() {
        use ChordQuality::*;

        let params = generate("tide");
        assert_eq!(params.key, PitchClass::ASharp);
        assert_eq!(params.scale_name, ScaleName::Lydian);
        assert_eq!(params.tempo, 60);
        assert_eq!(
            params.chord_progression,
            vec![
                chord(0, 58, Major7),
                chord(5, 67, Add9),
                chord(2, 62, Add9),
                chord(4, 65, Minor7),
                chord(0, 58, Minor7),
                chord(5, 67, Major9),
                chord(2, 62, Minor9),
                chord(4, 65, Add9),
            ]
        );
        assert_eq!(
            params.rhythmic_dna,
            RhythmicDna {
                base_pulse: BasePulse::Whole,
                syncopation: Syncopation::Low,
                density: Density::Sparse,
            }
        );
        let structure: Vec<_> = params
            .song_structure
            .iter()
            .map(|section| (section.duration_bars, section.intensity))
            .collect();
        assert_eq!(structure, vec![(6, 0.16), (16, 0.56), (15, 0.81), (10, 0.55), (10, 0.15)]);
    }

    #[test]
    fn extreme_tempo_range_does_not_overflow() {
        let generator = SongGenerator::new(GeneratorConfig {
            tempo_min: 0,
            tempo_max: u32::MAX,
        });
        for seed in ["demo", "tide", "x"] {
            let params = generator.generate(seed);
            let reference = generate(seed);
            assert_eq!(params.key, reference.key);
            assert_eq!(params.song_structure, reference.song_structure);
        }
    }

    #[test]
    fn single_character_change_alters_the_song() {
        let musical = |params: SongParameters| {
            (
                params.key,
                params.tempo,
                params.chord_progression,
                params.song_structure,
            )
        };
        let base = musical(generate("demo"));
        for variant in ["demp", "Demo", "demo1", "dem"] {
            assert_ne!(musical(generate(variant)), base, "seed {variant} collided with demo");
        }
    }

    #[test]
    fn empty_seed_records_a_replayable_seed() {
        let params = generate("");
        assert!(!params.seed.is_empty());
        assert_eq!(generate(&params.seed), params);
    }

    #[test]
    fn generators_do_not_share_state() {
        let generator = SongGenerator::default();
        let a1 = generator.generate("alpha");
        let _ = generator.generate("beta");
        let a2 = generator.generate("alpha");
        assert_eq!(a1, a2);
    }

    #[test]
    fn tempo_honours_configured_range() {
        let generator = SongGenerator::new(GeneratorConfig {
            tempo_min: 90,
            tempo_max: 90,
        });
        for seed in ["a", "b", "c", "demo"] {
            assert_eq!(generator.generate(seed).tempo, 90);
        }
    }

    #[test]
    fn short_scales_wrap_degree_indices() {
        let pentatonic = [0, 3, 5, 7, 10];
        for seed in 0..64 {
            let mut rng = Lcg::new(seed);
            let progression = build_progression(&mut rng, PitchClass::A, &pentatonic, 8);
            for chord in progression {
                assert!(chord.scale_degree_index < pentatonic.len());
                assert_eq!(
                    chord.root_pitch,
                    PitchClass::A.midi_in_octave(3) + i32::from(pentatonic[chord.scale_degree_index])
                );
            }
        }
    }

    #[test]
    fn eight_chord_loops_repeat_their_degree_pattern() {
        let mut rng = Lcg::new(7);
        let progression = build_progression(&mut rng, PitchClass::C, ScaleName::Dorian.intervals(), 8);
        for position in 0..4 {
            assert_eq!(
                progression[position].scale_degree_index,
                progression[position + 4].scale_degree_index
            );
        }
    }

    #[test]
    fn serialises_with_data_model_field_names() {
        let json = serde_json::to_value(generate("demo")).unwrap();
        assert_eq!(json["seed"], "demo");
        assert!(json.get("scaleName").is_some());
        assert!(json.get("chordProgression").is_some());
        assert!(json.get("rhythmicDNA").is_some());
        assert!(json["songStructure"][0].get("durationBars").is_some());
    }

    #[test]
    fn share_fragment_round_trips() {
        for seed in ["demo", "a b/c", "søng"] {
            let fragment = share_fragment(seed);
            assert!(fragment.starts_with("#seed="));
            assert_eq!(seed_from_fragment(&fragment).as_deref(), Some(seed));
        }
        assert_eq!(seed_from_fragment("#other=1"), None);
        assert_eq!(seed_from_fragment("#seed=%G1"), None);
    }

    proptest! {
        #[test]
        fn any_seed_is_deterministic_and_well_formed(seed in "\\PC{1,24}") {
            let first = generate(&seed);
            let second = generate(&seed);
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(&first.seed, &seed);
            prop_assert!((40..=65).contains(&first.tempo));
            prop_assert_eq!(first.scale.as_slice(), first.scale_name.intervals());
            assert_structure_valid(&first);
        }

        #[test]
        fn fifth_degree_is_never_dominant(seed in "[a-z0-9]{1,12}") {
            let params = generate(&seed);
            for chord in &params.chord_progression {
                prop_assert!(chord.scale_degree_index < params.scale.len());
                if chord.scale_degree_index == 4 {
                    prop_assert_ne!(chord.quality_name, ChordQuality::Dominant7);
                }
            }
        }
    }
}
