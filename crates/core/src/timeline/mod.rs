use serde::{Deserialize, Serialize};

use crate::{AuraError, Result, SongParameters};

/// Beats in every bar. The engine only plays 4/4.
pub const BEATS_PER_BAR: u64 = 4;

/// Tempo-derived conversions between musical and audio-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MusicalTime {
    tempo: u32,
    seconds_per_beat: f64,
    seconds_per_bar: f64,
}

impl MusicalTime {
    pub fn new(tempo: u32) -> Result<Self> {
        if tempo == 0 {
            return Err(AuraError::InvalidInput("tempo must be positive"));
        }
        let seconds_per_beat = 60.0 / f64::from(tempo);
        Ok(Self {
            tempo,
            seconds_per_beat,
            seconds_per_bar: seconds_per_beat * BEATS_PER_BAR as f64,
        })
    }

    pub fn for_song(params: &SongParameters) -> Result<Self> {
        Self::new(params.tempo)
    }

    pub fn tempo(&self) -> u32 {
        self.tempo
    }

    pub fn seconds_per_beat(&self) -> f64 {
        self.seconds_per_beat
    }

    pub fn seconds_per_bar(&self) -> f64 {
        self.seconds_per_bar
    }

    pub fn bars_to_seconds(&self, bars: u32) -> f64 {
        f64::from(bars) * self.seconds_per_bar
    }

    /// Offset of an absolute beat index from the song start. Computed by
    /// multiplication so long songs do not accumulate rounding error.
    pub fn beat_offset(&self, beat_index: u64) -> f64 {
        beat_index as f64 * self.seconds_per_beat
    }

    /// Fractional beats elapsed between `anchor` and `time`.
    pub fn beats_between(&self, anchor: f64, time: f64) -> f64 {
        (time - anchor) / self.seconds_per_beat
    }
}

/// Where a given absolute beat falls within a song's arrangement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeatPosition {
    pub beat_index: u64,
    pub bar: u64,
    pub beat: u8,
    /// `None` once the arrangement has run out of sections.
    pub section_index: Option<usize>,
    /// First beat of the section after `section_index`.
    pub next_section_beat: u64,
}

impl BeatPosition {
    /// Locates `beat_index` within `structure` (section durations in bars).
    pub fn locate(beat_index: u64, structure: &[u32]) -> Self {
        let bar = beat_index / BEATS_PER_BAR;
        let beat = (beat_index % BEATS_PER_BAR) as u8;

        let mut section_end = 0_u64;
        let mut section_index = None;
        for (index, bars) in structure.iter().enumerate() {
            section_end += u64::from(*bars) * BEATS_PER_BAR;
            if beat_index < section_end {
                section_index = Some(index);
                break;
            }
        }

        Self {
            beat_index,
            bar,
            beat,
            section_index,
            next_section_beat: section_end,
        }
    }
}
