//! Instrument-facing seam of the engine.
//!
//! The scheduler hands each beat to a [`Voicing`], which turns the musical
//! context into [`NoteEvent`]s. The controller forwards those to an
//! [`InstrumentSink`] that owns the actual synthesis. Synthesis itself lives
//! outside this crate; [`NoteQueue`] is a sink that simply holds notes until
//! they are due, which is enough for simulation and tests.

use std::{cmp::Ordering, collections::BinaryHeap, fmt};

use serde::{Deserialize, Serialize};

use crate::{
    generator::{hash_seed, Lcg, Syncopation},
    scheduler::BeatContext,
    timeline::BEATS_PER_BAR,
    Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InstrumentId {
    Pad,
    SubBass,
    Arpeggio,
    Lead,
    TonalPercussion,
    Atmosphere,
}

impl InstrumentId {
    pub const ALL: [InstrumentId; 6] = [
        InstrumentId::Pad,
        InstrumentId::SubBass,
        InstrumentId::Arpeggio,
        InstrumentId::Lead,
        InstrumentId::TonalPercussion,
        InstrumentId::Atmosphere,
    ];

    pub fn name(self) -> &'static str {
        match self {
            InstrumentId::Pad => "pad",
            InstrumentId::SubBass => "subBass",
            InstrumentId::Arpeggio => "arpeggio",
            InstrumentId::Lead => "lead",
            InstrumentId::TonalPercussion => "tonalPercussion",
            InstrumentId::Atmosphere => "atmosphere",
        }
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One note to be played at an absolute audio-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteEvent {
    /// Generation of the song that produced the note.
    pub generation: u64,
    pub instrument: InstrumentId,
    pub time: f64,
    /// MIDI pitch.
    pub pitch: i32,
    /// 0..=1
    pub velocity: f32,
    /// Seconds.
    pub duration: f64,
}

impl NoteEvent {
    /// A note starting on the beat described by `context`.
    pub fn for_beat(
        context: &BeatContext,
        instrument: InstrumentId,
        pitch: i32,
        velocity: f32,
        beats: f64,
    ) -> Self {
        Self {
            generation: context.generation,
            instrument,
            time: context.time,
            pitch,
            velocity: velocity.clamp(0.0, 1.0),
            duration: beats * context.seconds_per_beat,
        }
    }
}

/// Receives notes from the controller.
pub trait InstrumentSink {
    /// Schedules `note` for playback at `note.time`.
    fn trigger(&mut self, note: NoteEvent) -> Result<()>;

    /// Drops every note not yet sounding.
    fn cancel_all(&mut self);

    /// Tears the instruments down once the stop fade has finished.
    fn release(&mut self);
}

/// Instrument logic: decides what sounds on each beat.
pub trait Voicing {
    /// Instruments this voicing plays. They are routed into the graph on
    /// start.
    fn instruments(&self) -> &[InstrumentId];

    fn voice(&mut self, context: &BeatContext) -> Vec<NoteEvent>;

    /// Forgets per-song state before a new song starts.
    fn reset(&mut self) {}
}

#[derive(Debug, Clone)]
struct Pending {
    sequence: u64,
    note: NoteEvent,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    // Reversed so the max-heap pops the earliest note first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .note
            .time
            .total_cmp(&self.note.time)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Sink that buffers notes in time order until they are due.
#[derive(Debug, Default)]
pub struct NoteQueue {
    pending: BinaryHeap<Pending>,
    next_sequence: u64,
    triggered: u64,
    releases: u32,
}

impl NoteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Notes accepted since construction, including cancelled ones.
    pub fn triggered(&self) -> u64 {
        self.triggered
    }

    pub fn releases(&self) -> u32 {
        self.releases
    }

    /// Pending notes in playback order.
    pub fn pending(&self) -> Vec<NoteEvent> {
        let mut pending: Vec<_> = self.pending.iter().cloned().collect();
        pending.sort_by(|a, b| b.cmp(a));
        pending.into_iter().map(|entry| entry.note).collect()
    }

    /// Removes and returns every note starting at or before `now`.
    pub fn drain_due(&mut self, now: f64) -> Vec<NoteEvent> {
        let mut due = Vec::new();
        while self
            .pending
            .peek()
            .is_some_and(|entry| entry.note.time <= now)
        {
            if let Some(entry) = self.pending.pop() {
                due.push(entry.note);
            }
        }
        due
    }
}

impl InstrumentSink for NoteQueue {
    fn trigger(&mut self, note: NoteEvent) -> Result<()> {
        self.pending.push(Pending {
            sequence: self.next_sequence,
            note,
        });
        self.next_sequence += 1;
        self.triggered += 1;
        Ok(())
    }

    fn cancel_all(&mut self) {
        if !self.pending.is_empty() {
            tracing::debug!(dropped = self.pending.len(), "pending notes cancelled");
        }
        self.pending.clear();
    }

    fn release(&mut self) {
        self.pending.clear();
        self.releases += 1;
    }
}

const BASIC_INSTRUMENTS: [InstrumentId; 3] = [
    InstrumentId::Pad,
    InstrumentId::SubBass,
    InstrumentId::TonalPercussion,
];

/// Small deterministic voicing: sub-bass on every chord change, pad chords
/// on the base pulse and sparse off-beat bell tones.
///
/// Every random choice is derived from the song seed and the absolute beat
/// index, so a beat always voices the same way no matter when it is
/// scheduled.
#[derive(Debug, Clone, Default)]
pub struct BasicVoicing;

impl BasicVoicing {
    pub fn new() -> Self {
        Self
    }

    fn beat_rng(context: &BeatContext) -> Lcg {
        let salt = (context.beat_index as u32).wrapping_mul(0x9E37_79B9);
        Lcg::new(hash_seed(&context.song.seed) ^ salt)
    }
}

fn syncopation_bias(syncopation: Syncopation) -> f64 {
    match syncopation {
        Syncopation::None => 0.0,
        Syncopation::Low => 0.1,
        Syncopation::MediumGentle => 0.2,
    }
}

impl Voicing for BasicVoicing {
    fn instruments(&self) -> &[InstrumentId] {
        &BASIC_INSTRUMENTS
    }

    fn voice(&mut self, context: &BeatContext) -> Vec<NoteEvent> {
        let mut notes = Vec::new();
        let tones = context.chord.tones();
        let intensity = context.intensity as f32;

        if context.chord_started {
            notes.push(NoteEvent::for_beat(
                context,
                InstrumentId::SubBass,
                context.chord.root_pitch - 12,
                0.6,
                BEATS_PER_BAR as f64,
            ));
        }

        let pulse = context.rhythm.base_pulse.beats();
        if f64::from(context.beat) % pulse == 0.0 {
            for pitch in &tones {
                notes.push(NoteEvent::for_beat(
                    context,
                    InstrumentId::Pad,
                    *pitch,
                    0.3 + 0.4 * intensity,
                    pulse,
                ));
            }
        }

        if context.beat % 2 == 1 {
            let mut rng = Self::beat_rng(context);
            let chance = context.rhythm.density.fill() * context.intensity
                + syncopation_bias(context.rhythm.syncopation);
            if rng.next_unit() < chance {
                let pitch = *rng.pick(&tones) + 24;
                notes.push(NoteEvent::for_beat(
                    context,
                    InstrumentId::TonalPercussion,
                    pitch,
                    0.2 + 0.5 * intensity,
                    0.5,
                ));
            }
        }

        notes
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::generator::{self, SectionName};

    fn context(beat_index: u64, chord_started: bool, intensity: f64) -> BeatContext {
        let song = Arc::new(generator::generate("voicing"));
        let chord = song.chord_progression[0];
        let rhythm = song.rhythmic_dna;
        BeatContext {
            generation: 3,
            seconds_per_beat: 60.0 / f64::from(song.tempo),
            song,
            time: beat_index as f64,
            beat_index,
            bar: beat_index / BEATS_PER_BAR,
            beat: (beat_index % BEATS_PER_BAR) as u8,
            chord_index: 0,
            chord,
            chord_started,
            section_index: 0,
            section: SectionName::Intro,
            intensity,
            rhythm,
        }
    }

    fn note(time: f64) -> NoteEvent {
        NoteEvent {
            generation: 1,
            instrument: InstrumentId::Pad,
            time,
            pitch: 60,
            velocity: 0.5,
            duration: 1.0,
        }
    }

    #[test]
    fn queue_drains_in_time_order() {
        let mut queue = NoteQueue::new();
        queue.trigger(note(2.0)).unwrap();
        queue.trigger(note(0.5)).unwrap();
        queue.trigger(note(1.0)).unwrap();

        let times: Vec<_> = queue.pending().iter().map(|note| note.time).collect();
        assert_eq!(times, vec![0.5, 1.0, 2.0]);

        let due = queue.drain_due(1.0);
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].time, 0.5);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn queue_keeps_insertion_order_for_simultaneous_notes() {
        let mut queue = NoteQueue::new();
        for pitch in [60, 64, 67] {
            queue.trigger(NoteEvent { pitch, ..note(1.0) }).unwrap();
        }
        let pitches: Vec<_> = queue.drain_due(1.0).iter().map(|note| note.pitch).collect();
        assert_eq!(pitches, vec![60, 64, 67]);
    }

    #[test]
    fn cancel_and_release_empty_the_queue() {
        let mut queue = NoteQueue::new();
        queue.trigger(note(1.0)).unwrap();
        queue.cancel_all();
        assert!(queue.is_empty());

        queue.trigger(note(1.0)).unwrap();
        queue.release();
        assert!(queue.is_empty());
        assert_eq!(queue.releases(), 1);
        assert_eq!(queue.triggered(), 2);
    }

    #[test]
    fn sub_bass_follows_chord_changes() {
        let mut voicing = BasicVoicing::new();
        let with_change = voicing.voice(&context(0, true, 0.5));
        let bass: Vec<_> = with_change
            .iter()
            .filter(|note| note.instrument == InstrumentId::SubBass)
            .collect();
        assert_eq!(bass.len(), 1);
        assert_eq!(bass[0].pitch, with_change_root() - 12);
        assert_eq!(bass[0].generation, 3);

        let without_change = voicing.voice(&context(1, false, 0.5));
        assert!(without_change
            .iter()
            .all(|note| note.instrument != InstrumentId::SubBass));
    }

    fn with_change_root() -> i32 {
        generator::generate("voicing").chord_progression[0].root_pitch
    }

    #[test]
    fn pad_plays_the_chord_on_the_downbeat() {
        let mut voicing = BasicVoicing::new();
        let context = context(4, true, 0.5);
        let pads: Vec<_> = voicing
            .voice(&context)
            .into_iter()
            .filter(|note| note.instrument == InstrumentId::Pad)
            .map(|note| note.pitch)
            .collect();
        assert_eq!(pads, context.chord.tones());
    }

    #[test]
    fn voicing_is_deterministic_per_beat() {
        let mut first = BasicVoicing::new();
        let mut second = BasicVoicing::new();
        for beat_index in 0..64 {
            let context = context(beat_index, beat_index % 4 == 0, 0.9);
            assert_eq!(first.voice(&context), second.voice(&context));
        }
    }

    #[test]
    fn silent_sections_have_no_percussion_without_syncopation() {
        let mut voicing = BasicVoicing::new();
        let mut context = context(1, false, 0.0);
        context.rhythm.syncopation = Syncopation::None;
        for beat_index in [1, 3, 5, 7, 9, 11] {
            context.beat_index = beat_index;
            context.beat = (beat_index % BEATS_PER_BAR) as u8;
            assert!(voicing
                .voice(&context)
                .iter()
                .all(|note| note.instrument != InstrumentId::TonalPercussion));
        }
    }

    #[test]
    fn notes_land_on_the_beat_time() {
        let mut voicing = BasicVoicing::new();
        let context = context(8, true, 0.5);
        for note in voicing.voice(&context) {
            assert_eq!(note.time, context.time);
            assert!(note.duration > 0.0);
            assert!((0.0..=1.0).contains(&note.velocity));
        }
    }
}
