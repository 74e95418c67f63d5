//! Lookahead scheduling of musical events against the audio clock.
//!
//! The driver calls [`LookaheadScheduler::poll`] every wake interval with the
//! current audio-clock time. Each call emits every beat whose start falls
//! inside `now + lookahead`, so a late wake-up only delays the enqueue and
//! never the sound. Within one beat the checks run section, then chord, then
//! the beat itself, so simultaneous boundaries are all applied before any
//! note for that instant is produced.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    config::SchedulerConfig,
    generator::{ChordEntry, RhythmicDna, SectionName, SongSection},
    timeline::{BeatPosition, MusicalTime, BEATS_PER_BAR},
    AuraError, Result, SongParameters,
};

/// Tolerance used when rounding a fractional musical position up to the next
/// beat boundary.
const BEAT_EPSILON: f64 = 1e-9;

/// Musical context handed to instrument logic for one beat.
#[derive(Debug, Clone)]
pub struct BeatContext {
    /// Identifies which started song this beat belongs to.
    pub generation: u64,
    pub song: Arc<SongParameters>,
    /// Audio-clock time the beat starts at.
    pub time: f64,
    pub beat_index: u64,
    pub bar: u64,
    pub beat: u8,
    pub chord_index: usize,
    pub chord: ChordEntry,
    /// True on the beat a new chord begins.
    pub chord_started: bool,
    pub section_index: usize,
    pub section: SectionName,
    pub intensity: f64,
    pub rhythm: RhythmicDna,
    pub seconds_per_beat: f64,
}

/// Everything the scheduler emits, in strictly increasing time order.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    SectionChange {
        generation: u64,
        time: f64,
        section_index: usize,
        section: SongSection,
    },
    ChordChange {
        generation: u64,
        time: f64,
        chord_index: usize,
        chord: ChordEntry,
    },
    Beat(BeatContext),
    /// The arrangement ran out of sections. Nothing follows.
    SongEnd { generation: u64, time: f64 },
}

impl SchedulerEvent {
    pub fn time(&self) -> f64 {
        match self {
            SchedulerEvent::SectionChange { time, .. }
            | SchedulerEvent::ChordChange { time, .. }
            | SchedulerEvent::SongEnd { time, .. } => *time,
            SchedulerEvent::Beat(context) => context.time,
        }
    }

    pub fn generation(&self) -> u64 {
        match self {
            SchedulerEvent::SectionChange { generation, .. }
            | SchedulerEvent::ChordChange { generation, .. }
            | SchedulerEvent::SongEnd { generation, .. } => *generation,
            SchedulerEvent::Beat(context) => context.generation,
        }
    }
}

/// Observable scheduler position. Reset to [`Default`] when playback stops.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerState {
    pub running: bool,
    /// Audio-clock time of beat zero. Never moves while a song plays.
    pub song_start_time: f64,
    pub next_event_time: f64,
    /// Absolute index of the next beat to emit.
    pub next_beat_index: u64,
    pub current_bar: u64,
    /// 0..=3
    pub current_beat: u8,
    /// `None` until the first chord boundary has been crossed.
    pub current_chord_index: Option<usize>,
    /// Chord boundaries crossed so far.
    pub chord_changes: u64,
    pub current_section_index: usize,
    pub next_chord_time: f64,
    pub next_section_time: f64,
    pub paused_at_clock_time: Option<f64>,
    pub paused_at_musical_beat: Option<f64>,
}

#[derive(Debug)]
pub struct LookaheadScheduler {
    song: Arc<SongParameters>,
    generation: u64,
    time: MusicalTime,
    lookahead: f64,
    section_bars: Vec<u32>,
    next_chord_beat: u64,
    next_section_beat: u64,
    state: SchedulerState,
}

impl LookaheadScheduler {
    /// Prepares a scheduler whose first beat lands on `start_time`.
    pub fn new(
        song: Arc<SongParameters>,
        generation: u64,
        config: &SchedulerConfig,
        start_time: f64,
    ) -> Result<Self> {
        if song.chord_progression.is_empty() {
            return Err(AuraError::InvalidInput("song has no chord progression"));
        }
        if song.song_structure.is_empty() {
            return Err(AuraError::InvalidInput("song has no sections"));
        }

        let time = MusicalTime::for_song(&song)?;
        let section_bars: Vec<u32> = song
            .song_structure
            .iter()
            .map(|section| section.duration_bars)
            .collect();
        let next_section_beat = u64::from(section_bars[0]) * BEATS_PER_BAR;

        let mut scheduler = Self {
            song,
            generation,
            time,
            lookahead: config.lookahead_secs,
            section_bars,
            next_chord_beat: 0,
            next_section_beat,
            state: SchedulerState {
                running: true,
                song_start_time: start_time,
                ..SchedulerState::default()
            },
        };
        scheduler.refresh_times();
        Ok(scheduler)
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn song(&self) -> &Arc<SongParameters> {
        &self.song
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn musical_time(&self) -> MusicalTime {
        self.time
    }

    pub fn is_running(&self) -> bool {
        self.state.running
    }

    /// Stops further emission. Already returned events are unaffected.
    pub fn halt(&mut self) {
        self.state.running = false;
    }

    /// Fractional beats since the song started, measured on the audio clock.
    pub fn musical_position(&self, now: f64) -> f64 {
        self.time.beats_between(self.state.song_start_time, now)
    }

    /// Emits every event due before `now + lookahead`.
    pub fn poll(&mut self, now: f64) -> Vec<SchedulerEvent> {
        let mut events = Vec::new();
        let horizon = now + self.lookahead;
        while self.state.running && self.state.next_event_time < horizon {
            self.step(&mut events);
        }
        events
    }

    /// Records where the song stood when the clock was suspended.
    ///
    /// Beats that fell due after polling halted but before the suspension
    /// were never emitted. The song start moves forward by that gap so the
    /// snapshot lands on the next unplayed beat.
    pub fn mark_paused(&mut self, clock_time: f64) {
        self.state.running = false;
        let unplayed = clock_time - self.state.next_event_time;
        if unplayed > 0.0 {
            tracing::debug!(
                generation = self.generation,
                gap = unplayed,
                beat = self.state.next_beat_index,
                "holding unplayed beats across suspension"
            );
            self.state.song_start_time += unplayed;
            self.refresh_times();
        }
        self.state.paused_at_clock_time = Some(clock_time);
        self.state.paused_at_musical_beat = Some(self.musical_position(clock_time));
    }

    /// Re-enters the running state after a suspension.
    ///
    /// Position is recomputed from the song start, so it equals the paused
    /// position plus whatever the audio clock advanced while suspended. Beats already emitted are never emitted again; beats whose
    /// time passed while suspended are skipped. Returns jump events when the
    /// chord or section moved, or `SongEnd` if the arrangement was exhausted.
    pub fn resume_at(&mut self, now: f64) -> Vec<SchedulerEvent> {
        self.state.paused_at_clock_time = None;
        self.state.paused_at_musical_beat = None;
        self.state.running = true;

        let position = self.musical_position(now);
        let target = (position - BEAT_EPSILON).ceil().max(0.0) as u64;
        if target <= self.state.next_beat_index {
            return Vec::new();
        }
        self.seek(target)
    }

    fn seek(&mut self, beat_index: u64) -> Vec<SchedulerEvent> {
        let mut events = Vec::new();
        let position = BeatPosition::locate(beat_index, &self.section_bars);
        let time = self.state.song_start_time + self.time.beat_offset(beat_index);

        let Some(section_index) = position.section_index else {
            tracing::info!(generation = self.generation, "song ended while suspended");
            self.state.running = false;
            events.push(SchedulerEvent::SongEnd {
                generation: self.generation,
                time,
            });
            return events;
        };

        if section_index != self.state.current_section_index {
            self.state.current_section_index = section_index;
            events.push(SchedulerEvent::SectionChange {
                generation: self.generation,
                time,
                section_index,
                section: self.song.song_structure[section_index],
            });
        }
        self.next_section_beat = position.next_section_beat;

        let bar = position.bar;
        let previous_chord = self.state.current_chord_index;
        if position.beat == 0 {
            // The boundary at this beat is crossed by the next poll.
            self.state.chord_changes = bar;
            self.next_chord_beat = beat_index;
        } else {
            let chord_index = self.chord_index_for(bar + 1);
            self.state.chord_changes = bar + 1;
            self.state.current_chord_index = Some(chord_index);
            self.next_chord_beat = (bar + 1) * BEATS_PER_BAR;
            if previous_chord != Some(chord_index) {
                events.push(SchedulerEvent::ChordChange {
                    generation: self.generation,
                    time,
                    chord_index,
                    chord: self.song.chord_progression[chord_index],
                });
            }
        }

        self.state.next_beat_index = beat_index;
        self.state.current_bar = bar;
        self.state.current_beat = position.beat;
        self.refresh_times();
        events
    }

    fn step(&mut self, events: &mut Vec<SchedulerEvent>) {
        let beat_index = self.state.next_beat_index;
        let time = self.state.next_event_time;

        if beat_index >= self.next_section_beat {
            let next = self.state.current_section_index + 1;
            let Some(section) = self.song.song_structure.get(next).copied() else {
                tracing::info!(generation = self.generation, time, "end of song structure reached");
                self.state.running = false;
                events.push(SchedulerEvent::SongEnd {
                    generation: self.generation,
                    time,
                });
                return;
            };
            tracing::debug!(section = %section.name, time, "section change");
            self.state.current_section_index = next;
            self.next_section_beat += u64::from(section.duration_bars) * BEATS_PER_BAR;
            events.push(SchedulerEvent::SectionChange {
                generation: self.generation,
                time,
                section_index: next,
                section,
            });
        }

        let chord_started = beat_index >= self.next_chord_beat;
        if chord_started {
            self.state.chord_changes += 1;
            let chord_index = self.chord_index_for(self.state.chord_changes);
            let chord = self.song.chord_progression[chord_index];
            tracing::debug!(chord = %chord.symbol(), time, "chord change");
            self.state.current_chord_index = Some(chord_index);
            self.next_chord_beat += BEATS_PER_BAR;
            events.push(SchedulerEvent::ChordChange {
                generation: self.generation,
                time,
                chord_index,
                chord,
            });
        }

        let chord_index = self.state.current_chord_index.unwrap_or(0);
        let section = self.song.song_structure[self.state.current_section_index];
        let context = BeatContext {
            generation: self.generation,
            song: Arc::clone(&self.song),
            time,
            beat_index,
            bar: beat_index / BEATS_PER_BAR,
            beat: (beat_index % BEATS_PER_BAR) as u8,
            chord_index,
            chord: self.song.chord_progression[chord_index],
            chord_started,
            section_index: self.state.current_section_index,
            section: section.name,
            intensity: section.intensity,
            rhythm: self.song.rhythmic_dna,
            seconds_per_beat: self.time.seconds_per_beat(),
        };
        tracing::trace!(bar = context.bar, beat = context.beat, time, "beat");
        events.push(SchedulerEvent::Beat(context));

        let next = beat_index + 1;
        self.state.next_beat_index = next;
        self.state.current_bar = next / BEATS_PER_BAR;
        self.state.current_beat = (next % BEATS_PER_BAR) as u8;
        self.refresh_times();
    }

    /// Progression slot for the `changes`-th chord boundary (1-based).
    fn chord_index_for(&self, changes: u64) -> usize {
        let len = self.song.chord_progression.len() as u64;
        (changes.saturating_sub(1) % len) as usize
    }

    fn refresh_times(&mut self) {
        let start = self.state.song_start_time;
        self.state.next_event_time = start + self.time.beat_offset(self.state.next_beat_index);
        self.state.next_chord_time = start + self.time.beat_offset(self.next_chord_beat);
        self.state.next_section_time = start + self.time.beat_offset(self.next_section_beat);
    }
}
