//! Core library for the Aura generative music engine.
//!
//! A seed string is turned into a complete [`SongParameters`] value by the
//! [`generator`]. The [`playback`] controller hands that song to the
//! [`scheduler`], which walks the arrangement bar by bar against the audio
//! clock and emits beat contexts a short lookahead ahead of time. Instrument
//! logic turns those contexts into notes; the [`graph`] mixes whatever the
//! instruments render and exposes scalar [`AudioFeatures`] for visualisers.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod generator;
pub mod graph;
pub mod instruments;
pub mod playback;
pub mod scheduler;
pub mod timeline;

pub use analysis::{AnalysisEngine, AudioFeatures};
pub use audio::{AudioClock, AudioDevice, ClockState, GraphHandle, InstantClock, ManualClock};
pub use config::{AudioConfig, EngineConfig, GeneratorConfig, PlaybackConfig, SchedulerConfig};
pub use error::{AuraError, Result};
pub use generator::{generate, SongGenerator, SongParameters};
pub use graph::AudioGraph;
pub use instruments::{BasicVoicing, InstrumentId, InstrumentSink, NoteEvent, NoteQueue, Voicing};
pub use playback::{PlaybackController, PlaybackState};
pub use scheduler::{BeatContext, LookaheadScheduler, SchedulerEvent, SchedulerState};
pub use timeline::{BeatPosition, MusicalTime};
